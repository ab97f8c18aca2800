use crate::cgpa;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::rank::{self, RankError};
use rusqlite::Connection;
use serde_json::{json, Value};

/// `{success, message}` envelope; precondition failures stay `ok:true` with `success:false`.
fn rank_result(conn: &Connection, session: &str) -> Result<Value, HandlerErr> {
    match rank::rank_session(conn, session) {
        Ok(summary) => {
            let success = summary.failed.is_empty();
            let message = if success {
                format!(
                    "Positions updated for {} students in session {}.",
                    summary.ranked, summary.session
                )
            } else {
                format!(
                    "Positions updated for {} students; {} could not be saved.",
                    summary.ranked,
                    summary.failed.len()
                )
            };
            Ok(json!({
                "success": success,
                "message": message,
                "session": summary.session,
                "ranked": summary.ranked,
                "failed": summary.failed,
                "assignments": summary.assignments,
            }))
        }
        Err(e @ (RankError::BlankSession | RankError::NoStudents(_))) => Ok(json!({
            "success": false,
            "message": e.to_string(),
            "ranked": 0,
        })),
        Err(RankError::Storage(e)) => Err(e.into()),
    }
}

fn handle_ranks_compute(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let session = get_optional_str(&req.params, "session").unwrap_or_default();
    rank_result(conn, &session)
}

fn handle_cgpa_recompute(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let session = get_required_str(&req.params, "session")?;
    let and_rank = req
        .params
        .get("rank")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let summary = cgpa::recompute_session(conn, &session)?;
    let mut result = json!({
        "success": true,
        "message": format!(
            "CGPA recomputed for session {}: {} created, {} updated, {} without grades.",
            session, summary.created, summary.updated, summary.skipped
        ),
        "session": session,
        "created": summary.created,
        "updated": summary.updated,
        "skipped": summary.skipped,
    });
    if and_rank {
        result["ranking"] = rank_result(conn, &session)?;
    }
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "ranks.compute" => handle_ranks_compute(state, req),
        "cgpa.recompute" => handle_cgpa_recompute(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
