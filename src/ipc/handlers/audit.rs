use crate::audit::{self, LoginClient, DEFAULT_LOG_LIMIT};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_optional_i64, get_optional_str, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_record_login(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let reg_no = get_required_str(&req.params, "regNo")?;
    let client = LoginClient {
        forwarded_for: get_optional_str(&req.params, "forwardedFor"),
        real_ip: get_optional_str(&req.params, "realIp"),
        device: get_optional_str(&req.params, "device"),
        os: get_optional_str(&req.params, "os"),
        browser: get_optional_str(&req.params, "browser"),
    };
    match audit::record_login(conn, &reg_no, &client)? {
        Some(entry) => Ok(json!({ "entry": entry })),
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "regNo": reg_no }))),
    }
}

fn handle_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let entries = match get_optional_str(&req.params, "regNo") {
        Some(reg_no) => {
            let limit = get_optional_i64(&req.params, "limit")?.unwrap_or(DEFAULT_LOG_LIMIT);
            if limit <= 0 {
                return Err(HandlerErr::bad_params("limit must be > 0"));
            }
            audit::list_for_student(conn, &reg_no, limit)?
        }
        None => audit::list_all(conn)?,
    };
    Ok(json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "audit.recordLogin" => handle_record_login(state, req),
        "audit.list" => handle_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
