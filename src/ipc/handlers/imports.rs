use crate::db;
use crate::import::{
    run_batch, BatchSummary, CgpaTarget, EnrollmentTarget, MarksTarget, NewStudentTarget,
};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{batch_rows, get_optional_i64, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn summary_json(summary: &BatchSummary) -> Value {
    let errors = summary
        .errors()
        .map(|o| {
            json!({
                "rowKey": o.row_key,
                "reason": o.message.clone().unwrap_or_default(),
                "outcome": o.outcome,
            })
        })
        .collect::<Vec<_>>();
    json!({
        "kind": summary.kind,
        "created": summary.created,
        "updated": summary.updated,
        "skipped": summary.skipped,
        "unresolved": summary.unresolved,
        "errored": summary.errored,
        "errors": errors,
        "outcomes": summary.outcomes,
        "batchDigest": summary.batch_digest,
        "resubmitted": summary.resubmitted,
    })
}

fn require_course(conn: &Connection, params: &Value) -> Result<String, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    if !db::course_exists(conn, &course_id)? {
        return Err(HandlerErr::new("not_found", "course not found")
            .with_details(json!({ "courseId": course_id })));
    }
    Ok(course_id)
}

fn students_import(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let rows = batch_rows::<NewStudentTarget>(params)?;
    let target = NewStudentTarget {
        config: &state.config,
    };
    Ok(summary_json(&run_batch(conn, &target, &rows)))
}

fn enrollments_upload(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let course_id = require_course(conn, params)?;
    let rows = batch_rows::<EnrollmentTarget>(params)?;
    let target = EnrollmentTarget {
        course_id: course_id.clone(),
    };
    let mut result = summary_json(&run_batch(conn, &target, &rows));
    result["courseId"] = json!(course_id);
    Ok(result)
}

fn marks_upload(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_count = match get_optional_i64(params, "classCount")? {
        Some(n) if n > 0 => n,
        Some(_) => return Err(HandlerErr::bad_params("classCount must be > 0")),
        None => return Err(HandlerErr::bad_params("missing classCount")),
    };
    let course_id = require_course(conn, params)?;
    let rows = batch_rows::<MarksTarget>(params)?;
    let target = MarksTarget {
        course_id: course_id.clone(),
        class_count,
    };
    let mut result = summary_json(&run_batch(conn, &target, &rows));
    result["courseId"] = json!(course_id);
    result["classCount"] = json!(class_count);
    Ok(result)
}

fn cgpa_upload(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let rows = batch_rows::<CgpaTarget>(params)?;
    let summary = run_batch(conn, &CgpaTarget, &rows);
    let mut result = summary_json(&summary);
    let landed = summary.created + summary.updated;
    result["success"] = json!(landed > 0 || summary.errored == 0);
    result["message"] = json!(format!(
        "CGPA uploaded: {} created, {} updated, {} failed.",
        summary.created, summary.updated, summary.errored
    ));
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.import" => students_import(state, &req.params),
        "enrollments.upload" => enrollments_upload(state, &req.params),
        "marks.upload" => marks_upload(state, &req.params),
        "cgpa.upload" => cgpa_upload(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
