use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use uuid::Uuid;

fn handle_courses_list(state: &AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "courses": [] }));
    };
    // Counts let the upload screens show which courses already have data.
    let mut stmt = conn.prepare(
        "SELECT
           c.id, c.code, c.title, c.credit, c.semester,
           (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count,
           (SELECT COUNT(*) FROM orps_marks m WHERE m.course_id = c.id) AS marks_count
         FROM courses c
         ORDER BY c.semester, c.code",
    )?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "credit": r.get::<_, f64>(3)?,
                "semester": r.get::<_, String>(4)?,
                "enrollmentCount": r.get::<_, i64>(5)?,
                "marksCount": r.get::<_, i64>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn handle_courses_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let code = get_required_str(&req.params, "code")?;
    let title = get_required_str(&req.params, "title")?;
    let semester = get_required_str(&req.params, "semester")?;
    let credit = match req.params.get("credit") {
        Some(v) => v
            .as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            .filter(|c| c.is_finite() && *c >= 0.0)
            .ok_or_else(|| HandlerErr::bad_params("credit must be a non-negative number"))?,
        None => return Err(HandlerErr::bad_params("missing credit")),
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, title, credit, semester) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &code, &title, credit, &semester),
    ) {
        let code_taken = matches!(
            &e,
            rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
        );
        if code_taken {
            return Err(HandlerErr::new("conflict", "course code already exists")
                .with_details(json!({ "code": code })));
        }
        return Err(HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "courses" })));
    }

    Ok(json!({
        "courseId": course_id,
        "code": code,
        "title": title,
        "credit": credit,
        "semester": semester,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "courses.list" => handle_courses_list(state),
        "courses.create" => handle_courses_create(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
