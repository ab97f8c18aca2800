use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::skills;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const STUDENT_COLUMNS: &str = "s.id, s.reg_no, s.full_name, s.nick_name, s.email, s.gender, s.phone_number,
       s.session, s.role, s.linkedin_id, s.github_id, s.facebook, s.profile_pic, s.last_login,
       st.cgpa, st.credit_completed, st.position";

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "regNo": r.get::<_, String>(1)?,
        "fullName": r.get::<_, String>(2)?,
        "nickName": r.get::<_, Option<String>>(3)?,
        "email": r.get::<_, String>(4)?,
        "gender": r.get::<_, String>(5)?,
        "phoneNumber": r.get::<_, Option<String>>(6)?,
        "session": r.get::<_, String>(7)?,
        "role": r.get::<_, String>(8)?,
        "linkedinId": r.get::<_, Option<String>>(9)?,
        "githubId": r.get::<_, Option<String>>(10)?,
        "facebook": r.get::<_, Option<String>>(11)?,
        "profilePic": r.get::<_, Option<String>>(12)?,
        "lastLogin": r.get::<_, Option<String>>(13)?,
        "cgpa": r.get::<_, Option<f64>>(14)?,
        "creditCompleted": r.get::<_, Option<i64>>(15)?,
        "position": r.get::<_, Option<i64>>(16)?,
    }))
}

fn load_student(conn: &Connection, reg_no: &str) -> Result<Value, HandlerErr> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students s
         LEFT JOIN standings st ON st.student_id = s.id
         WHERE s.reg_no = ?"
    );
    let mut student = conn
        .query_row(&sql, [reg_no], student_json)
        .optional()?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "student not found")
                .with_details(json!({ "regNo": reg_no }))
        })?;
    let student_id = student["id"].as_str().unwrap_or_default().to_string();
    student["skills"] = json!(skills::skills_of(conn, &student_id)?);
    Ok(student)
}

fn handle_students_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "students": [] }));
    };
    let session = get_optional_str(&req.params, "session");
    let sql = format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students s
         LEFT JOIN standings st ON st.student_id = s.id
         WHERE (?1 IS NULL OR s.session = ?1)
         ORDER BY s.reg_no"
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([&session], student_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

/// Case-insensitive substring match on full name, nick name or reg_no.
/// A blank query matches nobody.
fn handle_students_search(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "students": [] }));
    };
    let Some(query) = get_optional_str(&req.params, "query") else {
        return Ok(json!({ "students": [] }));
    };
    let escaped = query
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let sql = format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students s
         LEFT JOIN standings st ON st.student_id = s.id
         WHERE s.full_name LIKE ?1 ESCAPE '\\'
            OR IFNULL(s.nick_name, '') LIKE ?1 ESCAPE '\\'
            OR s.reg_no LIKE ?1 ESCAPE '\\'
         ORDER BY s.reg_no ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([&pattern], student_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "query": query, "students": students }))
}

fn handle_students_get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let reg_no = get_required_str(&req.params, "regNo")?;
    Ok(json!({ "student": load_student(conn, &reg_no)? }))
}

fn handle_students_sessions(state: &AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "sessions": [] }));
    };
    let mut stmt = conn.prepare(
        "SELECT session, COUNT(*) FROM students GROUP BY session ORDER BY session DESC",
    )?;
    let sessions = stmt
        .query_map([], |r| {
            Ok(json!({
                "session": r.get::<_, String>(0)?,
                "studentCount": r.get::<_, i64>(1)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": sessions }))
}

/// Self-service fields. A key that is present overwrites (empty string clears);
/// an absent key leaves the column alone.
const PROFILE_FIELDS: [(&str, &str); 6] = [
    ("nickName", "nick_name"),
    ("phoneNumber", "phone_number"),
    ("linkedinId", "linkedin_id"),
    ("githubId", "github_id"),
    ("facebook", "facebook"),
    ("profilePicUrl", "profile_pic"),
];

/// `skills`: absent leaves the set alone; an array of skill ids replaces it.
fn skill_ids_param(params: &Value) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(v) = params.get("skills") else {
        return Ok(None);
    };
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params("skills must be an array of skill ids"));
    };
    let mut ids: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr::bad_params("skills must be an array of skill ids"));
        };
        if !ids.iter().any(|x| x == id) {
            ids.push(id.to_string());
        }
    }
    Ok(Some(ids))
}

fn handle_students_update_profile(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let reg_no = get_required_str(&req.params, "regNo")?;
    let Some(student_id) = db::find_student_id(conn, &reg_no)? else {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "regNo": reg_no })));
    };

    let skill_ids = skill_ids_param(&req.params)?;
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Option<String>> = Vec::new();
    for (key, column) in PROFILE_FIELDS {
        match req.params.get(key) {
            None => {}
            Some(Value::Null) => {
                sets.push(format!("{column} = ?"));
                values.push(None);
            }
            Some(Value::String(s)) => {
                let t = s.trim();
                sets.push(format!("{column} = ?"));
                values.push(if t.is_empty() { None } else { Some(t.to_string()) });
            }
            Some(_) => {
                return Err(HandlerErr::bad_params(format!("{key} must be a string or null")))
            }
        }
    }
    if sets.is_empty() && skill_ids.is_none() {
        return Err(HandlerErr::bad_params("no profile fields to update"));
    }
    if let Some(ids) = skill_ids.as_deref() {
        let missing = skills::unknown_ids(conn, ids)?;
        if !missing.is_empty() {
            return Err(HandlerErr::new("not_found", "unknown skill id")
                .with_details(json!({ "skillIds": missing })));
        }
    }
    let field_count = sets.len();
    sets.push("updated_at = ?".to_string());
    values.push(Some(db::now_rfc3339()));
    values.push(Some(student_id.clone()));

    let tx = conn.unchecked_transaction()?;
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    tx.execute(&sql, rusqlite::params_from_iter(values.iter()))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if let Some(ids) = skill_ids.as_deref() {
        skills::replace_for_student(&tx, &student_id, ids)
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    tx.commit()?;
    tracing::info!(
        reg_no = %reg_no,
        fields = field_count,
        skills = ?skill_ids.as_ref().map(Vec::len),
        "profile updated"
    );

    Ok(json!({
        "success": true,
        "message": "Profile updated successfully",
        "student": load_student(conn, &reg_no)?,
    }))
}

/// Enrollments merged with ORPS marks by course, grouped per semester.
fn handle_students_results(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let reg_no = get_required_str(&req.params, "regNo")?;
    let student = load_student(conn, &reg_no)?;
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut stmt = conn.prepare(
        "SELECT c.semester, c.code, c.title, c.credit, e.grade,
                m.attendance, m.class_count, m.term_test, m.evaluation, m.part_a, m.part_b
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         LEFT JOIN orps_marks m ON m.student_id = e.student_id AND m.course_id = e.course_id
         WHERE e.student_id = ?
         ORDER BY c.semester, c.code",
    )?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let semester: String = r.get(0)?;
            Ok((
                semester,
                json!({
                    "code": r.get::<_, String>(1)?,
                    "title": r.get::<_, String>(2)?,
                    "credit": r.get::<_, f64>(3)?,
                    "grade": r.get::<_, Option<String>>(4)?,
                    "attendance": r.get::<_, Option<i64>>(5)?,
                    "classCount": r.get::<_, Option<i64>>(6)?,
                    "termTest": r.get::<_, Option<f64>>(7)?,
                    "evaluation": r.get::<_, Option<f64>>(8)?,
                    "partA": r.get::<_, Option<f64>>(9)?,
                    "partB": r.get::<_, Option<f64>>(10)?,
                }),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_semester: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (semester, row) in rows {
        by_semester.entry(semester).or_default().push(row);
    }
    let semesters = by_semester
        .into_iter()
        .map(|(semester, courses)| json!({ "semester": semester, "courses": courses }))
        .collect::<Vec<_>>();

    Ok(json!({
        "regNo": reg_no,
        "cgpa": student.get("cgpa").cloned().unwrap_or(Value::Null),
        "creditCompleted": student.get("creditCompleted").cloned().unwrap_or(Value::Null),
        "position": student.get("position").cloned().unwrap_or(Value::Null),
        "semesters": semesters,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.search" => handle_students_search(state, req),
        "students.get" => handle_students_get(state, req),
        "students.sessions" => handle_students_sessions(state),
        "students.updateProfile" => handle_students_update_profile(state, req),
        "students.results" => handle_students_results(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
