use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::skills;
use serde_json::{json, Value};

fn handle_skills_list(state: &AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "skills": [] }));
    };
    Ok(json!({ "skills": skills::list_catalogue(conn)? }))
}

fn handle_skills_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    let (skill, created) = skills::create_skill(conn, &name)?;
    if created {
        tracing::info!(name = %skill.name, "skill added");
    }
    Ok(json!({ "skill": skill, "created": created }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "skills.list" => handle_skills_list(state),
        "skills.create" => handle_skills_create(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
