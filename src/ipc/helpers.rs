use rusqlite::Connection;
use serde_json::Value;

use crate::csv;
use crate::import::{ImportTarget, RawRow};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    get_optional_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Integer param that may arrive as a JSON number or a numeric string.
pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Batch rows for target `T`, from `csvText` or from the `rows` array
/// (`students`/`users` are accepted as older spellings).
pub fn batch_rows<T: ImportTarget>(params: &Value) -> Result<Vec<RawRow>, HandlerErr> {
    let rows = if let Some(text) = params.get("csvText").and_then(|v| v.as_str()) {
        csv::rows_from_csv(text, T::FIELDS)
    } else {
        let list = ["rows", "students", "users"]
            .iter()
            .find_map(|k| params.get(*k))
            .ok_or_else(|| HandlerErr::bad_params("missing rows"))?;
        let Some(items) = list.as_array() else {
            return Err(HandlerErr::bad_params("rows must be an array"));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let obj = item.as_object().ok_or_else(|| {
                    HandlerErr::bad_params("rows must contain objects")
                        .with_details(serde_json::json!({ "index": i }))
                })?;
                Ok(obj
                    .iter()
                    .filter_map(|(k, v)| cell_text(v).map(|t| (k.clone(), t)))
                    .collect::<RawRow>())
            })
            .collect::<Result<Vec<_>, HandlerErr>>()?
    };
    if rows.is_empty() {
        return Err(HandlerErr::bad_params("no rows provided"));
    }
    Ok(rows)
}
