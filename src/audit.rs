use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db;

pub const DEFAULT_LOG_LIMIT: i64 = 10;
const UNKNOWN: &str = "Unknown";

/// Client address as seen behind a proxy: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the literal "unknown".
pub fn resolve_client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| real_ip.map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or("unknown")
        .to_string()
}

#[derive(Debug, Clone, Default)]
pub struct LoginClient {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub device: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogEntry {
    pub id: String,
    pub reg_no: String,
    pub ip: String,
    pub device: String,
    pub os: String,
    pub browser: String,
    pub created_at: String,
}

fn or_unknown(v: Option<&str>) -> String {
    v.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Append a login to the audit trail and stamp the student's `last_login`.
/// Returns `Ok(None)` when the registration number is unknown.
pub fn record_login(
    conn: &Connection,
    reg_no: &str,
    client: &LoginClient,
) -> rusqlite::Result<Option<SessionLogEntry>> {
    let Some(student_id) = db::find_student_id(conn, reg_no)? else {
        return Ok(None);
    };
    let now = db::now_rfc3339();
    let entry = SessionLogEntry {
        id: Uuid::new_v4().to_string(),
        reg_no: reg_no.to_string(),
        ip: resolve_client_ip(client.forwarded_for.as_deref(), client.real_ip.as_deref()),
        device: or_unknown(client.device.as_deref()),
        os: or_unknown(client.os.as_deref()),
        browser: or_unknown(client.browser.as_deref()),
        created_at: now.clone(),
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO session_logs(id, student_id, ip, device, os, browser, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &entry.id,
            &student_id,
            &entry.ip,
            &entry.device,
            &entry.os,
            &entry.browser,
            &entry.created_at,
        ),
    )?;
    tx.execute(
        "UPDATE students SET last_login = ? WHERE id = ?",
        (&now, &student_id),
    )?;
    tx.commit()?;
    tracing::debug!(reg_no, ip = %entry.ip, "login recorded");
    Ok(Some(entry))
}

/// Latest logins of one student, newest first.
pub fn list_for_student(
    conn: &Connection,
    reg_no: &str,
    limit: i64,
) -> rusqlite::Result<Vec<SessionLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, s.reg_no, l.ip, l.device, l.os, l.browser, l.created_at
         FROM session_logs l
         JOIN students s ON s.id = l.student_id
         WHERE s.reg_no = ?
         ORDER BY l.created_at DESC, l.rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map((reg_no, limit), map_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every login of every student who has one, grouped by reg_no ascending.
pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<SessionLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, s.reg_no, l.ip, l.device, l.os, l.browser, l.created_at
         FROM session_logs l
         JOIN students s ON s.id = l.student_id
         ORDER BY s.reg_no ASC, l.created_at DESC, l.rowid DESC",
    )?;
    let rows = stmt
        .query_map([], map_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_entry(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionLogEntry> {
    Ok(SessionLogEntry {
        id: r.get(0)?,
        reg_no: r.get(1)?,
        ip: r.get(2)?,
        device: r.get(3)?,
        os: r.get(4)?,
        browser: r.get(5)?,
        created_at: r.get(6)?,
    })
}
