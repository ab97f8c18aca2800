use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("session must not be empty")]
    BlankSession,
    #[error("no students found for session {0}")]
    NoStudents(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

/// One student's standing as read for ranking, already in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct StandingRow {
    pub standing_id: String,
    pub reg_no: String,
    pub cgpa: f64,
    pub credit_completed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankAssignment {
    pub standing_id: String,
    pub reg_no: String,
    pub cgpa: f64,
    pub credit_completed: i64,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankSummary {
    pub session: String,
    pub ranked: usize,
    pub failed: Vec<String>,
    pub assignments: Vec<RankAssignment>,
}

/// Competition ranking ("1224") over rows sorted by cgpa desc then credits desc.
///
/// Only the cgpa is compared between neighbours, so equal cgpa with different
/// credits still shares a position; credits just fix the order inside the tie.
pub fn assign_positions(sorted: &[StandingRow]) -> Vec<RankAssignment> {
    let mut out = Vec::with_capacity(sorted.len());
    // No valid cgpa is NaN, and NaN never compares equal.
    let mut last_cgpa = f64::NAN;
    let mut current = 0_i64;
    for (i, row) in sorted.iter().enumerate() {
        if row.cgpa != last_cgpa {
            current = i as i64 + 1;
            last_cgpa = row.cgpa;
        }
        out.push(RankAssignment {
            standing_id: row.standing_id.clone(),
            reg_no: row.reg_no.clone(),
            cgpa: row.cgpa,
            credit_completed: row.credit_completed,
            position: current,
        });
    }
    out
}

pub fn load_session_standings(
    conn: &Connection,
    session: &str,
) -> rusqlite::Result<Vec<StandingRow>> {
    let mut stmt = conn.prepare(
        "SELECT st.id, s.reg_no, st.cgpa, st.credit_completed
         FROM standings st
         JOIN students s ON s.id = st.student_id
         WHERE s.session = ?
         ORDER BY st.cgpa DESC, st.credit_completed DESC, s.reg_no ASC",
    )?;
    let rows = stmt
        .query_map([session], |r| {
            Ok(StandingRow {
                standing_id: r.get(0)?,
                reg_no: r.get(1)?,
                cgpa: r.get(2)?,
                credit_completed: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rank every student of `session` and write each position back one row at a time.
///
/// A failed write is recorded in `failed`; rows written before it stay written.
pub fn rank_session(conn: &Connection, session: &str) -> Result<RankSummary, RankError> {
    let session = session.trim();
    if session.is_empty() {
        return Err(RankError::BlankSession);
    }

    let standings = load_session_standings(conn, session)?;
    if standings.is_empty() {
        return Err(RankError::NoStudents(session.to_string()));
    }

    let assignments = assign_positions(&standings);
    let now = crate::db::now_rfc3339();
    let mut failed = Vec::new();
    let mut ranked = 0usize;
    for a in &assignments {
        match conn.execute(
            "UPDATE standings SET position = ?, updated_at = ? WHERE id = ?",
            (a.position, &now, &a.standing_id),
        ) {
            Ok(_) => ranked += 1,
            Err(e) => {
                tracing::warn!(reg_no = %a.reg_no, error = %e, "failed to store position");
                failed.push(a.reg_no.clone());
            }
        }
    }

    tracing::info!(session, ranked, failed = failed.len(), "session ranked");
    Ok(RankSummary {
        session: session.to_string(),
        ranked,
        failed,
        assignments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_standing, insert_student, memory_db};

    fn row(reg_no: &str, cgpa: f64, credits: i64) -> StandingRow {
        StandingRow {
            standing_id: format!("st-{reg_no}"),
            reg_no: reg_no.to_string(),
            cgpa,
            credit_completed: credits,
        }
    }

    fn positions(a: &[RankAssignment]) -> Vec<i64> {
        a.iter().map(|x| x.position).collect()
    }

    #[test]
    fn ties_share_rank_and_next_resumes_at_index() {
        let rows = vec![
            row("A", 4.0, 100),
            row("B", 4.0, 100),
            row("C", 3.5, 90),
            row("D", 3.0, 80),
        ];
        assert_eq!(positions(&assign_positions(&rows)), vec![1, 1, 3, 4]);
    }

    #[test]
    fn credits_do_not_split_equal_cgpa() {
        let rows = vec![row("A", 3.8, 120), row("B", 3.8, 96), row("C", 3.2, 140)];
        assert_eq!(positions(&assign_positions(&rows)), vec![1, 1, 3]);
    }

    #[test]
    fn three_way_tie_in_the_middle() {
        let rows = vec![
            row("A", 3.9, 1),
            row("B", 3.5, 1),
            row("C", 3.5, 1),
            row("D", 3.5, 1),
            row("E", 2.0, 1),
        ];
        assert_eq!(positions(&assign_positions(&rows)), vec![1, 2, 2, 2, 5]);
    }

    #[test]
    fn empty_input_assigns_nothing() {
        assert!(assign_positions(&[]).is_empty());
    }

    #[test]
    fn rank_session_orders_by_cgpa_then_credits_and_persists() {
        let conn = memory_db();
        let a = insert_student(&conn, "2022001", "2022-2023");
        let b = insert_student(&conn, "2022002", "2022-2023");
        let c = insert_student(&conn, "2022003", "2022-2023");
        let other = insert_student(&conn, "2021001", "2021-2022");
        insert_standing(&conn, &a, 3.5, 60);
        insert_standing(&conn, &b, 3.5, 72);
        insert_standing(&conn, &c, 3.9, 10);
        insert_standing(&conn, &other, 4.0, 100);

        let summary = rank_session(&conn, "2022-2023").expect("rank");
        assert_eq!(summary.ranked, 3);
        assert!(summary.failed.is_empty());
        let order: Vec<&str> = summary.assignments.iter().map(|a| a.reg_no.as_str()).collect();
        assert_eq!(order, vec!["2022003", "2022002", "2022001"]);
        assert_eq!(positions(&summary.assignments), vec![1, 2, 2]);

        let stored: Option<i64> = conn
            .query_row(
                "SELECT position FROM standings WHERE student_id = ?",
                [&other],
                |r| r.get(0),
            )
            .expect("query");
        assert_eq!(stored, None, "other sessions are untouched");
    }

    #[test]
    fn rerun_reproduces_identical_positions() {
        let conn = memory_db();
        for (reg, cgpa) in [("1", 3.0), ("2", 3.7), ("3", 3.7), ("4", 2.1)] {
            let id = insert_student(&conn, reg, "S");
            insert_standing(&conn, &id, cgpa, 30);
        }
        let first = rank_session(&conn, "S").expect("first");
        let second = rank_session(&conn, "S").expect("second");
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn empty_session_fails_without_writes() {
        let conn = memory_db();
        let id = insert_student(&conn, "X1", "2020-2021");
        insert_standing(&conn, &id, 3.0, 10);
        let err = rank_session(&conn, "1999-2000").expect_err("no students");
        assert!(matches!(err, RankError::NoStudents(_)));
        assert_eq!(err.to_string(), "no students found for session 1999-2000");
        let touched: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM standings WHERE position IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(touched, 0);
    }

    #[test]
    fn blank_session_is_rejected() {
        let conn = memory_db();
        assert!(matches!(
            rank_session(&conn, "   "),
            Err(RankError::BlankSession)
        ));
    }
}
