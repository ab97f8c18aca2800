use rusqlite::Connection;
use serde::Serialize;

use crate::import::{upsert_standing, Applied};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradedCredit {
    pub credit: f64,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgpaCalc {
    pub cgpa: f64,
    pub credit_completed: i64,
}

/// Two-decimal rounding, half away from zero.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Credit-weighted grade point average over graded courses.
///
/// A missing or zero grade means the course is not completed and carries no
/// credit. Returns `None` when nothing counts.
pub fn weighted_cgpa<I>(records: I) -> Option<CgpaCalc>
where
    I: IntoIterator<Item = GradedCredit>,
{
    let mut total_credits = 0.0_f64;
    let mut weighted = 0.0_f64;
    for r in records {
        let Some(g) = r.grade.filter(|g| *g != 0.0) else {
            continue;
        };
        total_credits += r.credit;
        weighted += r.credit * g;
    }
    if total_credits == 0.0 {
        return None;
    }
    Some(CgpaCalc {
        cgpa: round_2(weighted / total_credits),
        credit_completed: total_credits as i64,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Rebuild every standing of `session` from its enrollment grades.
pub fn recompute_session(conn: &Connection, session: &str) -> rusqlite::Result<RecomputeSummary> {
    let mut student_stmt =
        conn.prepare("SELECT id FROM students WHERE session = ? ORDER BY reg_no")?;
    let student_ids = student_stmt
        .query_map([session], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grade_stmt = conn.prepare(
        "SELECT c.credit, e.grade
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_id = ? AND e.grade IS NOT NULL",
    )?;

    let mut summary = RecomputeSummary::default();
    for student_id in &student_ids {
        let records = grade_stmt
            .query_map([student_id], |r| {
                let credit: f64 = r.get(0)?;
                let grade: String = r.get(1)?;
                Ok(GradedCredit {
                    credit,
                    grade: grade.trim().parse::<f64>().ok().filter(|g| g.is_finite()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let Some(calc) = weighted_cgpa(records) else {
            summary.skipped += 1;
            continue;
        };
        match upsert_standing(conn, student_id, calc.cgpa, calc.credit_completed)? {
            Applied::Created => summary.created += 1,
            _ => summary.updated += 1,
        }
    }

    tracing::info!(
        session,
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        "cgpa recomputed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_course, insert_student, memory_db};

    fn gc(credit: f64, grade: Option<f64>) -> GradedCredit {
        GradedCredit { credit, grade }
    }

    #[test]
    fn zero_and_missing_grades_carry_no_credit() {
        let calc = weighted_cgpa([
            gc(3.0, Some(4.0)),
            gc(1.0, Some(3.0)),
            gc(2.0, Some(0.0)),
            gc(1.5, None),
        ])
        .expect("calc");
        assert_eq!(calc.cgpa, 3.75);
        assert_eq!(calc.credit_completed, 4);
    }

    #[test]
    fn rounds_to_two_decimals() {
        let calc = weighted_cgpa([gc(3.0, Some(3.75)), gc(3.0, Some(3.5)), gc(3.0, Some(3.25))])
            .expect("calc");
        assert_eq!(calc.cgpa, 3.5);
        let calc = weighted_cgpa([gc(2.0, Some(4.0)), gc(1.0, Some(3.25))]).expect("calc");
        assert_eq!(calc.cgpa, 3.75);
        let calc = weighted_cgpa([gc(1.0, Some(4.0)), gc(2.0, Some(3.0))]).expect("calc");
        assert_eq!(calc.cgpa, 3.33);
    }

    #[test]
    fn nothing_graded_yields_none() {
        assert_eq!(weighted_cgpa([gc(3.0, Some(0.0))]), None);
        assert_eq!(weighted_cgpa(Vec::new()), None);
    }

    #[test]
    fn recompute_writes_standings_for_session_only() {
        let conn = memory_db();
        let a = insert_student(&conn, "R1", "2021-2022");
        let _b = insert_student(&conn, "R2", "2021-2022");
        let c = insert_student(&conn, "R3", "2020-2021");
        let swe = insert_course(&conn, "SWE111", 3.0, "1-1");
        let mat = insert_course(&conn, "MAT102", 1.0, "1-1");
        for (student, course, grade) in [(&a, &swe, "4.00"), (&a, &mat, "3.00"), (&c, &swe, "3.5")] {
            conn.execute(
                "INSERT INTO enrollments(id, student_id, course_id, grade) VALUES(?, ?, ?, ?)",
                (uuid::Uuid::new_v4().to_string(), student, course, grade),
            )
            .expect("enroll");
        }

        let summary = recompute_session(&conn, "2021-2022").expect("recompute");
        assert_eq!((summary.created, summary.updated, summary.skipped), (1, 0, 1));

        let (cgpa, credits): (f64, i64) = conn
            .query_row(
                "SELECT cgpa, credit_completed FROM standings WHERE student_id = ?",
                [&a],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("standing");
        assert_eq!((cgpa, credits), (3.75, 4));

        let again = recompute_session(&conn, "2021-2022").expect("recompute");
        assert_eq!((again.created, again.updated), (0, 1));
        let other: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM standings WHERE student_id = ?",
                [&c],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(other, 0);
    }
}
