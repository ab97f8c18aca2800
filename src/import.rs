use std::collections::{BTreeMap, HashMap};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;
use crate::db;

/// One uploaded row: field name to its text value.
pub type RawRow = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    SkippedDuplicate,
    UnresolvedReference,
    ValidationError,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("student {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl RowError {
    fn outcome(&self) -> Outcome {
        match self {
            RowError::MissingField(_) | RowError::Invalid(_) => Outcome::ValidationError,
            RowError::NotFound(_) => Outcome::UnresolvedReference,
            RowError::Storage(_) => Outcome::Error,
        }
    }
}

/// What an accepted row did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    SkippedDuplicate,
}

impl From<Applied> for Outcome {
    fn from(a: Applied) -> Self {
        match a {
            Applied::Created => Outcome::Created,
            Applied::Updated => Outcome::Updated,
            Applied::SkippedDuplicate => Outcome::SkippedDuplicate,
        }
    }
}

/// A record shape the importer can reconcile rows into.
pub trait ImportTarget {
    /// Stable name recorded in the run ledger.
    const KIND: &'static str;
    /// Field names recognised in rows and CSV headers.
    const FIELDS: &'static [&'static str];
    type Row;

    fn validate(&self, raw: &RawRow) -> Result<Self::Row, RowError>;
    fn apply(&self, conn: &Connection, row: &Self::Row) -> Result<Applied, RowError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub index: usize,
    pub row_key: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub kind: &'static str,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub unresolved: usize,
    pub errored: usize,
    pub outcomes: Vec<RowOutcome>,
    pub batch_digest: String,
    pub resubmitted: bool,
}

impl BatchSummary {
    /// Rows that did not land, with the reason shown to the uploader.
    pub fn errors(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(
                o.outcome,
                Outcome::ValidationError | Outcome::UnresolvedReference | Outcome::Error
            )
        })
    }
}

/// Reconcile `rows` one by one. A failing row is recorded and the loop moves on;
/// nothing is wrapped in a transaction, so earlier writes survive later failures.
pub fn run_batch<T: ImportTarget>(conn: &Connection, target: &T, rows: &[RawRow]) -> BatchSummary {
    let batch_digest = batch_digest(T::KIND, rows);
    tracing::info!(kind = T::KIND, rows = rows.len(), "import batch started");

    let mut summary = BatchSummary {
        kind: T::KIND,
        created: 0,
        updated: 0,
        skipped: 0,
        unresolved: 0,
        errored: 0,
        outcomes: Vec::with_capacity(rows.len()),
        batch_digest,
        resubmitted: false,
    };

    for (index, raw) in rows.iter().enumerate() {
        let row_key = raw
            .get("regNo")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row {}", index + 1));

        let result = target
            .validate(raw)
            .and_then(|row| target.apply(conn, &row));
        let (outcome, message) = match result {
            Ok(applied) => (Outcome::from(applied), None),
            Err(e) => {
                if matches!(e, RowError::Storage(_)) {
                    tracing::warn!(kind = T::KIND, row = %row_key, error = %e, "row failed");
                }
                (e.outcome(), Some(e.to_string()))
            }
        };

        match outcome {
            Outcome::Created => summary.created += 1,
            Outcome::Updated => summary.updated += 1,
            Outcome::SkippedDuplicate => summary.skipped += 1,
            Outcome::UnresolvedReference => {
                summary.unresolved += 1;
                summary.errored += 1;
            }
            Outcome::ValidationError | Outcome::Error => summary.errored += 1,
        }
        summary.outcomes.push(RowOutcome {
            index,
            row_key,
            outcome,
            message,
        });
    }

    match record_run(conn, &summary, rows.len()) {
        Ok(seen_before) => summary.resubmitted = seen_before,
        Err(e) => tracing::warn!(kind = T::KIND, error = %e, "failed to record import run"),
    }

    tracing::info!(
        kind = T::KIND,
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        errored = summary.errored,
        "import batch finished"
    );
    summary
}

/// sha256 over the kind plus each row with its keys sorted.
pub fn batch_digest(kind: &str, rows: &[RawRow]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    for row in rows {
        let sorted: BTreeMap<&String, &String> = row.iter().collect();
        hasher.update(b"\n");
        hasher.update(serde_json::to_string(&sorted).unwrap_or_default().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn record_run(conn: &Connection, summary: &BatchSummary, row_count: usize) -> rusqlite::Result<bool> {
    let previous: i64 = conn.query_row(
        "SELECT COUNT(*) FROM import_runs WHERE kind = ? AND batch_digest = ?",
        (summary.kind, &summary.batch_digest),
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO import_runs(id, kind, batch_digest, row_count, created, updated, skipped, errored, ran_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            summary.kind,
            &summary.batch_digest,
            row_count as i64,
            summary.created as i64,
            summary.updated as i64,
            summary.skipped as i64,
            summary.errored as i64,
            db::now_rfc3339(),
        ),
    )?;
    Ok(previous > 0)
}

fn required(raw: &RawRow, field: &'static str) -> Result<String, RowError> {
    optional(raw, field).ok_or(RowError::MissingField(field))
}

fn optional(raw: &RawRow, field: &str) -> Option<String> {
    raw.get(field)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Length of the numeric prefix of `s`: optional sign, digits, and for
/// decimals an optional `.digits` part and exponent.
fn numeric_prefix_len(s: &str, decimal: bool) -> usize {
    let b = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut i = 0;
    if matches!(b.first(), Some(b'+' | b'-')) {
        i = 1;
    }
    let int_end = digits_from(i);
    let mut end = if int_end > i { int_end } else { 0 };
    if !decimal {
        return end;
    }

    let mut mantissa_end = int_end;
    if b.get(int_end) == Some(&b'.') {
        let frac_end = digits_from(int_end + 1);
        if frac_end > int_end + 1 || int_end > i {
            mantissa_end = frac_end;
            end = frac_end;
        }
    }
    if end == 0 {
        return 0;
    }
    if matches!(b.get(mantissa_end), Some(b'e' | b'E')) {
        let mut j = mantissa_end + 1;
        if matches!(b.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_end = digits_from(j);
        if exp_end > j {
            end = exp_end;
        }
    }
    end
}

/// Integer cell with zero fallback. Reads the leading integer and ignores
/// what follows, so "25 days" is 25 and "12.7" is 12.
pub fn int_or_zero(raw: Option<&str>) -> i64 {
    let Some(s) = raw.map(str::trim) else {
        return 0;
    };
    let len = numeric_prefix_len(s, false);
    s[..len].parse::<i64>().unwrap_or(0)
}

/// Decimal cell with zero fallback. Reads the leading number ("17.5 marks" is 17.5).
pub fn float_or_zero(raw: Option<&str>) -> f64 {
    let Some(s) = raw.map(str::trim) else {
        return 0.0;
    };
    let len = numeric_prefix_len(s, true);
    s[..len]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Display name for a new account: explicit name, else the email local part
/// with `.`/`_` as spaces, else the registration number.
pub fn derive_full_name(full_name: Option<&str>, email: Option<&str>, reg_no: &str) -> String {
    if let Some(name) = full_name.map(str::trim).filter(|s| !s.is_empty()) {
        return name.to_string();
    }
    let from_email = email
        .and_then(|e| e.split('@').next())
        .map(|local| {
            local
                .split(['.', '_'])
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|s| !s.is_empty());
    from_email.unwrap_or_else(|| reg_no.to_string())
}

fn pair_exists(
    conn: &Connection,
    table: &str,
    student_id: &str,
    course_id: &str,
) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {table} WHERE student_id = ? AND course_id = ?");
    let hit: Option<i64> = conn
        .query_row(&sql, (student_id, course_id), |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

fn resolve_student(conn: &Connection, reg_no: &str) -> Result<String, RowError> {
    db::find_student_id(conn, reg_no)?.ok_or_else(|| RowError::NotFound(reg_no.to_string()))
}

// ---------------------------------------------------------------------------
// New-student intake

pub struct NewStudentTarget<'a> {
    pub config: &'a Config,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudentRow {
    pub reg_no: String,
    pub email: String,
    pub session: String,
    pub full_name: String,
    pub gender: Option<String>,
    pub phone_number: Option<String>,
}

impl ImportTarget for NewStudentTarget<'_> {
    const KIND: &'static str = "students";
    const FIELDS: &'static [&'static str] =
        &["regNo", "email", "session", "fullName", "gender", "phoneNumber"];
    type Row = NewStudentRow;

    fn validate(&self, raw: &RawRow) -> Result<NewStudentRow, RowError> {
        let reg_no = required(raw, "regNo")?;
        let email = required(raw, "email")?;
        let session = required(raw, "session")?;
        let full_name =
            derive_full_name(optional(raw, "fullName").as_deref(), Some(email.as_str()), &reg_no);
        Ok(NewStudentRow {
            reg_no,
            email,
            session,
            full_name,
            gender: optional(raw, "gender"),
            phone_number: optional(raw, "phoneNumber"),
        })
    }

    fn apply(&self, conn: &Connection, row: &NewStudentRow) -> Result<Applied, RowError> {
        if db::find_student_id(conn, &row.reg_no)?.is_some() {
            return Ok(Applied::SkippedDuplicate);
        }
        let gender = row
            .gender
            .clone()
            .unwrap_or_else(|| self.config.default_gender.clone());
        conn.execute(
            "INSERT INTO students(id, reg_no, full_name, nick_name, email, gender, phone_number, session, role, password, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &row.reg_no,
                &row.full_name,
                &row.full_name,
                &row.email,
                &gender,
                &row.phone_number,
                &row.session,
                &self.config.default_role,
                &self.config.placeholder_password,
                db::now_rfc3339(),
            ),
        )?;
        Ok(Applied::Created)
    }
}

// ---------------------------------------------------------------------------
// Course grades

pub struct EnrollmentTarget {
    pub course_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRow {
    pub reg_no: String,
    pub grade: String,
}

impl ImportTarget for EnrollmentTarget {
    const KIND: &'static str = "enrollments";
    const FIELDS: &'static [&'static str] = &["regNo", "grade"];
    type Row = EnrollmentRow;

    fn validate(&self, raw: &RawRow) -> Result<EnrollmentRow, RowError> {
        Ok(EnrollmentRow {
            reg_no: required(raw, "regNo")?,
            grade: required(raw, "grade")?,
        })
    }

    fn apply(&self, conn: &Connection, row: &EnrollmentRow) -> Result<Applied, RowError> {
        let student_id = resolve_student(conn, &row.reg_no)?;
        let existed = pair_exists(conn, "enrollments", &student_id, &self.course_id)?;
        conn.execute(
            "INSERT INTO enrollments(id, student_id, course_id, grade, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO UPDATE SET
               grade = excluded.grade,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &student_id,
                &self.course_id,
                &row.grade,
                db::now_rfc3339(),
            ),
        )?;
        Ok(if existed {
            Applied::Updated
        } else {
            Applied::Created
        })
    }
}

// ---------------------------------------------------------------------------
// ORPS marks

pub struct MarksTarget {
    pub course_id: String,
    pub class_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarksRow {
    pub reg_no: String,
    pub attendance: i64,
    pub term_test: f64,
    pub evaluation: f64,
    pub part_a: f64,
    pub part_b: f64,
}

impl ImportTarget for MarksTarget {
    const KIND: &'static str = "marks";
    const FIELDS: &'static [&'static str] =
        &["regNo", "attendance", "termTest", "evaluation", "partA", "partB"];
    type Row = MarksRow;

    fn validate(&self, raw: &RawRow) -> Result<MarksRow, RowError> {
        let cell = |f: &str| raw.get(f).map(String::as_str);
        Ok(MarksRow {
            reg_no: required(raw, "regNo")?,
            attendance: int_or_zero(cell("attendance")),
            term_test: float_or_zero(cell("termTest")),
            evaluation: float_or_zero(cell("evaluation")),
            part_a: float_or_zero(cell("partA")),
            part_b: float_or_zero(cell("partB")),
        })
    }

    fn apply(&self, conn: &Connection, row: &MarksRow) -> Result<Applied, RowError> {
        let student_id = resolve_student(conn, &row.reg_no)?;
        let existed = pair_exists(conn, "orps_marks", &student_id, &self.course_id)?;
        conn.execute(
            "INSERT INTO orps_marks(id, student_id, course_id, attendance, class_count, term_test, evaluation, part_a, part_b, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO UPDATE SET
               attendance = excluded.attendance,
               class_count = excluded.class_count,
               term_test = excluded.term_test,
               evaluation = excluded.evaluation,
               part_a = excluded.part_a,
               part_b = excluded.part_b,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &student_id,
                &self.course_id,
                row.attendance,
                self.class_count,
                row.term_test,
                row.evaluation,
                row.part_a,
                row.part_b,
                db::now_rfc3339(),
            ),
        )?;
        Ok(if existed {
            Applied::Updated
        } else {
            Applied::Created
        })
    }
}

// ---------------------------------------------------------------------------
// CGPA and completed credits

pub const CGPA_MAX: f64 = 4.0;

pub struct CgpaTarget;

#[derive(Debug, Clone, PartialEq)]
pub struct CgpaRow {
    pub reg_no: String,
    pub credit_completed: i64,
    pub cgpa: f64,
}

impl ImportTarget for CgpaTarget {
    const KIND: &'static str = "cgpa";
    const FIELDS: &'static [&'static str] = &["regNo", "creditCompleted", "cgpa"];
    type Row = CgpaRow;

    fn validate(&self, raw: &RawRow) -> Result<CgpaRow, RowError> {
        let reg_no = required(raw, "regNo")?;
        let credit_completed = int_or_zero(raw.get("creditCompleted").map(String::as_str));
        let cgpa = float_or_zero(raw.get("cgpa").map(String::as_str));
        if !(0.0..=CGPA_MAX).contains(&cgpa) {
            return Err(RowError::Invalid(format!(
                "cgpa {cgpa} outside 0.00-{CGPA_MAX:.2}"
            )));
        }
        if credit_completed < 0 {
            return Err(RowError::Invalid(format!(
                "creditCompleted {credit_completed} is negative"
            )));
        }
        Ok(CgpaRow {
            reg_no,
            credit_completed,
            cgpa,
        })
    }

    fn apply(&self, conn: &Connection, row: &CgpaRow) -> Result<Applied, RowError> {
        let student_id = resolve_student(conn, &row.reg_no)?;
        let applied = upsert_standing(conn, &student_id, row.cgpa, row.credit_completed)?;
        Ok(applied)
    }
}

/// Create or overwrite the single standing row of a student.
pub fn upsert_standing(
    conn: &Connection,
    student_id: &str,
    cgpa: f64,
    credit_completed: i64,
) -> rusqlite::Result<Applied> {
    let existed: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM standings WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    conn.execute(
        "INSERT INTO standings(id, student_id, cgpa, credit_completed, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           cgpa = excluded.cgpa,
           credit_completed = excluded.credit_completed,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            cgpa,
            credit_completed,
            db::now_rfc3339(),
        ),
    )?;
    Ok(if existed.is_some() {
        Applied::Updated
    } else {
        Applied::Created
    })
}
