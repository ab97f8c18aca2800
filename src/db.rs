use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "portal.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            reg_no TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            nick_name TEXT,
            email TEXT NOT NULL,
            gender TEXT NOT NULL,
            phone_number TEXT,
            session TEXT NOT NULL,
            role TEXT NOT NULL,
            password TEXT NOT NULL,
            linkedin_id TEXT,
            github_id TEXT,
            facebook TEXT,
            profile_pic TEXT,
            last_login TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_session ON students(session)",
        [],
    )?;
    ensure_students_last_login(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS skills(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_skills(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            skill_id TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(skill_id) REFERENCES skills(id),
            UNIQUE(student_id, skill_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            credit REAL NOT NULL DEFAULT 0,
            semester TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            grade TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS orps_marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            attendance INTEGER NOT NULL DEFAULT 0,
            class_count INTEGER NOT NULL DEFAULT 0,
            term_test REAL NOT NULL DEFAULT 0,
            evaluation REAL NOT NULL DEFAULT 0,
            part_a REAL NOT NULL DEFAULT 0,
            part_b REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_orps_marks_course ON orps_marks(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS standings(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            cgpa REAL NOT NULL DEFAULT 0,
            credit_completed INTEGER NOT NULL DEFAULT 0,
            position INTEGER,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_logs(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            ip TEXT NOT NULL,
            device TEXT NOT NULL,
            os TEXT NOT NULL,
            browser TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_logs_student ON session_logs(student_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            batch_digest TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            errored INTEGER NOT NULL,
            ran_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_runs_digest ON import_runs(kind, batch_digest)",
        [],
    )?;

    Ok(())
}

/// UTC timestamp used for every `*_at` column.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn find_student_id(conn: &Connection, reg_no: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM students WHERE reg_no = ?",
        [reg_no],
        |r| r.get(0),
    )
    .optional()
}

pub fn course_exists(conn: &Connection, course_id: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(hit.is_some())
}

fn ensure_students_last_login(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "last_login")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN last_login TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
