use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
}

pub fn list_catalogue(conn: &Connection) -> rusqlite::Result<Vec<Skill>> {
    let mut stmt = conn.prepare("SELECT id, name FROM skills ORDER BY name COLLATE NOCASE")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Skill {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Add a catalogue entry, or return the existing one with the same name.
pub fn create_skill(conn: &Connection, name: &str) -> rusqlite::Result<(Skill, bool)> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM skills WHERE name = ?", [name], |r| r.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok((
            Skill {
                id,
                name: name.to_string(),
            },
            false,
        ));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO skills(id, name) VALUES(?, ?)", (&id, name))?;
    Ok((
        Skill {
            id,
            name: name.to_string(),
        },
        true,
    ))
}

pub fn skills_of(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<Skill>> {
    let mut stmt = conn.prepare(
        "SELECT k.id, k.name
         FROM student_skills ss
         JOIN skills k ON k.id = ss.skill_id
         WHERE ss.student_id = ?
         ORDER BY k.name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(Skill {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids from `skill_ids` that are not in the catalogue.
pub fn unknown_ids(conn: &Connection, skill_ids: &[String]) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT 1 FROM skills WHERE id = ?")?;
    let mut missing = Vec::new();
    for id in skill_ids {
        let hit: Option<i64> = stmt.query_row([id], |r| r.get(0)).optional()?;
        if hit.is_none() {
            missing.push(id.clone());
        }
    }
    Ok(missing)
}

/// Replace the whole skill set of a student: delete all links, then insert
/// one per distinct id. Callers own the transaction.
pub fn replace_for_student(
    conn: &Connection,
    student_id: &str,
    skill_ids: &[String],
) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM student_skills WHERE student_id = ?", [student_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO student_skills(id, student_id, skill_id) VALUES(?, ?, ?)
         ON CONFLICT(student_id, skill_id) DO NOTHING",
    )?;
    let mut linked = 0;
    for skill_id in skill_ids {
        linked += stmt.execute((Uuid::new_v4().to_string(), student_id, skill_id))?;
    }
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_student, memory_db};

    #[test]
    fn create_is_idempotent_by_name() {
        let conn = memory_db();
        let (rust, created) = create_skill(&conn, "Rust").expect("create");
        assert!(created);
        let (again, created) = create_skill(&conn, "Rust").expect("create again");
        assert!(!created);
        assert_eq!(again.id, rust.id);
        create_skill(&conn, "algorithms").expect("create");
        let names: Vec<String> = list_catalogue(&conn)
            .expect("list")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["algorithms", "Rust"]);
    }

    #[test]
    fn replace_drops_old_links_and_dedups() {
        let conn = memory_db();
        let student_id = insert_student(&conn, "K1", "S");
        let (a, _) = create_skill(&conn, "A").expect("a");
        let (b, _) = create_skill(&conn, "B").expect("b");
        let (c, _) = create_skill(&conn, "C").expect("c");

        replace_for_student(&conn, &student_id, &[a.id.clone(), b.id.clone()]).expect("first");
        let linked =
            replace_for_student(&conn, &student_id, &[c.id.clone(), c.id.clone()]).expect("second");
        assert_eq!(linked, 1);
        assert_eq!(skills_of(&conn, &student_id).expect("skills"), vec![c]);

        replace_for_student(&conn, &student_id, &[]).expect("clear");
        assert!(skills_of(&conn, &student_id).expect("skills").is_empty());
    }

    #[test]
    fn unknown_ids_are_reported() {
        let conn = memory_db();
        let (a, _) = create_skill(&conn, "A").expect("a");
        let missing = unknown_ids(&conn, &[a.id, "ghost".to_string()]).expect("check");
        assert_eq!(missing, vec!["ghost".to_string()]);
    }
}
