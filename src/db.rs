use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

use crate::calc::MarkRecord;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("examsd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    // One mark record per student; trials stay NULL until entered. total,
    // selected and rank are derived columns written only by the engine.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            tr1 REAL,
            tr2 REAL,
            tr3 REAL,
            total REAL,
            selected INTEGER NOT NULL DEFAULT 0,
            rank INTEGER,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    Ok(conn)
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

fn student_from_row(row: &Row) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
    })
}

const STUDENT_COLUMNS: &str = "id, name, email, password_hash";

pub fn student_insert(
    conn: &Connection,
    id: &str,
    name: &str,
    email: &str,
    password_hash: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO students(id, name, email, password_hash, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (id, name, email, password_hash),
    )?;
    Ok(())
}

pub fn student_find_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"),
        [id],
        student_from_row,
    )
    .optional()
}

pub fn student_find_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE email = ?"),
        [email],
        student_from_row,
    )
    .optional()
}

pub fn student_exists_by_email(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM students WHERE email = ?", [email], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn students_all(conn: &Connection) -> rusqlite::Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students ORDER BY name, id"
    ))?;
    let rows = stmt.query_map([], student_from_row)?;
    rows.collect()
}

fn mark_from_row(row: &Row) -> rusqlite::Result<MarkRecord> {
    Ok(MarkRecord::from_stored(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get::<_, i64>(6)? != 0,
        row.get(7)?,
    ))
}

const MARK_COLUMNS: &str = "id, student_id, tr1, tr2, tr3, total, selected, rank";

pub fn marks_find_by_student(
    conn: &Connection,
    student_id: &str,
) -> rusqlite::Result<Option<MarkRecord>> {
    conn.query_row(
        &format!("SELECT {MARK_COLUMNS} FROM marks WHERE student_id = ?"),
        [student_id],
        mark_from_row,
    )
    .optional()
}

pub fn marks_all(conn: &Connection) -> rusqlite::Result<Vec<MarkRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {MARK_COLUMNS} FROM marks"))?;
    let rows = stmt.query_map([], mark_from_row)?;
    rows.collect()
}

/// Insert or overwrite a student's mark record. The rank column is not
/// touched on update; only the full rank pass writes it.
pub fn marks_upsert(conn: &Connection, rec: &MarkRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO marks(id, student_id, tr1, tr2, tr3, total, selected, rank, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(student_id) DO UPDATE SET
           tr1 = excluded.tr1,
           tr2 = excluded.tr2,
           tr3 = excluded.tr3,
           total = excluded.total,
           selected = excluded.selected,
           updated_at = excluded.updated_at",
        (
            &rec.id,
            &rec.student_id,
            rec.tr1,
            rec.tr2,
            rec.tr3,
            rec.total(),
            rec.selected(),
            rec.rank(),
        ),
    )?;
    Ok(())
}

pub fn marks_write_rank(conn: &Connection, mark_id: &str, rank: i64) -> rusqlite::Result<()> {
    conn.execute("UPDATE marks SET rank = ? WHERE id = ?", (rank, mark_id))?;
    Ok(())
}
