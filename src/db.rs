use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::model;

pub const DB_FILE: &str = "academy.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role TEXT NOT NULL,
            permissions TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            birth_date TEXT,
            category TEXT NOT NULL,
            join_date TEXT,
            polo TEXT,
            status TEXT NOT NULL,
            position TEXT,
            phone TEXT,
            whatsapp TEXT,
            address TEXT,
            rg TEXT,
            cpf TEXT,
            responsible_name TEXT,
            responsible_cpf TEXT,
            has_scholarship INTEGER NOT NULL DEFAULT 0,
            scholarship_discount REAL NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_category ON students(category)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_settings(
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL UNIQUE,
            value REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payment_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            payment_type_id TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL,
            value TEXT NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            month TEXT NOT NULL,
            month_index INTEGER,
            year INTEGER NOT NULL,
            payment_date TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(payment_type_id) REFERENCES payment_types(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    // Dedup queries compare on the normalized key, never the month name.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_key ON payments(student_id, year, month_index)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_year ON payments(year)",
        [],
    )?;

    // Workspaces from before the normalized key carry only the month name.
    ensure_payments_month_index(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS revenues(
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            payment_type_id TEXT NOT NULL,
            value TEXT NOT NULL,
            revenue_date TEXT NOT NULL,
            FOREIGN KEY(payment_type_id) REFERENCES payment_types(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            technical INTEGER NOT NULL,
            tactical INTEGER NOT NULL,
            physical INTEGER NOT NULL,
            mental INTEGER NOT NULL,
            score INTEGER NOT NULL,
            notes TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_student ON evaluations(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            date TEXT NOT NULL,
            UNIQUE(category, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_marks(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            present INTEGER NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_student ON attendance_marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scout_players(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            position TEXT NOT NULL,
            number INTEGER NOT NULL,
            is_reserve INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scout_matches(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            opponent TEXT,
            is_training INTEGER NOT NULL DEFAULT 0,
            category TEXT NOT NULL,
            ended INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scout_match_players(
            match_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            on_court INTEGER NOT NULL,
            PRIMARY KEY(match_id, player_id),
            FOREIGN KEY(match_id) REFERENCES scout_matches(id),
            FOREIGN KEY(player_id) REFERENCES scout_players(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scout_actions(
            id TEXT PRIMARY KEY,
            match_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            area INTEGER,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(match_id) REFERENCES scout_matches(id),
            FOREIGN KEY(player_id) REFERENCES scout_players(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scout_actions_match ON scout_actions(match_id)",
        [],
    )?;

    seed_payment_types(&conn)?;
    seed_default_admin(&conn)?;

    Ok(conn)
}

fn seed_payment_types(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM payment_types", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    for (i, name) in ["Mensalidade", "Matrícula", "Uniforme"].iter().enumerate() {
        conn.execute(
            "INSERT INTO payment_types(id, name, sort_order) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), name, i as i64),
        )?;
    }
    Ok(())
}

/// A fresh workspace gets one admin so login is possible at all.
fn seed_default_admin(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    let permissions = serde_json::to_string(&model::AVAILABLE_PAGES)?;
    conn.execute(
        "INSERT INTO users(id, name, email, password, role, permissions)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            "Administrador",
            "admin@academia.com",
            "admin",
            "admin",
            permissions,
        ),
    )?;
    Ok(())
}

fn ensure_payments_month_index(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "payments", "month_index")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE payments ADD COLUMN month_index INTEGER", [])?;

    // Backfill from the localized month name where it still matches the table.
    let mut stmt = conn.prepare("SELECT id, month FROM payments")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, month) in rows {
        if let Some(index) = model::month_index(&month) {
            conn.execute(
                "UPDATE payments SET month_index = ? WHERE id = ?",
                (index as i64, &id),
            )?;
        }
    }
    Ok(())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
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
