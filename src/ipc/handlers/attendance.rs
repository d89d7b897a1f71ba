use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{HandlerErr, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Category};

/// Records one training session's roll call: (category, date) plus a
/// present/absent mark per student. Re-recording the same session replaces
/// its marks.
fn attendance_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let category_raw = get_required_str(params, "category")?;
    let category = Category::parse(&category_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {}", category_raw)))?;

    let date_raw = get_required_str(params, "date")?;
    let date_iso = model::display_to_iso(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be DD/MM/YYYY or YYYY-MM-DD"))?;

    let Some(marks) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };
    if marks.is_empty() {
        return Err(HandlerErr::bad_params("marks must not be empty"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM attendance_sessions WHERE category = ? AND date = ?",
            (category.as_str(), &date_iso),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let session_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO attendance_sessions(id, category, date) VALUES(?, ?, ?)",
                (&id, category.as_str(), &date_iso),
            )
            .map_err(|e| HandlerErr::db_insert(e, "attendance_sessions"))?;
            id
        }
    };

    let mut present_count = 0i64;
    let mut absent_count = 0i64;
    for mark in marks {
        let Some(student_id) = mark.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("mark missing studentId"));
        };
        let present = mark.get("present").and_then(|v| v.as_bool()).unwrap_or(false);

        let student_exists = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::db_query)?
            .is_some();
        if !student_exists {
            // Dropping the transaction rolls back the partial session.
            return Err(HandlerErr::not_found(format!(
                "student not found: {}",
                student_id
            )));
        }

        tx.execute(
            "INSERT INTO attendance_marks(session_id, student_id, present)
             VALUES(?, ?, ?)
             ON CONFLICT(session_id, student_id) DO UPDATE SET
               present = excluded.present",
            (&session_id, student_id, present as i64),
        )
        .map_err(|e| HandlerErr::db_insert(e, "attendance_marks"))?;

        if present {
            present_count += 1;
        } else {
            absent_count += 1;
        }
    }

    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({
        "sessionId": session_id,
        "present": present_count,
        "absent": absent_count,
    }))
}

fn attendance_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.category, s.date,
                    (SELECT COUNT(*) FROM attendance_marks m
                     WHERE m.session_id = s.id AND m.present = 1) AS present,
                    (SELECT COUNT(*) FROM attendance_marks m
                     WHERE m.session_id = s.id AND m.present = 0) AS absent
             FROM attendance_sessions s
             ORDER BY s.date DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let sessions = stmt
        .query_map([], |r| {
            let date: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "category": r.get::<_, String>(1)?,
                "date": model::iso_to_display(&date).unwrap_or(date),
                "present": r.get::<_, i64>(3)?,
                "absent": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "sessions": sessions }))
}

fn attendance_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session: Option<(String, String)> = conn
        .query_row(
            "SELECT category, date FROM attendance_sessions WHERE id = ?",
            [&session_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((category, date)) = session else {
        return Err(HandlerErr::not_found("session not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT m.student_id, s.name, m.present
             FROM attendance_marks m
             JOIN students s ON s.id = m.student_id
             WHERE m.session_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db_query)?;
    let marks = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "student": r.get::<_, String>(1)?,
                "present": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "sessionId": session_id,
        "category": category,
        "date": model::iso_to_display(&date).unwrap_or(date),
        "marks": marks,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(with_conn(state, req, attendance_record)),
        "attendance.list" => Some(with_conn(state, req, |c, _| attendance_list(c))),
        "attendance.open" => Some(with_conn(state, req, attendance_open)),
        _ => None,
    }
}
