use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{HandlerErr, get_optional_str, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model;

struct Ratings {
    technical: i64,
    tactical: i64,
    physical: i64,
    mental: i64,
}

impl Ratings {
    /// Overall score is the rounded mean of the four ratings.
    fn score(&self) -> i64 {
        let sum = (self.technical + self.tactical + self.physical + self.mental) as f64;
        (sum / 4.0).round() as i64
    }
}

fn get_rating(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let value = params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let rounded = value.round() as i64;
    if !(0..=10).contains(&rounded) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be between 0 and 10",
            key
        )));
    }
    Ok(rounded)
}

fn parse_ratings(params: &serde_json::Value) -> Result<Ratings, HandlerErr> {
    Ok(Ratings {
        technical: get_rating(params, "technical")?,
        tactical: get_rating(params, "tactical")?,
        physical: get_rating(params, "physical")?,
        mental: get_rating(params, "mental")?,
    })
}

fn evaluations_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.date, e.technical, e.tactical, e.physical, e.mental,
                    e.score, e.notes, s.id, s.name, s.category, s.position
             FROM evaluations e
             JOIN students s ON s.id = e.student_id
             ORDER BY e.date DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let evaluations = stmt
        .query_map([], |r| {
            let date: String = r.get(1)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "date": model::iso_to_display(&date).unwrap_or(date),
                "technical": r.get::<_, i64>(2)?,
                "tactical": r.get::<_, i64>(3)?,
                "physical": r.get::<_, i64>(4)?,
                "mental": r.get::<_, i64>(5)?,
                "score": r.get::<_, i64>(6)?,
                "notes": r.get::<_, Option<String>>(7)?,
                "student": {
                    "id": r.get::<_, String>(8)?,
                    "name": r.get::<_, String>(9)?,
                    "category": r.get::<_, String>(10)?,
                    "position": r.get::<_, Option<String>>(11)?,
                }
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "evaluations": evaluations }))
}

fn evaluations_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let date_raw = get_required_str(params, "date")?;
    let date_iso = model::display_to_iso(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be DD/MM/YYYY or YYYY-MM-DD"))?;
    let ratings = parse_ratings(params)?;

    let evaluation_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO evaluations(
            id, student_id, date, technical, tactical, physical, mental, score, notes
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            evaluation_id,
            student_id,
            date_iso,
            ratings.technical,
            ratings.tactical,
            ratings.physical,
            ratings.mental,
            ratings.score(),
            get_optional_str(params, "notes"),
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "evaluations"))?;

    Ok(json!({ "evaluationId": evaluation_id, "score": ratings.score() }))
}

fn evaluations_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let evaluation_id = get_required_str(params, "evaluationId")?;
    let exists = conn
        .query_row(
            "SELECT 1 FROM evaluations WHERE id = ?",
            [&evaluation_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("evaluation not found"));
    }

    let date_raw = get_required_str(params, "date")?;
    let date_iso = model::display_to_iso(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be DD/MM/YYYY or YYYY-MM-DD"))?;
    let ratings = parse_ratings(params)?;

    conn.execute(
        "UPDATE evaluations SET
            date = ?, technical = ?, tactical = ?, physical = ?, mental = ?,
            score = ?, notes = ?
         WHERE id = ?",
        rusqlite::params![
            date_iso,
            ratings.technical,
            ratings.tactical,
            ratings.physical,
            ratings.mental,
            ratings.score(),
            get_optional_str(params, "notes"),
            evaluation_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "evaluations"))?;

    Ok(json!({ "evaluationId": evaluation_id, "score": ratings.score() }))
}

fn evaluations_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let evaluation_id = get_required_str(params, "evaluationId")?;
    let removed = conn
        .execute("DELETE FROM evaluations WHERE id = ?", [&evaluation_id])
        .map_err(|e| HandlerErr::db_delete(e, "evaluations"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("evaluation not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.list" => Some(with_conn(state, req, |c, _| evaluations_list(c))),
        "evaluations.create" => Some(with_conn(state, req, evaluations_create)),
        "evaluations.update" => Some(with_conn(state, req, evaluations_update)),
        "evaluations.delete" => Some(with_conn(state, req, evaluations_delete)),
        _ => None,
    }
}
