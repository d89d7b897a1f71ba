use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{HandlerErr, get_required_f64, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::Category;

fn fee_settings_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, category, value FROM fee_settings ORDER BY category")
        .map_err(HandlerErr::db_query)?;
    let fees = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "category": r.get::<_, String>(1)?,
                "value": r.get::<_, f64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "feeSettings": fees }))
}

/// One row per category at most; setting an existing category replaces its
/// value.
fn fee_settings_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let category_raw = get_required_str(params, "category")?;
    let category = Category::parse(&category_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {}", category_raw)))?;
    let value = get_required_f64(params, "value")?;
    if value < 0.0 {
        return Err(HandlerErr::bad_params("value must not be negative"));
    }

    conn.execute(
        "INSERT INTO fee_settings(id, category, value) VALUES(?, ?, ?)
         ON CONFLICT(category) DO UPDATE SET value = excluded.value",
        (Uuid::new_v4().to_string(), category.as_str(), value),
    )
    .map_err(|e| HandlerErr::db_insert(e, "fee_settings"))?;

    Ok(json!({ "category": category.as_str(), "value": value }))
}

fn fee_settings_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let category = get_required_str(params, "category")?;
    let removed = conn
        .execute("DELETE FROM fee_settings WHERE category = ?", [&category])
        .map_err(|e| HandlerErr::db_delete(e, "fee_settings"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("no fee setting for category"));
    }
    Ok(json!({ "deleted": true }))
}

fn payment_types_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM payment_types ORDER BY sort_order")
        .map_err(HandlerErr::db_query)?;
    let types = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "paymentTypes": types }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feeSettings.list" => Some(with_conn(state, req, |c, _| fee_settings_list(c))),
        "feeSettings.upsert" => Some(with_conn(state, req, fee_settings_upsert)),
        "feeSettings.delete" => Some(with_conn(state, req, fee_settings_delete)),
        "paymentTypes.list" => Some(with_conn(state, req, |c, _| payment_types_list(c))),
        _ => None,
    }
}
