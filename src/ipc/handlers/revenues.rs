use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{HandlerErr, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model;

struct RevenueInput {
    description: String,
    payment_type_id: String,
    value: String,
    revenue_date_iso: String,
}

fn parse_revenue_input(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<RevenueInput, HandlerErr> {
    let description = get_required_str(params, "description")?.trim().to_string();
    if description.is_empty() {
        return Err(HandlerErr::bad_params("description must not be empty"));
    }

    let payment_type_id = get_required_str(params, "paymentTypeId")?;
    let type_exists = conn
        .query_row(
            "SELECT 1 FROM payment_types WHERE id = ?",
            [&payment_type_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !type_exists {
        return Err(HandlerErr::not_found("payment type not found"));
    }

    let value = match params.get("value") {
        Some(v) if v.is_string() => {
            let parsed = model::parse_currency(v.as_str().unwrap_or_default())
                .ok_or_else(|| HandlerErr::bad_params("value is not a parseable amount"))?;
            model::format_currency(parsed)
        }
        Some(v) if v.is_number() => model::format_currency(v.as_f64().unwrap_or(0.0)),
        _ => return Err(HandlerErr::bad_params("missing value")),
    };

    let date_raw = get_required_str(params, "revenueDate")?;
    let revenue_date_iso = model::display_to_iso(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("revenueDate must be DD/MM/YYYY or YYYY-MM-DD"))?;

    Ok(RevenueInput {
        description,
        payment_type_id,
        value,
        revenue_date_iso,
    })
}

fn revenues_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.description, r.payment_type_id, t.name, r.value, r.revenue_date
             FROM revenues r
             JOIN payment_types t ON t.id = r.payment_type_id
             ORDER BY r.revenue_date DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let revenues = stmt
        .query_map([], |r| {
            let date: String = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "description": r.get::<_, String>(1)?,
                "paymentTypeId": r.get::<_, String>(2)?,
                "paymentType": r.get::<_, String>(3)?,
                "value": r.get::<_, String>(4)?,
                "revenueDate": model::iso_to_display(&date).unwrap_or(date),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "revenues": revenues }))
}

fn revenues_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input = parse_revenue_input(conn, params)?;
    let revenue_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO revenues(id, description, payment_type_id, value, revenue_date)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            revenue_id,
            input.description,
            input.payment_type_id,
            input.value,
            input.revenue_date_iso,
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "revenues"))?;
    Ok(json!({ "revenueId": revenue_id }))
}

fn revenues_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let revenue_id = get_required_str(params, "revenueId")?;
    let exists = conn
        .query_row("SELECT 1 FROM revenues WHERE id = ?", [&revenue_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("revenue not found"));
    }

    let input = parse_revenue_input(conn, params)?;
    conn.execute(
        "UPDATE revenues SET description = ?, payment_type_id = ?, value = ?, revenue_date = ?
         WHERE id = ?",
        rusqlite::params![
            input.description,
            input.payment_type_id,
            input.value,
            input.revenue_date_iso,
            revenue_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "revenues"))?;
    Ok(json!({ "revenueId": revenue_id }))
}

fn revenues_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let revenue_id = get_required_str(params, "revenueId")?;
    let removed = conn
        .execute("DELETE FROM revenues WHERE id = ?", [&revenue_id])
        .map_err(|e| HandlerErr::db_delete(e, "revenues"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("revenue not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "revenues.list" => Some(with_conn(state, req, |c, _| revenues_list(c))),
        "revenues.create" => Some(with_conn(state, req, revenues_create)),
        "revenues.update" => Some(with_conn(state, req, revenues_update)),
        "revenues.delete" => Some(with_conn(state, req, revenues_delete)),
        _ => None,
    }
}
