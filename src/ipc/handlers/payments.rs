use chrono::{Datelike, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::billing::{self, ObligationKey, PaymentFilter, PaymentRow};
use crate::ipc::helpers::{HandlerErr, get_optional_str, get_optional_u64, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Category, PaymentStatus};

fn load_fee_entries(conn: &Connection) -> Result<Vec<billing::FeeEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT category, value FROM fee_settings")
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut fees = Vec::with_capacity(raw.len());
    for (category, value) in raw {
        let category = Category::parse(&category).ok_or_else(|| {
            HandlerErr::invalid_record(format!("fee setting with unknown category: {}", category))
        })?;
        fees.push(billing::FeeEntry { category, value });
    }
    Ok(fees)
}

fn load_active_roster(conn: &Connection) -> Result<Vec<billing::RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, category, join_date, has_scholarship, scholarship_discount
             FROM students
             WHERE status = 'Ativo'
             ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)? != 0,
                r.get::<_, f64>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut roster = Vec::with_capacity(raw.len());
    for (id, name, category, join_date, has_scholarship, scholarship_discount) in raw {
        let category = Category::parse(&category).ok_or_else(|| {
            HandlerErr::invalid_record(format!("student {} has unknown category {}", id, category))
        })?;
        roster.push(billing::RosterStudent {
            id,
            name,
            category,
            join_date,
            has_scholarship,
            scholarship_discount,
        });
    }
    Ok(roster)
}

fn existing_obligation_keys(conn: &Connection) -> Result<HashSet<ObligationKey>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, year, month_index FROM payments WHERE month_index IS NOT NULL",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([], |r| {
        Ok(ObligationKey {
            student_id: r.get(0)?,
            year: r.get(1)?,
            month_index: r.get::<_, i64>(2)? as u32,
        })
    })
    .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn monthly_type_id(conn: &Connection) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT id FROM payment_types WHERE name = ?",
        [billing::MONTHLY_FEE_TYPE],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::invalid_record("monthly payment type is missing"))
}

/// Generates and persists the missing months of the current year. The key
/// check inside the generator is the sole duplicate guard.
fn run_generation(conn: &Connection, today: NaiveDate) -> Result<usize, HandlerErr> {
    let roster = load_active_roster(conn)?;
    let fees = load_fee_entries(conn)?;
    let existing = existing_obligation_keys(conn)?;
    let type_id = monthly_type_id(conn)?;

    let generated = billing::generate_yearly_schedule(&roster, &existing, &fees, today);
    if generated.is_empty() {
        return Ok(0);
    }

    // Dropping the transaction on an early return rolls everything back, so
    // a failed run never commits a partial year.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for o in &generated {
        tx.execute(
            "INSERT INTO payments(
                id, student_id, payment_type_id, description, category, value,
                due_date, status, payment_method, month, month_index, year, payment_date
            ) VALUES(?, ?, ?, '', ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                o.student_id,
                type_id,
                o.category.as_str(),
                o.value,
                model::iso_date(o.due_date),
                o.status.as_str(),
                billing::GENERATED_PAYMENT_METHOD,
                o.month_name(),
                o.month_index as i64,
                o.year,
            ],
        )
        .map_err(|e| HandlerErr::db_insert(e, "payments"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    tracing::info!(created = generated.len(), year = today.year(), "yearly schedule generated");
    Ok(generated.len())
}

fn obligation_years(conn: &Connection) -> Result<Vec<i32>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT year FROM payments")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)
}

fn load_payment_rows(conn: &Connection) -> Result<Vec<PaymentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.student_id, s.name, p.payment_type_id, t.name,
                    p.description, p.category, p.value, p.due_date, p.status,
                    p.payment_method, p.month, p.month_index, p.year, p.payment_date
             FROM payments p
             JOIN students s ON s.id = p.student_id
             JOIN payment_types t ON t.id = p.payment_type_id
             ORDER BY p.year, p.month_index IS NULL, p.month_index, s.name",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, String>(8)?,
                r.get::<_, String>(9)?,
                r.get::<_, String>(10)?,
                r.get::<_, String>(11)?,
                r.get::<_, Option<i64>>(12)?,
                r.get::<_, i64>(13)?,
                r.get::<_, Option<String>>(14)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut rows = Vec::with_capacity(raw.len());
    for (
        id,
        student_id,
        student,
        payment_type_id,
        payment_type,
        description,
        category,
        value,
        due_date_iso,
        status,
        payment_method,
        month,
        month_index,
        year,
        payment_date_iso,
    ) in raw
    {
        let category = Category::parse(&category).ok_or_else(|| {
            HandlerErr::invalid_record(format!("payment {} has unknown category {}", id, category))
        })?;
        let status = PaymentStatus::parse(&status).ok_or_else(|| {
            HandlerErr::invalid_record(format!("payment {} has unknown status {}", id, status))
        })?;
        rows.push(PaymentRow {
            id,
            student_id,
            student,
            payment_type_id,
            payment_type,
            description,
            category,
            value,
            due_date_iso,
            status,
            payment_method,
            month,
            month_index: month_index.map(|i| i as u32),
            year: year as i32,
            payment_date_iso,
        });
    }
    Ok(rows)
}

fn payment_row_json(row: &PaymentRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "studentId": row.student_id,
        "student": row.student,
        "paymentTypeId": row.payment_type_id,
        "paymentType": row.payment_type,
        "description": row.description,
        "category": row.category.as_str(),
        "value": row.value,
        "dueDate": model::iso_to_display(&row.due_date_iso).unwrap_or_else(|| row.due_date_iso.clone()),
        "status": row.status.as_str(),
        "paymentMethod": row.payment_method,
        "month": row.month,
        "monthIndex": row.month_index,
        "year": row.year.to_string(),
        "paymentDate": row.payment_date_iso.as_deref().and_then(model::iso_to_display),
    })
}

/// List with the auto-generation gate, the compound filter, and display
/// pagination. Filtering happens in memory over the full collection, like
/// the screen it feeds.
fn payments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = Local::now().date_naive();
    let mut generated = 0;
    if billing::should_generate_for_year(obligation_years(conn)?, today.year()) {
        generated = run_generation(conn, today)?;
    }

    let rows = load_payment_rows(conn)?;
    let filter = PaymentFilter {
        search_term: get_optional_str(params, "searchTerm"),
        status: get_optional_str(params, "status"),
        month: get_optional_str(params, "month"),
        category: get_optional_str(params, "category"),
        payment_type: get_optional_str(params, "paymentType"),
    };
    let filtered = billing::apply_filters(&rows, &filter);

    let page = get_optional_u64(params, "page").unwrap_or(1) as usize;
    let page_size =
        get_optional_u64(params, "pageSize").unwrap_or(billing::DEFAULT_PAGE_SIZE as u64) as usize;
    let slice = billing::clamp_page(filtered.len(), page, page_size);

    let page_rows: Vec<serde_json::Value> = filtered[slice.start..slice.end]
        .iter()
        .map(|r| payment_row_json(r))
        .collect();

    Ok(json!({
        "payments": page_rows,
        "total": filtered.len(),
        "page": slice.page,
        "pageCount": slice.page_count,
        "pageSize": page_size,
        "generated": generated,
    }))
}

/// Explicit manual regeneration; bypasses the yearly gate but still tops up
/// only the missing months.
fn payments_generate_yearly(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let created = run_generation(conn, Local::now().date_naive())?;
    Ok(json!({ "created": created }))
}

struct PaymentInput {
    payment_type_id: String,
    payment_type_name: String,
    description: String,
    value: String,
    due_date_iso: String,
    status: PaymentStatus,
    payment_method: String,
    month: String,
    month_index: Option<u32>,
    year: i32,
    payment_date_iso: Option<String>,
}

fn parse_payment_input(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<PaymentInput, HandlerErr> {
    let payment_type_id = get_required_str(params, "paymentTypeId")?;
    let payment_type_name: String = conn
        .query_row(
            "SELECT name FROM payment_types WHERE id = ?",
            [&payment_type_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .ok_or_else(|| HandlerErr::not_found("payment type not found"))?;

    // Value arrives either as a number or as an already formatted string.
    let value = match params.get("value") {
        Some(v) if v.is_string() => {
            let text = v.as_str().unwrap_or_default();
            let parsed = model::parse_currency(text)
                .ok_or_else(|| HandlerErr::bad_params("value is not a parseable amount"))?;
            model::format_currency(parsed)
        }
        Some(v) if v.is_number() => model::format_currency(v.as_f64().unwrap_or(0.0)),
        _ => return Err(HandlerErr::bad_params("missing value")),
    };

    let due_raw = get_required_str(params, "dueDate")?;
    let due_date_iso = model::display_to_iso(&due_raw)
        .ok_or_else(|| HandlerErr::bad_params("dueDate must be DD/MM/YYYY or YYYY-MM-DD"))?;

    let status_raw = get_optional_str(params, "status").unwrap_or_else(|| "Pendente".to_string());
    let status = PaymentStatus::parse(&status_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", status_raw)))?;

    let month = get_required_str(params, "month")?;
    let month_index = model::month_index(&month);
    if month_index.is_none() {
        return Err(HandlerErr::bad_params(format!("unknown month: {}", month)));
    }

    let year: i32 = get_required_str(params, "year")?
        .trim()
        .parse()
        .map_err(|_| HandlerErr::bad_params("year must be numeric"))?;

    let payment_date_iso = match get_optional_str(params, "paymentDate") {
        Some(raw) if !raw.trim().is_empty() => Some(
            model::display_to_iso(&raw)
                .ok_or_else(|| HandlerErr::bad_params("paymentDate must be DD/MM/YYYY or YYYY-MM-DD"))?,
        ),
        _ => None,
    };

    Ok(PaymentInput {
        payment_type_id,
        payment_type_name,
        description: get_optional_str(params, "description").unwrap_or_default(),
        value,
        due_date_iso,
        status,
        payment_method: get_optional_str(params, "paymentMethod")
            .unwrap_or_else(|| billing::GENERATED_PAYMENT_METHOD.to_string()),
        month,
        month_index,
        year,
        payment_date_iso,
    })
}

fn payments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let category: String = conn
        .query_row(
            "SELECT category FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let input = parse_payment_input(conn, params)?;

    // The monthly fee is singular per student-month; one-off charges are not.
    if input.payment_type_name == billing::MONTHLY_FEE_TYPE {
        if let Some(month_index) = input.month_index {
            let duplicate = conn
                .query_row(
                    "SELECT 1 FROM payments
                     WHERE student_id = ? AND year = ? AND month_index = ?
                     LIMIT 1",
                    rusqlite::params![student_id, input.year, month_index as i64],
                    |r| r.get::<_, i64>(0),
                )
                .optional()
                .map_err(HandlerErr::db_query)?
                .is_some();
            if duplicate {
                return Err(HandlerErr::new(
                    "duplicate",
                    "student already has an obligation for that month",
                ));
            }
        }
    }

    let payment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(
            id, student_id, payment_type_id, description, category, value,
            due_date, status, payment_method, month, month_index, year, payment_date
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            payment_id,
            student_id,
            input.payment_type_id,
            input.description,
            category,
            input.value,
            input.due_date_iso,
            input.status.as_str(),
            input.payment_method,
            input.month,
            input.month_index.map(|i| i as i64),
            input.year,
            input.payment_date_iso,
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "payments"))?;

    Ok(json!({ "paymentId": payment_id }))
}

fn payments_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let exists = conn
        .query_row("SELECT 1 FROM payments WHERE id = ?", [&payment_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("payment not found"));
    }

    let input = parse_payment_input(conn, params)?;
    conn.execute(
        "UPDATE payments SET
            payment_type_id = ?, description = ?, value = ?, due_date = ?,
            status = ?, payment_method = ?, month = ?, month_index = ?,
            year = ?, payment_date = ?
         WHERE id = ?",
        rusqlite::params![
            input.payment_type_id,
            input.description,
            input.value,
            input.due_date_iso,
            input.status.as_str(),
            input.payment_method,
            input.month,
            input.month_index.map(|i| i as i64),
            input.year,
            input.payment_date_iso,
            payment_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "payments"))?;

    Ok(json!({ "paymentId": payment_id }))
}

fn payments_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let removed = conn
        .execute("DELETE FROM payments WHERE id = ?", [&payment_id])
        .map_err(|e| HandlerErr::db_delete(e, "payments"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("payment not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn payment_status(conn: &Connection, payment_id: &str) -> Result<PaymentStatus, HandlerErr> {
    let status: String = conn
        .query_row(
            "SELECT status FROM payments WHERE id = ?",
            [payment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .ok_or_else(|| HandlerErr::not_found("payment not found"))?;
    PaymentStatus::parse(&status).ok_or_else(|| {
        HandlerErr::invalid_record(format!("payment {} has unknown status {}", payment_id, status))
    })
}

fn payments_confirm(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let status = payment_status(conn, &payment_id)?;
    if status == PaymentStatus::Paid {
        return Err(HandlerErr::bad_params("payment is already confirmed"));
    }

    let today = Local::now().date_naive();
    conn.execute(
        "UPDATE payments SET status = ?, payment_date = ? WHERE id = ?",
        rusqlite::params![
            PaymentStatus::Paid.as_str(),
            model::iso_date(today),
            payment_id
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "payments"))?;

    Ok(json!({
        "paymentId": payment_id,
        "status": PaymentStatus::Paid.as_str(),
        "paymentDate": model::display_date(today),
    }))
}

fn payments_revert_to_pending(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let status = payment_status(conn, &payment_id)?;
    if status != PaymentStatus::Paid {
        return Err(HandlerErr::bad_params("only confirmed payments can revert"));
    }

    conn.execute(
        "UPDATE payments SET status = ?, payment_date = NULL WHERE id = ?",
        rusqlite::params![PaymentStatus::Pending.as_str(), payment_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "payments"))?;

    Ok(json!({
        "paymentId": payment_id,
        "status": PaymentStatus::Pending.as_str(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.list" => Some(with_conn(state, req, payments_list)),
        "payments.generateYearly" => {
            Some(with_conn(state, req, |c, _| payments_generate_yearly(c)))
        }
        "payments.create" => Some(with_conn(state, req, payments_create)),
        "payments.update" => Some(with_conn(state, req, payments_update)),
        "payments.delete" => Some(with_conn(state, req, payments_delete)),
        "payments.confirm" => Some(with_conn(state, req, payments_confirm)),
        "payments.revertToPending" => Some(with_conn(state, req, payments_revert_to_pending)),
        _ => None,
    }
}
