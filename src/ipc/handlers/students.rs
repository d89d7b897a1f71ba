use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{HandlerErr, get_optional_bool, get_optional_f64, get_optional_str, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Category};

const ENROLLMENT_STATUSES: [&str; 2] = ["Ativo", "Inativo"];

struct StudentInput {
    name: String,
    birth_date: Option<String>,
    category: Category,
    join_date: Option<String>,
    polo: Option<String>,
    status: String,
    position: Option<String>,
    phone: Option<String>,
    whatsapp: Option<String>,
    address: Option<String>,
    rg: Option<String>,
    cpf: Option<String>,
    responsible_name: Option<String>,
    responsible_cpf: Option<String>,
    has_scholarship: bool,
    scholarship_discount: f64,
}

/// Dates arrive in either accepted shape and are normalized to ISO for
/// storage. An unrecognized non-empty date is a form error, not data.
fn normalize_date_param(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match model::display_to_iso(trimmed) {
        Some(iso) => Ok(Some(iso)),
        None => Err(HandlerErr::bad_params(format!(
            "{} must be DD/MM/YYYY or YYYY-MM-DD",
            key
        ))),
    }
}

fn parse_student_input(params: &serde_json::Value) -> Result<StudentInput, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let category_raw = get_required_str(params, "category")?;
    let category = Category::parse(&category_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {}", category_raw)))?;

    let status = get_optional_str(params, "status").unwrap_or_else(|| "Ativo".to_string());
    if !ENROLLMENT_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "status must be one of {:?}",
            ENROLLMENT_STATUSES
        )));
    }

    let has_scholarship = get_optional_bool(params, "hasScholarship").unwrap_or(false);
    let scholarship_discount = get_optional_f64(params, "scholarshipDiscount").unwrap_or(0.0);
    if !(0.0..=100.0).contains(&scholarship_discount) {
        return Err(HandlerErr::bad_params(
            "scholarshipDiscount must be between 0 and 100",
        ));
    }

    Ok(StudentInput {
        name,
        birth_date: normalize_date_param(params, "birthDate")?,
        category,
        join_date: normalize_date_param(params, "joinDate")?,
        polo: get_optional_str(params, "polo"),
        status,
        position: get_optional_str(params, "position"),
        phone: get_optional_str(params, "phone"),
        whatsapp: get_optional_str(params, "whatsapp"),
        address: get_optional_str(params, "address"),
        rg: get_optional_str(params, "rg"),
        cpf: get_optional_str(params, "cpf"),
        responsible_name: get_optional_str(params, "responsibleName"),
        responsible_cpf: get_optional_str(params, "responsibleCpf"),
        has_scholarship,
        scholarship_discount,
    })
}

fn student_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let birth_date: Option<String> = row.get(2)?;
    let join_date: Option<String> = row.get(4)?;
    let today = Local::now().date_naive();
    let age = birth_date
        .as_deref()
        .and_then(model::parse_flexible_date)
        .map(|b| model::age_on(b, today));

    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "birthDate": birth_date.as_deref().and_then(model::iso_to_display),
        "category": row.get::<_, String>(3)?,
        "joinDate": join_date.as_deref().and_then(model::iso_to_display),
        "polo": row.get::<_, Option<String>>(5)?,
        "status": row.get::<_, String>(6)?,
        "position": row.get::<_, Option<String>>(7)?,
        "phone": row.get::<_, Option<String>>(8)?,
        "whatsapp": row.get::<_, Option<String>>(9)?,
        "address": row.get::<_, Option<String>>(10)?,
        "rg": row.get::<_, Option<String>>(11)?,
        "cpf": row.get::<_, Option<String>>(12)?,
        "responsibleName": row.get::<_, Option<String>>(13)?,
        "responsibleCpf": row.get::<_, Option<String>>(14)?,
        "hasScholarship": row.get::<_, i64>(15)? != 0,
        "scholarshipDiscount": row.get::<_, f64>(16)?,
        "age": age,
    }))
}

const STUDENT_COLUMNS: &str = "id, name, birth_date, category, join_date, polo, status, position, \
     phone, whatsapp, address, rg, cpf, responsible_name, responsible_cpf, \
     has_scholarship, scholarship_discount";

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students ORDER BY name",
            STUDENT_COLUMNS
        ))
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([], student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input = parse_student_input(params)?;
    let student_id = Uuid::new_v4().to_string();
    let created_at = model::iso_date(Local::now().date_naive());

    conn.execute(
        "INSERT INTO students(
            id, name, birth_date, category, join_date, polo, status, position,
            phone, whatsapp, address, rg, cpf, responsible_name, responsible_cpf,
            has_scholarship, scholarship_discount, created_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student_id,
            input.name,
            input.birth_date,
            input.category.as_str(),
            input.join_date,
            input.polo,
            input.status,
            input.position,
            input.phone,
            input.whatsapp,
            input.address,
            input.rg,
            input.cpf,
            input.responsible_name,
            input.responsible_cpf,
            input.has_scholarship as i64,
            input.scholarship_discount,
            created_at,
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "students"))?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let input = parse_student_input(params)?;
    conn.execute(
        "UPDATE students SET
            name = ?, birth_date = ?, category = ?, join_date = ?, polo = ?,
            status = ?, position = ?, phone = ?, whatsapp = ?, address = ?,
            rg = ?, cpf = ?, responsible_name = ?, responsible_cpf = ?,
            has_scholarship = ?, scholarship_discount = ?
         WHERE id = ?",
        rusqlite::params![
            input.name,
            input.birth_date,
            input.category.as_str(),
            input.join_date,
            input.polo,
            input.status,
            input.position,
            input.phone,
            input.whatsapp,
            input.address,
            input.rg,
            input.cpf,
            input.responsible_name,
            input.responsible_cpf,
            input.has_scholarship as i64,
            input.scholarship_discount,
            student_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    Ok(json!({ "studentId": student_id }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    // Dependency order; no ON DELETE CASCADE. An early return drops the
    // transaction and rolls back.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for (sql, table) in [
        (
            "DELETE FROM attendance_marks WHERE student_id = ?",
            "attendance_marks",
        ),
        (
            "DELETE FROM evaluations WHERE student_id = ?",
            "evaluations",
        ),
        ("DELETE FROM payments WHERE student_id = ?", "payments"),
    ] {
        tx.execute(sql, [&student_id])
            .map_err(|e| HandlerErr::db_delete(e, table))?;
    }
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_delete(e, "students"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, |c, _| students_list(c))),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
