use chrono::{Datelike, Days, Local, NaiveDate};
use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::model::{self, PaymentStatus, CATEGORIES};

/// Next occurrence of a birthday on or after `today`. Feb 29 birthdays
/// observe on Feb 28 in common years.
fn next_birthday(birth: NaiveDate, today: NaiveDate) -> NaiveDate {
    let in_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
            .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
            .expect("fallback date valid")
    };
    let this_year = in_year(today.year());
    if this_year < today {
        in_year(today.year() + 1)
    } else {
        this_year
    }
}

fn dashboard_open(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let today = Local::now().date_naive();

    let mut stmt = conn
        .prepare("SELECT id, name, category, birth_date, has_scholarship FROM students")
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let total = students.len() as i64;
    let scholars = students.iter().filter(|(.., s)| *s).count() as i64;
    let paying = total - scholars;

    // Confirmed obligations of the current month only.
    let mut stmt = conn
        .prepare("SELECT value FROM payments WHERE year = ? AND month_index = ? AND status = ?")
        .map_err(HandlerErr::db_query)?;
    let paid_values = stmt
        .query_map(
            rusqlite::params![
                today.year(),
                today.month0() as i64,
                PaymentStatus::Paid.as_str()
            ],
            |r| r.get::<_, String>(0),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    let total_paid: f64 = paid_values
        .iter()
        .filter_map(|v| model::parse_currency(v))
        .sum();

    let category_data: Vec<serde_json::Value> = CATEGORIES
        .iter()
        .map(|c| {
            let count = students
                .iter()
                .filter(|(_, _, category, ..)| category == c.as_str())
                .count();
            json!({ "category": c.as_str(), "count": count })
        })
        .collect();

    let percent = |part: i64| {
        if total > 0 {
            ((part as f64 / total as f64) * 100.0).round() as i64
        } else {
            0
        }
    };
    let student_ratio = json!([
        { "name": "Alunos Pagantes", "value": paying, "percentage": percent(paying) },
        { "name": "Alunos Bolsistas", "value": scholars, "percentage": percent(scholars) },
    ]);

    let horizon = today
        .checked_add_days(Days::new(7))
        .expect("date within range");
    let mut birthdays: Vec<(NaiveDate, serde_json::Value)> = students
        .iter()
        .filter_map(|(id, name, category, birth_date, _)| {
            let birth = birth_date.as_deref().and_then(model::parse_flexible_date)?;
            let upcoming = next_birthday(birth, today);
            if upcoming > horizon {
                return None;
            }
            Some((
                upcoming,
                json!({
                    "id": id,
                    "name": name,
                    "category": category,
                    "birthDate": model::display_date(birth),
                }),
            ))
        })
        .collect();
    birthdays.sort_by_key(|(date, _)| *date);
    let birthdays: Vec<serde_json::Value> = birthdays.into_iter().map(|(_, v)| v).collect();

    Ok(json!({
        "stats": {
            "total": total,
            "paying": paying,
            "scholars": scholars,
            "totalPaid": total_paid,
        },
        "categoryData": category_data,
        "studentRatio": student_ratio,
        "birthdays": birthdays,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.open" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match dashboard_open(conn) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
