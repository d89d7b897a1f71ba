use chrono::{Datelike, Local};
use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::model::{self, PaymentStatus, MONTHS};

/// Current-year money summary: confirmed obligations plus one-off revenue
/// entries, bucketed by month. Stored amounts are display strings, so the
/// sums go through the currency parser.
fn revenue_report(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let year = Local::now().date_naive().year();

    let mut paid_by_month = [0.0f64; 12];
    let mut stmt = conn
        .prepare("SELECT month_index, value FROM payments WHERE year = ? AND status = ?")
        .map_err(HandlerErr::db_query)?;
    let paid_rows = stmt
        .query_map(
            rusqlite::params![year, PaymentStatus::Paid.as_str()],
            |r| Ok((r.get::<_, Option<i64>>(0)?, r.get::<_, String>(1)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    for (month_index, value) in paid_rows {
        let Some(amount) = model::parse_currency(&value) else {
            tracing::warn!(value = %value, "skipping unparseable payment amount in report");
            continue;
        };
        if let Some(i) = month_index.filter(|i| (0..12).contains(i)) {
            paid_by_month[i as usize] += amount;
        }
    }

    let mut revenue_by_month = [0.0f64; 12];
    let mut stmt = conn
        .prepare("SELECT revenue_date, value FROM revenues")
        .map_err(HandlerErr::db_query)?;
    let revenue_rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    for (date, value) in revenue_rows {
        let Some(d) = model::parse_flexible_date(&date) else {
            continue;
        };
        if d.year() != year {
            continue;
        }
        let Some(amount) = model::parse_currency(&value) else {
            tracing::warn!(value = %value, "skipping unparseable revenue amount in report");
            continue;
        };
        revenue_by_month[d.month0() as usize] += amount;
    }

    let months: Vec<serde_json::Value> = MONTHS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let payments = paid_by_month[i];
            let revenues = revenue_by_month[i];
            json!({
                "month": name,
                "monthIndex": i,
                "payments": payments,
                "revenues": revenues,
                "total": payments + revenues,
            })
        })
        .collect();

    let paid_total: f64 = paid_by_month.iter().sum();
    let revenue_total: f64 = revenue_by_month.iter().sum();

    Ok(json!({
        "year": year,
        "months": months,
        "totals": {
            "payments": paid_total,
            "revenues": revenue_total,
            "grand": paid_total + revenue_total,
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.revenue" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match revenue_report(conn) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
