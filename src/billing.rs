use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

use crate::model::{
    format_currency, month_name, parse_flexible_date, Category, PaymentStatus,
};

pub const DEFAULT_MONTHLY_FEE: f64 = 150.0;
pub const MONTHLY_FEE_TYPE: &str = "Mensalidade";
pub const GENERATED_PAYMENT_METHOD: &str = "PIX";
/// Monthly obligations fall due on this day of their month.
pub const DUE_DAY: u32 = 10;
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct FeeEntry {
    pub category: Category,
    pub value: f64,
}

/// Base amount for the category (table lookup, fixed fallback), discounted
/// when the scholarship flag is set. The discount percent is assumed already
/// clamped to [0,100] by the form boundary.
pub fn resolve_monthly_fee(
    fees: &[FeeEntry],
    category: Category,
    has_scholarship: bool,
    discount_percent: f64,
) -> f64 {
    let base = fees
        .iter()
        .find(|f| f.category == category)
        .map(|f| f.value)
        .unwrap_or(DEFAULT_MONTHLY_FEE);

    if has_scholarship && discount_percent > 0.0 {
        base * (1.0 - discount_percent / 100.0)
    } else {
        base
    }
}

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub join_date: Option<String>,
    pub has_scholarship: bool,
    pub scholarship_discount: f64,
}

/// Normalized duplicate guard for monthly obligations. The localized month
/// name is display-only; dedup always compares on this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObligationKey {
    pub student_id: String,
    pub year: i32,
    pub month_index: u32,
}

#[derive(Debug, Clone)]
pub struct GeneratedObligation {
    pub student_id: String,
    pub category: Category,
    pub value: String,
    pub due_date: NaiveDate,
    pub status: PaymentStatus,
    pub month_index: u32,
    pub year: i32,
}

impl GeneratedObligation {
    pub fn month_name(&self) -> &'static str {
        month_name(self.month_index).unwrap_or("")
    }
}

/// First billable month (0-based) for a student. Malformed join dates fall
/// back to January; that leniency is policy, so it is logged, not rejected.
fn start_month_index(student: &RosterStudent) -> u32 {
    let Some(raw) = student.join_date.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return 0;
    };
    match parse_flexible_date(raw) {
        Some(date) => date.month0(),
        None => {
            tracing::warn!(
                student_id = %student.id,
                join_date = %raw,
                "unparseable join date, billing from January"
            );
            0
        }
    }
}

/// One monthly obligation per student per month from the join month through
/// December of `today`'s year, skipping months whose key already exists.
/// Running this twice over the same inputs produces nothing the second time:
/// the key check is the only duplicate guard, by design.
pub fn generate_yearly_schedule(
    students: &[RosterStudent],
    existing: &HashSet<ObligationKey>,
    fees: &[FeeEntry],
    today: NaiveDate,
) -> Vec<GeneratedObligation> {
    let year = today.year();
    let current_month = today.month0();

    let mut seen = existing.clone();
    let mut out = Vec::new();

    for student in students {
        let start = start_month_index(student);
        let amount = resolve_monthly_fee(
            fees,
            student.category,
            student.has_scholarship,
            student.scholarship_discount,
        );

        for month_index in start..12 {
            let key = ObligationKey {
                student_id: student.id.clone(),
                year,
                month_index,
            };
            if seen.contains(&key) {
                continue;
            }
            seen.insert(key);

            let status = if month_index < current_month {
                PaymentStatus::Overdue
            } else {
                PaymentStatus::Pending
            };
            // Day 10 exists in every month.
            let due_date = NaiveDate::from_ymd_opt(year, month_index + 1, DUE_DAY)
                .expect("due day within month");

            out.push(GeneratedObligation {
                student_id: student.id.clone(),
                category: student.category,
                value: format_currency(amount),
                due_date,
                status,
                month_index,
                year,
            });
        }
    }

    out
}

/// Automatic generation runs only while the current year has no obligations
/// at all; after that the stored collection is authoritative. The explicit
/// manual action bypasses this gate.
pub fn should_generate_for_year(
    existing_years: impl IntoIterator<Item = i32>,
    current_year: i32,
) -> bool {
    !existing_years.into_iter().any(|y| y == current_year)
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub id: String,
    pub student_id: String,
    pub student: String,
    pub payment_type_id: String,
    pub payment_type: String,
    pub description: String,
    pub category: Category,
    pub value: String,
    pub due_date_iso: String,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub month: String,
    pub month_index: Option<u32>,
    pub year: i32,
    pub payment_date_iso: Option<String>,
}

/// Compound display filter. Every field is optional; empty strings mean "no
/// constraint". Predicates are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub search_term: Option<String>,
    pub status: Option<String>,
    pub month: Option<String>,
    pub category: Option<String>,
    pub payment_type: Option<String>,
}

fn constraint(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn apply_filters<'a>(rows: &'a [PaymentRow], filter: &PaymentFilter) -> Vec<&'a PaymentRow> {
    let term = constraint(&filter.search_term).map(str::to_lowercase);
    let status = constraint(&filter.status);
    let month = constraint(&filter.month);
    let category = constraint(&filter.category);
    let payment_type = constraint(&filter.payment_type);

    rows.iter()
        .filter(|p| {
            if let Some(term) = &term {
                if !p.student.to_lowercase().contains(term) {
                    return false;
                }
            }
            if let Some(s) = status {
                if p.status.as_str() != s {
                    return false;
                }
            }
            if let Some(m) = month {
                if p.month != m {
                    return false;
                }
            }
            if let Some(c) = category {
                if p.category.as_str() != c {
                    return false;
                }
            }
            if let Some(t) = payment_type {
                if p.payment_type != t {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlice {
    pub page: usize,
    pub page_count: usize,
    pub start: usize,
    pub end: usize,
}

/// 1-based display pagination. Out-of-range pages clamp to the last
/// non-empty page so a shrinking filtered set never strands the cursor.
pub fn clamp_page(total: usize, page: usize, page_size: usize) -> PageSlice {
    let page_size = page_size.max(1);
    let page_count = (total.div_ceil(page_size)).max(1);
    let page = page.clamp(1, page_count);
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total);
    PageSlice {
        page,
        page_count,
        start,
        end,
    }
}
