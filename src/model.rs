use chrono::{Datelike, NaiveDate};

/// Age brackets used by students, fee settings and payment obligations.
/// Stored as free text; parsed and validated at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Sub7,
    Sub9,
    Sub11,
    Sub13,
    Sub15,
    Sub17,
}

pub const CATEGORIES: [Category; 6] = [
    Category::Sub7,
    Category::Sub9,
    Category::Sub11,
    Category::Sub13,
    Category::Sub15,
    Category::Sub17,
];

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Sub7 => "Sub-7",
            Category::Sub9 => "Sub-9",
            Category::Sub11 => "Sub-11",
            Category::Sub13 => "Sub-13",
            Category::Sub15 => "Sub-15",
            Category::Sub17 => "Sub-17",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        CATEGORIES.iter().copied().find(|c| c.as_str() == s)
    }
}

/// Obligation lifecycle. Exactly three states; `Atrasado` is only assigned at
/// generation time, never by a later sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pendente",
            PaymentStatus::Paid => "Pago",
            PaymentStatus::Overdue => "Atrasado",
        }
    }

    pub fn parse(s: &str) -> Option<PaymentStatus> {
        match s {
            "Pendente" => Some(PaymentStatus::Pending),
            "Pago" => Some(PaymentStatus::Paid),
            "Atrasado" => Some(PaymentStatus::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Admin,
    Professor,
    User,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Professor => "professor",
            UserRole::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<UserRole> {
        match s {
            "admin" => Some(UserRole::Admin),
            "professor" => Some(UserRole::Professor),
            "user" => Some(UserRole::User),
            _ => None,
        }
    }
}

/// In-match scouting actions. The location-bearing ones carry a court area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoutActionType {
    Goal,
    Assist,
    Tackle,
    GoalConceded,
    Foul,
    PassCompleted,
    PassMissed,
    ShotOnGoal,
}

pub const SCOUT_ACTION_TYPES: [ScoutActionType; 8] = [
    ScoutActionType::Goal,
    ScoutActionType::Assist,
    ScoutActionType::Tackle,
    ScoutActionType::GoalConceded,
    ScoutActionType::Foul,
    ScoutActionType::PassCompleted,
    ScoutActionType::PassMissed,
    ScoutActionType::ShotOnGoal,
];

impl ScoutActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoutActionType::Goal => "goal",
            ScoutActionType::Assist => "assistencia",
            ScoutActionType::Tackle => "desarme",
            ScoutActionType::GoalConceded => "golSofrido",
            ScoutActionType::Foul => "falta",
            ScoutActionType::PassCompleted => "passeCerto",
            ScoutActionType::PassMissed => "passeErrado",
            ScoutActionType::ShotOnGoal => "chuteGol",
        }
    }

    pub fn parse(s: &str) -> Option<ScoutActionType> {
        SCOUT_ACTION_TYPES.iter().copied().find(|t| t.as_str() == s)
    }

    pub fn requires_area(self) -> bool {
        matches!(
            self,
            ScoutActionType::Goal
                | ScoutActionType::Tackle
                | ScoutActionType::Foul
                | ScoutActionType::ShotOnGoal
        )
    }
}

/// Page ids a user's permission list may grant.
pub const AVAILABLE_PAGES: [&str; 9] = [
    "dashboard",
    "alunos",
    "mensalidades",
    "avaliacoes",
    "relatorios",
    "receitas",
    "scout",
    "relatorio-jogos",
    "configuracoes",
];

/// Localized month names. Array index = 0-based chronological month index;
/// both the lookup key and the display form.
pub const MONTHS: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

pub fn month_name(index: u32) -> Option<&'static str> {
    MONTHS.get(index as usize).copied()
}

pub fn month_index(name: &str) -> Option<u32> {
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32)
}

/// Formats a value as `R$ 1.234,56`: two decimals, `.` thousands groups,
/// `,` decimal separator.
pub fn format_currency(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let frac = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if negative { "-" } else { "" };
    format!("{}R$ {},{:02}", sign, grouped, frac)
}

/// Inverse of [`format_currency`]: strips the symbol and whitespace, drops
/// thousands dots, normalizes the decimal comma, parses as f64.
pub fn parse_currency(text: &str) -> Option<f64> {
    let stripped: String = text
        .chars()
        .filter(|c| *c != 'R' && *c != '$' && !c.is_whitespace())
        .collect();
    let normalized: String = stripped
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok()
}

/// Parses either wire shape for a calendar date: `DD/MM/YYYY` (display) or
/// `YYYY-MM-DD` (store order, trailing time tolerated).
pub fn parse_flexible_date(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%d/%m/%Y") {
        return Some(d);
    }
    let head = t.get(0..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub fn iso_to_display(iso: &str) -> Option<String> {
    let d = NaiveDate::parse_from_str(iso.trim(), "%Y-%m-%d").ok()?;
    Some(d.format("%d/%m/%Y").to_string())
}

pub fn display_to_iso(display: &str) -> Option<String> {
    let d = parse_flexible_date(display)?;
    Some(d.format("%Y-%m-%d").to_string())
}

pub fn display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Whole years completed as of `today`. Never stored; derived on read.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}
