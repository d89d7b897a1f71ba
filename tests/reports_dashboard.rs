use chrono::{Datelike, Days, Local, NaiveDate};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const MONTHS: [&str; 12] = [
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

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_academyd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn academyd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn display(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{}", date.day(), date.month(), date.year())
}

#[test]
fn dashboard_stats_and_yearly_money_summary() {
    let workspace = temp_dir("academyd-dashboard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "feeSettings.upsert",
        json!({ "category": "Sub-7", "value": 100.0 }),
    );

    let today = Local::now().date_naive();
    // A birthday inside the 7-day dashboard window.
    let upcoming = today.checked_add_days(Days::new(3)).expect("date in range");
    let birth = NaiveDate::from_ymd_opt(2015, upcoming.month(), upcoming.day())
        .or_else(|| NaiveDate::from_ymd_opt(2015, 2, 28))
        .expect("birth date");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "name": "Ana Beatriz",
            "category": "Sub-7",
            "hasScholarship": true,
            "scholarshipDiscount": 50.0,
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "name": "Bruno Costa",
            "category": "Sub-9",
            "birthDate": display(birth),
        }),
    );

    let _ = request_ok(&mut stdin, &mut reader, "5", "payments.generateYearly", json!({}));

    let dashboard = request_ok(&mut stdin, &mut reader, "6", "dashboard.open", json!({}));
    assert_eq!(dashboard["stats"]["total"].as_i64(), Some(2));
    assert_eq!(dashboard["stats"]["scholars"].as_i64(), Some(1));
    assert_eq!(dashboard["stats"]["paying"].as_i64(), Some(1));
    assert_eq!(dashboard["stats"]["totalPaid"].as_f64(), Some(0.0));

    let category_data = dashboard["categoryData"].as_array().expect("categoryData");
    assert_eq!(category_data.len(), 6);
    let count_of = |name: &str| {
        category_data
            .iter()
            .find(|c| c["category"].as_str() == Some(name))
            .and_then(|c| c["count"].as_i64())
    };
    assert_eq!(count_of("Sub-7"), Some(1));
    assert_eq!(count_of("Sub-9"), Some(1));
    assert_eq!(count_of("Sub-11"), Some(0));

    let ratio = dashboard["studentRatio"].as_array().expect("studentRatio");
    assert_eq!(ratio[0]["percentage"].as_i64(), Some(50));
    assert_eq!(ratio[1]["percentage"].as_i64(), Some(50));

    let birthdays = dashboard["birthdays"].as_array().expect("birthdays");
    assert!(
        birthdays
            .iter()
            .any(|b| b["name"].as_str() == Some("Bruno Costa")),
        "upcoming birthday missing: {:?}",
        birthdays
    );

    // Confirm Ana's obligation for the current month: 100 with 50% off.
    let current_month = MONTHS[today.month0() as usize];
    let ana_current = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "payments.list",
        json!({ "searchTerm": "Ana", "month": current_month, "pageSize": 10 }),
    );
    assert_eq!(ana_current["total"].as_i64(), Some(1));
    assert_eq!(
        ana_current["payments"][0]["value"].as_str(),
        Some("R$ 50,00")
    );
    let payment_id = ana_current["payments"][0]["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "payments.confirm",
        json!({ "paymentId": payment_id }),
    );

    let dashboard = request_ok(&mut stdin, &mut reader, "9", "dashboard.open", json!({}));
    assert_eq!(dashboard["stats"]["totalPaid"].as_f64(), Some(50.0));

    // One-off income joins the yearly summary.
    let types = request_ok(&mut stdin, &mut reader, "10", "paymentTypes.list", json!({}));
    let matricula_id = types["paymentTypes"]
        .as_array()
        .expect("types")
        .iter()
        .find(|t| t["name"].as_str() == Some("Matrícula"))
        .and_then(|t| t["id"].as_str())
        .expect("Matrícula type")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "revenues.create",
        json!({
            "description": "Matrícula torneio interno",
            "paymentTypeId": matricula_id,
            "value": 200.0,
            "revenueDate": display(today),
        }),
    );

    let report = request_ok(&mut stdin, &mut reader, "12", "reports.revenue", json!({}));
    assert_eq!(report["year"].as_i64(), Some(today.year() as i64));
    let month_row = &report["months"][today.month0() as usize];
    assert_eq!(month_row["month"].as_str(), Some(current_month));
    assert_eq!(month_row["payments"].as_f64(), Some(50.0));
    assert_eq!(month_row["revenues"].as_f64(), Some(200.0));
    assert_eq!(month_row["total"].as_f64(), Some(250.0));
    assert_eq!(report["totals"]["payments"].as_f64(), Some(50.0));
    assert_eq!(report["totals"]["revenues"].as_f64(), Some(200.0));
    assert_eq!(report["totals"]["grand"].as_f64(), Some(250.0));

    drop(stdin);
    let _ = child.wait();
}
