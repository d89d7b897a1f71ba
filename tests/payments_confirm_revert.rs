use chrono::{Datelike, Local};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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

fn request_raw(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_fail_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request_raw(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

#[test]
fn confirm_stamps_and_revert_clears_the_payment_date() {
    let workspace = temp_dir("academyd-confirm");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Fábio Gomes", "category": "Sub-15" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "3", "payments.generateYearly", json!({}));

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.list",
        json!({ "pageSize": 50 }),
    );
    let payment_id = list["payments"][0]["id"].as_str().expect("id").to_string();
    assert!(list["payments"][0]["paymentDate"].is_null());

    let today = Local::now().date_naive();
    let today_display = format!("{:02}/{:02}/{}", today.day(), today.month(), today.year());

    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "payments.confirm",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(confirmed["status"].as_str(), Some("Pago"));
    assert_eq!(confirmed["paymentDate"].as_str(), Some(today_display.as_str()));

    // Confirming twice is a user error, not a state change.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "6",
        "payments.confirm",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(code, "bad_params");

    let reverted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "payments.revertToPending",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(reverted["status"].as_str(), Some("Pendente"));

    let relisted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "payments.list",
        json!({ "pageSize": 50 }),
    );
    let row = relisted["payments"]
        .as_array()
        .expect("array")
        .iter()
        .find(|p| p["id"].as_str() == Some(payment_id.as_str()))
        .expect("row still present")
        .clone();
    assert_eq!(row["status"].as_str(), Some("Pendente"));
    assert!(row["paymentDate"].is_null());

    // Only confirmed payments can revert.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "9",
        "payments.revertToPending",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(code, "bad_params");

    // One-off charges go through the manual form.
    let types = request_ok(&mut stdin, &mut reader, "10", "paymentTypes.list", json!({}));
    let uniforme_id = types["paymentTypes"]
        .as_array()
        .expect("types")
        .iter()
        .find(|t| t["name"].as_str() == Some("Uniforme"))
        .and_then(|t| t["id"].as_str())
        .expect("Uniforme type")
        .to_string();
    let mensalidade_id = types["paymentTypes"]
        .as_array()
        .expect("types")
        .iter()
        .find(|t| t["name"].as_str() == Some("Mensalidade"))
        .and_then(|t| t["id"].as_str())
        .expect("Mensalidade type")
        .to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "payments.create",
        json!({
            "studentId": student_id,
            "paymentTypeId": uniforme_id,
            "description": "Uniforme completo",
            "value": 80.0,
            "dueDate": today_display,
            "month": "Janeiro",
            "year": today.year().to_string(),
        }),
    );
    assert!(created["paymentId"].as_str().is_some());

    // A second monthly obligation for an already billed month is refused.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "12",
        "payments.create",
        json!({
            "studentId": student_id,
            "paymentTypeId": mensalidade_id,
            "value": 150.0,
            "dueDate": today_display,
            "month": "Janeiro",
            "year": today.year().to_string(),
        }),
    );
    assert_eq!(code, "duplicate");

    drop(stdin);
    let _ = child.wait();
}
