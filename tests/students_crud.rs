use chrono::{Datelike, Local, NaiveDate};
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

fn expected_age(birth: NaiveDate) -> i64 {
    let today = Local::now().date_naive();
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age as i64
}

#[test]
fn student_lifecycle_with_validation_and_cascade_delete() {
    let workspace = temp_dir("academyd-students");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // The category set is closed and the discount is a percentage.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Gabriel Horta", "category": "Sub-21" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "name": "Gabriel Horta",
            "category": "Sub-15",
            "hasScholarship": true,
            "scholarshipDiscount": 150.0,
        }),
    );
    assert_eq!(code, "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "name": "Gabriel Horta",
            "category": "Sub-15",
            "birthDate": "2011-03-20",
            "joinDate": "15/02/2024",
            "position": "Goleiro",
            "phone": "11 91234-5678",
        }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();

    let list = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    let students = list["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    let row = &students[0];
    assert_eq!(row["name"].as_str(), Some("Gabriel Horta"));
    assert_eq!(row["birthDate"].as_str(), Some("20/03/2011"));
    assert_eq!(row["joinDate"].as_str(), Some("15/02/2024"));
    assert_eq!(row["status"].as_str(), Some("Ativo"));
    let birth = NaiveDate::from_ymd_opt(2011, 3, 20).unwrap();
    assert_eq!(row["age"].as_i64(), Some(expected_age(birth)));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({
            "studentId": student_id,
            "name": "Gabriel Horta Filho",
            "category": "Sub-17",
            "birthDate": "20/03/2011",
            "status": "Inativo",
        }),
    );
    let list = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    let row = &list["students"][0];
    assert_eq!(row["name"].as_str(), Some("Gabriel Horta Filho"));
    assert_eq!(row["category"].as_str(), Some("Sub-17"));
    assert_eq!(row["status"].as_str(), Some("Inativo"));

    // Inactive students are not billed.
    let generated = request_ok(&mut stdin, &mut reader, "8", "payments.generateYearly", json!({}));
    assert_eq!(generated["created"].as_i64(), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.update",
        json!({
            "studentId": student_id,
            "name": "Gabriel Horta Filho",
            "category": "Sub-17",
            "status": "Ativo",
        }),
    );
    let generated = request_ok(&mut stdin, &mut reader, "10", "payments.generateYearly", json!({}));
    assert_eq!(generated["created"].as_i64(), Some(12));

    // Deleting the student takes the dependent records with it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let list = request_ok(&mut stdin, &mut reader, "12", "students.list", json!({}));
    assert_eq!(list["students"].as_array().map(|a| a.len()), Some(0));
    let payments = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "payments.list",
        json!({ "pageSize": 50 }),
    );
    assert_eq!(payments["total"].as_i64(), Some(0));

    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "14",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
}
