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

fn create_player(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    position: &str,
    number: u32,
    is_reserve: bool,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "scout.players.create",
        json!({ "name": name, "position": position, "number": number, "isReserve": is_reserve }),
    );
    res["playerId"].as_str().expect("playerId").to_string()
}

#[test]
fn match_actions_substitution_and_report() {
    let workspace = temp_dir("academyd-scout");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let joao = create_player(&mut stdin, &mut reader, "2", "João Klein", "Goleiro", 1, false);
    let luis = create_player(&mut stdin, &mut reader, "3", "Luís Maia", "Pivo", 9, false);
    let nino = create_player(&mut stdin, &mut reader, "4", "Nino Otero", "Ala Esquerdo", 11, true);

    let today = Local::now().date_naive();
    let today_display = format!("{:02}/{:02}/{}", today.day(), today.month(), today.year());

    // No actions without an open match.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "5",
        "scout.action.register",
        json!({ "playerId": joao, "actionType": "goal", "area": 1 }),
    );
    assert_eq!(code, "bad_params");

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scout.match.start",
        json!({
            "date": today_display,
            "opponent": "EC Vila Nova",
            "isTraining": false,
            "category": "Sub-13",
            "starters": [joao, luis],
        }),
    );
    let match_id = started["id"].as_str().expect("match id").to_string();
    assert_eq!(started["onCourt"].as_array().map(|a| a.len()), Some(2));

    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "7",
        "scout.match.start",
        json!({
            "date": today_display,
            "category": "Sub-13",
            "starters": [joao],
        }),
    );
    assert_eq!(code, "bad_params");

    // Goals carry a court area; passes do not.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "8",
        "scout.action.register",
        json!({ "playerId": luis, "actionType": "goal" }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scout.action.register",
        json!({ "playerId": luis, "actionType": "goal", "area": 2 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "scout.action.register",
        json!({ "playerId": luis, "actionType": "passeCerto" }),
    );
    let undone = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "scout.action.register",
        json!({ "playerId": joao, "actionType": "passeErrado" }),
    );

    // Bench players cannot act until they come on.
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "12",
        "scout.action.register",
        json!({ "playerId": nino, "actionType": "passeCerto" }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "scout.substitute",
        json!({ "playerOutId": luis, "playerInId": nino }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "scout.action.register",
        json!({ "playerId": nino, "actionType": "assistencia" }),
    );
    let code = request_fail_code(
        &mut stdin,
        &mut reader,
        "15",
        "scout.action.register",
        json!({ "playerId": luis, "actionType": "passeCerto" }),
    );
    assert_eq!(code, "bad_params");

    let current = request_ok(&mut stdin, &mut reader, "16", "scout.match.current", json!({}));
    let bench: Vec<&str> = current["match"]["bench"]
        .as_array()
        .expect("bench")
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert_eq!(bench, vec![luis.as_str()]);

    // Mistaps are removed from the log entirely.
    let undone_id = undone["actionId"].as_str().expect("actionId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "scout.action.undo",
        json!({ "actionId": undone_id }),
    );

    let actions = request_ok(&mut stdin, &mut reader, "18", "scout.actions.list", json!({}));
    assert_eq!(actions["actions"].as_array().map(|a| a.len()), Some(3));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "scout.report",
        json!({ "matchId": match_id }),
    );
    assert_eq!(report["totals"]["goal"].as_i64(), Some(1));
    assert_eq!(report["totals"]["passeCerto"].as_i64(), Some(1));
    assert_eq!(report["totals"]["assistencia"].as_i64(), Some(1));
    assert_eq!(report["totals"]["passeErrado"].as_i64(), Some(0));
    let luis_row = report["players"]
        .as_array()
        .expect("players")
        .iter()
        .find(|p| p["playerId"].as_str() == Some(luis.as_str()))
        .expect("luis in report")
        .clone();
    assert_eq!(luis_row["actions"]["goal"].as_i64(), Some(1));

    let ended = request_ok(&mut stdin, &mut reader, "20", "scout.match.end", json!({}));
    assert_eq!(ended["matchId"].as_str(), Some(match_id.as_str()));
    let current = request_ok(&mut stdin, &mut reader, "21", "scout.match.current", json!({}));
    assert!(current["match"].is_null());

    // The report survives the match ending.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "scout.report",
        json!({ "matchId": match_id }),
    );
    assert_eq!(report["match"]["ended"].as_bool(), Some(true));

    drop(stdin);
    let _ = child.wait();
}
