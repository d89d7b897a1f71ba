use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{HandlerErr, get_optional_bool, get_optional_str, get_optional_u64, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Category, ScoutActionType, SCOUT_ACTION_TYPES};

const CURRENT_MATCH_KEY: &str = "scout.currentMatchId";

fn players_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, position, number, is_reserve FROM scout_players ORDER BY number")
        .map_err(HandlerErr::db_query)?;
    let players = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "position": r.get::<_, String>(2)?,
                "number": r.get::<_, i64>(3)?,
                "isReserve": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "players": players }))
}

fn players_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let position = get_required_str(params, "position")?;
    let number = get_optional_u64(params, "number")
        .ok_or_else(|| HandlerErr::bad_params("missing number"))? as i64;
    let is_reserve = get_optional_bool(params, "isReserve").unwrap_or(false);

    let player_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO scout_players(id, name, position, number, is_reserve)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![player_id, name, position, number, is_reserve as i64],
    )
    .map_err(|e| HandlerErr::db_insert(e, "scout_players"))?;
    Ok(json!({ "playerId": player_id }))
}

fn players_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let player_id = get_required_str(params, "playerId")?;
    let name = get_required_str(params, "name")?;
    let position = get_required_str(params, "position")?;
    let number = get_optional_u64(params, "number")
        .ok_or_else(|| HandlerErr::bad_params("missing number"))? as i64;
    let is_reserve = get_optional_bool(params, "isReserve").unwrap_or(false);

    let updated = conn
        .execute(
            "UPDATE scout_players SET name = ?, position = ?, number = ?, is_reserve = ?
             WHERE id = ?",
            rusqlite::params![name, position, number, is_reserve as i64, player_id],
        )
        .map_err(|e| HandlerErr::db_update(e, "scout_players"))?;
    if updated == 0 {
        return Err(HandlerErr::not_found("player not found"));
    }
    Ok(json!({ "playerId": player_id }))
}

fn players_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let player_id = get_required_str(params, "playerId")?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for (sql, table) in [
        (
            "DELETE FROM scout_actions WHERE player_id = ?",
            "scout_actions",
        ),
        (
            "DELETE FROM scout_match_players WHERE player_id = ?",
            "scout_match_players",
        ),
    ] {
        tx.execute(sql, [&player_id])
            .map_err(|e| HandlerErr::db_delete(e, table))?;
    }
    let removed = tx
        .execute("DELETE FROM scout_players WHERE id = ?", [&player_id])
        .map_err(|e| HandlerErr::db_delete(e, "scout_players"))?;
    if removed == 0 {
        // Dropping the transaction undoes the dependent deletes.
        return Err(HandlerErr::not_found("player not found"));
    }
    tx.commit().map_err(HandlerErr::db_commit)?;
    Ok(json!({ "deleted": true }))
}

fn current_match_id(conn: &Connection) -> Result<Option<String>, HandlerErr> {
    let value = db::settings_get_json(conn, CURRENT_MATCH_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(value.and_then(|v| v.as_str().map(str::to_string)))
}

fn match_json(conn: &Connection, match_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row: Option<(String, Option<String>, i64, String, i64)> = conn
        .query_row(
            "SELECT date, opponent, is_training, category, ended
             FROM scout_matches WHERE id = ?",
            [match_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((date, opponent, is_training, category, ended)) = row else {
        return Err(HandlerErr::not_found("match not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.name, p.position, p.number, mp.on_court
             FROM scout_match_players mp
             JOIN scout_players p ON p.id = mp.player_id
             WHERE mp.match_id = ?
             ORDER BY p.number",
        )
        .map_err(HandlerErr::db_query)?;
    let roster = stmt
        .query_map([match_id], |r| {
            Ok((
                json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "position": r.get::<_, String>(2)?,
                    "number": r.get::<_, i64>(3)?,
                }),
                r.get::<_, i64>(4)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let (on_court, bench): (Vec<_>, Vec<_>) = roster.into_iter().partition(|(_, oc)| *oc);
    Ok(json!({
        "id": match_id,
        "date": model::iso_to_display(&date).unwrap_or(date),
        "opponent": opponent,
        "isTraining": is_training != 0,
        "category": category,
        "ended": ended != 0,
        "onCourt": on_court.into_iter().map(|(p, _)| p).collect::<Vec<_>>(),
        "bench": bench.into_iter().map(|(p, _)| p).collect::<Vec<_>>(),
    }))
}

/// Opens a match and puts the starting lineup on court. Only one match may
/// be open at a time.
fn match_start(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    if current_match_id(conn)?.is_some() {
        return Err(HandlerErr::bad_params("a match is already in progress"));
    }

    let category_raw = get_required_str(params, "category")?;
    let category = Category::parse(&category_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {}", category_raw)))?;
    let date_raw = get_required_str(params, "date")?;
    let date_iso = model::display_to_iso(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be DD/MM/YYYY or YYYY-MM-DD"))?;
    let opponent = get_optional_str(params, "opponent");
    let is_training = get_optional_bool(params, "isTraining").unwrap_or(false);

    let Some(starters) = params.get("starters").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing starters"));
    };
    if starters.is_empty() {
        return Err(HandlerErr::bad_params("starters must not be empty"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let match_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO scout_matches(id, date, opponent, is_training, category, ended)
         VALUES(?, ?, ?, ?, ?, 0)",
        rusqlite::params![match_id, date_iso, opponent, is_training as i64, category.as_str()],
    )
    .map_err(|e| HandlerErr::db_insert(e, "scout_matches"))?;

    // Early returns drop the transaction and roll the match back out.
    for starter in starters {
        let Some(player_id) = starter.as_str() else {
            return Err(HandlerErr::bad_params("starters must be player ids"));
        };
        let exists = tx
            .query_row("SELECT 1 FROM scout_players WHERE id = ?", [player_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::db_query)?
            .is_some();
        if !exists {
            return Err(HandlerErr::not_found(format!("player not found: {}", player_id)));
        }
        tx.execute(
            "INSERT INTO scout_match_players(match_id, player_id, on_court)
             VALUES(?, ?, 1)
             ON CONFLICT(match_id, player_id) DO UPDATE SET on_court = 1",
            (&match_id, player_id),
        )
        .map_err(|e| HandlerErr::db_insert(e, "scout_match_players"))?;
    }

    db::settings_set_json(&tx, CURRENT_MATCH_KEY, &json!(match_id))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    match_json(conn, &match_id)
}

fn match_current(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    match current_match_id(conn)? {
        Some(id) => Ok(json!({ "match": match_json(conn, &id)? })),
        None => Ok(json!({ "match": serde_json::Value::Null })),
    }
}

fn match_end(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let Some(match_id) = current_match_id(conn)? else {
        return Err(HandlerErr::bad_params("no match in progress"));
    };
    conn.execute("UPDATE scout_matches SET ended = 1 WHERE id = ?", [&match_id])
        .map_err(|e| HandlerErr::db_update(e, "scout_matches"))?;
    db::settings_delete(conn, CURRENT_MATCH_KEY)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "matchId": match_id, "ended": true }))
}

fn on_court(conn: &Connection, match_id: &str, player_id: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT on_court FROM scout_match_players WHERE match_id = ? AND player_id = ?",
            (match_id, player_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .map(|v| v != 0)
        .unwrap_or(false))
}

fn action_register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(match_id) = current_match_id(conn)? else {
        return Err(HandlerErr::bad_params("no match in progress"));
    };

    let player_id = get_required_str(params, "playerId")?;
    if !on_court(conn, &match_id, &player_id)? {
        return Err(HandlerErr::bad_params("player is not on court"));
    }

    let type_raw = get_required_str(params, "actionType")?;
    let action_type = ScoutActionType::parse(&type_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown action type: {}", type_raw)))?;

    let area = get_optional_u64(params, "area");
    let area = if action_type.requires_area() {
        let a = area.ok_or_else(|| {
            HandlerErr::bad_params(format!("{} requires a court area", action_type.as_str()))
        })?;
        if !(1..=4).contains(&a) {
            return Err(HandlerErr::bad_params("area must be between 1 and 4"));
        }
        Some(a as i64)
    } else {
        None
    };

    let action_id = Uuid::new_v4().to_string();
    let recorded_at = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO scout_actions(id, match_id, player_id, action_type, area, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            action_id,
            match_id,
            player_id,
            action_type.as_str(),
            area,
            recorded_at
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "scout_actions"))?;

    Ok(json!({ "actionId": action_id, "recordedAt": recorded_at }))
}

fn action_undo(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let action_id = get_required_str(params, "actionId")?;
    let removed = conn
        .execute("DELETE FROM scout_actions WHERE id = ?", [&action_id])
        .map_err(|e| HandlerErr::db_delete(e, "scout_actions"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("action not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn actions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let match_id = match get_optional_str(params, "matchId") {
        Some(id) => id,
        None => current_match_id(conn)?
            .ok_or_else(|| HandlerErr::bad_params("no match in progress"))?,
    };

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.action_type, a.area, a.recorded_at, p.id, p.name, p.number
             FROM scout_actions a
             JOIN scout_players p ON p.id = a.player_id
             WHERE a.match_id = ?
             ORDER BY a.recorded_at DESC, a.rowid DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let actions = stmt
        .query_map([&match_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "actionType": r.get::<_, String>(1)?,
                "area": r.get::<_, Option<i64>>(2)?,
                "recordedAt": r.get::<_, String>(3)?,
                "player": {
                    "id": r.get::<_, String>(4)?,
                    "name": r.get::<_, String>(5)?,
                    "number": r.get::<_, i64>(6)?,
                }
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "matchId": match_id, "actions": actions }))
}

/// Swaps one on-court player for one from outside the lineup. Membership in
/// `scout_match_players` tracks who can have actions registered.
fn substitute(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(match_id) = current_match_id(conn)? else {
        return Err(HandlerErr::bad_params("no match in progress"));
    };
    let player_out = get_required_str(params, "playerOutId")?;
    let player_in = get_required_str(params, "playerInId")?;
    if player_out == player_in {
        return Err(HandlerErr::bad_params("cannot substitute a player for themselves"));
    }

    if !on_court(conn, &match_id, &player_out)? {
        return Err(HandlerErr::bad_params("outgoing player is not on court"));
    }
    if on_court(conn, &match_id, &player_in)? {
        return Err(HandlerErr::bad_params("incoming player is already on court"));
    }
    let in_exists = conn
        .query_row("SELECT 1 FROM scout_players WHERE id = ?", [&player_in], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !in_exists {
        return Err(HandlerErr::not_found("incoming player not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute(
        "UPDATE scout_match_players SET on_court = 0 WHERE match_id = ? AND player_id = ?",
        (&match_id, &player_out),
    )
    .map_err(|e| HandlerErr::db_update(e, "scout_match_players"))?;
    tx.execute(
        "INSERT INTO scout_match_players(match_id, player_id, on_court)
         VALUES(?, ?, 1)
         ON CONFLICT(match_id, player_id) DO UPDATE SET on_court = 1",
        (&match_id, &player_in),
    )
    .map_err(|e| HandlerErr::db_insert(e, "scout_match_players"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "playerOutId": player_out, "playerInId": player_in }))
}

/// Per-match aggregation: totals by action type plus a per-player breakdown.
fn report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let match_id = get_required_str(params, "matchId")?;
    let header = match_json(conn, &match_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.name, p.number, a.action_type, COUNT(*)
             FROM scout_actions a
             JOIN scout_players p ON p.id = a.player_id
             WHERE a.match_id = ?
             GROUP BY p.id, a.action_type
             ORDER BY p.number",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&match_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut totals: HashMap<&str, i64> = HashMap::new();
    let mut per_player: Vec<(String, String, i64, HashMap<&str, i64>)> = Vec::new();
    for (player_id, name, number, action_type, count) in rows {
        let Some(parsed) = ScoutActionType::parse(&action_type) else {
            return Err(HandlerErr::invalid_record(format!(
                "action with unknown type: {}",
                action_type
            )));
        };
        *totals.entry(parsed.as_str()).or_default() += count;
        match per_player.iter_mut().find(|(id, ..)| *id == player_id) {
            Some((_, _, _, counts)) => {
                counts.insert(parsed.as_str(), count);
            }
            None => {
                let mut counts = HashMap::new();
                counts.insert(parsed.as_str(), count);
                per_player.push((player_id, name, number, counts));
            }
        }
    }

    let totals_json: serde_json::Map<String, serde_json::Value> = SCOUT_ACTION_TYPES
        .iter()
        .map(|t| {
            (
                t.as_str().to_string(),
                json!(totals.get(t.as_str()).copied().unwrap_or(0)),
            )
        })
        .collect();
    let players_json: Vec<serde_json::Value> = per_player
        .into_iter()
        .map(|(id, name, number, counts)| {
            let counts_json: serde_json::Map<String, serde_json::Value> = SCOUT_ACTION_TYPES
                .iter()
                .map(|t| {
                    (
                        t.as_str().to_string(),
                        json!(counts.get(t.as_str()).copied().unwrap_or(0)),
                    )
                })
                .collect();
            json!({
                "playerId": id,
                "name": name,
                "number": number,
                "actions": counts_json,
            })
        })
        .collect();

    Ok(json!({
        "match": header,
        "totals": totals_json,
        "players": players_json,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scout.players.list" => Some(with_conn(state, req, |c, _| players_list(c))),
        "scout.players.create" => Some(with_conn(state, req, players_create)),
        "scout.players.update" => Some(with_conn(state, req, players_update)),
        "scout.players.delete" => Some(with_conn(state, req, players_delete)),
        "scout.match.start" => Some(with_conn(state, req, match_start)),
        "scout.match.current" => Some(with_conn(state, req, |c, _| match_current(c))),
        "scout.match.end" => Some(with_conn(state, req, |c, _| match_end(c))),
        "scout.action.register" => Some(with_conn(state, req, action_register)),
        "scout.action.undo" => Some(with_conn(state, req, action_undo)),
        "scout.actions.list" => Some(with_conn(state, req, actions_list)),
        "scout.substitute" => Some(with_conn(state, req, substitute)),
        "scout.report" => Some(with_conn(state, req, report)),
        _ => None,
    }
}
