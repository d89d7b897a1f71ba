use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{HandlerErr, get_optional_str, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request, SessionUser};
use crate::model::{self, UserRole};

fn parse_permissions(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get("permissions") else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("permissions must be an array"));
    };
    let mut permissions = Vec::with_capacity(items.len());
    for item in items {
        let Some(page) = item.as_str() else {
            return Err(HandlerErr::bad_params("permissions must be page ids"));
        };
        if !model::AVAILABLE_PAGES.contains(&page) {
            return Err(HandlerErr::bad_params(format!("unknown page: {}", page)));
        }
        permissions.push(page.to_string());
    }
    Ok(permissions)
}

fn decode_permissions(raw: &str) -> Result<Vec<String>, HandlerErr> {
    serde_json::from_str(raw)
        .map_err(|_| HandlerErr::invalid_record("stored permissions are not a JSON array"))
}

fn user_json(
    id: &str,
    name: &str,
    email: &str,
    role: UserRole,
    permissions: &[String],
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "email": email,
        "role": role.as_str(),
        "permissions": permissions,
    })
}

fn users_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, email, role, permissions FROM users ORDER BY name")
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut users = Vec::with_capacity(raw.len());
    for (id, name, email, role, permissions) in raw {
        let role = UserRole::parse(&role)
            .ok_or_else(|| HandlerErr::invalid_record(format!("user {} has unknown role {}", id, role)))?;
        let permissions = decode_permissions(&permissions)?;
        users.push(user_json(&id, &name, &email, role, &permissions));
    }
    Ok(json!({ "users": users }))
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let email = get_required_str(params, "email")?.trim().to_lowercase();
    if email.is_empty() {
        return Err(HandlerErr::bad_params("email must not be empty"));
    }
    let password = get_required_str(params, "password")?;
    let role_raw = get_required_str(params, "role")?;
    let role = UserRole::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", role_raw)))?;
    let permissions = parse_permissions(params)?;

    let taken = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if taken {
        return Err(HandlerErr::new("duplicate", "email already registered"));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, email, password, role, permissions)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            user_id,
            name,
            email,
            password,
            role.as_str(),
            serde_json::to_string(&permissions).unwrap_or_else(|_| "[]".to_string()),
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "users"))?;

    Ok(json!({ "userId": user_id }))
}

fn users_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let existing_password: Option<String> = conn
        .query_row("SELECT password FROM users WHERE id = ?", [&user_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(existing_password) = existing_password else {
        return Err(HandlerErr::not_found("user not found"));
    };

    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?.trim().to_lowercase();
    let role_raw = get_required_str(params, "role")?;
    let role = UserRole::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", role_raw)))?;
    let permissions = parse_permissions(params)?;
    // Blank password keeps the current one.
    let password = match get_optional_str(params, "password") {
        Some(p) if !p.is_empty() => p,
        _ => existing_password,
    };

    let taken = conn
        .query_row(
            "SELECT 1 FROM users WHERE email = ? AND id != ?",
            (&email, &user_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if taken {
        return Err(HandlerErr::new("duplicate", "email already registered"));
    }

    conn.execute(
        "UPDATE users SET name = ?, email = ?, password = ?, role = ?, permissions = ?
         WHERE id = ?",
        rusqlite::params![
            name,
            email,
            password,
            role.as_str(),
            serde_json::to_string(&permissions).unwrap_or_else(|_| "[]".to_string()),
            user_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;

    Ok(json!({ "userId": user_id }))
}

fn users_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let removed = conn
        .execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr::db_delete(e, "users"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn login_query(conn: &Connection, params: &serde_json::Value) -> Result<SessionUser, HandlerErr> {
    let email = get_required_str(params, "email")?.trim().to_lowercase();
    let password = get_required_str(params, "password")?;

    let row: Option<(String, String, String, String, String)> = conn
        .query_row(
            "SELECT id, name, email, role, permissions FROM users
             WHERE email = ? AND password = ?",
            (&email, &password),
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
    let Some((id, name, email, role, permissions)) = row else {
        return Err(HandlerErr::new("auth_failed", "invalid email or password"));
    };

    let role = UserRole::parse(&role)
        .ok_or_else(|| HandlerErr::invalid_record(format!("user {} has unknown role {}", id, role)))?;
    let permissions = decode_permissions(&permissions)?;

    Ok(SessionUser {
        id,
        name,
        email,
        role,
        permissions,
    })
}

fn handle_session_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        login_query(conn, &req.params)
    };
    match result {
        Ok(user) => {
            tracing::info!(email = %user.email, "session opened");
            let payload = user_json(&user.id, &user.name, &user.email, user.role, &user.permissions);
            state.session = Some(user);
            ok(&req.id, json!({ "user": payload }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_session_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(user) = state.session.take() {
        tracing::info!(email = %user.email, "session closed");
    }
    ok(&req.id, json!({ "loggedOut": true }))
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(user) => ok(
            &req.id,
            json!({
                "user": user_json(&user.id, &user.name, &user.email, user.role, &user.permissions)
            }),
        ),
        None => ok(&req.id, json!({ "user": serde_json::Value::Null })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(with_conn(state, req, |c, _| users_list(c))),
        "users.create" => Some(with_conn(state, req, users_create)),
        "users.update" => Some(with_conn(state, req, users_update)),
        "users.delete" => {
            let resp = with_conn(state, req, users_delete);
            // Deleting the logged-in account ends its session too.
            let deleted_id = req.params.get("userId").and_then(|v| v.as_str());
            let deleted_ok = resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
            let session_matches =
                state.session.as_ref().map(|s| s.id.as_str()) == deleted_id;
            if deleted_ok && session_matches {
                state.session = None;
            }
            Some(resp)
        }
        "session.login" => Some(handle_session_login(state, req)),
        "session.logout" => Some(handle_session_logout(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        _ => None,
    }
}
