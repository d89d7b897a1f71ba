use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::model::UserRole;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The authenticated operator. Explicit state with a login/populate/
/// logout/clear lifecycle; handlers receive it through `AppState` instead of
/// reading ambient globals.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub permissions: Vec<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<SessionUser>,
}
