//! Session discovery parameters and command-line decoration.

use std::fmt;

use uuid::Uuid;

use crate::domain::account::Account;
use crate::domain::role::RoleInstanceConfig;

/// Rendezvous endpoint shared between the roles of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub session_id: String,
    pub host: String,
    pub port: u16,
}

impl SessionParams {
    /// New session with a random id.
    #[must_use]
    pub fn generate(host: impl Into<String>, port: u16) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.session_id, self.endpoint())
    }
}

/// Final command line for one instance.
///
/// Order: the instance's own arguments, then session id, rendezvous
/// endpoint, account credentials and controllers.
#[must_use]
pub fn decorate_command_line(
    instance: &RoleInstanceConfig,
    session: Option<&SessionParams>,
    account: Option<&Account>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let base = instance.command_line.trim();
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    if let Some(session) = session {
        parts.push(format!("-sessionid={}", session.session_id));
        parts.push(format!("-rendezvous={}", session.endpoint()));
    }
    if let Some(account) = account {
        parts.push(format!("-auth_login={}", account.username));
        parts.push(format!("-auth_password={}", account.credential));
    }
    if !instance.controllers.is_empty() {
        parts.push(format!("-controllers={}", instance.controllers.join(",")));
    }
    parts.join(" ")
}

/// Split a command line into arguments, honouring double quotes.
#[must_use]
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        args.push(current);
    }
    args
}
