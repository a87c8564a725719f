//! Credentials and the cached session artifact.
//!
//! A bot token (`<digits>:<secret>`) is looked up in `ZIPSENDER_BOT_TOKEN`, then in the config
//! store, then prompted for. Whatever token is used must pass a `get_me` call; a successful
//! check is recorded in `user.session`, a failed one removes that file.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use zip_sender_core::contract::{ChatClient, Identity};

use crate::load_config::ConfigStore;

pub const SESSION_FILE: &str = "user.session";
pub const TOKEN_ENV: &str = "ZIPSENDER_BOT_TOKEN";

/// What `user.session` holds: who we were verified as, and with which token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub bot_id: i64,
    pub first_name: String,
    pub username: Option<String>,
    pub token_fingerprint: String,
    pub verified_at: DateTime<Utc>,
}

/// Short hex digest identifying a token without storing it.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

pub fn is_valid_token(token: &str) -> bool {
    match Regex::new(r"^\d+:[A-Za-z0-9_-]{10,}$") {
        Ok(re) => re.is_match(token),
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// `None` when the file is missing or unreadable.
    pub fn load(&self) -> Option<SessionRecord> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session file is corrupt");
                None
            }
        }
    }

    pub fn write(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))
    }

    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed session file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove session file"),
        }
    }
}

/// Token from the environment, falling back to the config store.
pub fn resolve_token(store: &ConfigStore) -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .or_else(|| store.settings().bot_token.clone())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Reads tokens from `input` until a well-formed one is entered. `None` on EOF.
pub fn prompt_token<R, W>(input: &mut R, output: &mut W) -> Result<Option<String>>
where
    R: BufRead,
    W: Write,
{
    loop {
        write!(output, "Bot token (<digits>:<secret>): ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let token = line.trim();
        if is_valid_token(token) {
            return Ok(Some(token.to_string()));
        }
        writeln!(output, "Invalid token. Expected digits, a colon, then at least 10 characters.")?;
    }
}

fn record_for(identity: &Identity, token: &str) -> SessionRecord {
    SessionRecord {
        bot_id: identity.id,
        first_name: identity.first_name.clone(),
        username: identity.username.clone(),
        token_fingerprint: fingerprint(token),
        verified_at: Utc::now(),
    }
}

/// Produces a verified client.
///
/// `connect` builds a client for a token. A known token that fails verification falls back to
/// the prompt; a prompted token that fails is fatal. The session file is removed on every
/// verification failure.
pub async fn authenticate<C, F, R, W>(
    store: &mut ConfigStore,
    session: &SessionFile,
    connect: F,
    input: &mut R,
    output: &mut W,
) -> Result<(C, Identity)>
where
    C: ChatClient,
    F: Fn(&str) -> Result<C>,
    R: BufRead,
    W: Write,
{
    if let Some(token) = resolve_token(store) {
        if let Some(record) = session.load() {
            if record.token_fingerprint != fingerprint(&token) {
                warn!("Session was created with a different token; discarding it");
                session.remove();
            }
        }

        info!("Verifying existing credentials");
        let client = connect(&token)?;
        match client.get_me().await {
            Ok(identity) => {
                info!(
                    first_name = %identity.first_name,
                    username = identity.username.as_deref().unwrap_or("-"),
                    "Session valid"
                );
                session.write(&record_for(&identity, &token))?;
                return Ok((client, identity));
            }
            Err(e) => {
                error!(error = %e, "Stored credentials are invalid");
                session.remove();
            }
        }
    } else if session.exists() {
        warn!("Session file present but no token configured; discarding it");
        session.remove();
    }

    let token = match prompt_token(input, output)? {
        Some(token) => token,
        None => bail!("Authentication cancelled: no bot token provided"),
    };

    info!("Authenticating with new credentials");
    let client = connect(&token)?;
    let identity = match client.get_me().await {
        Ok(identity) => identity,
        Err(e) => {
            session.remove();
            error!(error = %e, "Authentication failed");
            bail!("Authentication failed: {e}");
        }
    };

    store.update(|s| s.bot_token = Some(token.clone()))?;
    session.write(&record_for(&identity, &token))?;
    info!(
        first_name = %identity.first_name,
        username = identity.username.as_deref().unwrap_or("-"),
        "Authenticated"
    );
    Ok((client, identity))
}
