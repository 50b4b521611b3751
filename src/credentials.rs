use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use volunteer_messenger::config;

const CREDENTIALS_FILE: &str = "credentials.json";

/// Cached sign-in so the next launch can refresh instead of prompting.
#[derive(Serialize, Deserialize, Clone)]
pub struct CachedSession {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl CachedSession {
    pub fn new(email: &str, refresh_token: &str) -> Self {
        CachedSession {
            email: email.to_string(),
            refresh_token: Some(BASE64.encode(refresh_token)),
        }
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.refresh_token.as_ref().and_then(|encoded| {
            BASE64
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }
}

fn credentials_path() -> Result<PathBuf> {
    Ok(config::config_dir()?.join(CREDENTIALS_FILE))
}

pub fn save_session(session: &CachedSession) -> Result<()> {
    let file = File::create(credentials_path()?)?;
    serde_json::to_writer_pretty(file, session)?;

    info!("Session cached for {}", session.email);
    Ok(())
}

pub fn load_session() -> Result<Option<CachedSession>> {
    let path = credentials_path()?;
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&path)?;
    let session: CachedSession = serde_json::from_str(&contents)?;
    info!("Loaded cached session for {} from {}", session.email, path.display());

    Ok(Some(session))
}

pub fn clear_session() -> Result<()> {
    let path = credentials_path()?;
    if path.exists() {
        fs::remove_file(&path)?;
        info!("Cleared cached session");
    }
    Ok(())
}
