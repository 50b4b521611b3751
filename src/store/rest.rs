// HTTP adapter for the hosted backend: GoTrue-style auth endpoints and
// PostgREST tables (`messages`, `users`).

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{
    IdentityProvider, MessageFilter, MessagePatch, MessageStore, Order, ProfileStore, StoreError,
    StoreResult, MESSAGES_TABLE,
};
use crate::config::BackendConfig;
use crate::models::{Message, NewMessage, Profile, UserId};

const USERS_TABLE: &str = "users";

/// Tokens returned by the auth endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestClient {
    pub fn new(config: &BackendConfig) -> Self {
        RestClient {
            http: reqwest::Client::new(),
            base_url: config.project_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Bearer token for user-scoped calls, falling back to the anon key.
    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|guard| guard.clone())
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", value);
        }
        let bearer = self.access_token().unwrap_or_else(|| self.anon_key.clone());
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> StoreResult<AuthSession> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let body = serde_json::json!({ "email": email, "password": password });
        let session: AuthSession = self.post_auth(&url, &body).await?;
        info!("Signed in as {}", session.user.id);
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> StoreResult<AuthSession> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let session: AuthSession = self.post_auth(&url, &body).await?;
        debug!("Refreshed session for {}", session.user.id);
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    async fn post_auth(&self, url: &str, body: &serde_json::Value) -> StoreResult<AuthSession> {
        let resp = self.http.post(url).headers(self.headers()).json(body).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<AuthSession>().await?)
    }
}

async fn check_status(resp: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status { status: status.as_u16(), body })
}

#[async_trait]
impl IdentityProvider for RestClient {
    async fn current_user(&self) -> StoreResult<Option<UserId>> {
        if self.access_token().is_none() {
            return Ok(None);
        }
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self.http.get(&url).headers(self.headers()).send().await?;
        if resp.status().as_u16() == 401 {
            warn!("Session token rejected by the auth endpoint");
            return Ok(None);
        }
        let user: AuthUser = check_status(resp).await?.json().await?;
        Ok(Some(user.id))
    }
}

#[async_trait]
impl MessageStore for RestClient {
    async fn create(&self, message: NewMessage) -> StoreResult<Message> {
        let resp = self
            .http
            .post(self.table_url(MESSAGES_TABLE))
            .headers(self.headers())
            .header("Prefer", "return=representation")
            .json(&[message])
            .send()
            .await?;
        let mut rows: Vec<Message> = check_status(resp).await?.json().await?;
        if rows.is_empty() {
            return Err(StoreError::Decode("insert returned no rows".to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn read_many(&self, filter: &MessageFilter, order: Order) -> StoreResult<Vec<Message>> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filter.to_query());
        query.push(order.to_query());

        let resp = self
            .http
            .get(self.table_url(MESSAGES_TABLE))
            .headers(self.headers())
            .query(&query)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn update(&self, filter: &MessageFilter, patch: MessagePatch) -> StoreResult<usize> {
        let resp = self
            .http
            .patch(self.table_url(MESSAGES_TABLE))
            .headers(self.headers())
            .header("Prefer", "return=representation")
            .query(&filter.to_query())
            .json(&patch)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = check_status(resp).await?.json().await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl ProfileStore for RestClient {
    async fn profiles(&self, ids: &[UserId]) -> StoreResult<HashMap<UserId, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = [
            ("select".to_string(), "id,full_name,email".to_string()),
            ("id".to_string(), format!("in.({})", ids.join(","))),
        ];
        let resp = self
            .http
            .get(self.table_url(USERS_TABLE))
            .headers(self.headers())
            .query(&query)
            .send()
            .await?;
        let rows: Vec<Profile> = check_status(resp).await?.json().await?;
        Ok(rows.into_iter().map(|p| (p.id.clone(), p)).collect())
    }
}
