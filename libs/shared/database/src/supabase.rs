use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

/// Postgres error codes surfaced through PostgREST that callers act on.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const EXCLUSION_VIOLATION: &str = "23P01";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Exclusion constraint violated: {0}")]
    ExclusionViolation(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl DatabaseError {
    /// Only transaction-isolation failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::SerializationFailure(_))
    }

    fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Option<PostgrestError> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| body.to_string());

        if let Some(code) = parsed.as_ref().and_then(|e| e.code.as_deref()) {
            match code {
                SERIALIZATION_FAILURE | DEADLOCK_DETECTED => {
                    return DatabaseError::SerializationFailure(message)
                }
                EXCLUSION_VIOLATION => return DatabaseError::ExclusionViolation(message),
                UNIQUE_VIOLATION => return DatabaseError::UniqueViolation(message),
                _ => {}
            }
        }

        match status.as_u16() {
            401 | 403 => DatabaseError::Auth(message),
            404 => DatabaseError::NotFound(message),
            _ => DatabaseError::Api { status: status.as_u16(), message },
        }
    }
}

impl From<reqwest::Error> for DatabaseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DatabaseError::Decode(e.to_string())
        } else {
            DatabaseError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, DatabaseError> {
        let mut headers = HeaderMap::new();

        let api_key = HeaderValue::from_str(&self.anon_key)
            .map_err(|_| DatabaseError::Auth("Invalid API key header value".to_string()))?;
        headers.insert("apikey", api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| DatabaseError::Auth("Invalid bearer token header value".to_string()))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let (data, _) = self.send(method, path, auth_token, body, extra_headers).await?;
        Ok(data)
    }

    /// Runs a GET with `Prefer: count=exact` and returns the rows together with
    /// the total reported in `Content-Range`.
    pub async fn request_with_count<T>(
        &self,
        path: &str,
        auth_token: Option<&str>,
    ) -> Result<(T, Option<u64>), DatabaseError>
    where T: DeserializeOwned {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));

        self.send(Method::GET, path, auth_token, None, Some(headers)).await
    }

    async fn send<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<(T, Option<u64>), DatabaseError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            let err = DatabaseError::from_response(status, &error_text);
            if err.is_retryable() {
                warn!("Retryable API error ({}): {}", status, error_text);
            } else {
                error!("API error ({}): {}", status, error_text);
            }
            return Err(err);
        }

        let total = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total);

        let data = response.json::<T>().await?;
        Ok((data, total))
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// Extracts the total from a PostgREST `Content-Range` header such as `0-9/42` or `*/0`.
fn parse_content_range_total(range: &str) -> Option<u64> {
    range.rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}
