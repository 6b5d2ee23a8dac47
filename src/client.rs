use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{BackupError, Result};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;
const BACKOFF_JITTER_MS: u64 = 250;

/// API error codes that mean the credential itself is bad. These abort the
/// run and are never retried.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Raw outcome of one HTTP exchange, before the `ok`/`error` envelope is
/// interpreted.
pub struct ApiResponse {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub body: Value,
}

/// One round trip to the Slack Web API. Production uses [`HttpTransport`];
/// tests script responses through a fake implementation.
pub trait Transport: Send + Sync + 'static {
    fn call(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> impl Future<Output = Result<ApiResponse>> + Send;
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: SLACK_API_BASE.to_string(),
            token: token.to_string(),
        }
    }
}

impl Transport for HttpTransport {
    fn call(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> impl Future<Output = Result<ApiResponse>> + Send {
        let url = format!("{}/{}", self.base_url, method);
        async move {
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(params)
                .send()
                .await
                .map_err(|e| BackupError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());

            let body = match response.json::<Value>().await {
                Ok(body) => body,
                // A garbled body on a 200 is a broken connection, not an API
                // verdict. Throttling responses are allowed to be non-JSON.
                Err(e) if status == 200 => return Err(BackupError::Transport(e.to_string())),
                Err(_) => Value::Null,
            };

            Ok(ApiResponse {
                status,
                retry_after,
                body,
            })
        }
    }
}

/// Rate-limited Slack API client. Every remote call in the crate goes
/// through [`ApiClient::call`]; no other component retries.
///
/// The gate serializes concurrent callers, and is held across retry sleeps,
/// so all workers draw on the single workspace-wide rate budget.
pub struct ApiClient<T = HttpTransport> {
    pub(crate) transport: T,
    gate: Mutex<()>,
    max_attempts: u32,
}

impl ApiClient<HttpTransport> {
    pub fn new(token: &str) -> Self {
        Self::with_transport(HttpTransport::new(token))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            gate: Mutex::new(()),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Performs one API method call, retrying throttled and transient
    /// failures with bounded backoff. Returns the decoded body once the API
    /// reports `ok: true`.
    pub async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let _gate = self.gate.lock().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!("{method}: attempt {attempt}");

            let error = match self.transport.call(method, params).await {
                Ok(response) => match interpret(method, response) {
                    Ok(body) => return Ok(body),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            match error {
                BackupError::RateLimited { retry_after_secs } if attempt < self.max_attempts => {
                    let wait = if retry_after_secs > 0 {
                        Duration::from_secs(retry_after_secs)
                    } else {
                        backoff_delay(attempt)
                    };
                    warn!(
                        "{method}: rate limited, waiting {:.1}s before retry",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                BackupError::Transport(ref reason) if attempt < self.max_attempts => {
                    let wait = backoff_delay(attempt);
                    warn!(
                        "{method}: {reason}, retrying in {:.1}s",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                BackupError::RateLimited { .. } => {
                    return Err(BackupError::Api {
                        method: method.to_string(),
                        error: "rate limit retries exhausted".to_string(),
                    });
                }
                other => return Err(other),
            }
        }
    }
}

fn interpret(method: &str, response: ApiResponse) -> Result<Value> {
    if response.status == 429 {
        return Err(BackupError::RateLimited {
            retry_after_secs: response.retry_after.unwrap_or(0),
        });
    }
    if response.status >= 500 {
        return Err(BackupError::Transport(format!(
            "HTTP {} from {method}",
            response.status
        )));
    }

    let ok = response
        .body
        .get("ok")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if ok {
        return Ok(response.body);
    }

    let error = response
        .body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unexpected response")
        .to_string();

    if error == "ratelimited" {
        return Err(BackupError::RateLimited {
            retry_after_secs: response.retry_after.unwrap_or(0),
        });
    }
    if AUTH_ERRORS.contains(&error.as_str()) {
        return Err(BackupError::Auth(error));
    }
    Err(BackupError::Api {
        method: method.to_string(),
        error,
    })
}

fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(5);
    let base = BACKOFF_BASE_MS.saturating_mul(1 << shift).min(BACKOFF_CAP_MS);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_millis()) % BACKOFF_JITTER_MS)
        .unwrap_or(0);
    Duration::from_millis(base + jitter)
}

/// Extracts the opaque pagination cursor from a response, if there is a
/// non-empty one.
pub fn next_cursor(body: &Value) -> Option<String> {
    body.get("response_metadata")?
        .get("next_cursor")?
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Workspace identity reported by `auth.test`.
pub struct AuthIdentity {
    pub user: String,
    pub team: String,
}

/// Validates the credential up front so a bad token fails the run before
/// any conversation work starts.
pub async fn validate_token<T: Transport>(client: &ApiClient<T>) -> Result<AuthIdentity> {
    let body = client.call("auth.test", &[]).await?;
    Ok(AuthIdentity {
        user: body
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        team: body
            .get("team")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    })
}
