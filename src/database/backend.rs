use std::sync::{Arc, LazyLock, Mutex};

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use url::Url;

use crate::database::connections::{ConnectionTracker, SlotGuard};
use crate::database::constants::EVENT_STREAM_CONTENT_TYPE;
use crate::database::error::{
    credential_unavailable, disposed, internal_error, invalid_argument, malformed_payload,
    permission_denied, transport_failure, DatabaseError, DatabaseResult,
};
use crate::database::path::path_to_string;
use crate::database::rate_limiter::{OperationKind, RateLimiter};
use crate::logger::Logger;
use crate::platform::token::TokenSource;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/rest"));

/// Signs, gates and issues REST requests against `{base}{path}.json`.
///
/// Every request fetches a fresh credential, passes rate admission and holds a
/// connection slot for its duration. Counters are credited only on `200 OK`.
pub(crate) struct RestBackend {
    client: Mutex<Option<Client>>,
    base_url: Url,
    base_query: Vec<(String, String)>,
    tokens: Arc<dyn TokenSource>,
    limiter: Arc<RateLimiter>,
    connections: Arc<ConnectionTracker>,
}

/// An open `text/event-stream` response.
pub(crate) struct EventStreamResponse {
    pub response: Response,
}

impl RestBackend {
    pub fn new(
        mut url: Url,
        tokens: Arc<dyn TokenSource>,
        limiter: Arc<RateLimiter>,
        connections: Arc<ConnectionTracker>,
    ) -> DatabaseResult<Self> {
        // Ensure the base URL ends with a slash so joins behave predictably.
        if !url.path().ends_with('/') {
            let mut path = url.path().trim_end_matches('/').to_owned();
            path.push('/');
            url.set_path(&path);
        }

        let base_query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.set_query(None);

        let client = Client::builder()
            .build()
            .map_err(|err| internal_error(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            base_url: url,
            base_query,
            tokens,
            limiter,
            connections,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn connections(&self) -> &Arc<ConnectionTracker> {
        &self.connections
    }

    pub fn is_disposed(&self) -> bool {
        self.client.lock().unwrap().is_none()
    }

    /// Drops the HTTP client; later requests fail with `database/disposed`.
    pub fn dispose(&self) {
        self.client.lock().unwrap().take();
    }

    fn client(&self) -> DatabaseResult<Client> {
        self.client.lock().unwrap().clone().ok_or_else(disposed)
    }

    pub fn url_for_path(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Url> {
        let relative = if path.is_empty() {
            ".json".to_string()
        } else {
            format!("{}.json", path.join("/"))
        };
        let mut url = self
            .base_url
            .join(&relative)
            .map_err(|err| internal_error(format!("Failed to compose database URL: {err}")))?;

        if self.base_query.is_empty() && query.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in self.base_query.iter().chain(query.iter()) {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    async fn signed_url(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Url> {
        let token = self
            .tokens
            .get_token()
            .await
            .map_err(|err| credential_unavailable(format!("failed to obtain auth token: {err}")))?;

        let mut params: Vec<(String, String)> = query.to_vec();
        if !token.is_empty() && !params.iter().any(|(key, _)| key == "auth") {
            params.push(("auth".to_string(), token));
        }
        self.url_for_path(path, &params)
    }

    /// Runs one request through the full admission pipeline and decodes the
    /// JSON response.
    pub async fn execute(
        &self,
        method: Method,
        path: &[String],
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> DatabaseResult<Value> {
        let client = self.client()?;
        self.limiter.ensure_reset_timer();

        let url = self.signed_url(path, query).await?;
        let payload = match body {
            Some(value) => Some(serde_json::to_vec(value).map_err(|err| {
                invalid_argument(format!("Failed to encode request payload: {err}"))
            })?),
            None => None,
        };
        let kind = operation_kind(&method);
        let request_size = payload.as_ref().map(|bytes| bytes.len() as u64).unwrap_or(0);
        self.limiter.check(kind, request_size)?;

        let _slot: SlotGuard = self.connections.guard(&path_to_string(path));
        let mut request = client.request(method.clone(), url);
        if let Some(bytes) = payload {
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let response = request.send().await.map_err(handle_reqwest_error)?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.ok();
            return Err(handle_http_error(status, body));
        }

        let bytes = response.bytes().await.map_err(handle_reqwest_error)?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice::<Value>(&bytes).map_err(|err| {
                malformed_payload(format!("Failed to decode database response: {err}"))
            })?
        };

        let credited = match kind {
            OperationKind::Write => request_size,
            OperationKind::Read => bytes.len() as u64,
        };
        self.limiter.credit(kind, credited);
        LOGGER.debug(format!(
            "{method} {} -> {status} ({credited} bytes)",
            path_to_string(path)
        ));
        Ok(value)
    }

    /// Opens a server-push response for `path`. The caller owns the connection
    /// slot for the lifetime of the stream.
    pub async fn open_event_stream(&self, path: &[String]) -> DatabaseResult<EventStreamResponse> {
        let client = self.client()?;
        self.limiter.ensure_reset_timer();

        let url = self.signed_url(path, &[]).await?;
        self.limiter.check(OperationKind::Read, 0)?;

        let response = client
            .get(url)
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .send()
            .await
            .map_err(handle_reqwest_error)?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.ok();
            return Err(handle_http_error(status, body));
        }
        Ok(EventStreamResponse { response })
    }
}

fn operation_kind(method: &Method) -> OperationKind {
    if *method == Method::GET {
        OperationKind::Read
    } else {
        OperationKind::Write
    }
}

pub(crate) fn handle_reqwest_error(err: reqwest::Error) -> DatabaseError {
    if let Some(status) = err.status() {
        return handle_http_error(status, None);
    }
    transport_failure(format!("Database request failed: {err}"))
}

pub(crate) fn handle_http_error(status: StatusCode, body: Option<String>) -> DatabaseError {
    let message = body.as_deref().and_then(extract_error_message);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => invalid_argument(
            message
                .clone()
                .unwrap_or_else(|| "Invalid data payload".to_string()),
        ),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => permission_denied(
            message
                .clone()
                .unwrap_or_else(|| "Permission denied".to_string()),
        ),
        _ => transport_failure(format!(
            "Database request failed with status {}{}",
            status.as_str(),
            message
                .map(|b| format!(": {b}"))
                .unwrap_or_else(String::new)
        )),
    }
}

fn extract_error_message(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = obj.get("error") {
            return Some(message.clone());
        }
    }

    Some(raw.to_string())
}
