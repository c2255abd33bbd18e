use std::sync::{Arc, LazyLock};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::database::backend::RestBackend;
use crate::database::error::{invalid_argument, malformed_payload, DatabaseResult};
use crate::database::path::normalize_path;
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/crud"));

/// Point-in-time reads and writes.
///
/// Nothing here returns an error: every failure (credential, rate limit,
/// transport, decoding) is logged once and reported as `None` or `false`.
/// Requests are never retried.
#[derive(Clone)]
pub struct CrudClient {
    backend: Arc<RestBackend>,
}

impl CrudClient {
    pub(crate) fn new(backend: Arc<RestBackend>) -> Self {
        Self { backend }
    }

    /// Reads the value at `path`; `None` when absent or on failure.
    ///
    /// With `shallow` the server returns only the immediate keys of an object,
    /// each mapped to `true`.
    pub async fn get(
        &self,
        path: &str,
        shallow: bool,
        extra_query: &[(String, String)],
    ) -> Option<Value> {
        match self.fetch(path, shallow, extra_query).await {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(err) => {
                LOGGER.warn(format!("get '{path}' failed: {err}"));
                None
            }
        }
    }

    /// Reads and decodes the value at `path`.
    pub async fn get_as<T>(&self, path: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let value = self.get(path, false, &[]).await?;
        match serde_json::from_value::<T>(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                let err = malformed_payload(format!("value at '{path}' has unexpected shape: {err}"));
                LOGGER.warn(format!("get '{path}' failed: {err}"));
                None
            }
        }
    }

    /// Replaces the value at `path` (HTTP PUT).
    pub async fn set<T>(&self, path: &str, data: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.write("set", Method::PUT, path, data).await.is_some()
    }

    /// Merges the children of `data` into the value at `path` (HTTP PATCH).
    pub async fn update<T>(&self, path: &str, data: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.write("update", Method::PATCH, path, data).await.is_some()
    }

    pub async fn delete(&self, path: &str) -> bool {
        let result = async {
            let segments = normalize_path(path)?;
            self.backend
                .execute(Method::DELETE, &segments, &[], None)
                .await
        }
        .await;
        match result {
            Ok(_) => true,
            Err(err) => {
                LOGGER.warn(format!("delete '{path}' failed: {err}"));
                false
            }
        }
    }

    /// Appends `data` under a server-generated unique key and returns that key
    /// (HTTP POST).
    pub async fn push<T>(&self, path: &str, data: &T) -> Option<String>
    where
        T: Serialize + ?Sized,
    {
        let response = self.write("push", Method::POST, path, data).await?;
        match response.get("name").and_then(Value::as_str) {
            Some(name) => Some(name.to_owned()),
            None => {
                let err = malformed_payload(format!("push response without a name: {response}"));
                LOGGER.warn(format!("push '{path}' failed: {err}"));
                None
            }
        }
    }

    pub(crate) async fn fetch(
        &self,
        path: &str,
        shallow: bool,
        extra_query: &[(String, String)],
    ) -> DatabaseResult<Value> {
        let segments = normalize_path(path)?;
        let mut query = Vec::with_capacity(extra_query.len() + 1);
        query.push(("shallow".to_string(), shallow.to_string()));
        query.extend(
            extra_query
                .iter()
                .filter(|(key, _)| key != "shallow")
                .cloned(),
        );
        self.backend
            .execute(Method::GET, &segments, &query, None)
            .await
    }

    async fn write<T>(&self, verb: &str, method: Method, path: &str, data: &T) -> Option<Value>
    where
        T: Serialize + ?Sized,
    {
        let result = async {
            let segments = normalize_path(path)?;
            let body = serde_json::to_value(data)
                .map_err(|err| invalid_argument(format!("value cannot be encoded as JSON: {err}")))?;
            self.backend.execute(method, &segments, &[], Some(&body)).await
        }
        .await;
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                LOGGER.warn(format!("{verb} '{path}' failed: {err}"));
                None
            }
        }
    }
}
