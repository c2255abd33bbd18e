use std::fmt;
use std::sync::{Arc, LazyLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::database::backend::RestBackend;
use crate::database::connections::ConnectionTracker;
use crate::database::constants::LOGGER_PREFIX;
use crate::database::crud::CrudClient;
use crate::database::error::DatabaseResult;
use crate::database::observer::{ObservableValue, ObservedValueHandle, PathObserverRegistry};
use crate::database::rate_limiter::RateLimiter;
use crate::database::settings::{DatabaseSettings, TransportKind};
use crate::database::transport::{select_transport, TransportStrategy};
use crate::logger::{set_log_level_for_prefix, LogLevel, Logger};
use crate::platform::token::TokenSource;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/api"));

/// Entry point: owns the rate window, the connection slots, the HTTP client
/// and the observer registry for one database.
///
/// Clones share the same state. Call [`dispose`](Self::dispose) before the
/// host shuts down so that timers and open streams are released.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    settings: DatabaseSettings,
    backend: Arc<RestBackend>,
    crud: CrudClient,
    transport: Arc<dyn TransportStrategy>,
    observers: PathObserverRegistry,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("database_url", &self.inner.settings.database_url)
            .field("transport", &self.inner.transport.kind())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Database {
    /// Validates `settings` and builds a database using the transport they select.
    pub fn new(settings: DatabaseSettings, tokens: Arc<dyn TokenSource>) -> DatabaseResult<Self> {
        Self::build(settings, tokens, None)
    }

    /// Like [`new`](Self::new) but observes through a caller-supplied transport.
    pub fn with_transport(
        settings: DatabaseSettings,
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn TransportStrategy>,
    ) -> DatabaseResult<Self> {
        Self::build(settings, tokens, Some(transport))
    }

    fn build(
        settings: DatabaseSettings,
        tokens: Arc<dyn TokenSource>,
        transport: Option<Arc<dyn TransportStrategy>>,
    ) -> DatabaseResult<Self> {
        let url = settings.validate()?;
        if settings.debug_logging {
            if let Err(err) = set_log_level_for_prefix(LOGGER_PREFIX, LogLevel::Debug) {
                LOGGER.warn(format!("unable to enable debug logging: {err}"));
            }
        }

        let limiter = RateLimiter::new(settings.rate_limits);
        let connections = ConnectionTracker::new(settings.max_connections);
        let backend = Arc::new(RestBackend::new(url, tokens, limiter, connections)?);
        let crud = CrudClient::new(Arc::clone(&backend));
        let transport = transport
            .unwrap_or_else(|| select_transport(&settings, Arc::clone(&backend), crud.clone()));
        let observers = PathObserverRegistry::new(crud.clone(), Arc::clone(&transport));

        LOGGER.debug(format!(
            "database ready at {} ({:?} transport, {} connections)",
            settings.database_url,
            transport.kind(),
            settings.max_connections
        ));
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                settings,
                backend,
                crud,
                transport,
                observers,
            }),
        })
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.inner.settings
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    pub fn crud(&self) -> &CrudClient {
        &self.inner.crud
    }

    pub fn observers(&self) -> &PathObserverRegistry {
        &self.inner.observers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.inner.backend.limiter()
    }

    pub fn connections(&self) -> &Arc<ConnectionTracker> {
        self.inner.backend.connections()
    }

    /// See [`CrudClient::get`].
    pub async fn get(
        &self,
        path: &str,
        shallow: bool,
        extra_query: &[(String, String)],
    ) -> Option<Value> {
        self.inner.crud.get(path, shallow, extra_query).await
    }

    pub async fn get_as<T>(&self, path: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.inner.crud.get_as(path).await
    }

    pub async fn set<T>(&self, path: &str, data: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.inner.crud.set(path, data).await
    }

    pub async fn update<T>(&self, path: &str, data: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.inner.crud.update(path, data).await
    }

    pub async fn delete(&self, path: &str) -> bool {
        self.inner.crud.delete(path).await
    }

    pub async fn push<T>(&self, path: &str, data: &T) -> Option<String>
    where
        T: Serialize + ?Sized,
    {
        self.inner.crud.push(path, data).await
    }

    /// See [`PathObserverRegistry::observe`].
    pub async fn observe<T: ObservableValue>(&self, path: &str) -> DatabaseResult<ObservedValueHandle<T>> {
        self.inner.observers.observe(path).await
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.backend.is_disposed()
    }

    /// Terminates every observation, drops all connection slots, stops the
    /// rate window timer and releases the HTTP client. Idempotent.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.observers.dispose();
        self.connections().clear();
        self.rate_limiter().stop_reset_timer();
        self.inner.backend.dispose();
        LOGGER.debug(format!("database {} disposed", self.inner.settings.database_url));
    }
}
