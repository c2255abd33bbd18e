use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

/// Error type returned by token sources when credential acquisition fails.
#[derive(Debug, Clone)]
pub struct TokenError {
    message: String,
}

impl TokenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_error(err: impl Error) -> Self {
        Self::new(err.to_string())
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for TokenError {}

/// Supplies the short-lived bearer credential attached to every request.
///
/// The database asks for a token before each request and never caches it; an
/// empty token is treated as "unauthenticated" and no `auth` parameter is sent.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn get_token(&self) -> Result<String, TokenError>;
}

/// Token source returning the same credential every time (emulators, tests,
/// legacy database secrets).
#[derive(Clone, Debug, Default)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// A source that never authenticates.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn get_token(&self) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}

type TokenFuture = Pin<Box<dyn Future<Output = Result<String, TokenError>> + Send>>;

/// Adapts an async closure into a [`TokenSource`].
pub struct FnTokenSource {
    fetch: Arc<dyn Fn() -> TokenFuture + Send + Sync>,
}

impl FnTokenSource {
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TokenError>> + Send + 'static,
    {
        Self {
            fetch: Arc::new(move || Box::pin(fetch()) as TokenFuture),
        }
    }
}

impl fmt::Debug for FnTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for FnTokenSource {
    async fn get_token(&self) -> Result<String, TokenError> {
        (self.fetch)().await
    }
}
