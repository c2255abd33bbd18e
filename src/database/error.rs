use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseErrorCode {
    InvalidArgument,
    Internal,
    PermissionDenied,
    CredentialUnavailable,
    RateLimitExceeded,
    TransportFailure,
    MalformedPayload,
    PathNotFound,
    Disposed,
}

impl DatabaseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseErrorCode::InvalidArgument => "database/invalid-argument",
            DatabaseErrorCode::Internal => "database/internal",
            DatabaseErrorCode::PermissionDenied => "database/permission-denied",
            DatabaseErrorCode::CredentialUnavailable => "database/credential-unavailable",
            DatabaseErrorCode::RateLimitExceeded => "database/rate-limit-exceeded",
            DatabaseErrorCode::TransportFailure => "database/transport-failure",
            DatabaseErrorCode::MalformedPayload => "database/malformed-payload",
            DatabaseErrorCode::PathNotFound => "database/path-not-found",
            DatabaseErrorCode::Disposed => "database/disposed",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseError {
    pub code: DatabaseErrorCode,
    message: String,
}

impl DatabaseError {
    pub fn new(code: DatabaseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DatabaseError {}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub fn invalid_argument(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Internal, message)
}

pub fn permission_denied(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::PermissionDenied, message)
}

pub fn credential_unavailable(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::CredentialUnavailable, message)
}

pub fn rate_limit_exceeded(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::RateLimitExceeded, message)
}

pub fn transport_failure(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::TransportFailure, message)
}

pub fn malformed_payload(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::MalformedPayload, message)
}

pub fn path_not_found(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::PathNotFound, message)
}

pub fn disposed() -> DatabaseError {
    DatabaseError::new(
        DatabaseErrorCode::Disposed,
        "Database has been disposed; create a new instance",
    )
}
