use courier_shared::ProtocolError;
use courier_store::StoreError;
use thiserror::Error;

/// Authentication failures. Deliberately coarse so a client cannot tell an
/// unknown user from a wrong password.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("username already taken")]
    DuplicateUsername,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired session")]
    InvalidSession,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Errors after which the connection cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Protocol(_) | ServiceError::NotAuthenticated)
    }

    /// Text sent to the client. Internal details stay in the logs.
    pub fn wire_message(&self) -> String {
        match self {
            ServiceError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ServiceError::NotFound(format!("{what} not found")),
            StoreError::Forbidden(reason) => ServiceError::Forbidden(reason),
            StoreError::Conflict(reason) => ServiceError::Conflict(reason),
            StoreError::Invalid(reason) => ServiceError::Validation(reason),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(
            ServiceError::from(StoreError::NotFound("group")),
            ServiceError::NotFound(ref m) if m == "group not found"
        ));
        assert!(matches!(
            ServiceError::from(StoreError::Conflict("dup".into())),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(StoreError::Invalid("self".into())),
            ServiceError::Validation(_)
        ));
        assert!(matches!(
            ServiceError::from(StoreError::Migration("boom".into())),
            ServiceError::Internal(_)
        ));
    }

    #[test]
    fn internal_details_do_not_leak() {
        let err = ServiceError::Internal("disk I/O error at /var/lib".into());
        assert_eq!(err.wire_message(), "internal server error");
        assert_eq!(
            ServiceError::from(AuthError::InvalidCredentials).wire_message(),
            "invalid credentials"
        );
    }

    #[test]
    fn fatality() {
        assert!(ServiceError::NotAuthenticated.is_fatal());
        assert!(ServiceError::Protocol(ProtocolError::InvalidUtf8).is_fatal());
        assert!(!ServiceError::Forbidden("x".into()).is_fatal());
        assert!(!ServiceError::RateLimited.is_fatal());
    }
}
