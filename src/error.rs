use thiserror::Error;

use crate::auth::AuthFailure;
use crate::database::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Pin cap for the scope is already used up.
    #[error("Maximum of {limit} pinned {noun} reached. Unpin one before pinning another.")]
    LimitExceeded { limit: usize, noun: &'static str },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A remote write failed. Optimistic local changes have been rolled back.
    #[error("failed to save {what}: {source}")]
    PersistenceFailure {
        what: String,
        #[source]
        source: StoreError,
    },

    /// A remote read failed.
    #[error("backend request failed: {0}")]
    Backend(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthFailure),

    #[error("{0}")]
    InvalidInput(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn persistence(what: impl Into<String>, source: StoreError) -> Self {
        Error::PersistenceFailure {
            what: what.into(),
            source,
        }
    }

    /// Message shown to the user when an action fails.
    pub fn user_message(&self) -> String {
        match self {
            Error::Auth(failure) => failure.user_message().to_string(),
            Error::NotFound { kind, .. } => format!("That {kind} no longer exists."),
            Error::PersistenceFailure { what, .. } => format!("Failed to save {what}."),
            Error::Backend(_) => "Could not reach the backend. Please try again.".to_string(),
            other => other.to_string(),
        }
    }

    /// Extra hint shown next to the message, if any.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::LimitExceeded { limit, noun } => {
                Some(format!("You can only pin up to {limit} {noun} at a time."))
            }
            Error::Auth(AuthFailure::NotSignedIn) => {
                Some("Run `muraldb signin` first.".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_message_mentions_count() {
        let err = Error::LimitExceeded {
            limit: 3,
            noun: "folders",
        };
        assert!(err.to_string().contains("Maximum of 3"));
        assert_eq!(
            err.remediation().as_deref(),
            Some("You can only pin up to 3 folders at a time.")
        );
    }

    #[test]
    fn persistence_failure_hides_backend_detail() {
        let err = Error::persistence(
            "tags for gallery g1",
            StoreError::Unavailable("disk full".into()),
        );
        assert_eq!(err.user_message(), "Failed to save tags for gallery g1.");
        assert!(err.to_string().contains("disk full"));
    }
}
