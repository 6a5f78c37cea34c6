use reqwest::StatusCode;
use thiserror::Error;

/// A frame that could not be decoded. Recovered by drop-and-log; the
/// connection stays open.
#[derive(Debug, Error)]
#[error("malformed EventSub frame: {source}")]
pub struct ParseError {
    #[from]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("subscribe {event_type} rejected: {status} - {body}")]
    Rejected {
        event_type: String,
        status: StatusCode,
        body: String,
    },

    #[error("subscribe {event_type} failed: {source}")]
    Transport {
        event_type: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unsubscribe {id} rejected: {status} - {body}")]
    DeleteRejected {
        id: String,
        status: StatusCode,
        body: String,
    },

    #[error("subscription list failed: {status} - {body}")]
    ListRejected { status: StatusCode, body: String },

    #[error("unexpected subscription response: {0}")]
    MalformedResponse(String),
}

impl SubscriptionError {
    /// 429 and common 5xx responses plus connection-level failures are
    /// worth retrying; every other rejection is structural.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => is_retryable_status(*status),
            Self::Transport { .. } => true,
            _ => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

#[derive(Debug, Error)]
pub enum TokenValidationError {
    #[error("token belongs to user {actual}, expected broadcaster {expected}")]
    OwnershipMismatch { expected: String, actual: String },

    #[error("token is missing required scope '{0}'")]
    MissingScope(String),

    #[error("validation endpoint rejected token: {status}")]
    Rejected { status: StatusCode },

    #[error("validation request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected validation response: {0}")]
    MalformedResponse(String),
}

impl TokenValidationError {
    /// Ownership and scope failures are configuration problems, not
    /// something a token refresh can repair.
    #[must_use]
    pub fn is_refreshable(&self) -> bool {
        !matches!(self, Self::OwnershipMismatch { .. } | Self::MissingScope(_))
    }
}

#[derive(Debug, Error)]
pub enum TokenRefreshError {
    #[error("no refresh token configured")]
    MissingRefreshToken,

    #[error("client id or client secret missing")]
    MissingCredentials,

    #[error("token endpoint rejected the client secret")]
    InvalidClientSecret,

    #[error("token endpoint rejected the client id")]
    InvalidClientId,

    #[error("token endpoint rejected the refresh token")]
    InvalidRefreshToken,

    #[error("token endpoint rejected the credentials (401)")]
    InvalidCredentials,

    #[error("token endpoint error: {status} - {body}")]
    Api { status: StatusCode, body: String },

    #[error("token endpoint unreachable: {0}")]
    Network(#[source] reqwest::Error),
}

impl TokenRefreshError {
    /// Only endpoint hiccups are worth retrying; the rest need operator
    /// action described by [`Self::remediation`].
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::Network(_))
    }

    #[must_use]
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::MissingRefreshToken => {
                "re-run the authorization flow to obtain a refresh token"
            }
            Self::MissingCredentials => {
                "set both the client id and client secret in the configuration"
            }
            Self::InvalidClientSecret => {
                "regenerate the client secret in the Twitch developer console"
            }
            Self::InvalidClientId => "check the client id against the Twitch developer console",
            Self::InvalidRefreshToken => "re-run the authorization flow; the refresh token is stale",
            Self::InvalidCredentials => {
                "verify client id/secret and re-run the authorization flow"
            }
            Self::Api { .. } | Self::Network(_) => {
                "transient Twitch-side failure; will be retried automatically"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for code in [429u16, 500, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 403, 404, 409] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_subscription_error_retryability() {
        let rejected = SubscriptionError::Rejected {
            event_type: "x".into(),
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        assert!(rejected.is_retryable());

        let forbidden = SubscriptionError::Rejected {
            event_type: "x".into(),
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        };
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn test_refresh_error_transience() {
        assert!(!TokenRefreshError::MissingRefreshToken.is_transient());
        assert!(!TokenRefreshError::InvalidClientSecret.is_transient());
        assert!(
            TokenRefreshError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new(),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_every_refresh_reason_has_remediation() {
        let reasons = [
            TokenRefreshError::MissingRefreshToken,
            TokenRefreshError::MissingCredentials,
            TokenRefreshError::InvalidClientSecret,
            TokenRefreshError::InvalidClientId,
            TokenRefreshError::InvalidRefreshToken,
            TokenRefreshError::InvalidCredentials,
            TokenRefreshError::Api {
                status: StatusCode::BAD_GATEWAY,
                body: String::new(),
            },
        ];
        for reason in reasons {
            assert!(!reason.remediation().is_empty());
        }
    }

    #[test]
    fn test_validation_error_refreshability() {
        let mismatch = TokenValidationError::OwnershipMismatch {
            expected: "1".into(),
            actual: "2".into(),
        };
        assert!(!mismatch.is_refreshable());
        assert!(!TokenValidationError::MissingScope("s".into()).is_refreshable());
        assert!(
            TokenValidationError::Rejected {
                status: StatusCode::UNAUTHORIZED,
            }
            .is_refreshable()
        );
    }
}
