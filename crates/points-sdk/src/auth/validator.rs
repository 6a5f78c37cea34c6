use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::TokenValidationError;

const VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";
const VALIDATE_TIMEOUT_SECS: u64 = 10;

/// Scope the redemption-add subscription requires.
pub const REQUIRED_SCOPE: &str = "channel:read:redemptions";

/// What the validation endpoint reports about a live access token. Also
/// the cheap "how long until expiry" probe used by the refresh timer.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenStatus {
    pub user_id: String,
    pub login: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_in: u64,
}

/// Verifies an access token against the Twitch validation endpoint and
/// checks ownership plus scope for a given broadcaster.
pub struct TokenValidator {
    client: Client,
    validate_url: String,
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenValidator {
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(VALIDATE_TIMEOUT_SECS))
            .build()
            .expect("default TLS backend");

        Self {
            client,
            validate_url: VALIDATE_URL.to_string(),
        }
    }

    /// Point at a mock validation endpoint. For testing only.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_validate_url(mut self, url: impl Into<String>) -> Self {
        self.validate_url = url.into();
        self
    }

    pub async fn validate(&self, access_token: &str) -> Result<TokenStatus, TokenValidationError> {
        let response = self
            .client
            .get(&self.validate_url)
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenValidationError::Rejected { status });
        }

        let parsed: TokenStatus = response
            .json()
            .await
            .map_err(|e| TokenValidationError::MalformedResponse(e.to_string()))?;

        debug!(
            "token valid for {} ({}s remaining)",
            parsed.login, parsed.expires_in
        );
        Ok(parsed)
    }

    /// Full ownership + scope check used before subscribing.
    pub async fn validate_for_broadcaster(
        &self,
        access_token: &str,
        broadcaster_id: &str,
    ) -> Result<TokenStatus, TokenValidationError> {
        let status = self.validate(access_token).await?;
        check_ownership_and_scope(&status, broadcaster_id)?;
        Ok(status)
    }
}

fn check_ownership_and_scope(
    status: &TokenStatus,
    broadcaster_id: &str,
) -> Result<(), TokenValidationError> {
    if status.user_id != broadcaster_id {
        return Err(TokenValidationError::OwnershipMismatch {
            expected: broadcaster_id.to_string(),
            actual: status.user_id.clone(),
        });
    }

    if !status.scopes.iter().any(|s| s == REQUIRED_SCOPE) {
        return Err(TokenValidationError::MissingScope(
            REQUIRED_SCOPE.to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_status(user_id: &str, scopes: &[&str]) -> TokenStatus {
        TokenStatus {
            user_id: user_id.to_string(),
            login: "streamer".into(),
            client_id: "client".into(),
            scopes: scopes.iter().map(ToString::to_string).collect(),
            expires_in: 3600,
        }
    }

    #[test]
    fn test_matching_owner_and_scope_passes() {
        let status = make_status("1337", &["channel:read:redemptions", "chat:read"]);
        assert!(check_ownership_and_scope(&status, "1337").is_ok());
    }

    #[test]
    fn test_ownership_mismatch() {
        let status = make_status("9001", &["channel:read:redemptions"]);
        let err = check_ownership_and_scope(&status, "1337").unwrap_err();
        match err {
            TokenValidationError::OwnershipMismatch { expected, actual } => {
                assert_eq!(expected, "1337");
                assert_eq!(actual, "9001");
            }
            other => panic!("expected OwnershipMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_scope() {
        let status = make_status("1337", &["chat:read"]);
        let err = check_ownership_and_scope(&status, "1337").unwrap_err();
        assert!(matches!(err, TokenValidationError::MissingScope(_)));
    }

    #[test]
    fn test_ownership_checked_before_scope() {
        let status = make_status("9001", &[]);
        let err = check_ownership_and_scope(&status, "1337").unwrap_err();
        assert!(matches!(
            err,
            TokenValidationError::OwnershipMismatch { .. }
        ));
    }
}
