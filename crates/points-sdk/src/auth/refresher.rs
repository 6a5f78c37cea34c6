use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use super::credential::{Credential, CredentialSink, CredentialStore};
use crate::error::TokenRefreshError;

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const TOKEN_ENDPOINT_TIMEOUT_SECS: u64 = 15;

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
    #[serde(default)]
    scope: Vec<String>,
    token_type: String,
}

/// Result of one successful refresh-token grant.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub scope: Vec<String>,
    pub token_type: String,
}

/// Executes the OAuth refresh-token grant against the Twitch token
/// endpoint and classifies failures into [`TokenRefreshError`] reasons.
pub struct TokenRefresher {
    client: Client,
    token_url: String,
}

impl Default for TokenRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRefresher {
    #[must_use]
    pub fn new() -> Self {
        // A hung OAuth endpoint must not stall the welcome->subscribe
        // sequence indefinitely.
        let client = Client::builder()
            .timeout(Duration::from_secs(TOKEN_ENDPOINT_TIMEOUT_SECS))
            .build()
            .expect("default TLS backend");

        Self {
            client,
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Point at a mock token endpoint. For testing only.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Fails fast, without a network call, when the credential cannot
    /// support the grant.
    pub async fn refresh(
        &self,
        credential: &Credential,
    ) -> Result<RefreshedTokens, TokenRefreshError> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            return Err(TokenRefreshError::MissingRefreshToken);
        };
        let Some(client_secret) = credential.client_secret.as_deref() else {
            return Err(TokenRefreshError::MissingCredentials);
        };
        if credential.client_id.is_empty() {
            return Err(TokenRefreshError::MissingCredentials);
        }

        let params = [
            ("client_id", credential.client_id.as_str()),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(TokenRefreshError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let parsed: TokenResponse = response.json().await.map_err(TokenRefreshError::Network)?;

        if parsed.refresh_token.is_none() {
            warn!("token endpoint did not rotate the refresh token");
        }

        Ok(RefreshedTokens {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in,
            scope: parsed.scope,
            token_type: parsed.token_type,
        })
    }

    /// Refresh, install into the store (version-checked), then persist.
    /// A persistence failure is logged and swallowed: the in-memory
    /// tokens are already valid and the session proceeds with them.
    pub async fn refresh_and_install(
        &self,
        store: &CredentialStore,
        observed_version: u64,
        sink: Option<&dyn CredentialSink>,
    ) -> Result<RefreshedTokens, TokenRefreshError> {
        let credential = store.current();
        let tokens = self.refresh(&credential).await?;

        if store.install(
            observed_version,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
        ) {
            info!("credential refreshed, expires in {}s", tokens.expires_in);
        } else {
            info!("refresh raced a newer credential; keeping the newer one");
        }

        if let Some(sink) = sink {
            if let Err(e) = sink.persist(&store.current()).await {
                warn!("failed to persist refreshed credential: {e:?}");
            }
        }

        Ok(tokens)
    }
}

fn classify_failure(status: StatusCode, body: &str) -> TokenRefreshError {
    let lowered = body.to_lowercase();

    match status {
        StatusCode::BAD_REQUEST => {
            if lowered.contains("invalid client secret") {
                TokenRefreshError::InvalidClientSecret
            } else if lowered.contains("invalid client") {
                TokenRefreshError::InvalidClientId
            } else if lowered.contains("invalid refresh token") {
                TokenRefreshError::InvalidRefreshToken
            } else {
                TokenRefreshError::Api {
                    status,
                    body: body.to_string(),
                }
            }
        }
        StatusCode::UNAUTHORIZED => TokenRefreshError::InvalidCredentials,
        _ => TokenRefreshError::Api {
            status,
            body: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(status: u16, body: &str) -> TokenRefreshError {
        classify_failure(StatusCode::from_u16(status).unwrap(), body)
    }

    #[test]
    fn test_classify_invalid_client_secret() {
        let err = classify(400, r#"{"message": "Invalid client secret"}"#);
        assert!(matches!(err, TokenRefreshError::InvalidClientSecret));
    }

    #[test]
    fn test_classify_invalid_client_id() {
        let err = classify(400, r#"{"message": "invalid client"}"#);
        assert!(matches!(err, TokenRefreshError::InvalidClientId));
    }

    #[test]
    fn test_classify_invalid_refresh_token() {
        let err = classify(400, r#"{"message": "Invalid refresh token"}"#);
        assert!(matches!(err, TokenRefreshError::InvalidRefreshToken));
    }

    #[test]
    fn test_classify_unauthorized() {
        let err = classify(401, r#"{"message": "whatever"}"#);
        assert!(matches!(err, TokenRefreshError::InvalidCredentials));
    }

    #[test]
    fn test_classify_other_http_error() {
        let err = classify(503, "down for maintenance");
        match err {
            TokenRefreshError::Api { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "down for maintenance");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let err = classify(400, r#"{"message": "INVALID CLIENT SECRET"}"#);
        assert!(matches!(err, TokenRefreshError::InvalidClientSecret));
    }

    #[tokio::test]
    async fn test_refresh_fails_fast_without_refresh_token() {
        // Unroutable endpoint: a network attempt would error differently.
        let refresher = TokenRefresher::new().with_token_url("http://127.0.0.1:1/token");
        let credential = Credential {
            client_id: "id".into(),
            client_secret: Some("secret".into()),
            access_token: "access".into(),
            refresh_token: None,
        };

        let err = refresher.refresh(&credential).await.unwrap_err();
        assert!(matches!(err, TokenRefreshError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn test_refresh_fails_fast_without_secret() {
        let refresher = TokenRefresher::new().with_token_url("http://127.0.0.1:1/token");
        let credential = Credential {
            client_id: "id".into(),
            client_secret: None,
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
        };

        let err = refresher.refresh(&credential).await.unwrap_err();
        assert!(matches!(err, TokenRefreshError::MissingCredentials));
    }
}
