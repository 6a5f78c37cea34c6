use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

/// The mutable access/refresh pair plus application identity. Secret and
/// refresh token may both be absent, which disables auto-refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Credential {
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_secret.is_some()
    }
}

/// Durable home for a refreshed credential. Implemented by the host
/// (file, keychain, ...); persistence failures never invalidate the
/// in-memory tokens.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn persist(&self, credential: &Credential) -> anyhow::Result<()>;
}

#[derive(Debug)]
struct Versioned {
    version: u64,
    credential: Credential,
}

/// Process-wide credential cell. Every reader sees a consistent
/// (version, pair) snapshot; writers install through a compare-and-set
/// loop so a refresh that raced a newer one cannot roll it back. Beyond
/// the version check, ordering is last-write-wins.
///
/// Lives until process exit and is never itself persisted; durable
/// storage goes through [`CredentialSink`].
pub struct CredentialStore {
    inner: ArcSwap<Versioned>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: ArcSwap::from_pointee(Versioned {
                version: 0,
                credential,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> (u64, Credential) {
        let cur = self.inner.load();
        (cur.version, cur.credential.clone())
    }

    #[must_use]
    pub fn current(&self) -> Credential {
        self.inner.load().credential.clone()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.load().version
    }

    /// Install a refreshed pair. Returns `false` when a strictly newer
    /// credential landed while the refresh producing this pair was in
    /// flight; the caller must then re-read instead of overwriting.
    ///
    /// A `None` refresh token keeps the existing one (Twitch does not
    /// always rotate it).
    pub fn install(
        &self,
        observed_version: u64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> bool {
        loop {
            let cur = self.inner.load_full();
            if cur.version > observed_version {
                return false;
            }

            let mut credential = cur.credential.clone();
            credential.access_token = access_token.to_string();
            if let Some(rt) = refresh_token {
                credential.refresh_token = Some(rt.to_string());
            }

            let next = Arc::new(Versioned {
                version: cur.version + 1,
                credential,
            });

            let prev = self.inner.compare_and_swap(&cur, next);
            if Arc::ptr_eq(&prev, &cur) {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_credential() -> Credential {
        Credential {
            client_id: "client".into(),
            client_secret: Some("secret".into()),
            access_token: "access0".into(),
            refresh_token: Some("refresh0".into()),
        }
    }

    #[test]
    fn test_can_refresh_requires_secret_and_refresh_token() {
        let full = make_credential();
        assert!(full.can_refresh());

        let mut no_secret = make_credential();
        no_secret.client_secret = None;
        assert!(!no_secret.can_refresh());

        let mut no_refresh = make_credential();
        no_refresh.refresh_token = None;
        assert!(!no_refresh.can_refresh());
    }

    #[test]
    fn test_install_bumps_version() {
        let store = CredentialStore::new(make_credential());
        let (version, _) = store.snapshot();

        assert!(store.install(version, "access1", Some("refresh1")));

        let (new_version, credential) = store.snapshot();
        assert_eq!(new_version, version + 1);
        assert_eq!(credential.access_token, "access1");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh1"));
    }

    #[test]
    fn test_stale_install_is_rejected() {
        let store = CredentialStore::new(make_credential());
        let (old_version, _) = store.snapshot();

        assert!(store.install(old_version, "newer", Some("newer_rt")));
        assert!(!store.install(old_version, "stale", Some("stale_rt")));

        assert_eq!(store.current().access_token, "newer");
    }

    #[test]
    fn test_missing_refresh_token_keeps_existing() {
        let store = CredentialStore::new(make_credential());
        let (version, _) = store.snapshot();

        assert!(store.install(version, "access1", None));

        let credential = store.current();
        assert_eq!(credential.access_token, "access1");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh0"));
    }

    #[test]
    fn test_identity_fields_survive_install() {
        let store = CredentialStore::new(make_credential());
        let (version, _) = store.snapshot();
        assert!(store.install(version, "access1", None));

        let credential = store.current();
        assert_eq!(credential.client_id, "client");
        assert_eq!(credential.client_secret.as_deref(), Some("secret"));
    }
}
