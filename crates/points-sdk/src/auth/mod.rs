pub mod credential;
pub mod refresher;
pub mod state_token;
pub mod validator;

pub use credential::{Credential, CredentialSink, CredentialStore};
pub use refresher::{RefreshedTokens, TokenRefresher};
pub use state_token::StateTokenManager;
pub use validator::{REQUIRED_SCOPE, TokenStatus, TokenValidator};
