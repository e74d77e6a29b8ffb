use std::sync::Arc;

use aad_token_verifier::{TenantSettings, TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pub token_verifier: Arc<TokenVerifier>,
    /// Authorizationヘッダのトークンを検証するテナント
    pub tenant: Arc<TenantSettings>,
}
