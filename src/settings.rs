use serde::Deserialize;
use url::Url;

use crate::error::{TokenVerifyError, VerifyResult};

/// Azure ADの既定の認証機関
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/";

/// テナントID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// クライアントID
///
/// トークンの`aud`に含まれていなければならない値。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 検証対象のテナント設定
///
/// どのテナントの公開鍵を信頼するかを識別する。プロバイダキャッシュは、この値の等価性でエントリを
/// 区別するため、テナントをまたいで検証者が使われることはない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawTenantSettings")]
pub struct TenantSettings {
    tenant_id: TenantId,
    client_id: ClientId,
    /// 末尾が`/`に正規化された認証機関のURL
    authority: String,
}

#[derive(Deserialize)]
struct RawTenantSettings {
    tenant_id: String,
    client_id: String,
    #[serde(default = "default_authority")]
    authority: String,
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.into()
}

impl TryFrom<RawTenantSettings> for TenantSettings {
    type Error = TokenVerifyError;

    fn try_from(raw: RawTenantSettings) -> Result<Self, Self::Error> {
        Self::new(raw.tenant_id, raw.client_id, raw.authority)
    }
}

impl TenantSettings {
    /// コンストラクタ
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - テナントID
    /// * `client_id` - クライアントID（期待する購読者）
    /// * `authority` - 認証機関のベースURL（例: `https://login.microsoftonline.com/`）
    ///
    /// # Returns
    ///
    /// * テナント設定、または`ConfigInvalid`
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        authority: impl Into<String>,
    ) -> VerifyResult<Self> {
        let tenant_id = tenant_id.into();
        let client_id = client_id.into();
        let mut authority = authority.into();

        if tenant_id.trim().is_empty() {
            return Err(TokenVerifyError::ConfigInvalid(
                "Tenant ID cannot be empty".into(),
            ));
        }
        if client_id.trim().is_empty() {
            return Err(TokenVerifyError::ConfigInvalid(
                "Client ID cannot be empty".into(),
            ));
        }
        if authority.trim().is_empty() {
            return Err(TokenVerifyError::ConfigInvalid(
                "Authority cannot be empty".into(),
            ));
        }
        let parsed = Url::parse(&authority).map_err(|e| {
            TokenVerifyError::ConfigInvalid(format!("Invalid authority {authority}: {e}").into())
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TokenVerifyError::ConfigInvalid(
                format!("Authority must be an http(s) URL: {authority}").into(),
            ));
        }
        // `{authority}{tenant}/v2.0/...`と連結するため、末尾の`/`を保証
        if !authority.ends_with('/') {
            authority.push('/');
        }

        Ok(Self {
            tenant_id: TenantId(tenant_id),
            client_id: ClientId(client_id),
            authority,
        })
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}
