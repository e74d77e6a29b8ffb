use std::time::Duration;

use secrecy::{ExposeSecret as _, SecretString};

use crate::claims::VerifiedClaims;
use crate::discovery::build_http_client;
use crate::error::{TokenVerifyError, VerifyResult};
use crate::provider_cache::{
    DEFAULT_PROVIDER_LIFETIME, DEFAULT_REBUILD_BACKOFF, ProviderCache, ProviderOptions,
};
use crate::settings::TenantSettings;
use crate::verifier::inspect_token;

/// トークンから取り除く接頭辞（大文字と小文字を区別する）
const BEARER_PREFIX: &str = "Bearer ";

/// JWK公開鍵セットをリフレッシュする既定の最小間隔
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 接続する際の既定のタイムアウト
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// 応答を待つ既定のタイムアウト
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `nbf`と`iat`に許容する既定の時刻のずれ
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Bearerトークン
#[cfg_attr(debug_assertions, derive(Debug))]
#[derive(Clone)]
pub struct BearerToken(pub SecretString);

impl BearerToken {
    /// 生のトークン文字列から、先頭の`Bearer `を1つだけ取り除いてBearerトークンを作成する。
    ///
    /// `Bearer `が先頭に完全一致しない場合は、そのまま保持する。
    pub fn from_raw(raw: &str) -> Self {
        let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw);
        Self(SecretString::new(token.into()))
    }
}

/// Azure ADトークン検証者
///
/// テナント設定ごとにディスカバリした検証者をキャッシュして、トークンを検証する。
pub struct TokenVerifier {
    cache: ProviderCache,
}

impl TokenVerifier {
    /// 既定の設定で構築する。
    pub fn new() -> VerifyResult<Self> {
        TokenVerifierBuilder::default().build()
    }

    pub fn builder() -> TokenVerifierBuilder {
        TokenVerifierBuilder::default()
    }

    /// トークンを検証する。
    ///
    /// # Arguments
    ///
    /// * `settings` - テナント設定
    /// * `raw_token` - 検証するトークン（先頭の`Bearer `は省略可能）
    ///
    /// # Returns
    ///
    /// * 検証に成功した場合はクレーム、失敗した場合はエラー
    pub async fn verify_token(
        &self,
        settings: &TenantSettings,
        raw_token: &str,
    ) -> VerifyResult<VerifiedClaims> {
        self.verify_bearer_token(settings, &BearerToken::from_raw(raw_token))
            .await
    }

    /// `Bearer `を取り除いたトークンを検証する。
    pub async fn verify_bearer_token(
        &self,
        settings: &TenantSettings,
        token: &BearerToken,
    ) -> VerifyResult<VerifiedClaims> {
        let token = token.0.expose_secret();

        // 構造とアルゴリズムの確認はネットワークにアクセスせずにできるため、ディスカバリの前に行う
        inspect_token(token)?;

        let verifier = self.cache.get_or_build(settings).await?;
        verifier.verify(token).await
    }
}

/// Azure ADトークン検証者ビルダー
#[derive(Default)]
pub struct TokenVerifierBuilder {
    provider_lifetime: Option<Duration>,
    jwks_min_refresh_interval: Option<Duration>,
    connection_timeout: Option<Duration>,
    timeout: Option<Duration>,
    clock_skew: Option<Duration>,
    rebuild_backoff: Option<Duration>,
}

fn non_zero(value: Duration, name: &str) -> VerifyResult<Duration> {
    if value.is_zero() {
        return Err(TokenVerifyError::ConfigInvalid(
            format!("{name} must be greater than zero").into(),
        ));
    }
    Ok(value)
}

impl TokenVerifierBuilder {
    /// 検証者をキャッシュする期間を設定する。
    ///
    /// # Arguments
    ///
    /// * `lifetime` - キャッシュする期間
    ///
    /// # Returns
    ///
    /// * 自身のインスタンス
    pub fn provider_lifetime(mut self, lifetime: Duration) -> VerifyResult<Self> {
        self.provider_lifetime = Some(non_zero(lifetime, "Provider lifetime")?);
        Ok(self)
    }

    /// JWK公開鍵セットをリフレッシュする最小間隔を設定する。
    ///
    /// # Arguments
    ///
    /// * `interval` - リフレッシュの最小間隔
    ///
    /// # Returns
    ///
    /// * 自身のインスタンス
    pub fn jwks_min_refresh_interval(mut self, interval: Duration) -> VerifyResult<Self> {
        self.jwks_min_refresh_interval = Some(non_zero(interval, "JWKs min refresh interval")?);
        Ok(self)
    }

    /// 接続する際のタイムアウトを設定する。
    pub fn connection_timeout(mut self, timeout: Duration) -> VerifyResult<Self> {
        self.connection_timeout = Some(non_zero(timeout, "Connection timeout")?);
        Ok(self)
    }

    /// 応答を待つタイムアウトを設定する。
    pub fn timeout(mut self, timeout: Duration) -> VerifyResult<Self> {
        self.timeout = Some(non_zero(timeout, "Timeout")?);
        Ok(self)
    }

    /// `nbf`と`iat`に許容する時刻のずれを設定する。ゼロも許可する。
    pub fn clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = Some(skew);
        self
    }

    /// 古い検証者の再構築に失敗した後、再びディスカバリするまでの間隔を設定する。
    pub fn rebuild_backoff(mut self, backoff: Duration) -> VerifyResult<Self> {
        self.rebuild_backoff = Some(non_zero(backoff, "Rebuild backoff")?);
        Ok(self)
    }

    /// Azure ADトークン検証者を構築する。I/Oは行わない。
    ///
    /// # Returns
    ///
    /// * Azure ADトークン検証者、またはエラー
    pub fn build(self) -> VerifyResult<TokenVerifier> {
        let http_client = build_http_client(
            self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        )?;
        let options = ProviderOptions {
            lifetime: self.provider_lifetime.unwrap_or(DEFAULT_PROVIDER_LIFETIME),
            jwks_min_refresh_interval: self
                .jwks_min_refresh_interval
                .unwrap_or(DEFAULT_JWKS_MIN_REFRESH_INTERVAL),
            clock_skew: self.clock_skew.unwrap_or(DEFAULT_CLOCK_SKEW),
            rebuild_backoff: self.rebuild_backoff.unwrap_or(DEFAULT_REBUILD_BACKOFF),
        };
        Ok(TokenVerifier {
            cache: ProviderCache::new(http_client, options),
        })
    }
}
