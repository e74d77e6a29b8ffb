use std::time::Duration;

use aad_token_verifier::{TenantSettings, TokenVerifierBuilder, VerifyResult};
use config::Config;
use serde::Deserialize;

type ConfigResult<T> = Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{0}")]
    LoadError(config::ConfigError),
    #[error("{0}")]
    DeserializeError(config::ConfigError),
}

#[derive(Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub web: WebConfig,
    /// 検証対象のテナント
    pub azure_ad: TenantSettings,
    #[serde(default)]
    pub verifier: VerifierConfig,
}

impl AppConfig {
    /// `config.yaml`と`APP__`で始まる環境変数から設定を読み込む。
    ///
    /// 例えば`APP__WEB__PORT=8080`は`web.port`を上書きする。
    pub fn load() -> ConfigResult<Self> {
        let config = Config::builder()
            .add_source(config::File::with_name("config.yaml"))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(ConfigError::LoadError)?;
        config
            .try_deserialize()
            .map_err(ConfigError::DeserializeError)
    }
}

#[derive(Deserialize)]
pub struct WebConfig {
    pub port: u16,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// ディスカバリした検証者をキャッシュする期間（秒）
    pub provider_lifetime: u64,

    /// 未知のkidを受け取ったときに、JWK公開鍵セットが最後にリフレッシュされてから、
    /// 次にリフレッシュするまでの最小時間（秒）
    pub jwks_min_refresh_interval: u64,

    /// Azure ADのエンドポイントに接続する際のタイムアウト（秒）
    pub connection_timeout: u64,

    /// Azure ADのエンドポイントからの応答を待つタイムアウト（秒）
    pub timeout: u64,

    /// `nbf`と`iat`に許容する時刻のずれ（秒）
    pub clock_skew: u64,

    /// 古い検証者の再構築に失敗した後、再びディスカバリするまでの間隔（秒）
    pub rebuild_backoff: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            provider_lifetime: 30 * 60,
            jwks_min_refresh_interval: 5 * 60,
            connection_timeout: 30,
            timeout: 30,
            clock_skew: 5 * 60,
            rebuild_backoff: 30,
        }
    }
}

impl VerifierConfig {
    /// 設定値を適用したトークン検証者ビルダーを返す。
    pub fn builder(&self) -> VerifyResult<TokenVerifierBuilder> {
        Ok(TokenVerifierBuilder::default()
            .provider_lifetime(Duration::from_secs(self.provider_lifetime))?
            .jwks_min_refresh_interval(Duration::from_secs(self.jwks_min_refresh_interval))?
            .connection_timeout(Duration::from_secs(self.connection_timeout))?
            .timeout(Duration::from_secs(self.timeout))?
            .rebuild_backoff(Duration::from_secs(self.rebuild_backoff))?
            .clock_skew(Duration::from_secs(self.clock_skew)))
    }
}
