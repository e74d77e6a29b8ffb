use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{TokenVerifyError, VerifyResult};
use crate::settings::TenantSettings;

/// v2.0のOpenID構成ドキュメントのパス
const OPENID_CONFIGURATION_SUFFIX: &str = "v2.0/.well-known/openid-configuration";

/// リクエストに付与するUser-Agent
///
/// 未知のUser-Agentを拒否するプロバイダがあるため、Linux版Chromeを名乗る。
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.71 Safari/537.36";

/// エラーレスポンスのボディを保持する最大バイト数
const MAX_ERROR_BODY_BYTES: usize = 512;

/// プールしたアイドル接続を保持する時間
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// TCPキープアライブの間隔
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// メタデータとJWKsの取得に共有するHTTPクライアントを作成する。
///
/// # Arguments
///
/// * `connection_timeout` - 接続する際のタイムアウト
/// * `timeout` - 応答を待つタイムアウト
///
/// # Returns
///
/// * HTTPクライアント、またはエラー
pub fn build_http_client(
    connection_timeout: Duration,
    timeout: Duration,
) -> VerifyResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connection_timeout)
        .timeout(timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        // 環境変数のプロキシ設定を暗黙に使用しない
        .no_proxy()
        .build()
        .map_err(|e| {
            TokenVerifyError::ConfigInvalid(format!("Failed to build HTTP client: {e}").into())
        })
}

/// テナントのOpenID構成ドキュメントのURLを返す。
///
/// `{authority}{tenant_id}/v2.0/.well-known/openid-configuration`
pub fn discovery_url(settings: &TenantSettings) -> VerifyResult<Url> {
    let raw = format!(
        "{}{}/{}",
        settings.authority(),
        settings.tenant_id(),
        OPENID_CONFIGURATION_SUFFIX
    );
    Url::parse(&raw).map_err(|e| {
        TokenVerifyError::ConfigInvalid(format!("Invalid discovery URL {raw}: {e}").into())
    })
}

/// OpenID構成ドキュメントから取り出した検証に必要な情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDocument {
    /// トークンの`iss`と一致しなければならない発行者
    ///
    /// Azure ADでは、認証機関のURLから導出できない値になることがある。
    pub issuer: String,
    /// JWK公開鍵セットを取得するURI
    pub jwks_uri: Url,
}

#[derive(Deserialize)]
struct OpenIdConfiguration {
    issuer: Option<String>,
    jwks_uri: Option<String>,
}

/// OpenID構成ドキュメントを取得するクライアント
#[derive(Clone)]
pub struct DiscoveryClient {
    client: reqwest::Client,
}

impl DiscoveryClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// テナントのOpenID構成ドキュメントを取得して、発行者とJWKsのURIを取り出す。
    ///
    /// 再試行はしない。失敗はそのまま呼び出し側に返す。
    ///
    /// # Arguments
    ///
    /// * `settings` - テナント設定
    ///
    /// # Returns
    ///
    /// * 発行者とJWKsのURI、またはエラー
    pub async fn discover(&self, settings: &TenantSettings) -> VerifyResult<DiscoveryDocument> {
        let url = discovery_url(settings)?;
        tracing::debug!(tenant_id = %settings.tenant_id(), url = %url, "Fetching OpenID configuration");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TokenVerifyError::DiscoveryTransport {
                url: url.clone(),
                source: e,
            })?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TokenVerifyError::DiscoveryTransport {
                url: url.clone(),
                source: e,
            })?;
        if status != reqwest::StatusCode::OK {
            return Err(TokenVerifyError::DiscoveryHttp {
                url,
                status,
                body: truncate_body(&body),
            });
        }

        let document = parse_discovery_document(&url, &body)?;
        tracing::info!(
            tenant_id = %settings.tenant_id(),
            issuer = %document.issuer,
            jwks_uri = %document.jwks_uri,
            "Discovered OpenID configuration"
        );
        Ok(document)
    }
}

/// OpenID構成ドキュメントのボディをパースする。
fn parse_discovery_document(url: &Url, body: &[u8]) -> VerifyResult<DiscoveryDocument> {
    let malformed = |reason: String| TokenVerifyError::DiscoveryMalformed {
        url: url.clone(),
        reason,
    };

    let configuration: OpenIdConfiguration =
        serde_json::from_slice(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let issuer = configuration
        .issuer
        .filter(|issuer| !issuer.is_empty())
        .ok_or_else(|| malformed("missing `issuer`".into()))?;
    let jwks_uri = configuration
        .jwks_uri
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| malformed("missing `jwks_uri`".into()))?;
    let jwks_uri =
        Url::parse(&jwks_uri).map_err(|e| malformed(format!("invalid `jwks_uri`: {e}")))?;

    Ok(DiscoveryDocument { issuer, jwks_uri })
}

/// 診断用にレスポンスボディを切り詰める。
fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
