use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::error::KeySetError;

/// JWK公開鍵のキーID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kid(pub String);

impl std::fmt::Display for Kid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// JWK (Json Web Key)
///
/// JWTの署名を検証するための公開鍵をJSONで表現したもの。Azure ADはRSA鍵のみを公開している。
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// JWK公開鍵を識別するID
    pub kid: String,
    /// JWK公開鍵の種類（RSAなど）
    pub kty: String,
    /// RSA公開鍵のモジュラス
    pub n: Option<String>,
    /// RSA公開鍵の指数
    pub e: Option<String>,
    /// JWK公開鍵のアルゴリズム（RS256など）
    pub alg: Option<String>,
    /// JWK公開鍵の用途（sig（署名用）, enc（暗号化用）など）
    #[serde(rename = "use")]
    pub use_: Option<String>,
}

impl Jwk {
    /// 署名検証に使えるRSA鍵かどうか
    fn is_signing_rsa_key(&self) -> bool {
        self.kty == "RSA" && self.use_.as_deref().is_none_or(|use_| use_ == "sig")
    }
}

/// JWK公開鍵セットのレスポンス
#[derive(Debug, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// kidから署名検証用の公開鍵を引く鍵セット
///
/// テストでネットワークを使わない鍵セットに差し替えられるように、トレイトとして定義する。
#[async_trait::async_trait]
pub trait KeySet: Send + Sync {
    /// 指定したkidに対応する復号鍵を返す。
    async fn decoding_key(&self, kid: &Kid) -> Result<DecodingKey, KeySetError>;
}

/// リフレッシュに失敗した後、次にリフレッシュを試みるまでの最大の間隔
///
/// `min_refresh_interval`の方が短い場合は、そちらを使う。
pub const FAILED_REFRESH_BACKOFF: Duration = Duration::from_secs(30);

/// JWK公開鍵のリフレッシュ状態
#[derive(Default)]
struct RefreshState {
    /// 最後にリフレッシュを試みた時刻
    last_attempted_at: Option<Instant>,

    /// 最後の試行が失敗したかどうか
    last_attempt_failed: bool,
}

/// リフレッシュを試みた結果
#[derive(Debug, PartialEq, Eq)]
enum RefreshOutcome {
    /// リフレッシュした
    Refreshed,
    /// 最近リフレッシュされていたため、リフレッシュしなかった
    RecentlyRefreshed,
}

/// JWKsエンドポイントから取得したJWK公開鍵をkidごとにキャッシュする鍵セット
///
/// 最初の参照でJWK公開鍵セットを取得する。キャッシュにないkidを参照したときは、最後の試行から
/// `min_refresh_interval`を超えていれば再取得する。失敗した試行の後は、最大で
/// [`FAILED_REFRESH_BACKOFF`]まで再取得しない。
///
/// 同時に複数のタスクが再取得を要求した場合、リフレッシュ状態のロックを得た1つのタスクだけが取得し、
/// 他のタスクはロックを待ってから結果を使う。取得中のタスクがキャンセルされた場合はロックが解放され、
/// 待機していたタスクが代わりに取得する。
pub struct RemoteKeySet {
    /// JWKsエンドポイントのURI
    jwks_uri: Url,
    /// HTTPクライアント
    client: reqwest::Client,
    /// kidをキー、JWK公開鍵を値に持つハッシュマップ
    keys: RwLock<HashMap<Kid, Jwk>>,
    /// リフレッシュ状態（取得中はロックを保持する）
    refresh_state: Mutex<RefreshState>,
    /// リフレッシュしてから、次にリフレッシュするまでの最小時間
    min_refresh_interval: Duration,
}

impl RemoteKeySet {
    /// コンストラクタ
    ///
    /// I/Oは行わない。JWK公開鍵セットは最初の参照で取得する。
    ///
    /// # Arguments
    ///
    /// * `jwks_uri` - JWKsエンドポイントのURI
    /// * `client` - HTTPクライアント
    /// * `min_refresh_interval` - リフレッシュの最小間隔
    pub fn new(jwks_uri: Url, client: reqwest::Client, min_refresh_interval: Duration) -> Self {
        Self {
            jwks_uri,
            client,
            keys: RwLock::new(HashMap::new()),
            refresh_state: Mutex::new(RefreshState::default()),
            min_refresh_interval,
        }
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    async fn find_key(&self, kid: &Kid) -> Option<Jwk> {
        self.keys.read().await.get(kid).cloned()
    }

    /// JWKsエンドポイントからJWK公開鍵セットを取得する。
    async fn fetch(&self) -> Result<JwksResponse, KeySetError> {
        let response = self
            .client
            .get(self.jwks_uri.as_str())
            .send()
            .await
            .map_err(|e| KeySetError::Fetch(e, self.jwks_uri.clone()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KeySetError::HttpStatus(status, self.jwks_uri.clone()));
        }
        let jwks = response
            .json::<JwksResponse>()
            .await
            .map_err(|e| KeySetError::Parse(e, self.jwks_uri.clone()))?;
        if jwks.keys.is_empty() {
            tracing::warn!(jwks_uri = %self.jwks_uri, "JWKs response contains no keys");
        }
        Ok(jwks)
    }

    /// JWK公開鍵セットを取得して、キャッシュを置き換える。
    ///
    /// 置き換えは書き込みロックの中で一度に行うため、検証中のタスクが中途半端な鍵セットを見ることはない。
    async fn refresh(&self) -> Result<(), KeySetError> {
        let fetched = self.fetch().await?;
        let keys: HashMap<Kid, Jwk> = fetched
            .keys
            .into_iter()
            .filter(Jwk::is_signing_rsa_key)
            .map(|key| (Kid(key.kid.clone()), key))
            .collect();
        tracing::info!(jwks_uri = %self.jwks_uri, key_count = keys.len(), "JWKs refreshed");
        *self.keys.write().await = keys;
        Ok(())
    }

    /// 失敗した試行の後に、再試行を控える間隔
    fn failure_backoff(&self) -> Duration {
        self.min_refresh_interval.min(FAILED_REFRESH_BACKOFF)
    }

    /// 条件付きでJWK公開鍵セットをリフレッシュする。
    ///
    /// # Notes
    ///
    /// リフレッシュ状態のロックを取得の間ずっと保持する。ロックを待っていたタスクは、取得を終えたタスクが
    /// 記録した試行時刻を見てリフレッシュを省く。取得中のタスクがキャンセルされた場合は試行時刻が
    /// 記録されないため、次にロックを得たタスクがリフレッシュする。
    ///
    /// 直前の試行が失敗していて、再試行までの間隔が経過していなければ`RefreshBackoff`を返す。
    async fn maybe_refresh(&self) -> Result<RefreshOutcome, KeySetError> {
        let mut state = self.refresh_state.lock().await;
        if let Some(last_attempted_at) = state.last_attempted_at {
            let elapsed = last_attempted_at.elapsed();
            if state.last_attempt_failed {
                if elapsed < self.failure_backoff() {
                    tracing::debug!(jwks_uri = %self.jwks_uri, "Skip JWKs refresh after recent failure");
                    return Err(KeySetError::RefreshBackoff(self.jwks_uri.clone()));
                }
            } else if elapsed < self.min_refresh_interval {
                tracing::debug!(jwks_uri = %self.jwks_uri, "Skip JWKs refresh due to cool down");
                return Ok(RefreshOutcome::RecentlyRefreshed);
            }
        }

        let result = self.refresh().await;

        state.last_attempted_at = Some(Instant::now());
        state.last_attempt_failed = result.is_err();
        if let Err(e) = &result {
            tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "Failed to refresh JWKs");
        }

        result.map(|_| RefreshOutcome::Refreshed)
    }
}

#[async_trait::async_trait]
impl KeySet for RemoteKeySet {
    async fn decoding_key(&self, kid: &Kid) -> Result<DecodingKey, KeySetError> {
        if let Some(jwk) = self.find_key(kid).await {
            tracing::debug!(kid = %kid, "JWKs cache hit");
            return decoding_key_from_jwk(&jwk);
        }

        match self.maybe_refresh().await? {
            RefreshOutcome::RecentlyRefreshed => {
                tracing::debug!(kid = %kid, "Unknown kid within refresh cool down");
            }
            outcome => {
                tracing::debug!(kid = %kid, outcome = ?outcome, "Retrying key lookup after refresh");
            }
        }

        let jwk = self
            .find_key(kid)
            .await
            .ok_or_else(|| KeySetError::KeyNotFound(kid.clone()))?;
        decoding_key_from_jwk(&jwk)
    }
}

/// JWK公開鍵から復号鍵を作成する。
///
/// # Arguments
///
/// * `jwk` - JWK公開鍵
///
/// # Returns
///
/// * 復号鍵、またはエラー
fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, KeySetError> {
    let kid = || Kid(jwk.kid.clone());
    let (n, e) = match (jwk.n.as_deref(), jwk.e.as_deref()) {
        (Some(n), Some(e)) => (n, e),
        _ => {
            return Err(KeySetError::UnusableKey(
                kid(),
                jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into(),
            ));
        }
    };
    DecodingKey::from_rsa_components(n, e).map_err(|e| KeySetError::UnusableKey(kid(), e))
}
