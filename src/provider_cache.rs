use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::discovery::DiscoveryClient;
use crate::error::VerifyResult;
use crate::jwks::RemoteKeySet;
use crate::settings::TenantSettings;
use crate::verifier::Verifier;

/// 検証者をキャッシュする既定の期間
pub const DEFAULT_PROVIDER_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// 古い検証者の再構築に失敗した後、再びディスカバリするまでの既定の間隔
pub const DEFAULT_REBUILD_BACKOFF: Duration = Duration::from_secs(30);

/// キャッシュした検証者
struct CacheEntry {
    verifier: Arc<Verifier>,
    /// 検証者を構築した時刻
    created_at: Instant,
    /// 最後に再構築に失敗した時刻
    last_failed_at: Option<Instant>,
}

/// テナント設定ごとのスロット
///
/// スロットごとにロックを持つため、あるテナントの再構築が他のテナントの読み取りを妨げない。
type Slot = Arc<RwLock<Option<CacheEntry>>>;

/// 検証者を構築するときの設定
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// 検証者をキャッシュする期間
    pub lifetime: Duration,
    /// JWK公開鍵セットをリフレッシュする最小間隔
    pub jwks_min_refresh_interval: Duration,
    /// `nbf`と`iat`に許容する時刻のずれ
    pub clock_skew: Duration,
    /// 再構築に失敗した後、古い検証者をディスカバリせずに返し続ける期間
    pub rebuild_backoff: Duration,
}

/// テナント設定ごとに検証者をキャッシュするプロバイダキャッシュ
///
/// 検証者は構築から`lifetime`を経過すると古いとみなし、次の要求で再びディスカバリする。
///
/// # Notes
///
/// 同じテナント設定で同時にキャッシュミスした場合、スロットの書き込みロックを得た1つのタスクだけが
/// ディスカバリし、他のタスクはその結果を使う。
///
/// 古い検証者の再構築に失敗した場合は、古い検証者を返し続ける。構築時刻は更新せず失敗時刻を記録し、
/// `rebuild_backoff`を経過するまではディスカバリせずに古い検証者を返す。書き込みロックを待っていた
/// タスクも失敗時刻を見て古い検証者を返すため、障害中に同じテナントのディスカバリが連続することはない。
pub struct ProviderCache {
    discovery: DiscoveryClient,
    http_client: reqwest::Client,
    options: ProviderOptions,
    slots: RwLock<HashMap<TenantSettings, Slot>>,
}

impl ProviderCache {
    /// コンストラクタ
    ///
    /// # Arguments
    ///
    /// * `http_client` - ディスカバリとJWKsの取得に使うHTTPクライアント
    /// * `options` - 検証者を構築するときの設定
    pub fn new(http_client: reqwest::Client, options: ProviderOptions) -> Self {
        Self {
            discovery: DiscoveryClient::new(http_client.clone()),
            http_client,
            options,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// テナント設定に対応するスロットを取得、または作成する。
    async fn slot(&self, settings: &TenantSettings) -> Slot {
        if let Some(slot) = self.slots.read().await.get(settings) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(settings.clone()).or_default())
    }

    /// ディスカバリせずに、キャッシュした検証者を返してよいかどうか
    fn is_usable(&self, entry: &CacheEntry) -> bool {
        entry.created_at.elapsed() < self.options.lifetime
            || entry
                .last_failed_at
                .is_some_and(|failed_at| failed_at.elapsed() < self.options.rebuild_backoff)
    }

    /// キャッシュした検証者を返す。存在しない、または古い場合は構築してから返す。
    ///
    /// # Arguments
    ///
    /// * `settings` - テナント設定
    ///
    /// # Returns
    ///
    /// * 検証者、またはディスカバリのエラー
    pub async fn get_or_build(&self, settings: &TenantSettings) -> VerifyResult<Arc<Verifier>> {
        let slot = self.slot(settings).await;

        {
            let entry = slot.read().await;
            if let Some(entry) = entry.as_ref()
                && self.is_usable(entry)
            {
                tracing::debug!(tenant_id = %settings.tenant_id(), "Provider cache hit");
                return Ok(Arc::clone(&entry.verifier));
            }
        }

        let mut entry = slot.write().await;
        // 書き込みロックを待つ間に、他のタスクが構築した、または構築に失敗した可能性がある
        if let Some(current) = entry.as_ref()
            && self.is_usable(current)
        {
            return Ok(Arc::clone(&current.verifier));
        }

        tracing::debug!(tenant_id = %settings.tenant_id(), "Provider cache miss, building verifier");
        match self.build(settings).await {
            Ok(verifier) => {
                *entry = Some(CacheEntry {
                    verifier: Arc::clone(&verifier),
                    created_at: Instant::now(),
                    last_failed_at: None,
                });
                Ok(verifier)
            }
            Err(e) => match entry.as_mut() {
                Some(stale) => {
                    stale.last_failed_at = Some(Instant::now());
                    tracing::warn!(
                        tenant_id = %settings.tenant_id(),
                        error = %e,
                        "Failed to rebuild verifier, serving stale verifier"
                    );
                    Ok(Arc::clone(&stale.verifier))
                }
                None => Err(e),
            },
        }
    }

    /// ディスカバリして検証者を構築する。
    async fn build(&self, settings: &TenantSettings) -> VerifyResult<Arc<Verifier>> {
        let document = self.discovery.discover(settings).await?;
        let key_set = RemoteKeySet::new(
            document.jwks_uri.clone(),
            self.http_client.clone(),
            self.options.jwks_min_refresh_interval,
        );
        Ok(Arc::new(Verifier::build(
            &document,
            settings,
            Arc::new(key_set),
            self.options.clock_skew,
        )))
    }
}
