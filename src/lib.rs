//! Azure ADが発行したBearerトークンを検証する。
//!
//! テナントのOpenID構成ドキュメントから発行者とJWKsのURIを取得し、検証者を構築してキャッシュする。
//! 呼び出し側はテナント設定と生のトークン文字列を渡し、検証済みのクレーム、またはエラーを受け取る。
//!
//! ```no_run
//! use aad_token_verifier::{TenantSettings, TokenVerifier};
//!
//! # async fn run(raw_token: &str) -> Result<(), aad_token_verifier::TokenVerifyError> {
//! let verifier = TokenVerifier::new()?;
//! let settings = TenantSettings::new("contoso", "abc123", "https://login.microsoftonline.com/")?;
//! let claims = verifier.verify_token(&settings, raw_token).await?;
//! println!("{}", claims.sub);
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod discovery;
pub mod error;
pub mod jwks;
pub mod provider_cache;
pub mod settings;
pub mod token_verifier;
pub mod verifier;

pub use crate::claims::{Audience, VerifiedClaims};
pub use crate::discovery::{DiscoveryClient, DiscoveryDocument};
pub use crate::error::{ClaimViolation, KeySetError, TokenVerifyError, VerifyResult};
pub use crate::jwks::{KeySet, Kid, RemoteKeySet};
pub use crate::provider_cache::{ProviderCache, ProviderOptions};
pub use crate::settings::{ClientId, TenantId, TenantSettings};
pub use crate::token_verifier::{BearerToken, TokenVerifier, TokenVerifierBuilder};
pub use crate::verifier::Verifier;
