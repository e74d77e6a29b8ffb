use std::borrow::Cow;

use url::Url;

use crate::jwks::Kid;

/// トークン検証処理の結果型
pub type VerifyResult<T> = Result<T, TokenVerifyError>;

/// トークン検証のエラー
///
/// 呼び出し側が分岐できるように、失敗した段階ごとにバリアントを分けている。
#[derive(Debug, thiserror::Error)]
pub enum TokenVerifyError {
    /// テナント設定、または検証者の設定が不正
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(Cow<'static, str>),

    /// メタデータエンドポイントへの接続に失敗、またはタイムアウト
    #[error("Failed to reach discovery endpoint {url}: {source}")]
    DiscoveryTransport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    /// メタデータエンドポイントが200以外のステータスを返した
    #[error("Discovery endpoint {url} returned {status}: {body}")]
    DiscoveryHttp {
        url: Url,
        status: reqwest::StatusCode,
        /// 診断用に切り詰めたレスポンスボディ
        body: String,
    },

    /// メタデータのJSONが不正、または`issuer`か`jwks_uri`が存在しない
    #[error("Malformed discovery document from {url}: {reason}")]
    DiscoveryMalformed { url: Url, reason: String },

    /// 署名検証に使用する公開鍵を取得できない
    #[error("Signing key unavailable: {0}")]
    KeySetUnavailable(#[from] KeySetError),

    /// トークンの構造が不正
    #[error("Malformed token: {0}")]
    TokenMalformed(Cow<'static, str>),

    /// 許可していない署名アルゴリズム
    #[error("Signing algorithm rejected: {0}")]
    AlgorithmRejected(String),

    /// 署名の検証に失敗
    #[error("Token signature is invalid")]
    SignatureInvalid,

    /// クレームの検証に失敗
    #[error("Token claim is invalid: {0}")]
    ClaimInvalid(ClaimViolation),
}

/// クレーム検証の違反内容
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimViolation {
    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,

    /// `exp`に到達済み
    #[error("token expired")]
    Expired,

    /// `nbf`が未来
    #[error("token not yet valid")]
    NotYetValid,

    /// `iat`が許容範囲を超えて未来
    #[error("token issued in the future")]
    IssuedInFuture,

    #[error("missing required claim: {0}")]
    MissingClaim(String),
}

/// JWK公開鍵セットのエラー
#[derive(Debug, thiserror::Error)]
pub enum KeySetError {
    /// JWK公開鍵セットの取得に失敗
    #[error("Failed to fetch JWKs from {1}: {0}")]
    Fetch(reqwest::Error, Url),

    /// JWKsエンドポイントが成功以外のステータスを返した
    #[error("JWKs endpoint {1} returned {0}")]
    HttpStatus(reqwest::StatusCode, Url),

    /// JWK公開鍵セットのパースに失敗
    #[error("Failed to parse JWKs from {1}: {0}")]
    Parse(reqwest::Error, Url),

    /// リフレッシュ後も、指定したkidを持つJWK公開鍵が存在しない
    #[error("No signing key found for kid {0}")]
    KeyNotFound(Kid),

    /// 直前のリフレッシュに失敗してから、再試行までの間隔が経過していない
    #[error("JWKs endpoint {0} failed recently, retry later")]
    RefreshBackoff(Url),

    /// JWKから復号鍵を作成できない
    #[error("Failed to create decoding key for kid {0}: {1}")]
    UnusableKey(Kid, jsonwebtoken::errors::Error),
}

impl TokenVerifyError {
    /// `jsonwebtoken`の検証エラーを分類する。
    ///
    /// 署名とクレームのどちらで失敗したかを呼び出し側が区別できるようにする。
    /// 鍵の形式の誤りは署名の不一致ではなく、`kid`の鍵が使えないものとして扱う。
    pub(crate) fn from_jwt_error(e: jsonwebtoken::errors::Error, kid: &Kid) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::InvalidSignature => Self::SignatureInvalid,
            ErrorKind::InvalidIssuer => Self::ClaimInvalid(ClaimViolation::IssuerMismatch),
            ErrorKind::InvalidAudience => Self::ClaimInvalid(ClaimViolation::AudienceMismatch),
            ErrorKind::ExpiredSignature => Self::ClaimInvalid(ClaimViolation::Expired),
            ErrorKind::ImmatureSignature => Self::ClaimInvalid(ClaimViolation::NotYetValid),
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::ClaimInvalid(ClaimViolation::MissingClaim(claim.clone()))
            }
            ErrorKind::InvalidAlgorithm => Self::AlgorithmRejected(e.to_string()),
            ErrorKind::InvalidToken
            | ErrorKind::InvalidClaimFormat(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Self::TokenMalformed(e.to_string().into()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidEddsaKey
            | ErrorKind::InvalidKeyFormat => {
                Self::KeySetUnavailable(KeySetError::UnusableKey(kid.clone(), e))
            }
            _ => Self::SignatureInvalid,
        }
    }
}
