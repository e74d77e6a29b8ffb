use aad_token_verifier::VerifiedClaims;
use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

use crate::common::{AppError, ErrorBody};

/// 認証済みクレームをリクエストから抽出するエクストラクタ
///
/// 認証ミドルウェアがリクエストの拡張に埋め込んだクレームを取り出す。
#[derive(Clone)]
pub struct AuthClaims(pub VerifiedClaims);

impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedClaims>()
            .cloned()
            .map(AuthClaims)
            .ok_or(AppError::Handler(ErrorBody {
                code: StatusCode::UNAUTHORIZED,
                message: "Bearer token not found".into(),
            }))
    }
}
