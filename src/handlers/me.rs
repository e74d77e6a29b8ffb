use aad_token_verifier::VerifiedClaims;
use axum::Json;

use super::extractors::AuthClaims;

/// 認証ミドルウェアで検証したトークンのクレームを返す。
pub async fn me(AuthClaims(claims): AuthClaims) -> Json<VerifiedClaims> {
    Json(claims)
}
