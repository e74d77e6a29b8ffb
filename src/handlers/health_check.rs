use axum::http::StatusCode;

/// ヘルスチェック
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
