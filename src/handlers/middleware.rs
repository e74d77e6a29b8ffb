use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::{
    common::{AppError, AppResult, ErrorBody},
    state::AppState,
};

/// 認証ミドルウェア
///
/// Authorizationヘッダの値を`Bearer `ごと検証者に渡す。接頭辞は検証者が取り除く。
pub async fn auth_middleware(
    State(app_state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let raw_token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| {
            AppError::Handler(ErrorBody {
                code: StatusCode::UNAUTHORIZED,
                message: "Authorization header not found".into(),
            })
        })?
        .to_str()
        .map_err(|e| {
            AppError::Handler(ErrorBody {
                code: StatusCode::UNAUTHORIZED,
                message: format!("Invalid Authorization header: {e}"),
            })
        })?
        .to_owned();

    let claims = app_state
        .token_verifier
        .verify_token(&app_state.tenant, &raw_token)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Token verification failed");
            AppError::TokenVerify(e)
        })?;

    // ハンドラで取得できるようにクレームをリクエストに埋め込み
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
