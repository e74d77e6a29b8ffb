mod extractors;
mod health_check;
mod me;
pub mod middleware;

use axum::{Router, routing};

use self::health_check::health_check;
use self::me::me;
use self::middleware::auth_middleware;

use crate::state::AppState;

/// ルートを作成する。
///
/// # Arguments
///
/// * `app_state` - アプリケーションの状態
///
/// # Returns
///
/// 作成したルーター
pub fn create_routes(app_state: AppState) -> Router<AppState> {
    Router::new().nest("/api", create_api_routes(app_state))
}

/// 公開ルートと保護されたルートをまとめて返す。
fn create_api_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .merge(create_public_api_routes())
        .merge(create_protected_api_routes(app_state))
}

/// 公開ルートを作成する。
fn create_public_api_routes() -> Router<AppState> {
    Router::new().route("/health-check", routing::get(health_check))
}

/// 保護されたルートを作成する。
///
/// # Arguments
///
/// * `app_state` - 認証ミドルウェアに渡すアプリケーションの状態
fn create_protected_api_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me", routing::get(me))
        .layer(axum::middleware::from_fn_with_state(
            app_state,
            auth_middleware,
        ))
}
