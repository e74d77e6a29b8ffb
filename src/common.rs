use aad_token_verifier::TokenVerifyError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    TokenVerify(TokenVerifyError),
    #[error("{0}")]
    Handler(ErrorBody),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::TokenVerify(e) => token_verify_error_response(e),
            AppError::Handler(e) => e.into_response(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{{ code: {code}, message: {message} }}")]
pub struct ErrorBody {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
pub struct ErrorBodyRaw {
    pub code: u16,
    pub error: String,
    pub message: String,
}

impl ErrorBodyRaw {
    fn new(code: StatusCode, message: String) -> Self {
        Self {
            code: code.as_u16(),
            error: code.canonical_reason().unwrap_or("Unknown Error").into(),
            message,
        }
    }
}

/// エラーレスポンスを作成する。
///
/// 401の場合は`WWW-Authenticate: Bearer`ヘッダを付与する。
fn error_response(code: StatusCode, message: String) -> Response {
    let mut response = (code, axum::Json(ErrorBodyRaw::new(code, message))).into_response();
    if code == StatusCode::UNAUTHORIZED {
        response.headers_mut().insert(
            axum::http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer"),
        );
    }
    response
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        error_response(self.code, self.message)
    }
}

/// トークン検証のエラーをステータスコードに対応付ける。
pub fn token_verify_error_status(e: &TokenVerifyError) -> StatusCode {
    match e {
        TokenVerifyError::ConfigInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TokenVerifyError::DiscoveryTransport { .. }
        | TokenVerifyError::DiscoveryHttp { .. }
        | TokenVerifyError::DiscoveryMalformed { .. } => StatusCode::BAD_GATEWAY,
        TokenVerifyError::KeySetUnavailable(aad_token_verifier::KeySetError::KeyNotFound(_)) => {
            StatusCode::UNAUTHORIZED
        }
        TokenVerifyError::KeySetUnavailable(_) => StatusCode::BAD_GATEWAY,
        TokenVerifyError::TokenMalformed(_)
        | TokenVerifyError::AlgorithmRejected(_)
        | TokenVerifyError::SignatureInvalid
        | TokenVerifyError::ClaimInvalid(_) => StatusCode::UNAUTHORIZED,
    }
}

fn token_verify_error_response(e: TokenVerifyError) -> Response {
    let status = token_verify_error_status(&e);
    // 認証の失敗理由の詳細はクライアントに返さない
    let message = if status == StatusCode::UNAUTHORIZED {
        "Invalid access token".to_string()
    } else {
        e.to_string()
    };
    error_response(status, message)
}
