#![allow(dead_code)]

use std::time::Duration;

use aad_token_verifier::discovery::USER_AGENT;
use aad_token_verifier::{TenantSettings, TokenVerifier};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode, get_current_timestamp};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const PRIMARY_PEM: &str = include_str!("../fixtures/rsa_primary.pem");
pub const ROGUE_PEM: &str = include_str!("../fixtures/rsa_rogue.pem");
pub const PRIMARY_N: &str = "riGO01cLNglb93jcYng2omywzBFVGVZAqaGy_b3xOb2drRtub6r8KtwYwx-CvZhGwRZQVoBrxPhFaE4lA0d_gRU22W-kANQW4ERAEdPvB0lieOtWqXzycAuhX138_sDSRNxo09-qE25WB21xdKfkZp7kM-goyZCanuJjokhbUFcFkM4LCTBIh0LX41ZupDDnDGlrm7msfuRCxavJQH4ucL6GaDUnOMaGzbKVU0CFuuKWdOnjbAlh5DGeW7tDiZK9mR6P7zhcE12hYAbHzJUxJ1hqWyr2PnegHSAPdbjhmjInOuQPwrs-ZrOBK1i4OGGtZdOPF69wRLolKA5MrtGrKQ";
pub const ROGUE_N: &str = "mbgKbMZnN3lrZZwFwpRkaCnxo1vjpgaBMHsw3EJYoXosjIwTfzhWMsKyH86QwCcKTpnL0S7u5W1U-ggUpG6RQv6GtN0-7uTZBtgq64IhRlbHxY5rpdLyJ26k5flQaYWCfIF2U5PNaq8ByL3CQ3g9R5H7TmH4KdzXyK6qg20PMiGyMHST6RpWvC4s5O8r2sMbSjvC5i-x-hLBW1z6ZWuYmLrMQpovooocwfiso7wPAm7Sb98Q77XRvNhXZs1EaIRu41xD1mUaC2lmJV-r-tpYfAsyEzp1A5xMRfeOfXiWdD5JZUORtEHwUQyYM-OBqsMNr4TiX-jRt9fwf_mpM-xljw";

pub const TENANT_ID: &str = "contoso";
pub const CLIENT_ID: &str = "abc123";
pub const PRIMARY_KID: &str = "primary-key";
pub const ROTATED_KID: &str = "rotated-key";

pub fn discovery_path() -> String {
    format!("/{TENANT_ID}/v2.0/.well-known/openid-configuration")
}

pub const JWKS_PATH: &str = "/common/discovery/v2.0/keys";

/// 認証機関のURLとは異なる発行者
pub fn issuer(server: &MockServer) -> String {
    format!("{}/9188040d-6c67-4c5b-b112-36a304b66dad/v2.0", server.uri())
}

pub fn settings(server: &MockServer) -> TenantSettings {
    TenantSettings::new(TENANT_ID, CLIENT_ID, server.uri()).unwrap()
}

pub fn verifier() -> TokenVerifier {
    TokenVerifier::builder()
        .timeout(Duration::from_secs(5))
        .unwrap()
        .build()
        .unwrap()
}

pub fn discovery_body(server: &MockServer) -> Value {
    json!({
        "issuer": issuer(server),
        "jwks_uri": format!("{}{JWKS_PATH}", server.uri()),
        "authorization_endpoint": format!("{}/{TENANT_ID}/oauth2/v2.0/authorize", server.uri()),
        "id_token_signing_alg_values_supported": ["RS256"],
    })
}

/// ブラウザのUser-Agentをそのまま送っているか
///
/// `wiremock::matchers::header`は値をカンマで分割するため、カンマを含むUser-Agentは自前で比較する。
pub fn browser_user_agent(request: &Request) -> bool {
    request
        .headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        == Some(USER_AGENT)
}

pub fn discovery_mock(server: &MockServer) -> Mock {
    Mock::given(method("GET"))
        .and(path(discovery_path()))
        .and(browser_user_agent)
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(server)))
}

pub fn jwk(kid: &str, n: &str) -> Value {
    json!({"kty": "RSA", "use": "sig", "kid": kid, "n": n, "e": "AQAB"})
}

pub fn jwks_mock(keys: Vec<Value>) -> Mock {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
}

/// 有効なクレーム
pub fn claims(server: &MockServer) -> Value {
    let now = get_current_timestamp();
    json!({
        "iss": issuer(server),
        "aud": CLIENT_ID,
        "sub": "AAAAAAAAAAAAAAAAAAAAAIkzqFVrSaSaFHy782bbtaQ",
        "exp": now + 3600,
        "iat": now,
        "nbf": now,
        "name": "Megan Bowen",
        "scp": "access_as_user",
    })
}

pub fn sign(pem: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.into());
    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

pub fn primary_token(server: &MockServer) -> String {
    sign(PRIMARY_PEM, PRIMARY_KID, &claims(server))
}

/// 標準のディスカバリとJWKsのモックを登録したサーバーを起動する。
pub async fn start_server() -> MockServer {
    let server = MockServer::start().await;
    discovery_mock(&server).mount(&server).await;
    jwks_mock(vec![jwk(PRIMARY_KID, PRIMARY_N)])
        .mount(&server)
        .await;
    server
}
