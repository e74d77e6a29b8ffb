use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;

use crate::claims::VerifiedClaims;
use crate::discovery::DiscoveryDocument;
use crate::error::{ClaimViolation, TokenVerifyError, VerifyResult};
use crate::jwks::{KeySet, Kid};
use crate::settings::{ClientId, TenantSettings};

/// JWTのピリオドで区切られた部分の数
const JWT_PARTS_COUNT: usize = 3;

/// 許可する署名アルゴリズム
///
/// アルゴリズム混同攻撃を避けるため、Azure ADが使用するRS256のみを許可する。
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[Algorithm::RS256];

/// 検証前のJWTヘッダ
#[derive(Deserialize)]
struct UnverifiedHeader {
    alg: String,
    kid: Option<String>,
}

/// 署名を検証する前にヘッダから読み取った情報
///
/// アルゴリズムとJWK公開鍵を特定するためだけに使用する。検証が成功するまで他の用途で使用してはならない。
#[derive(Debug, PartialEq, Eq)]
pub struct InspectedToken {
    pub alg: Algorithm,
    pub kid: Kid,
}

/// トークンの構造とヘッダを確認する。
///
/// ネットワークにアクセスせずに判定できる不正なトークンを、ディスカバリの前に弾くために使う。
///
/// # Arguments
///
/// * `token` - `Bearer `を取り除いたJWT
///
/// # Returns
///
/// * ヘッダのアルゴリズムとkid、または`TokenMalformed`か`AlgorithmRejected`
pub fn inspect_token(token: &str) -> VerifyResult<InspectedToken> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != JWT_PARTS_COUNT {
        return Err(TokenVerifyError::TokenMalformed(
            format!("expected {JWT_PARTS_COUNT} segments, found {}", parts.len()).into(),
        ));
    }
    let (header, payload) = (parts[0], parts[1]);
    if header.is_empty() || payload.is_empty() {
        return Err(TokenVerifyError::TokenMalformed(
            "empty header or payload segment".into(),
        ));
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| TokenVerifyError::TokenMalformed(format!("header encoding: {e}").into()))?;
    let header: UnverifiedHeader = serde_json::from_slice(&decoded)
        .map_err(|e| TokenVerifyError::TokenMalformed(format!("header JSON: {e}").into()))?;

    // `none`のようにjsonwebtokenが知らないアルゴリズムも拒否として扱う
    let alg = match header.alg.parse::<Algorithm>() {
        Ok(alg) if ALLOWED_ALGORITHMS.contains(&alg) => alg,
        _ => return Err(TokenVerifyError::AlgorithmRejected(header.alg)),
    };
    let kid = header
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| TokenVerifyError::TokenMalformed("JWT header missing 'kid'".into()))?;

    Ok(InspectedToken { alg, kid: Kid(kid) })
}

/// 時刻に関するクレームを検証する。
///
/// `exp`は猶予なしで判定し、`exp`の時刻ちょうどのトークンは期限切れとする。
/// `nbf`と`iat`は`clock_skew`だけ未来にずれることを許容する。
///
/// # Arguments
///
/// * `claims` - 署名検証済みのクレーム
/// * `now` - 現在のUnix時刻（秒）
/// * `clock_skew` - 許容する時刻のずれ
pub fn validate_time_claims(
    claims: &VerifiedClaims,
    now: u64,
    clock_skew: Duration,
) -> Result<(), ClaimViolation> {
    let skew = clock_skew.as_secs();
    if now >= claims.exp {
        return Err(ClaimViolation::Expired);
    }
    if let Some(nbf) = claims.nbf
        && nbf > now.saturating_add(skew)
    {
        return Err(ClaimViolation::NotYetValid);
    }
    if claims.iat > now.saturating_add(skew) {
        return Err(ClaimViolation::IssuedInFuture);
    }
    Ok(())
}

/// トークン検証者
///
/// 発行者、購読者、許可するアルゴリズムおよび鍵セットをまとめたもの。構築後は変更しない。
pub struct Verifier {
    /// ディスカバリで得た発行者
    issuer: String,
    /// 期待する購読者
    audience: ClientId,
    /// 許可する署名アルゴリズム
    algorithms: Vec<Algorithm>,
    /// JWK公開鍵セット
    key_set: Arc<dyn KeySet>,
    /// `nbf`と`iat`に許容する時刻のずれ
    clock_skew: Duration,
}

impl Verifier {
    /// ディスカバリの結果とテナント設定から検証者を構築する。I/Oは行わない。
    ///
    /// 発行者はテナント設定から導出せず、ディスカバリで得た値を使う。Azure ADの発行者は認証機関の
    /// URLと一致しないことがある。
    ///
    /// # Arguments
    ///
    /// * `document` - ディスカバリの結果
    /// * `settings` - テナント設定
    /// * `key_set` - `document.jwks_uri`の鍵セット
    /// * `clock_skew` - `nbf`と`iat`に許容する時刻のずれ
    pub fn build(
        document: &DiscoveryDocument,
        settings: &TenantSettings,
        key_set: Arc<dyn KeySet>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            issuer: document.issuer.clone(),
            audience: settings.client_id().clone(),
            algorithms: ALLOWED_ALGORITHMS.to_vec(),
            key_set,
            clock_skew,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &ClientId {
        &self.audience
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.algorithms = self.algorithms.clone();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // 時刻のクレームは`validate_time_claims`で検証する
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation
    }

    /// トークンを検証して、クレームを返す。
    ///
    /// # Arguments
    ///
    /// * `token` - `Bearer `を取り除いたJWT
    ///
    /// # Returns
    ///
    /// * 検証に成功した場合はクレーム。失敗した場合、クレームは一切返さない。
    pub async fn verify(&self, token: &str) -> VerifyResult<VerifiedClaims> {
        let inspected = inspect_token(token)?;
        if !self.algorithms.contains(&inspected.alg) {
            return Err(TokenVerifyError::AlgorithmRejected(format!(
                "{:?}",
                inspected.alg
            )));
        }

        let decoding_key = self.key_set.decoding_key(&inspected.kid).await?;
        let token_data = decode::<VerifiedClaims>(token, &decoding_key, &self.validation(inspected.alg))
            .map_err(|e| TokenVerifyError::from_jwt_error(e, &inspected.kid))?;

        validate_time_claims(
            &token_data.claims,
            jsonwebtoken::get_current_timestamp(),
            self.clock_skew,
        )
        .map_err(TokenVerifyError::ClaimInvalid)?;

        tracing::debug!(kid = %inspected.kid, "Token verified");
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use jsonwebtoken::{DecodingKey, EncodingKey, Header, encode};
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::error::KeySetError;

    const PRIMARY_PEM: &str = include_str!("../tests/fixtures/rsa_primary.pem");
    const ROGUE_PEM: &str = include_str!("../tests/fixtures/rsa_rogue.pem");
    const PRIMARY_N: &str = "riGO01cLNglb93jcYng2omywzBFVGVZAqaGy_b3xOb2drRtub6r8KtwYwx-CvZhGwRZQVoBrxPhFaE4lA0d_gRU22W-kANQW4ERAEdPvB0lieOtWqXzycAuhX138_sDSRNxo09-qE25WB21xdKfkZp7kM-goyZCanuJjokhbUFcFkM4LCTBIh0LX41ZupDDnDGlrm7msfuRCxavJQH4ucL6GaDUnOMaGzbKVU0CFuuKWdOnjbAlh5DGeW7tDiZK9mR6P7zhcE12hYAbHzJUxJ1hqWyr2PnegHSAPdbjhmjInOuQPwrs-ZrOBK1i4OGGtZdOPF69wRLolKA5MrtGrKQ";
    const KID: &str = "test-key-01";
    const ISSUER: &str = "https://login.microsoftonline.com/9188040d-6c67-4c5b-b112-36a304b66dad/v2.0";
    const CLIENT_ID: &str = "abc123";

    /// ネットワークを使わない鍵セット
    struct StaticKeySet(HashMap<Kid, DecodingKey>);

    #[async_trait::async_trait]
    impl KeySet for StaticKeySet {
        async fn decoding_key(&self, kid: &Kid) -> Result<DecodingKey, KeySetError> {
            self.0
                .get(kid)
                .cloned()
                .ok_or_else(|| KeySetError::KeyNotFound(kid.clone()))
        }
    }

    fn verifier() -> Verifier {
        let key = DecodingKey::from_rsa_components(PRIMARY_N, "AQAB").unwrap();
        let key_set = StaticKeySet(HashMap::from([(Kid(KID.into()), key)]));
        let document = DiscoveryDocument {
            issuer: ISSUER.into(),
            jwks_uri: Url::parse("https://login.microsoftonline.com/contoso/discovery/v2.0/keys")
                .unwrap(),
        };
        let settings =
            TenantSettings::new("contoso", CLIENT_ID, "https://login.microsoftonline.com/")
                .unwrap();
        Verifier::build(&document, &settings, Arc::new(key_set), Duration::from_secs(300))
    }

    fn payload() -> serde_json::Value {
        let now = jsonwebtoken::get_current_timestamp();
        json!({
            "iss": ISSUER,
            "aud": CLIENT_ID,
            "sub": "user-1",
            "exp": now + 3600,
            "iat": now,
            "nbf": now,
            "tid": "9188040d-6c67-4c5b-b112-36a304b66dad"
        })
    }

    fn sign(pem: &str, kid: &str, payload: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.into());
        encode(&header, payload, &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap()).unwrap()
    }

    fn encode_segment(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn claims_at(exp: u64, iat: u64, nbf: Option<u64>) -> VerifiedClaims {
        VerifiedClaims {
            iss: ISSUER.into(),
            aud: crate::claims::Audience::Single(CLIENT_ID.into()),
            sub: "user-1".into(),
            exp,
            iat,
            nbf,
            additional: HashMap::new(),
        }
    }

    #[test]
    fn inspect_rejects_wrong_segment_count() {
        for token in ["", "single", "only.two", "a.b.c.d"] {
            assert!(
                matches!(inspect_token(token), Err(TokenVerifyError::TokenMalformed(_))),
                "expected TokenMalformed for {token:?}"
            );
        }
    }

    #[test]
    fn inspect_rejects_undecodable_header() {
        assert!(matches!(
            inspect_token("!!!.payload.signature"),
            Err(TokenVerifyError::TokenMalformed(_))
        ));
        let header = URL_SAFE_NO_PAD.encode("not json");
        assert!(matches!(
            inspect_token(&format!("{header}.payload.signature")),
            Err(TokenVerifyError::TokenMalformed(_))
        ));
    }

    #[test]
    fn inspect_rejects_disallowed_algorithms() {
        for alg in ["none", "HS256", "RS512", "ES256", "PS256"] {
            let header = encode_segment(json!({"alg": alg, "kid": KID}));
            let token = format!("{header}.{}.", encode_segment(payload()));
            assert!(
                matches!(
                    inspect_token(&token),
                    Err(TokenVerifyError::AlgorithmRejected(rejected)) if rejected == alg
                ),
                "expected AlgorithmRejected for {alg}"
            );
        }
    }

    #[test]
    fn inspect_requires_kid() {
        let header = encode_segment(json!({"alg": "RS256", "typ": "JWT"}));
        let token = format!("{header}.{}.sig", encode_segment(payload()));
        assert!(matches!(
            inspect_token(&token),
            Err(TokenVerifyError::TokenMalformed(_))
        ));
    }

    #[test]
    fn inspect_reads_alg_and_kid() {
        let token = sign(PRIMARY_PEM, KID, &payload());
        assert_eq!(
            inspect_token(&token).unwrap(),
            InspectedToken {
                alg: Algorithm::RS256,
                kid: Kid(KID.into())
            }
        );
    }

    #[test]
    fn token_at_expiry_instant_is_expired() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);
        assert_eq!(
            validate_time_claims(&claims_at(now, now - 60, None), now, skew),
            Err(ClaimViolation::Expired)
        );
        assert_eq!(
            validate_time_claims(&claims_at(now + 1, now - 60, None), now, skew),
            Ok(())
        );
    }

    #[test]
    fn not_before_and_issued_at_allow_clock_skew() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);
        let exp = now + 3600;
        assert_eq!(
            validate_time_claims(&claims_at(exp, now, Some(now + 300)), now, skew),
            Ok(())
        );
        assert_eq!(
            validate_time_claims(&claims_at(exp, now, Some(now + 301)), now, skew),
            Err(ClaimViolation::NotYetValid)
        );
        assert_eq!(
            validate_time_claims(&claims_at(exp, now + 301, None), now, skew),
            Err(ClaimViolation::IssuedInFuture)
        );
    }

    #[tokio::test]
    async fn verifies_valid_token() {
        let payload = payload();
        let token = sign(PRIMARY_PEM, KID, &payload);
        let claims = verifier().verify(&token).await.unwrap();
        assert_eq!(serde_json::to_value(&claims).unwrap(), payload);
    }

    #[tokio::test]
    async fn rejects_signature_from_untrusted_key() {
        let token = sign(ROGUE_PEM, KID, &payload());
        assert!(matches!(
            verifier().verify(&token).await,
            Err(TokenVerifyError::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn rejects_hs256_even_with_valid_mac() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KID.into());
        let token = encode(&header, &payload(), &EncodingKey::from_secret(PRIMARY_N.as_bytes()))
            .unwrap();
        assert!(matches!(
            verifier().verify(&token).await,
            Err(TokenVerifyError::AlgorithmRejected(alg)) if alg == "HS256"
        ));
    }

    #[tokio::test]
    async fn rejects_wrong_audience_and_issuer() {
        let mut wrong_aud = payload();
        wrong_aud["aud"] = json!(["someone-else"]);
        assert!(matches!(
            verifier().verify(&sign(PRIMARY_PEM, KID, &wrong_aud)).await,
            Err(TokenVerifyError::ClaimInvalid(ClaimViolation::AudienceMismatch))
        ));

        let mut wrong_iss = payload();
        wrong_iss["iss"] = json!("https://login.microsoftonline.com/contoso/v2.0");
        assert!(matches!(
            verifier().verify(&sign(PRIMARY_PEM, KID, &wrong_iss)).await,
            Err(TokenVerifyError::ClaimInvalid(ClaimViolation::IssuerMismatch))
        ));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let mut expired = payload();
        let now = jsonwebtoken::get_current_timestamp();
        expired["iat"] = json!(now - 7200);
        expired["nbf"] = json!(now - 7200);
        expired["exp"] = json!(now - 10);
        assert!(matches!(
            verifier().verify(&sign(PRIMARY_PEM, KID, &expired)).await,
            Err(TokenVerifyError::ClaimInvalid(ClaimViolation::Expired))
        ));
    }

    #[tokio::test]
    async fn unknown_kid_is_key_unavailable() {
        let token = sign(PRIMARY_PEM, "rotated-away", &payload());
        assert!(matches!(
            verifier().verify(&token).await,
            Err(TokenVerifyError::KeySetUnavailable(KeySetError::KeyNotFound(kid))) if kid.0 == "rotated-away"
        ));
    }
}
