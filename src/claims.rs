use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// トークンの`aud`
///
/// 単一の文字列、または文字列の配列のどちらも許可されている。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// 指定した購読者を含むかどうか
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// 検証に成功したトークンのクレーム
///
/// 標準クレーム以外（`oid`、`tid`、`scp`、`roles`など）は`additional`にそのまま保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl VerifiedClaims {
    /// 標準クレーム以外のクレームを取得する。
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.additional.get(name)
    }
}
