use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Strict,
    /// Signature checks are skipped and a test user stands in for a missing one.
    Development,
}

impl AuthMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" | "production" => Some(AuthMode::Strict),
            "development" | "dev" => Some(AuthMode::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl TelegramUser {
    pub fn development() -> Self {
        Self {
            id: 12_345_678,
            first_name: "Test".to_string(),
            last_name: Some("User".to_string()),
            username: Some("testuser".to_string()),
            language_code: Some("en".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub user: TelegramUser,
    pub start_param: Option<String>,
    pub auth_date: Option<i64>,
    pub raw: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InitDataError {
    #[error("Hash is missing")]
    HashMissing,
    #[error("Data verification failed")]
    VerificationFailed,
    #[error("User data is missing")]
    UserMissing,
    #[error("Malformed initData: {0}")]
    Malformed(String),
}

#[derive(Clone)]
pub struct InitDataValidator {
    bot_token: String,
    mode: AuthMode,
}

impl std::fmt::Debug for InitDataValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataValidator")
            .field("bot_token", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

impl InitDataValidator {
    pub fn new(bot_token: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            bot_token: bot_token.into(),
            mode,
        }
    }

    pub fn validate(&self, init_data: &str) -> Result<InitData, InitDataError> {
        match self.mode {
            AuthMode::Strict => self.validate_signed(init_data),
            AuthMode::Development => Ok(development_init_data(init_data)),
        }
    }

    fn validate_signed(&self, init_data: &str) -> Result<InitData, InitDataError> {
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(init_data.trim().as_bytes()) {
            fields.insert(key.into_owned(), value.into_owned());
        }
        let hash = fields
            .remove("hash")
            .filter(|hash| !hash.is_empty())
            .ok_or(InitDataError::HashMissing)?;
        let expected = hex::decode(hash.trim()).map_err(|_| InitDataError::VerificationFailed)?;

        let check_string = data_check_string(&fields);
        let mut mac = HmacSha256::new_from_slice(&secret_key(&self.bot_token))
            .map_err(|err| InitDataError::Malformed(err.to_string()))?;
        mac.update(check_string.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| InitDataError::VerificationFailed)?;

        let user = match fields.get("user") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<TelegramUser>(raw)
                .map_err(|err| InitDataError::Malformed(format!("user: {err}")))?,
            _ => return Err(InitDataError::UserMissing),
        };
        Ok(InitData {
            user,
            start_param: fields.get("start_param").cloned(),
            auth_date: fields
                .get("auth_date")
                .and_then(|value| value.trim().parse().ok()),
            raw: init_data.to_string(),
        })
    }
}

fn development_init_data(init_data: &str) -> InitData {
    let user = url::form_urlencoded::parse(init_data.trim().as_bytes())
        .find(|(key, _)| key == "user")
        .and_then(|(_, value)| serde_json::from_str::<TelegramUser>(&value).ok())
        .unwrap_or_else(TelegramUser::development);
    InitData {
        user,
        start_param: None,
        auth_date: Some(chrono::Utc::now().timestamp()),
        raw: init_data.to_string(),
    }
}

/// `key=value` pairs sorted by key, newline separated, `hash` excluded.
fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<String>>()
        .join("\n")
}

fn secret_key(bot_token: &str) -> Vec<u8> {
    hmac_sha256(WEB_APP_DATA_KEY, bot_token.as_bytes())
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Hex signature Telegram attaches to `initData` for this data-check string.
pub fn data_check_hash(bot_token: &str, data_check_string: &str) -> String {
    hex::encode(hmac_sha256(
        &secret_key(bot_token),
        data_check_string.as_bytes(),
    ))
}
