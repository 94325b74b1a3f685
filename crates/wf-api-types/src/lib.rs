use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Broadcast by the page to ask installed wallets to announce themselves.
pub const EIP6963_REQUEST_PROVIDER: &str = "eip6963:requestProvider";
/// Broadcast by each wallet extension, carrying `{ info, provider }`.
pub const EIP6963_ANNOUNCE_PROVIDER: &str = "eip6963:announceProvider";

pub const PREVIOUSLY_CONNECTED_PROVIDER_RDNS: &str = "PREVIOUSLY_CONNECTED_PROVIDER_RDNS";

pub const ETH_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
pub const ETH_CHAIN_ID: &str = "eth_chainId";

/// Validated identity of an announced provider. All fields are non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

/// Identity fields exactly as they arrive on the bus, before validation.
///
/// Wallets are third-party code, so every field is optional and loosely typed
/// here; [`RawProviderInfo::validate`] is the only way to obtain a
/// [`ProviderInfo`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawProviderInfo {
    #[serde(default)]
    pub uuid: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub icon: Option<Value>,
    #[serde(default)]
    pub rdns: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid eip6963 provider info received: missing `{field}`")]
pub struct MalformedAnnouncement {
    pub field: &'static str,
}

impl RawProviderInfo {
    pub fn new(uuid: &str, name: &str, icon: &str, rdns: &str) -> Self {
        Self {
            uuid: Some(Value::String(uuid.to_owned())),
            name: Some(Value::String(name.to_owned())),
            icon: Some(Value::String(icon.to_owned())),
            rdns: Some(Value::String(rdns.to_owned())),
        }
    }

    pub fn validate(&self) -> Result<ProviderInfo, MalformedAnnouncement> {
        let icon = required(&self.icon, "icon")?;
        let rdns = required(&self.rdns, "rdns")?;
        let uuid = required(&self.uuid, "uuid")?;
        let name = required(&self.name, "name")?;

        Ok(ProviderInfo {
            uuid,
            name,
            icon,
            rdns,
        })
    }
}

fn required(value: &Option<Value>, field: &'static str) -> Result<String, MalformedAnnouncement> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Ok(text.clone()),
        _ => Err(MalformedAnnouncement { field }),
    }
}

impl From<ProviderInfo> for RawProviderInfo {
    fn from(info: ProviderInfo) -> Self {
        Self::new(&info.uuid, &info.name, &info.icon, &info.rdns)
    }
}

/// The single active authorized session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(rename = "providerUUID")]
    pub provider_uuid: String,
    pub accounts: Vec<String>,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainIdError {
    #[error("chain id is not a number: {0}")]
    NotNumeric(String),
    #[error("chain id out of range: {0}")]
    OutOfRange(String),
}

/// Convert an `eth_chainId` result into an integer.
///
/// Wallets answer with a `0x` hex quantity, but some return a decimal string
/// or a bare JSON number.
pub fn parse_chain_id(value: &Value) -> Result<u64, ChainIdError> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| ChainIdError::OutOfRange(number.to_string())),
        Value::String(text) => parse_chain_id_str(text),
        other => Err(ChainIdError::NotNumeric(other.to_string())),
    }
}

fn parse_chain_id_str(text: &str) -> Result<u64, ChainIdError> {
    let trimmed = text.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"));

    let parsed = match hex {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => trimmed.parse::<u64>(),
    };

    parsed.map_err(|err| match err.kind() {
        std::num::IntErrorKind::PosOverflow => ChainIdError::OutOfRange(text.to_owned()),
        _ => ChainIdError::NotNumeric(text.to_owned()),
    })
}
