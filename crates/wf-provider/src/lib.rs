use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use wf_api_types::{ETH_CHAIN_ID, ETH_REQUEST_ACCOUNTS, ProviderInfo, parse_chain_id};

/// The request interface a wallet extension injects into the page.
///
/// Handles are owned by the extension; this crate only holds shared
/// references to them. A `request` may stay pending for as long as the user
/// leaves the approval prompt open.
#[async_trait(?Send)]
pub trait ProviderHandle {
    async fn request(&self, method: &str, params: Option<Vec<Value>>) -> Result<Value>;
}

/// A validated announcement: identity plus the handle it came with.
#[derive(Clone)]
pub struct ProviderEntry {
    pub info: ProviderInfo,
    pub provider: Rc<dyn ProviderHandle>,
}

impl ProviderEntry {
    pub fn new(info: ProviderInfo, provider: Rc<dyn ProviderHandle>) -> Self {
        Self { info, provider }
    }

    pub fn uuid(&self) -> &str {
        &self.info.uuid
    }

    pub fn rdns(&self) -> &str {
        &self.info.rdns
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// `eth_requestAccounts`: prompts the user and returns the authorized accounts.
pub async fn request_accounts(provider: &dyn ProviderHandle) -> Result<Vec<String>> {
    let value = provider
        .request(ETH_REQUEST_ACCOUNTS, None)
        .await
        .context("eth_requestAccounts")?;

    let Value::Array(items) = value else {
        return Err(anyhow!("eth_requestAccounts returned a non-array result: {value}"));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(account) => Ok(account),
            other => Err(anyhow!("eth_requestAccounts returned a non-string account: {other}")),
        })
        .collect()
}

/// `eth_chainId`, converted to an integer.
pub async fn request_chain_id(provider: &dyn ProviderHandle) -> Result<u64> {
    let value = provider
        .request(ETH_CHAIN_ID, None)
        .await
        .context("eth_chainId")?;

    Ok(parse_chain_id(&value)?)
}
