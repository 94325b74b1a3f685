//! Scriptable stand-in for an injected browser wallet.
//!
//! Answers the two RPC methods the connector uses and can hold the account
//! request open, the way an extension does while its approval popup is up.

use anyhow::Result;
use async_trait::async_trait;
use futures::channel::oneshot;
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use wf_api_types::{ETH_CHAIN_ID, ETH_REQUEST_ACCOUNTS, ProviderInfo, RawProviderInfo};
use wf_discovery::{AnnounceEvent, DiscoveryConfig, InProcessBus};
use wf_provider::ProviderHandle;

/// EIP-1193 provider error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
}

impl ProviderRpcError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNSUPPORTED_METHOD: i64 = 4200;

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self {
            code: Self::USER_REJECTED,
            message: message.into(),
        }
    }
}

/// How the wallet answers `eth_requestAccounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Reject,
    /// Hold the request until [`SimulatedWallet::approve_pending`] or
    /// [`SimulatedWallet::reject_pending`].
    Manual,
}

pub struct SimulatedWallet {
    info: ProviderInfo,
    accounts: RefCell<Vec<String>>,
    chain_id: RefCell<Value>,
    approval: RefCell<Approval>,
    chain_id_fails: Cell<bool>,
    pending: RefCell<Vec<oneshot::Sender<bool>>>,
    calls: RefCell<Vec<String>>,
}

impl SimulatedWallet {
    /// A wallet with a fresh per-injection uuid.
    pub fn new(name: &str, rdns: &str) -> Self {
        Self::with_uuid(&Uuid::new_v4().to_string(), name, rdns)
    }

    pub fn with_uuid(uuid: &str, name: &str, rdns: &str) -> Self {
        let icon = format!(
            "data:image/svg+xml,<svg xmlns='http://www.w3.org/2000/svg'><text>{}</text></svg>",
            name.chars().next().unwrap_or('?')
        );
        Self {
            info: ProviderInfo {
                uuid: uuid.to_owned(),
                name: name.to_owned(),
                icon,
                rdns: rdns.to_owned(),
            },
            accounts: RefCell::new(vec!["0x0000000000000000000000000000000000000001".to_owned()]),
            chain_id: RefCell::new(json!("0x1")),
            approval: RefCell::new(Approval::Approve),
            chain_id_fails: Cell::new(false),
            pending: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_accounts(self, accounts: &[&str]) -> Self {
        *self.accounts.borrow_mut() = accounts.iter().map(|a| (*a).to_owned()).collect();
        self
    }

    pub fn with_chain_id(self, chain_id: Value) -> Self {
        *self.chain_id.borrow_mut() = chain_id;
        self
    }

    pub fn with_approval(self, approval: Approval) -> Self {
        *self.approval.borrow_mut() = approval;
        self
    }

    pub fn set_approval(&self, approval: Approval) {
        *self.approval.borrow_mut() = approval;
    }

    pub fn fail_chain_id(&self, fails: bool) {
        self.chain_id_fails.set(fails);
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    pub fn announcement(self: &Rc<Self>) -> AnnounceEvent {
        AnnounceEvent {
            info: RawProviderInfo::from(self.info.clone()),
            provider: self.clone(),
        }
    }

    pub fn announce(self: &Rc<Self>, bus: &InProcessBus, config: &DiscoveryConfig) {
        bus.announce(&config.announce_event, self.announcement());
    }

    /// Announce now and again on every request broadcast, like an extension
    /// content script does.
    pub fn install(self: &Rc<Self>, bus: &Rc<InProcessBus>, config: &DiscoveryConfig) {
        let wallet: Weak<Self> = Rc::downgrade(self);
        let target = Rc::downgrade(bus);
        let announce_event = config.announce_event.clone();
        bus.on_request(&config.request_event, move || {
            if let (Some(wallet), Some(bus)) = (wallet.upgrade(), target.upgrade()) {
                bus.announce(&announce_event, wallet.announcement());
            }
        });
        self.announce(bus, config);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn pending_approvals(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn approve_pending(&self) {
        self.resolve_pending(true);
    }

    pub fn reject_pending(&self) {
        self.resolve_pending(false);
    }

    fn resolve_pending(&self, approved: bool) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for sender in pending {
            let _ = sender.send(approved);
        }
    }

    async fn request_accounts(&self) -> Result<Value> {
        let approval = self.approval.borrow().clone();
        let approved = match approval {
            Approval::Approve => true,
            Approval::Reject => false,
            Approval::Manual => {
                let (sender, receiver) = oneshot::channel();
                self.pending.borrow_mut().push(sender);
                debug!(rdns = %self.info.rdns, "account request awaiting approval");
                receiver.await.unwrap_or(false)
            }
        };

        if !approved {
            return Err(ProviderRpcError::user_rejected("User rejected the request.").into());
        }
        Ok(Value::from(self.accounts.borrow().clone()))
    }
}

#[async_trait(?Send)]
impl ProviderHandle for SimulatedWallet {
    async fn request(&self, method: &str, _params: Option<Vec<Value>>) -> Result<Value> {
        self.calls.borrow_mut().push(method.to_owned());
        match method {
            ETH_REQUEST_ACCOUNTS => self.request_accounts().await,
            ETH_CHAIN_ID if self.chain_id_fails.get() => Err(ProviderRpcError {
                code: -32603,
                message: "Internal JSON-RPC error.".to_owned(),
            }
            .into()),
            ETH_CHAIN_ID => Ok(self.chain_id.borrow().clone()),
            other => Err(ProviderRpcError {
                code: ProviderRpcError::UNSUPPORTED_METHOD,
                message: format!("method {other} is not supported"),
            }
            .into()),
        }
    }
}
