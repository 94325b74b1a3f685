use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};
use wf_api_types::{Connection, PREVIOUSLY_CONNECTED_PROVIDER_RDNS, ProviderInfo};
use wf_provider::{ProviderEntry, request_accounts, request_chain_id};
use wf_registry::{ObserverId, Observers, ProviderRegistry};
use wf_storage::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub storage_key: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            storage_key: PREVIOUSLY_CONNECTED_PROVIDER_RDNS.to_owned(),
        }
    }
}

impl ControllerConfig {
    pub fn new(storage_key: Option<String>) -> Self {
        let storage_key = storage_key
            .or_else(|| std::env::var("WAYFIND_STORAGE_KEY").ok())
            .unwrap_or_else(|| PREVIOUSLY_CONNECTED_PROVIDER_RDNS.to_owned());
        Self { storage_key }
    }

    pub fn from_env() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { provider_uuid: String },
    Connected(Connection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting { .. } => ConnectionStatus::Connecting,
            Self::Connected(_) => ConnectionStatus::Connected,
        }
    }
}

/// What the connected-account panel renders.
///
/// `provider` is `None` when the connected uuid is no longer in the
/// registry (extension removed, or discovery restarted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionView {
    pub status: ConnectionStatus,
    pub connection: Option<Connection>,
    pub provider: Option<ProviderInfo>,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no announced provider with uuid {uuid}")]
    UnknownProvider { uuid: String },
    #[error("failed to connect to provider {rdns}: account request failed")]
    AccountsRejected {
        rdns: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to connect to provider {rdns}: no accounts authorized")]
    NoAccounts { rdns: String },
    #[error("failed to connect to provider {rdns}: chain id unavailable")]
    ChainIdFailed {
        rdns: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(Connection),
    /// A later `connect` or `disconnect` happened while this attempt was
    /// waiting on the wallet; its result was dropped.
    Superseded,
}

/// Owns the one active connection.
///
/// Every `connect` and `disconnect` bumps a generation counter; an attempt
/// only commits if the generation it captured is still current when the
/// wallet answers. There is no extension-side revoke, so `disconnect` is
/// purely local and the wallet may still consider the page authorized.
pub struct ConnectionController<S: KeyValueStore> {
    registry: Rc<ProviderRegistry>,
    store: S,
    config: ControllerConfig,
    state: RefCell<ConnectionState>,
    // Last committed connection, held aside while an attempt is in flight.
    previous: RefCell<Option<Connection>>,
    generation: Cell<u64>,
    observers: Observers<ConnectionState>,
}

impl<S: KeyValueStore> ConnectionController<S> {
    pub fn new(registry: Rc<ProviderRegistry>, store: S, config: ControllerConfig) -> Self {
        Self {
            registry,
            store,
            config,
            state: RefCell::new(ConnectionState::Disconnected),
            previous: RefCell::new(None),
            generation: Cell::new(0),
            observers: Observers::default(),
        }
    }

    pub async fn connect(&self, entry: &ProviderEntry) -> Result<ConnectOutcome, ConnectError> {
        let generation = self.begin_attempt(entry.uuid());
        info!(uuid = %entry.uuid(), rdns = %entry.rdns(), "connecting to provider");

        let session = establish(entry).await;

        if generation != self.generation.get() {
            debug!(uuid = %entry.uuid(), "discarding stale connect resolution");
            return Ok(ConnectOutcome::Superseded);
        }

        match session {
            Ok((accounts, chain_id)) => {
                let connection = Connection {
                    provider_uuid: entry.uuid().to_owned(),
                    accounts,
                    chain_id,
                };
                self.previous.borrow_mut().take();
                if let Err(err) = self.store.set(&self.config.storage_key, entry.rdns()) {
                    warn!(error = %err, rdns = %entry.rdns(), "failed to persist connected provider");
                }
                self.transition(ConnectionState::Connected(connection.clone()));
                info!(
                    uuid = %connection.provider_uuid,
                    chain_id = connection.chain_id,
                    accounts = connection.accounts.len(),
                    "provider connected"
                );
                Ok(ConnectOutcome::Connected(connection))
            }
            Err(err) => {
                let restored = self.previous.borrow_mut().take();
                self.transition(match restored {
                    Some(connection) => ConnectionState::Connected(connection),
                    None => ConnectionState::Disconnected,
                });
                warn!(error = %err, "provider connection failed");
                Err(err)
            }
        }
    }

    pub async fn connect_by_uuid(&self, uuid: &str) -> Result<ConnectOutcome, ConnectError> {
        let entry = self
            .registry
            .get(uuid)
            .ok_or_else(|| ConnectError::UnknownProvider {
                uuid: uuid.to_owned(),
            })?;
        self.connect(&entry).await
    }

    /// Drop the connection and forget the persisted provider. Always
    /// succeeds, including while an attempt is in flight.
    pub fn disconnect(&self) {
        self.generation.set(self.generation.get() + 1);
        self.previous.borrow_mut().take();
        if let Err(err) = self.store.delete(&self.config.storage_key) {
            warn!(error = %err, "failed to forget persisted provider");
        }
        self.transition(ConnectionState::Disconnected);
        info!("provider disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status()
    }

    /// The provider an unresolved attempt is waiting on.
    pub fn connecting_to(&self) -> Option<String> {
        match &*self.state.borrow() {
            ConnectionState::Connecting { provider_uuid } => Some(provider_uuid.clone()),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<Connection> {
        match &*self.state.borrow() {
            ConnectionState::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    pub fn is_connected_to(&self, uuid: &str) -> bool {
        matches!(
            &*self.state.borrow(),
            ConnectionState::Connected(connection) if connection.provider_uuid == uuid
        )
    }

    pub fn view(&self) -> ConnectionView {
        let state = self.state();
        let connection = match &state {
            ConnectionState::Connected(connection) => Some(connection.clone()),
            _ => None,
        };
        let provider = connection
            .as_ref()
            .and_then(|c| self.registry.get(&c.provider_uuid))
            .map(|entry| entry.info);

        ConnectionView {
            status: state.status(),
            connection,
            provider,
        }
    }

    /// The rdns remembered from the last successful connect, if any.
    pub fn persisted_rdns(&self) -> Option<String> {
        match self.store.get(&self.config.storage_key) {
            Ok(value) => value.filter(|rdns| !rdns.is_empty()),
            Err(err) => {
                warn!(error = %err, "failed to read persisted provider");
                None
            }
        }
    }

    pub fn registry(&self) -> &Rc<ProviderRegistry> {
        &self.registry
    }

    pub fn subscribe(&self, callback: impl Fn(&ConnectionState) + 'static) -> ObserverId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn begin_attempt(&self, uuid: &str) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let prior = self.state.replace(ConnectionState::Connecting {
            provider_uuid: uuid.to_owned(),
        });
        if let ConnectionState::Connected(connection) = prior {
            *self.previous.borrow_mut() = Some(connection);
        }

        self.observers.notify(&self.state());
        generation
    }

    fn transition(&self, next: ConnectionState) {
        *self.state.borrow_mut() = next;
        self.observers.notify(&self.state());
    }
}

async fn establish(entry: &ProviderEntry) -> Result<(Vec<String>, u64), ConnectError> {
    let rdns = entry.rdns().to_owned();

    let accounts = request_accounts(&*entry.provider)
        .await
        .map_err(|source| ConnectError::AccountsRejected {
            rdns: rdns.clone(),
            source,
        })?;
    if accounts.is_empty() {
        return Err(ConnectError::NoAccounts { rdns });
    }

    let chain_id = request_chain_id(&*entry.provider)
        .await
        .map_err(|source| ConnectError::ChainIdFailed {
            rdns: rdns.clone(),
            source,
        })?;

    Ok((accounts, chain_id))
}
