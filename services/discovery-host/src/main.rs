use anyhow::{Context, Result};
use serde_json::json;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};
use wf_connection::{
    ConnectOutcome, ConnectionController, ControllerConfig, ReconnectPolicy,
};
use wf_discovery::{DiscoveryAdapter, DiscoveryConfig, InProcessBus, TokioSpawner};
use wf_provider_sim::SimulatedWallet;
use wf_registry::{ProviderRegistry, RegistryEvent};
use wf_storage::{KeyValueStore, RocksDbStore};

const DEFAULT_DB_PATH: &str = "./data/wayfind";
const LATE_EXTENSION_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostConfig {
    db_path: String,
    connect_rdns: Option<String>,
    disconnect: bool,
}

impl HostConfig {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("WAYFIND_DB_PATH")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_owned());
        let connect_rdns = lookup("WAYFIND_CONNECT_RDNS").filter(|value| !value.trim().is_empty());
        let disconnect = lookup("WAYFIND_DISCONNECT")
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            db_path,
            connect_rdns,
            disconnect,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = HostConfig::from_env();
    let store = RocksDbStore::open_default(&config.db_path)?;

    let local = tokio::task::LocalSet::new();
    local.run_until(run(config, store)).await
}

/// Play the page: discover the simulated wallets, reconnect to the one the
/// store remembers, optionally connect or disconnect on request.
async fn run<S: KeyValueStore + 'static>(config: HostConfig, store: S) -> Result<()> {
    let discovery = DiscoveryConfig::from_env();
    let bus = Rc::new(InProcessBus::new());
    let registry = Rc::new(ProviderRegistry::new());
    let controller = Rc::new(ConnectionController::new(
        Rc::clone(&registry),
        store,
        ControllerConfig::from_env(),
    ));
    let adapter = DiscoveryAdapter::new(
        Rc::clone(&bus),
        Rc::clone(&registry),
        Rc::new(TokioSpawner),
        discovery.clone(),
    );
    adapter.add_hook(Rc::new(ReconnectPolicy::new(Rc::clone(&controller))));

    registry.subscribe(|event| match event {
        RegistryEvent::Added(info) => info!(name = %info.name, rdns = %info.rdns, uuid = %info.uuid, "wallet available"),
        RegistryEvent::Replaced(info) => debug!(rdns = %info.rdns, "wallet re-announced"),
        RegistryEvent::Cleared => debug!("wallet list cleared"),
    });
    controller.subscribe(|state| debug!(?state, "connection state changed"));

    if let Some(rdns) = controller.persisted_rdns() {
        info!(%rdns, "previously connected wallet remembered");
    }

    // Injected before the page script runs; answers the request broadcast.
    let metamask = Rc::new(
        SimulatedWallet::new("MetaMask", "io.metamask")
            .with_accounts(&["0x71C7656EC7ab88b098defB751B7401B5f6d8976F"])
            .with_chain_id(json!("0x1")),
    );
    metamask.install(&bus, &discovery);

    adapter.activate().context("start provider discovery")?;

    // An extension that finishes starting after the request went out.
    tokio::time::sleep(LATE_EXTENSION_DELAY).await;
    let rabby = Rc::new(
        SimulatedWallet::new("Rabby Wallet", "io.rabby")
            .with_accounts(&["0x2546BcD3c84621e976D8185a91A922aE77ECEc30"])
            .with_chain_id(json!("0x89")),
    );
    rabby.install(&bus, &discovery);
    tokio::time::sleep(LATE_EXTENSION_DELAY).await;

    if let Some(rdns) = config.connect_rdns.as_deref() {
        match registry.find_by_rdns(rdns) {
            Some(entry) => match controller.connect(&entry).await {
                Ok(ConnectOutcome::Connected(connection)) => {
                    info!(provider = %connection.provider_uuid, "connected on request")
                }
                Ok(ConnectOutcome::Superseded) => debug!("connect request superseded"),
                Err(err) => warn!(error = %err, "connect request failed"),
            },
            None => warn!(%rdns, "no announced wallet with that rdns"),
        }
    }

    let view = controller.view();
    match (&view.connection, &view.provider) {
        (Some(connection), Some(provider)) => info!(
            wallet = %provider.name,
            chain_id = connection.chain_id,
            accounts = ?connection.accounts,
            "connected"
        ),
        (Some(connection), None) => info!(provider = %connection.provider_uuid, "connected to a wallet no longer announced"),
        _ => info!(wallets = registry.len(), "not connected"),
    }

    if config.disconnect {
        controller.disconnect();
    }

    adapter.deactivate();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wf_api_types::PREVIOUSLY_CONNECTED_PROVIDER_RDNS;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn host_config_defaults_and_overrides() {
        assert_eq!(
            HostConfig::from_lookup(lookup(&[])),
            HostConfig {
                db_path: DEFAULT_DB_PATH.to_owned(),
                connect_rdns: None,
                disconnect: false,
            }
        );

        let config = HostConfig::from_lookup(lookup(&[
            ("WAYFIND_DB_PATH", "/tmp/wayfind"),
            ("WAYFIND_CONNECT_RDNS", "io.rabby"),
            ("WAYFIND_DISCONNECT", "TRUE"),
        ]));
        assert_eq!(config.db_path, "/tmp/wayfind");
        assert_eq!(config.connect_rdns.as_deref(), Some("io.rabby"));
        assert!(config.disconnect);
    }

    fn config(db_path: &str, connect: Option<&str>, disconnect: bool) -> HostConfig {
        HostConfig {
            db_path: db_path.to_owned(),
            connect_rdns: connect.map(str::to_owned),
            disconnect,
        }
    }

    #[tokio::test]
    async fn remembered_wallet_survives_restart_until_disconnect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db");
        let path = path.to_str().expect("utf-8 temp path");
        let local = tokio::task::LocalSet::new();

        local
            .run_until(async {
                run(config(path, Some("io.rabby"), false), RocksDbStore::open_default(path)?).await?;
                let store = RocksDbStore::open_default(path)?;
                assert_eq!(
                    store.get(PREVIOUSLY_CONNECTED_PROVIDER_RDNS)?.as_deref(),
                    Some("io.rabby")
                );
                drop(store);

                run(config(path, None, true), RocksDbStore::open_default(path)?).await?;
                let store = RocksDbStore::open_default(path)?;
                assert_eq!(store.get(PREVIOUSLY_CONNECTED_PROVIDER_RDNS)?, None);
                Ok::<(), anyhow::Error>(())
            })
            .await
    }
}
