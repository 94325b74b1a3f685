//! Wayfind browser bindings.
//!
//! Wires the discovery adapter to `window` events, the connection controller
//! to `localStorage`, and exposes both to page scripts as `WalletConnector`.

pub mod bus;
pub mod provider;
pub mod storage;

use futures::future::LocalBoxFuture;
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wf_connection::{ConnectOutcome, ConnectionController, ControllerConfig, ReconnectPolicy};
use wf_discovery::{DiscoveryAdapter, DiscoveryConfig, Spawner};
use wf_registry::{ObserverId, ProviderRegistry};

use bus::WindowBus;
use storage::LocalStore;

#[wasm_bindgen(start)]
pub fn start() {
    // Improve panic messages in the browser console
    console_error_panic_hook::set_once();
    // Route library `tracing` events to the browser console
    tracing_wasm::set_as_global_default();
}

pub struct WasmSpawner;

impl Spawner for WasmSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

/// Turn a thrown JS value into an error message.
pub(crate) fn js_error(value: JsValue) -> anyhow::Error {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return anyhow::anyhow!("{}", String::from(error.message()));
    }
    match value.as_string() {
        Some(message) => anyhow::anyhow!(message),
        None => anyhow::anyhow!("{value:?}"),
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

/// Returned by `onChange`; hand it back to `offChange` to stop the callbacks.
#[wasm_bindgen]
pub struct ChangeSubscription {
    registry: ObserverId,
    connection: ObserverId,
}

/// Page-facing handle: discovered wallets, the active connection, and the
/// connect/disconnect actions behind the wallet buttons.
#[wasm_bindgen]
pub struct WalletConnector {
    registry: Rc<ProviderRegistry>,
    controller: Rc<ConnectionController<LocalStore>>,
    adapter: DiscoveryAdapter<WindowBus>,
}

#[wasm_bindgen]
impl WalletConnector {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WalletConnector, JsValue> {
        let bus = WindowBus::new().map_err(|err| JsValue::from_str(&err.to_string()))?;
        let registry = Rc::new(ProviderRegistry::new());
        let controller = Rc::new(ConnectionController::new(
            Rc::clone(&registry),
            LocalStore,
            ControllerConfig::default(),
        ));
        let adapter = DiscoveryAdapter::new(
            Rc::new(bus),
            Rc::clone(&registry),
            Rc::new(WasmSpawner),
            DiscoveryConfig::default(),
        );
        adapter.add_hook(Rc::new(ReconnectPolicy::new(Rc::clone(&controller))));

        Ok(WalletConnector {
            registry,
            controller,
            adapter,
        })
    }

    /// Listen for announcements and ask installed wallets to announce.
    pub fn start(&self) -> Result<(), JsValue> {
        self.adapter
            .activate()
            .map_err(|err| JsValue::from_str(&format!("{err:#}")))
    }

    /// Stop listening and forget discovered wallets. The connection, if any,
    /// is kept.
    pub fn stop(&self) {
        self.adapter.deactivate();
    }

    /// `[{ uuid, name, icon, rdns }]` in announcement order.
    pub fn providers(&self) -> Result<JsValue, JsValue> {
        to_js(&self.registry.infos())
    }

    /// `{ status, connection, provider }`; `provider` is null when the
    /// connected wallet is no longer announced.
    pub fn connection(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.view())
    }

    #[wasm_bindgen(js_name = isConnectedTo)]
    pub fn is_connected_to(&self, uuid: &str) -> bool {
        self.controller.is_connected_to(uuid)
    }

    /// Resolves with the new connection, or `null` if a later
    /// connect/disconnect overtook this one.
    pub fn connect(&self, uuid: String) -> js_sys::Promise {
        let controller = Rc::clone(&self.controller);
        wasm_bindgen_futures::future_to_promise(async move {
            match controller.connect_by_uuid(&uuid).await {
                Ok(ConnectOutcome::Connected(connection)) => to_js(&connection),
                Ok(ConnectOutcome::Superseded) => Ok(JsValue::NULL),
                Err(err) => {
                    gloo_console::error!(format!("{err:#}"));
                    Err(js_sys::Error::new("Failed to connect to provider").into())
                }
            }
        })
    }

    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    /// Call `callback()` whenever the wallet list or connection changes.
    #[wasm_bindgen(js_name = onChange)]
    pub fn on_change(&self, callback: js_sys::Function) -> ChangeSubscription {
        let on_registry = callback.clone();
        let registry = self.registry.subscribe(move |_| {
            let _ = on_registry.call0(&JsValue::NULL);
        });
        let connection = self.controller.subscribe(move |_| {
            let _ = callback.call0(&JsValue::NULL);
        });
        ChangeSubscription { registry, connection }
    }

    /// Drop both callbacks registered by the matching `onChange`. Returns
    /// false if they were already removed.
    #[wasm_bindgen(js_name = offChange)]
    pub fn off_change(&self, subscription: ChangeSubscription) -> bool {
        let registry = self.registry.unsubscribe(subscription.registry);
        let connection = self.controller.unsubscribe(subscription.connection);
        registry && connection
    }
}
