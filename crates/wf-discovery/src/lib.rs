//! Page side of the EIP-6963 discovery handshake.
//!
//! The adapter subscribes to announce broadcasts, fires one request
//! broadcast, and from then on accepts announcements for as long as it is
//! active. The protocol has no "all providers answered" signal, so nothing
//! here waits for completion.

pub mod bus;

use anyhow::{Context, Result};
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info, warn};
use wf_api_types::{
    EIP6963_ANNOUNCE_PROVIDER, EIP6963_REQUEST_PROVIDER, MalformedAnnouncement, RawProviderInfo,
};
use wf_provider::{ProviderEntry, ProviderHandle};
use wf_registry::{Insertion, ProviderRegistry};

pub use bus::InProcessBus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub request_event: String,
    pub announce_event: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_event: EIP6963_REQUEST_PROVIDER.to_owned(),
            announce_event: EIP6963_ANNOUNCE_PROVIDER.to_owned(),
        }
    }
}

impl DiscoveryConfig {
    /// Explicit values win, then `WAYFIND_REQUEST_EVENT` /
    /// `WAYFIND_ANNOUNCE_EVENT`, then the EIP-6963 names.
    pub fn new(request_event: Option<String>, announce_event: Option<String>) -> Self {
        let request_event = request_event
            .or_else(|| std::env::var("WAYFIND_REQUEST_EVENT").ok())
            .unwrap_or_else(|| EIP6963_REQUEST_PROVIDER.to_owned());
        let announce_event = announce_event
            .or_else(|| std::env::var("WAYFIND_ANNOUNCE_EVENT").ok())
            .unwrap_or_else(|| EIP6963_ANNOUNCE_PROVIDER.to_owned());
        Self {
            request_event,
            announce_event,
        }
    }

    pub fn from_env() -> Self {
        Self::new(None, None)
    }
}

/// Payload of an announce broadcast (`event.detail`).
#[derive(Clone)]
pub struct AnnounceEvent {
    pub info: RawProviderInfo,
    pub provider: Rc<dyn ProviderHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type AnnounceListener = Rc<dyn Fn(AnnounceEvent)>;

/// The host's global event bus.
pub trait AnnouncementBus {
    fn add_announce_listener(&self, event_name: &str, listener: AnnounceListener) -> Result<ListenerId>;
    fn remove_announce_listener(&self, id: ListenerId);
    fn dispatch_request(&self, event_name: &str) -> Result<()>;
}

/// Runs futures on the host's single-threaded event loop.
pub trait Spawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);
}

/// Reacts to accepted announcements from inside the announcement path.
pub trait AnnouncementHook {
    fn on_provider(&self, entry: &ProviderEntry, insertion: Insertion) -> Option<LocalBoxFuture<'static, ()>>;

    fn on_deactivate(&self) {}
}

#[cfg(feature = "tokio")]
pub use tokio_spawner::TokioSpawner;

#[cfg(feature = "tokio")]
mod tokio_spawner {
    use super::Spawner;
    use futures::future::LocalBoxFuture;

    /// Requires a running `tokio::task::LocalSet`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct TokioSpawner;

    impl Spawner for TokioSpawner {
        fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
            tokio::task::spawn_local(task);
        }
    }
}

struct Shared {
    registry: Rc<ProviderRegistry>,
    spawner: Rc<dyn Spawner>,
    hooks: RefCell<Vec<Rc<dyn AnnouncementHook>>>,
    rejected: Cell<u64>,
}

impl Shared {
    fn handle(&self, event: AnnounceEvent) -> Result<Insertion, MalformedAnnouncement> {
        let info = match event.info.validate() {
            Ok(info) => info,
            Err(err) => {
                self.rejected.set(self.rejected.get() + 1);
                warn!(error = %err, "discarding eip6963 announcement");
                return Err(err);
            }
        };

        let entry = ProviderEntry::new(info, event.provider);
        let insertion = self.registry.insert(entry.clone());

        let hooks: Vec<Rc<dyn AnnouncementHook>> = self.hooks.borrow().clone();
        for hook in hooks {
            if let Some(task) = hook.on_provider(&entry, insertion) {
                self.spawner.spawn_local(task);
            }
        }

        Ok(insertion)
    }
}

pub struct DiscoveryAdapter<B: AnnouncementBus> {
    bus: Rc<B>,
    config: DiscoveryConfig,
    shared: Rc<Shared>,
    listener: Cell<Option<ListenerId>>,
}

impl<B: AnnouncementBus> DiscoveryAdapter<B> {
    pub fn new(
        bus: Rc<B>,
        registry: Rc<ProviderRegistry>,
        spawner: Rc<dyn Spawner>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            bus,
            config,
            shared: Rc::new(Shared {
                registry,
                spawner,
                hooks: RefCell::new(Vec::new()),
                rejected: Cell::new(0),
            }),
            listener: Cell::new(None),
        }
    }

    pub fn add_hook(&self, hook: Rc<dyn AnnouncementHook>) {
        self.shared.hooks.borrow_mut().push(hook);
    }

    /// Subscribe to announcements, then broadcast one request so wallets
    /// that loaded before us answer. Activating twice is a no-op.
    pub fn activate(&self) -> Result<()> {
        if self.listener.get().is_some() {
            return Ok(());
        }

        let weak = Rc::downgrade(&self.shared);
        let listener: AnnounceListener = Rc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                let _ = shared.handle(event);
            }
        });

        let id = self
            .bus
            .add_announce_listener(&self.config.announce_event, listener)
            .context("subscribe to provider announcements")?;
        self.listener.set(Some(id));

        if let Err(err) = self.bus.dispatch_request(&self.config.request_event) {
            self.bus.remove_announce_listener(id);
            self.listener.set(None);
            return Err(err.context("dispatch provider request"));
        }

        info!(
            announce = %self.config.announce_event,
            request = %self.config.request_event,
            "provider discovery active"
        );
        Ok(())
    }

    /// Feed one announcement through validation and into the registry.
    pub fn handle_announcement(&self, event: AnnounceEvent) -> Result<Insertion, MalformedAnnouncement> {
        self.shared.handle(event)
    }

    /// Stop listening and forget every discovered provider.
    pub fn deactivate(&self) {
        let Some(id) = self.listener.take() else {
            return;
        };

        self.bus.remove_announce_listener(id);
        self.shared.registry.clear();
        let hooks: Vec<Rc<dyn AnnouncementHook>> = self.shared.hooks.borrow().clone();
        for hook in hooks {
            hook.on_deactivate();
        }
        debug!("provider discovery stopped");
    }

    pub fn is_active(&self) -> bool {
        self.listener.get().is_some()
    }

    pub fn registry(&self) -> &Rc<ProviderRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Announcements discarded for missing identity fields.
    pub fn rejected_count(&self) -> u64 {
        self.shared.rejected.get()
    }
}

impl<B: AnnouncementBus> Drop for DiscoveryAdapter<B> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct Inert;

    #[async_trait(?Send)]
    impl ProviderHandle for Inert {
        async fn request(&self, _method: &str, _params: Option<Vec<Value>>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[derive(Default)]
    struct QueueSpawner {
        tasks: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    }

    impl Spawner for QueueSpawner {
        fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
            self.tasks.borrow_mut().push(task);
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        seen: RefCell<Vec<(String, Insertion)>>,
        deactivations: Cell<u32>,
    }

    impl AnnouncementHook for RecordingHook {
        fn on_provider(&self, entry: &ProviderEntry, insertion: Insertion) -> Option<LocalBoxFuture<'static, ()>> {
            self.seen.borrow_mut().push((entry.uuid().to_owned(), insertion));
            (entry.rdns() == "io.metamask").then(|| Box::pin(async {}) as LocalBoxFuture<'static, ()>)
        }

        fn on_deactivate(&self) {
            self.deactivations.set(self.deactivations.get() + 1);
        }
    }

    fn event(uuid: &str, rdns: &str) -> AnnounceEvent {
        AnnounceEvent {
            info: RawProviderInfo::new(uuid, rdns, "data:image/svg+xml,x", rdns),
            provider: Rc::new(Inert),
        }
    }

    struct Fixture {
        bus: Rc<InProcessBus>,
        spawner: Rc<QueueSpawner>,
        adapter: DiscoveryAdapter<InProcessBus>,
    }

    fn fixture() -> Fixture {
        let bus = Rc::new(InProcessBus::new());
        let spawner = Rc::new(QueueSpawner::default());
        let adapter = DiscoveryAdapter::new(
            Rc::clone(&bus),
            Rc::new(ProviderRegistry::new()),
            spawner.clone(),
            DiscoveryConfig::default(),
        );
        Fixture {
            bus,
            spawner,
            adapter,
        }
    }

    #[test]
    fn activation_requests_providers_that_loaded_first() -> Result<()> {
        let Fixture { bus, adapter, .. } = fixture();
        {
            let announcer = Rc::downgrade(&bus);
            bus.on_request(EIP6963_REQUEST_PROVIDER, move || {
                if let Some(bus) = announcer.upgrade() {
                    bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("a", "io.metamask"));
                }
            });
        }

        adapter.activate()?;
        assert_eq!(adapter.registry().len(), 1);
        assert_eq!(bus.announce_listener_count(), 1);

        adapter.activate()?;
        assert_eq!(bus.announce_listener_count(), 1);
        assert_eq!(adapter.registry().len(), 1);
        Ok(())
    }

    #[test]
    fn late_announcements_keep_arriving_while_active() -> Result<()> {
        let Fixture { bus, adapter, .. } = fixture();
        adapter.activate()?;
        assert!(adapter.registry().is_empty());

        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("a", "io.metamask"));
        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("b", "com.rabby"));
        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("a", "io.metamask"));
        bus.announce("someOtherEvent", event("c", "com.coinbase.wallet"));

        assert_eq!(adapter.registry().len(), 2);
        Ok(())
    }

    #[test]
    fn malformed_announcements_never_touch_the_registry() -> Result<()> {
        let Fixture { bus, adapter, .. } = fixture();
        adapter.activate()?;

        for field in ["icon", "rdns", "uuid", "name"] {
            let mut broken = event("a", "io.metamask");
            match field {
                "icon" => broken.info.icon = None,
                "rdns" => broken.info.rdns = Some(json!("")),
                "uuid" => broken.info.uuid = None,
                _ => broken.info.name = Some(Value::Null),
            }
            bus.announce(EIP6963_ANNOUNCE_PROVIDER, broken);
        }

        assert!(adapter.registry().is_empty());
        assert_eq!(adapter.rejected_count(), 4);

        let direct = adapter.handle_announcement(AnnounceEvent {
            info: RawProviderInfo::default(),
            provider: Rc::new(Inert),
        });
        assert_eq!(direct.unwrap_err().field, "icon");
        Ok(())
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn discarded_announcement_emits_a_warning() -> Result<()> {
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let Fixture { bus, adapter, .. } = fixture();
            adapter.activate()?;
            let mut broken = event("a", "io.metamask");
            broken.info.rdns = None;
            bus.announce(EIP6963_ANNOUNCE_PROVIDER, broken);
            Ok::<(), anyhow::Error>(())
        })?;

        let output = log.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("discarding eip6963 announcement"), "{output}");
        assert!(output.contains("missing `rdns`"), "{output}");
        Ok(())
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Arrival {
            Valid(u8),
            Missing(&'static str),
        }

        fn arrival() -> impl Strategy<Value = Arrival> {
            prop_oneof![
                (0_u8..5).prop_map(Arrival::Valid),
                prop::sample::select(vec!["icon", "rdns", "uuid", "name"]).prop_map(Arrival::Missing),
            ]
        }

        proptest! {
            #[test]
            fn malformed_announcements_never_change_the_size(
                arrivals in prop::collection::vec(arrival(), 0..48)
            ) {
                let Fixture { bus, adapter, .. } = fixture();
                adapter.activate().map_err(|err| TestCaseError::fail(err.to_string()))?;

                let mut malformed = 0_u64;
                for arrival in arrivals {
                    let before = adapter.registry().len();
                    match arrival {
                        Arrival::Valid(slot) => {
                            bus.announce(EIP6963_ANNOUNCE_PROVIDER, event(&format!("uuid-{slot}"), "io.metamask"));
                        }
                        Arrival::Missing(field) => {
                            let mut broken = event("uuid-0", "io.metamask");
                            match field {
                                "icon" => broken.info.icon = None,
                                "rdns" => broken.info.rdns = Some(json!(7)),
                                "uuid" => broken.info.uuid = Some(json!("")),
                                _ => broken.info.name = Some(Value::Null),
                            }
                            bus.announce(EIP6963_ANNOUNCE_PROVIDER, broken);
                            malformed += 1;
                            prop_assert_eq!(adapter.registry().len(), before);
                        }
                    }
                }

                prop_assert_eq!(adapter.rejected_count(), malformed);
            }
        }
    }

    #[test]
    fn deactivation_unsubscribes_and_clears() -> Result<()> {
        let Fixture { bus, adapter, .. } = fixture();
        let hook = Rc::new(RecordingHook::default());
        adapter.add_hook(hook.clone());
        adapter.activate()?;
        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("a", "io.metamask"));

        adapter.deactivate();
        assert!(!adapter.is_active());
        assert!(adapter.registry().is_empty());
        assert_eq!(bus.announce_listener_count(), 0);
        assert_eq!(hook.deactivations.get(), 1);

        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("b", "com.rabby"));
        assert!(adapter.registry().is_empty());

        adapter.deactivate();
        assert_eq!(hook.deactivations.get(), 1);
        Ok(())
    }

    #[test]
    fn hooks_run_for_every_accepted_announcement() -> Result<()> {
        let Fixture { bus, spawner, adapter } = fixture();
        let hook = Rc::new(RecordingHook::default());
        adapter.add_hook(hook.clone());
        adapter.activate()?;

        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("a", "io.metamask"));
        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("b", "com.rabby"));
        bus.announce(EIP6963_ANNOUNCE_PROVIDER, event("a", "io.metamask"));

        assert_eq!(
            *hook.seen.borrow(),
            vec![
                ("a".to_owned(), Insertion::Added),
                ("b".to_owned(), Insertion::Added),
                ("a".to_owned(), Insertion::Replaced),
            ]
        );
        assert_eq!(spawner.tasks.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn dropping_the_adapter_removes_its_listener() -> Result<()> {
        let Fixture { bus, adapter, .. } = fixture();
        adapter.activate()?;
        assert_eq!(bus.announce_listener_count(), 1);
        drop(adapter);
        assert_eq!(bus.announce_listener_count(), 0);
        Ok(())
    }

    #[test]
    fn config_prefers_explicit_values() {
        let config = DiscoveryConfig::new(Some("req".into()), Some("ann".into()));
        assert_eq!(config.request_event, "req");
        assert_eq!(config.announce_event, "ann");
    }
}
