//! Silent reconnection to the wallet used before the page reloaded.
//!
//! Evaluated inside the announcement path for every accepted provider. At
//! most one automatic attempt is made per discovery session, and a failed
//! attempt is not retried; the user can still connect by hand.

use futures::future::LocalBoxFuture;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info, warn};
use wf_discovery::AnnouncementHook;
use wf_provider::ProviderEntry;
use wf_registry::Insertion;
use wf_storage::KeyValueStore;

use crate::controller::{ConnectOutcome, ConnectionController};

pub struct ReconnectPolicy<S: KeyValueStore> {
    controller: Rc<ConnectionController<S>>,
    fired: Cell<bool>,
}

impl<S: KeyValueStore + 'static> ReconnectPolicy<S> {
    pub fn new(controller: Rc<ConnectionController<S>>) -> Self {
        Self {
            controller,
            fired: Cell::new(false),
        }
    }

    /// The entry is the remembered wallet and nothing is connected yet. A
    /// pending manual attempt to another wallet does not block it; the
    /// generation guard settles whichever resolves last.
    pub fn matches(&self, entry: &ProviderEntry) -> bool {
        !self.fired.get()
            && self.controller.connection().is_none()
            && self.controller.connecting_to().as_deref() != Some(entry.uuid())
            && self.controller.persisted_rdns().as_deref() == Some(entry.rdns())
    }

    pub fn evaluate(&self, entry: &ProviderEntry) -> Option<LocalBoxFuture<'static, ()>> {
        if !self.matches(entry) {
            return None;
        }
        self.fired.set(true);
        info!(uuid = %entry.uuid(), rdns = %entry.rdns(), "reconnecting to previously connected provider");

        let controller = Rc::clone(&self.controller);
        let entry = entry.clone();
        Some(Box::pin(async move {
            match controller.connect(&entry).await {
                Ok(ConnectOutcome::Connected(_)) => {}
                Ok(ConnectOutcome::Superseded) => {
                    debug!(rdns = %entry.rdns(), "automatic reconnect superseded")
                }
                Err(err) => warn!(error = %err, "automatic reconnect failed"),
            }
        }))
    }

    pub fn has_fired(&self) -> bool {
        self.fired.get()
    }

    pub fn reset(&self) {
        self.fired.set(false);
    }
}

impl<S: KeyValueStore + 'static> AnnouncementHook for ReconnectPolicy<S> {
    fn on_provider(&self, entry: &ProviderEntry, _insertion: Insertion) -> Option<LocalBoxFuture<'static, ()>> {
        self.evaluate(entry)
    }

    fn on_deactivate(&self) {
        self.reset();
    }
}
