//! Set of currently announced wallet providers, keyed by announcement `uuid`.
//!
//! Entries are kept in first-announcement order so wallet lists render
//! stably. There is no per-entry removal: providers never un-announce, and
//! the only way out is [`ProviderRegistry::clear`] when discovery stops.

pub mod observe;

use std::cell::RefCell;
use tracing::debug;
use wf_api_types::ProviderInfo;
use wf_provider::ProviderEntry;

pub use observe::{ObserverId, Observers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(ProviderInfo),
    Replaced(ProviderInfo),
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Added,
    Replaced,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: RefCell<Vec<ProviderEntry>>,
    observers: Observers<RegistryEvent>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a provider, or replace the entry already holding its `uuid`
    /// in place.
    pub fn insert(&self, entry: ProviderEntry) -> Insertion {
        let info = entry.info.clone();
        let insertion = {
            let mut entries = self.entries.borrow_mut();
            match entries.iter_mut().find(|existing| existing.uuid() == entry.uuid()) {
                Some(existing) => {
                    *existing = entry;
                    Insertion::Replaced
                }
                None => {
                    entries.push(entry);
                    Insertion::Added
                }
            }
        };

        debug!(uuid = %info.uuid, rdns = %info.rdns, ?insertion, "provider registered");
        let event = match insertion {
            Insertion::Added => RegistryEvent::Added(info),
            Insertion::Replaced => RegistryEvent::Replaced(info),
        };
        self.observers.notify(&event);
        insertion
    }

    pub fn get(&self, uuid: &str) -> Option<ProviderEntry> {
        self.entries
            .borrow()
            .iter()
            .find(|entry| entry.uuid() == uuid)
            .cloned()
    }

    pub fn find_by_rdns(&self, rdns: &str) -> Option<ProviderEntry> {
        self.entries
            .borrow()
            .iter()
            .find(|entry| entry.rdns() == rdns)
            .cloned()
    }

    /// Entries in first-announcement order.
    pub fn snapshot(&self) -> Vec<ProviderEntry> {
        self.entries.borrow().clone()
    }

    pub fn infos(&self) -> Vec<ProviderInfo> {
        self.entries
            .borrow()
            .iter()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.entries.borrow_mut());
        debug!(removed = removed.len(), "provider registry cleared");
        drop(removed);
        self.observers.notify(&RegistryEvent::Cleared);
    }

    pub fn subscribe(&self, callback: impl Fn(&RegistryEvent) + 'static) -> ObserverId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}
