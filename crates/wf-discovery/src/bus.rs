use anyhow::Result;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{AnnounceEvent, AnnounceListener, AnnouncementBus, ListenerId};

type RequestListener = Rc<dyn Fn()>;

/// Synchronous event bus for native hosts and tests.
///
/// Delivery mirrors DOM `dispatchEvent`: listeners run inline, in
/// registration order, before `announce`/`dispatch_request` return.
#[derive(Default)]
pub struct InProcessBus {
    next_id: Cell<u64>,
    announce_listeners: RefCell<Vec<(ListenerId, String, AnnounceListener)>>,
    request_listeners: RefCell<Vec<(String, RequestListener)>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wallet-side reaction to request broadcasts.
    pub fn on_request(&self, event_name: &str, listener: impl Fn() + 'static) {
        self.request_listeners
            .borrow_mut()
            .push((event_name.to_owned(), Rc::new(listener)));
    }

    pub fn announce(&self, event_name: &str, event: AnnounceEvent) {
        let targets: Vec<AnnounceListener> = self
            .announce_listeners
            .borrow()
            .iter()
            .filter(|(_, name, _)| name == event_name)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();

        for listener in targets {
            listener(event.clone());
        }
    }

    pub fn announce_listener_count(&self) -> usize {
        self.announce_listeners.borrow().len()
    }
}

impl AnnouncementBus for InProcessBus {
    fn add_announce_listener(&self, event_name: &str, listener: AnnounceListener) -> Result<ListenerId> {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.announce_listeners
            .borrow_mut()
            .push((id, event_name.to_owned(), listener));
        Ok(id)
    }

    fn remove_announce_listener(&self, id: ListenerId) {
        self.announce_listeners
            .borrow_mut()
            .retain(|(existing, _, _)| *existing != id);
    }

    fn dispatch_request(&self, event_name: &str) -> Result<()> {
        let targets: Vec<RequestListener> = self
            .request_listeners
            .borrow()
            .iter()
            .filter(|(name, _)| name == event_name)
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in targets {
            listener();
        }
        Ok(())
    }
}
