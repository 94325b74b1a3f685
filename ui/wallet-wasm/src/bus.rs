//! `window` as the EIP-6963 event bus.

use anyhow::{Result, anyhow};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{CustomEvent, Event, Window};
use wf_api_types::RawProviderInfo;
use wf_discovery::{AnnounceEvent, AnnounceListener, AnnouncementBus, ListenerId};

use crate::js_error;
use crate::provider::JsProvider;

type EventClosure = Closure<dyn FnMut(Event)>;

pub struct WindowBus {
    window: Window,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, String, EventClosure)>>,
}

impl WindowBus {
    pub fn new() -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("no global `window`"))?;
        Ok(Self {
            window,
            next_id: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        })
    }
}

impl AnnouncementBus for WindowBus {
    fn add_announce_listener(&self, event_name: &str, listener: AnnounceListener) -> Result<ListenerId> {
        let closure: EventClosure = Closure::wrap(Box::new(move |event: Event| {
            match announcement_from_event(&event) {
                Ok(announcement) => listener(announcement),
                Err(err) => gloo_console::error!(format!("unreadable eip6963 announcement: {err}")),
            }
        }) as Box<dyn FnMut(Event)>);

        self.window
            .add_event_listener_with_callback(event_name, closure.as_ref().unchecked_ref())
            .map_err(js_error)?;

        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .push((id, event_name.to_owned(), closure));
        Ok(id)
    }

    fn remove_announce_listener(&self, id: ListenerId) {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            let position = listeners.iter().position(|(existing, _, _)| *existing == id);
            position.map(|index| listeners.remove(index))
        };

        if let Some((_, event_name, closure)) = removed {
            let _ = self
                .window
                .remove_event_listener_with_callback(&event_name, closure.as_ref().unchecked_ref());
        }
    }

    fn dispatch_request(&self, event_name: &str) -> Result<()> {
        let event = Event::new(event_name).map_err(js_error)?;
        self.window.dispatch_event(&event).map_err(js_error)?;
        Ok(())
    }
}

/// Read `event.detail.{info, provider}`. Identity fields are left for the
/// adapter to validate; an absent `info` simply validates as missing.
fn announcement_from_event(event: &Event) -> Result<AnnounceEvent> {
    let custom = event
        .dyn_ref::<CustomEvent>()
        .ok_or_else(|| anyhow!("announce event is not a CustomEvent"))?;
    let detail = custom.detail();

    let info = js_sys::Reflect::get(&detail, &JsValue::from_str("info")).map_err(js_error)?;
    let info: RawProviderInfo = serde_wasm_bindgen::from_value(info).unwrap_or_default();

    let provider = js_sys::Reflect::get(&detail, &JsValue::from_str("provider")).map_err(js_error)?;
    if provider.is_undefined() || provider.is_null() {
        return Err(anyhow!("announcement carries no provider"));
    }

    Ok(AnnounceEvent {
        info,
        provider: Rc::new(JsProvider::new(provider)),
    })
}
