use anyhow::Result;
use gloo_storage::{LocalStorage, Storage};
use wf_storage::KeyValueStore;

use crate::js_error;

/// `window.localStorage`, holding raw (not JSON-encoded) strings.
#[derive(Default)]
pub struct LocalStore;

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        LocalStorage::raw().get_item(key).map_err(js_error)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        LocalStorage::raw().set_item(key, value).map_err(js_error)
    }

    fn delete(&self, key: &str) -> Result<()> {
        LocalStorage::raw().remove_item(key).map_err(js_error)
    }
}
