//! EIP-1193 provider object injected by a wallet extension.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use wf_provider::ProviderHandle;

use crate::js_error;

pub struct JsProvider {
    inner: JsValue,
}

impl JsProvider {
    pub fn new(inner: JsValue) -> Self {
        Self { inner }
    }
}

#[async_trait(?Send)]
impl ProviderHandle for JsProvider {
    async fn request(&self, method: &str, params: Option<Vec<Value>>) -> Result<Value> {
        let args = js_sys::Object::new();
        js_sys::Reflect::set(&args, &JsValue::from_str("method"), &JsValue::from_str(method))
            .map_err(js_error)?;
        if let Some(params) = params {
            let params = params
                .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
                .map_err(|err| anyhow!("encode params for {method}: {err}"))?;
            js_sys::Reflect::set(&args, &JsValue::from_str("params"), &params).map_err(js_error)?;
        }

        let request: js_sys::Function = js_sys::Reflect::get(&self.inner, &JsValue::from_str("request"))
            .map_err(js_error)?
            .dyn_into()
            .map_err(|_| anyhow!("provider has no request function"))?;

        let pending = request.call1(&self.inner, &args).map_err(js_error)?;
        let promise: js_sys::Promise = pending
            .dyn_into()
            .map_err(|_| anyhow!("provider.request({method}) did not return a promise"))?;

        let result = JsFuture::from(promise).await.map_err(js_error)?;
        serde_wasm_bindgen::from_value(result).map_err(|err| anyhow!("decode {method} result: {err}"))
    }
}
