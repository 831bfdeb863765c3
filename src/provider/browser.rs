//! Browser Provider
//!
//! `WalletProvider` over the `window.ethereum` object injected by the
//! wallet extension.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{ProviderEvent, ProviderEventKind, ProviderListener, SubscriptionId, WalletProvider};
use crate::error::ProviderError;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(extends = js_sys::Object)]
    #[derive(Clone, Debug)]
    type Ethereum;

    #[wasm_bindgen(method, catch)]
    async fn request(this: &Ethereum, args: &JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method)]
    fn on(this: &Ethereum, event: &str, listener: &js_sys::Function);

    #[wasm_bindgen(method, js_name = removeListener)]
    fn remove_listener(this: &Ethereum, event: &str, listener: &js_sys::Function);
}

#[derive(Serialize)]
struct RequestArgs<'a> {
    method: &'a str,
    params: Value,
}

type Subscription = (ProviderEventKind, Closure<dyn FnMut(JsValue)>);

#[derive(Default)]
pub struct BrowserProvider {
    next_id: Cell<u64>,
    subscriptions: RefCell<HashMap<u64, Subscription>>,
}

impl BrowserProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn ethereum() -> Option<Ethereum> {
        let window = web_sys::window()?;
        let value = js_sys::Reflect::get(&window, &JsValue::from_str("ethereum")).ok()?;
        if value.is_undefined() || value.is_null() {
            None
        } else {
            Some(value.unchecked_into())
        }
    }

    fn supports_events(eth: &Ethereum) -> bool {
        js_sys::Reflect::get(eth, &JsValue::from_str("on"))
            .map(|f| f.is_function())
            .unwrap_or(false)
    }
}

/// Pull `code` and `message` out of a rejected provider promise
fn js_error(err: JsValue) -> ProviderError {
    let code = js_sys::Reflect::get(&err, &JsValue::from_str("code"))
        .ok()
        .and_then(|v| v.as_f64())
        .map(|c| c as i64);
    let message = js_sys::Reflect::get(&err, &JsValue::from_str("message"))
        .ok()
        .and_then(|v| v.as_string())
        .unwrap_or_else(|| format!("{:?}", err));
    ProviderError::new(code, message)
}

fn decode_event(kind: ProviderEventKind, payload: JsValue) -> ProviderEvent {
    match kind {
        ProviderEventKind::AccountsChanged => {
            ProviderEvent::AccountsChanged(serde_wasm_bindgen::from_value(payload).unwrap_or_default())
        }
        ProviderEventKind::ChainChanged => ProviderEvent::ChainChanged(payload.as_string().unwrap_or_default()),
        ProviderEventKind::Disconnect => ProviderEvent::Disconnect,
    }
}

#[async_trait(?Send)]
impl WalletProvider for BrowserProvider {
    fn is_installed(&self) -> bool {
        Self::ethereum().is_some()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let eth = Self::ethereum().ok_or_else(|| ProviderError::message("window.ethereum is not available"))?;
        let args = RequestArgs { method, params }
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| ProviderError::message(format!("Serialization error: {}", e)))?;

        let result = eth.request(&args).await.map_err(js_error)?;
        serde_wasm_bindgen::from_value(result)
            .map_err(|e| ProviderError::message(format!("Response error: {}", e)))
    }

    fn subscribe(&self, kind: ProviderEventKind, listener: ProviderListener) -> Option<SubscriptionId> {
        let eth = Self::ethereum()?;
        if !Self::supports_events(&eth) {
            return None;
        }

        let closure = Closure::<dyn FnMut(JsValue)>::new(move |payload: JsValue| {
            listener(decode_event(kind, payload));
        });
        eth.on(kind.as_str(), closure.as_ref().unchecked_ref());

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscriptions.borrow_mut().insert(id, (kind, closure));
        Some(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let Some((kind, closure)) = self.subscriptions.borrow_mut().remove(&id.0) else {
            return;
        };
        if let Some(eth) = Self::ethereum() {
            eth.remove_listener(kind.as_str(), closure.as_ref().unchecked_ref());
        }
    }
}
