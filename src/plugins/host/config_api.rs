//! `shisho.config` — read access to the plugin's persisted configuration.
//!
//! Values come from the persistence service through the narrow
//! [`super::ConfigGetter`] interface; scripts always see raw values (secret
//! masking applies to the host's management surface, not to the plugin that
//! owns the secret).

use super::HostEnv;
use crate::plugins::engine::{json_to_js, throw_host_error};
use rquickjs::class::Trace;
use rquickjs::{Ctx, Value};
use std::sync::Arc;

#[derive(Trace)]
#[rquickjs::class]
pub struct ConfigApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl ConfigApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }
}

#[rquickjs::methods]
impl ConfigApi {
    /// Raw string value for `key`, or `undefined` when unset.
    pub fn get<'js>(&self, ctx: Ctx<'js>, key: String) -> rquickjs::Result<Option<String>> {
        let env = &self.env;
        env.rt
            .clone()
            .block_on(env.config_store.get_value(&env.key.scope, &env.key.id, &key))
            .map_err(|e| throw_host_error(&ctx, e))
    }

    /// Plain object of all non-null values.
    #[qjs(rename = "getAll")]
    pub fn get_all<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let env = &self.env;
        let values = env
            .rt
            .clone()
            .block_on(env.config_store.get_all(&env.key.scope, &env.key.id))
            .map_err(|e| throw_host_error(&ctx, e))?;
        let map: serde_json::Map<String, serde_json::Value> = values
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        json_to_js(&ctx, &serde_json::Value::Object(map))
    }
}
