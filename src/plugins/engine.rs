//! Embedded script engine.
//!
//! One QuickJS runtime/context pair per plugin. Scripts never suspend: every
//! host call is synchronous from the script's point of view, and all engine
//! entry happens on the blocking pool under the runtime's execution lock.
//!
//! Values cross the boundary as JSON (via the engine's own parse/stringify)
//! except binary buffers, which travel as `ArrayBuffer`.

use crate::error::{PluginError, PluginResult};
use rquickjs::{Context, Ctx, Error as JsError, Runtime, Value};

/// Wrapper around one plugin's QuickJS runtime and context.
pub struct ScriptEngine {
    // Kept alive for the lifetime of the context.
    _runtime: Runtime,
    context: Context,
}

impl ScriptEngine {
    /// Create a fresh engine with an empty global scope.
    pub fn new() -> PluginResult<Self> {
        let runtime = Runtime::new()
            .map_err(|e| PluginError::Internal(format!("engine init failed: {e}")))?;
        let context = Context::full(&runtime)
            .map_err(|e| PluginError::Internal(format!("context init failed: {e}")))?;
        Ok(Self {
            _runtime: runtime,
            context,
        })
    }

    /// Enter the engine and run `f` with the live context.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Ctx) -> R,
    {
        self.context.with(f)
    }

    /// Execute top-level script source. A thrown exception is a
    /// [`PluginError::ScriptInit`] carrying the script-side message.
    pub fn eval_script(&self, source: &str) -> PluginResult<()> {
        self.with(|ctx| {
            ctx.eval::<(), _>(source.as_bytes())
                .map_err(|e| PluginError::ScriptInit(error_text(&ctx, e)))
        })
    }
}

/// Best-effort text of a pending exception or engine error.
pub fn error_text(ctx: &Ctx, err: JsError) -> String {
    if let JsError::Exception = err {
        caught_message(ctx)
    } else {
        err.to_string()
    }
}

/// Message of the value currently caught on the context.
pub fn caught_message(ctx: &Ctx) -> String {
    let caught = ctx.catch();
    if let Some(obj) = caught.as_object() {
        if let Ok(Some(message)) = obj.get::<_, Option<String>>("message") {
            return message;
        }
    }
    if let Some(s) = caught.as_string() {
        if let Ok(text) = s.to_string() {
            return text;
        }
    }
    "unknown script error".to_string()
}

/// Convert a host error into a thrown JS exception.
///
/// The exception message is `"<Kind>: <detail>"` so scripts can inspect the
/// stable tag.
pub fn throw_host_error(ctx: &Ctx, err: PluginError) -> JsError {
    rquickjs::Exception::throw_message(ctx, &err.script_message())
}

/// Build a JS value from JSON via the engine's own parser.
pub fn json_to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    ctx.json_parse(text)
}

/// Serialise a JS value to JSON via the engine's own stringifier.
///
/// `undefined` (and values JSON cannot express) become `null`.
pub fn js_to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> PluginResult<serde_json::Value> {
    let text = ctx
        .json_stringify(value)
        .map_err(|e| PluginError::ScriptRuntime(error_text(ctx, e)))?;
    match text {
        Some(s) => {
            let s = s
                .to_string()
                .map_err(|e| PluginError::ScriptRuntime(e.to_string()))?;
            Ok(serde_json::from_str(&s)?)
        }
        None => Ok(serde_json::Value::Null),
    }
}
