//! `shisho.log` — script logging, tagged with the owning plugin.

use super::HostEnv;
use rquickjs::class::Trace;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Trace)]
#[rquickjs::class]
pub struct LogApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl LogApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }
}

#[rquickjs::methods]
impl LogApi {
    pub fn debug(&self, message: String) {
        debug!(plugin = %self.env.key, "{message}");
    }

    pub fn info(&self, message: String) {
        info!(plugin = %self.env.key, "{message}");
    }

    pub fn warn(&self, message: String) {
        warn!(plugin = %self.env.key, "{message}");
    }

    pub fn error(&self, message: String) {
        error!(plugin = %self.env.key, "{message}");
    }
}
