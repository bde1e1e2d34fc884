//! Late-bound services handed to every context.
//!
//! Contexts receive the relay at spawn; swapping the target behind it
//! affects contexts that are already running.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use loom_js_runtime::{LogLevel, LogSink, UiChannel};

#[derive(Default)]
pub(crate) struct LogRelay {
    target: RwLock<Option<Arc<dyn LogSink>>>,
}

impl LogRelay {
    pub(crate) fn set(&self, target: Arc<dyn LogSink>) {
        *self.target.write() = Some(target);
    }
}

impl LogSink for LogRelay {
    fn emit(&self, project_id: &str, level: LogLevel, message: &str) {
        let target = self.target.read().clone();
        if let Some(target) = target {
            target.emit(project_id, level, message);
        }
    }
}

#[derive(Default)]
pub(crate) struct UiRelay {
    target: RwLock<Option<Arc<dyn UiChannel>>>,
}

impl UiRelay {
    pub(crate) fn set(&self, target: Arc<dyn UiChannel>) {
        *self.target.write() = Some(target);
    }
}

impl UiChannel for UiRelay {
    fn request(&self, project_id: &str, session_id: &str, request_id: &str, schema: Value) -> bool {
        let target = self.target.read().clone();
        match target {
            Some(target) => target.request(project_id, session_id, request_id, schema),
            None => false,
        }
    }
}
