//! Built-in modules

mod kv;
mod util;

use std::sync::Arc;

pub use kv::KvModule;
pub use util::UtilModule;

use crate::module::NativeModule;

/// Every module compiled into the host, in load order.
pub fn builtin_modules() -> Vec<Arc<dyn NativeModule>> {
    vec![Arc::new(KvModule::new()), Arc::new(UtilModule)]
}
