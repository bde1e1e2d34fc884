//! HTTP and WebSocket Server

mod error;
mod gateway;
mod router;
mod state;

pub use error::{ApiError, ApiResult};
pub use router::create_router;
pub use state::AppState;
