//! HTTP surface: JSON endpoints plus the SSE progress stream.

mod error;
mod routes;
mod state;
mod wire;

pub use error::{AppError, AppResult};
pub use routes::router;
pub use state::AppState;
pub use wire::{sse_event, WireMessage};
