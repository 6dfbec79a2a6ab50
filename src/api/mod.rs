//! HTTP API: session snapshots, upload and dispatch intents, event stream.

mod routes;
mod session;
mod types;

pub use routes::{build_router, serve, AppState};
pub use types::{HealthResponse, SentResponse};
