//! Lorekeeper gateway: HTTP ingestion, history queries and live subscribers
//!
//! - `POST /api/v1/lore/analyze`, `POST /api/v1/lore/escalate`
//! - `GET /api/v1/conflicts`, `/conflicts/stats`, `/conflicts/:id`,
//!   `POST /api/v1/conflicts/:id/resolve`
//! - `GET /api/v1/escalation/stats`
//! - `GET /health`
//! - `GET /ws` for the subscriber protocol

pub mod api;
pub mod error;
pub mod server;

pub use api::{create_router, AppState};
pub use error::{ApiError, ApiResult, GatewayError, GatewayResult};
pub use server::Server;
