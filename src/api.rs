//! HTTP API for the agency hub.
//!
//! Every route lives under `/api` and, apart from the health and status
//! checks, requires a bearer session token.

mod assignments;
mod brands;
mod clients;
mod debrief;
mod error;
mod scribe;
mod server;
mod skus;
mod state;

pub use clients::slugify;
pub use debrief::SYNC_SECRET_HEADER;
pub use error::{ApiError, ApiResult};
pub use server::{router, start_http_server};
pub use state::ApiState;
