//! HTTP surface: the AI gateway and the versioned record store over axum.

pub mod errors;
pub mod identity;
pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState};
