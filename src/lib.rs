//! stockdesk: backend for a personal stock-tracking dashboard.
//!
//! Two independent services share one process:
//!
//! - [`gateway`]: forwards templated prompts to a hosted model, validates
//!   that the reply is a JSON object, self-corrects a bounded number of
//!   times, and caches good results for the rest of the day.
//! - [`store`]: sparse per-entity, per-year records with "as of year X"
//!   resolution and paginated listing.
//!
//! [`api`] exposes both over HTTP.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod prompts;
pub mod providers;
pub mod ratelimit;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{Result, StockdeskError};
