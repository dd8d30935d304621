//! Client core of the chat application: completion streaming, session state
//! and recovery of streams that were in flight when the client stopped.

pub mod api;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod service;
pub mod state;
pub mod stream;

pub use config::ClientConfig;
pub use errors::{AppError, AppResult};
