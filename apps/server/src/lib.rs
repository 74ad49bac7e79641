//! sqlq server - HTTP access to a single sqlq queue
//!
//! - `GET /` receive, with optional long-polling
//! - `POST /` send
//! - `PUT /` extend a message's timeout
//! - `DELETE /` delete
//! - `GET /health` liveness check

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
