//! kiln build daemon
//!
//! A single HTTP endpoint that decodes a [`kiln_build::BuildSpec`], builds the
//! image and, unless `no-push` is set, pushes it to every destination.

pub mod config;
pub mod decode;
pub mod logging;
pub mod orchestrator;
pub mod respond;
pub mod server;
pub mod toggle;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::Config;
pub use logging::LogLevel;
pub use orchestrator::{Orchestrator, Outcome};
pub use server::{AppState, router, serve};
