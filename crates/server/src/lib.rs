//! Spriteforge IPC server.
//!
//! Binds two TCP endpoints — a command channel (request-reply) and an
//! event channel (publish-subscribe) — over length-delimited MessagePack
//! frames, and runs the background worker loops that execute generation
//! jobs against a [`spriteforge_comfyui::GenerationBackend`].

pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod publisher;
pub mod registry;
pub mod state;
pub mod testing;
pub mod worker;

pub use batch::{BatchScheduler, BatchStats};
pub use config::ServerConfig;
pub use error::ServerError;
pub use executor::{ExecutionResult, JobExecutor};
pub use state::ServerState;
