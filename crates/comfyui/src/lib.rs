//! ComfyUI generation backend.
//!
//! This crate owns everything that talks to the ComfyUI HTTP API:
//!
//! - [`GenerationBackend`] — the trait the server executes jobs against.
//! - [`ComfyUIBackend`] — the production implementation over [`ComfyUIApi`].
//! - [`workflow`] — JSON workflow templates and per-job parameter injection.

pub mod api;
pub mod backend;
pub mod client;
pub mod workflow;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use backend::{BackendError, GenerationBackend};
pub use client::ComfyUIBackend;
pub use workflow::{WorkflowError, WorkflowTemplates};
