//! Handler builders and associated traits.
//!
//! Builders validate user supplied settings before any thread is spawned, so
//! configuration mistakes surface as [`HandlerBuildError`] instead of a
//! handler that silently drops everything.

use thiserror::Error;

mod builder_macros;
pub mod loki_builder;

pub use loki_builder::LokiHandlerBuilder;

/// Errors that may occur while building a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerBuildError {
    /// Invalid user supplied configuration.
    #[error("invalid handler configuration: {0}")]
    InvalidConfig(String),
}

/// Trait implemented by handler builders.
pub trait HandlerBuilderTrait: Send + Sync {
    type Handler;

    /// Validate the settings and construct the handler.
    fn build_inner(&self) -> Result<Self::Handler, HandlerBuildError>;
}
