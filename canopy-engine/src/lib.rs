//! Canopy engine
//!
//! Orchestrates the delivery path of an ML repository: building container
//! images, compiling and uploading the pipeline, submitting and tracking
//! runs, and rolling trained models out to serving namespaces with a canary
//! pass. The engine itself is stateless; ids that must survive between
//! commands live in hidden-state markers on pull-request comments.
//!
//! Entry point is [`dispatch::Dispatcher`], which receives every external
//! platform as an injected trait object.

pub mod archive;
pub mod build;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod messenger;
pub mod pipeline;
pub mod rollout;
pub mod run;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{EngineError, Result};
