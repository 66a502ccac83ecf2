//! Validated runtime configuration shared by the scanners and the server.
//!
//! Loading and validating the TOML file is the server crate's job; these are
//! the plain values every pipeline is built from.

mod coordinator;
mod node;
mod scanner;

pub use coordinator::{CoordinatorConfig, PipelineSource};
pub use node::NodeConfig;
pub use scanner::ScannerConfig;
