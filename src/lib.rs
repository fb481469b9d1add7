pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod graph;
pub mod mcp;
pub mod media;
pub mod model;
pub mod risk;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use context::{ContextAssembler, ContextParams, KycContext};
pub use error::{KycError, Result};
