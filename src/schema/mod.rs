//! Schema module - Field registry, configuration and particle seeds.

mod config;
mod registry;
mod seed;

pub use config::*;
pub use registry::*;
pub use seed::*;
