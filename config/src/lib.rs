//! Configuration loading and typed settings for the secondary index engine.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, ConfigLoader, LoadConfigError};
