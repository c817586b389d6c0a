mod base;
mod index;
mod service;

pub use base::*;
pub use index::*;
pub use service::*;
