pub mod domain;
mod error;
pub mod registry;
pub mod standard;

pub use domain::*;
pub use error::*;
pub use registry::PhaseRegistry;
