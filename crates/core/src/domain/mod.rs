mod execution;
mod record;
mod status;

pub use execution::*;
pub use record::*;
pub use status::*;
