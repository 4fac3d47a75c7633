mod execution;
mod phase_record;

pub use execution::*;
pub use phase_record::*;
