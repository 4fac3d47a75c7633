mod execution_repository;
mod phase_record_repository;

pub use execution_repository::*;
pub use phase_record_repository::*;
