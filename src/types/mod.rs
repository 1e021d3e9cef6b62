//! Tipos compartilhados do cachefield.

pub mod config;
pub mod errors;
pub mod value;

pub use value::{ChangeSet, Record, RecordId, Value};
