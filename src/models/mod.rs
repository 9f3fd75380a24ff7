//! Domain model module declarations.

pub mod campaign;
pub mod progress;
pub mod protocol;
pub mod value;
