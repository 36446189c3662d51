//! Type definitions

pub mod column_map;
pub mod import;
pub mod record;

pub use column_map::*;
pub use import::*;
pub use record::*;
