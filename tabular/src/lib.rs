//! FILENAME: tabular/src/lib.rs
//! PURPOSE: Shared record and value types for the grouping engine.
//! CONTEXT: Re-exports the record model and the value formatter used by the
//! `grouping-engine` crate and by callers supplying records.

pub mod format;
pub mod record;
pub mod value;

pub use format::{format_value, FormatSpec};
pub use record::{Record, RecordIndex};
pub use value::{parse_date, Value};
