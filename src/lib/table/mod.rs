//! Barcode tables: the shared data model of every engine.
//!
//! - [`record`]: a single barcode observation and the recognised column names
//! - [`barcode_table`]: the immutable, barcode-unique table
//! - [`io`]: delimited-text load and atomic store

pub mod barcode_table;
pub mod io;
pub mod record;

pub use barcode_table::BarcodeTable;
pub use io::{parse_table, read_table, read_table_with_cancel, write_table};
pub use record::BarcodeRecord;
