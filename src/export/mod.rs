//! Export assembly
//!
//! Turns planner results into rows ready for the CSV writer and a manifest
//! naming every record that could not be exported.

pub mod assembler;
pub mod csv_writer;
pub mod manifest;

pub use assembler::{assemble, ExportOutcome, ExportRow};
pub use csv_writer::{timestamped_file_name, write_csv, write_csv_file, CsvLayout};
pub use manifest::{ExportManifest, ManifestEntry, RowStatus};
