// src/lib.rs

pub mod config;
pub mod constants;
pub mod decomposition;
pub mod driver;
pub mod error;
pub mod grid;
pub mod layout;
pub mod metrics;
pub mod multiprocess; // Child-process grid execution
pub mod report;
pub mod results_dir;
pub mod runner;
pub mod store;
pub mod timing;
pub mod tsv_export;
pub mod validation; // Config summary for --dry-run and validate
pub mod verify;
