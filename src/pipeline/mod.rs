//! Pipeline entry points.
//!
//! - `run_once`: one fetch → diff → notify → persist pass
//! - `watch`: `run_once` on a fixed interval until shutdown
//! - `run_archive`: export the whole listing to a JSON file

pub mod archive;
pub mod diff;
pub mod run;

pub use archive::run_archive;
pub use diff::{DiffResult, calculate_diff, find_new};
pub use run::{RunMode, RunReport, RunSettings, run_once, watch};
