//! Summary loading and HTML rendering.
//!
//! A summary JSON file is loaded with [`load_summary`], which separates the fatal input
//! failures ([`ReportInputError`]) from tolerated defects in optional fields
//! ([`Diagnostic`]). [`render`] turns the decoded document into a self-contained HTML page.

mod decode;
mod error;
mod field;
mod load;
mod render;

pub use decode::{CheckDoc, Diagnostic, MetricDoc, RunDoc, SummaryDoc};
pub use error::{ReportInputError, ReportInputErrorKind};
pub use field::Field;
pub use load::{LoadedSummary, load_summary};
pub use render::{DEFAULT_REPORTS_DIR, render, report_file_name};
