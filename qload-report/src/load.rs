use std::path::Path;

use serde_json::Value;

use crate::decode::{Diagnostic, SummaryDoc};
use crate::error::ReportInputError;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSummary {
    pub doc: SummaryDoc,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadedSummary {
    /// Decodes an already parsed summary. `origin` names the source in errors and logs.
    pub fn from_json(value: &Value, origin: &Path) -> Result<Self, ReportInputError> {
        let (doc, diagnostics) = SummaryDoc::decode(value).ok_or_else(|| {
            ReportInputError::InputMissingRequiredField {
                path: origin.to_path_buf(),
                field: "metrics",
            }
        })?;

        for d in &diagnostics {
            tracing::warn!(
                source = %origin.display(),
                field = %d.path,
                "ignoring malformed summary field: {}",
                d.problem
            );
        }

        Ok(Self { doc, diagnostics })
    }
}

/// Reads and decodes a summary JSON file.
pub fn load_summary(path: &Path) -> Result<LoadedSummary, ReportInputError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReportInputError::InputFileMissing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(ReportInputError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ReportInputError::InputFileEmpty {
            path: path.to_path_buf(),
        });
    }

    let value: Value = serde_json::from_slice(&bytes).map_err(|source| {
        ReportInputError::InputFileMalformedJson {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let loaded = LoadedSummary::from_json(&value, path)?;
    tracing::debug!(
        source = %path.display(),
        metrics = loaded.doc.metrics.len(),
        "summary loaded"
    );
    Ok(loaded)
}
