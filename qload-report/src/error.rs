use std::path::PathBuf;

/// Why a summary file could not be turned into a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportInputError {
    #[error("summary file not found: {path}")]
    InputFileMissing { path: PathBuf },

    #[error("summary file is empty: {path}")]
    InputFileEmpty { path: PathBuf },

    #[error("summary file is not valid JSON: {path}: {source}")]
    InputFileMalformedJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("summary file lacks required field `{field}`: {path}")]
    InputMissingRequiredField { path: PathBuf, field: &'static str },

    #[error("failed to read summary file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ReportInputErrorKind {
    InputFileMissing,
    InputFileEmpty,
    InputFileMalformedJson,
    InputMissingRequiredField,
    Read,
}

impl ReportInputError {
    pub fn kind(&self) -> ReportInputErrorKind {
        match self {
            Self::InputFileMissing { .. } => ReportInputErrorKind::InputFileMissing,
            Self::InputFileEmpty { .. } => ReportInputErrorKind::InputFileEmpty,
            Self::InputFileMalformedJson { .. } => ReportInputErrorKind::InputFileMalformedJson,
            Self::InputMissingRequiredField { .. } => {
                ReportInputErrorKind::InputMissingRequiredField
            }
            Self::Read { .. } => ReportInputErrorKind::Read,
        }
    }
}
