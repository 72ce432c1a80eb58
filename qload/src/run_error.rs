use qload_report::ReportInputError;

use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
    ReportInput(ReportInputError),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
            Self::ReportInput(e) => e.kind().into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => write!(f, "{e:#}"),
            Self::ReportInput(e) => write!(f, "{}: {e}", e.kind()),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => Some(e.as_ref()),
            Self::ReportInput(e) => Some(e),
        }
    }
}

impl From<ReportInputError> for RunError {
    fn from(e: ReportInputError) -> Self {
        Self::ReportInput(e)
    }
}
