use qload_report::ReportInputErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Invalid CLI/config/options (bad flags, invalid schedule, bad plan, invalid thresholds syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,

    /// `report`: the summary file does not exist.
    InputFileMissing = 50,

    /// `report`: the summary file is empty or whitespace only.
    InputFileEmpty = 51,

    /// `report`: the summary file is not valid JSON.
    InputFileMalformedJson = 52,

    /// `report`: the summary lacks the `metrics` object.
    InputMissingRequiredField = 53,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_thresholds(violations: usize) -> Self {
        if violations == 0 {
            Self::Success
        } else {
            Self::ThresholdsFailed
        }
    }
}

impl From<ReportInputErrorKind> for ExitCode {
    fn from(kind: ReportInputErrorKind) -> Self {
        match kind {
            ReportInputErrorKind::InputFileMissing => Self::InputFileMissing,
            ReportInputErrorKind::InputFileEmpty => Self::InputFileEmpty,
            ReportInputErrorKind::InputFileMalformedJson => Self::InputFileMalformedJson,
            ReportInputErrorKind::InputMissingRequiredField => Self::InputMissingRequiredField,
            ReportInputErrorKind::Read => Self::RuntimeError,
        }
    }
}
