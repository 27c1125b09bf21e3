use serde::Serialize;

/// Error taxonomy shared by every pipeline component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ErrorCode {
    NotFound = 10,
    ValidationError = 11,
    Conflict = 12,
    NoMatchingProfile = 20,
    ExecutionFailure = 30,
    Timeout = 31,
    InjectionError = 40,
    Unavailable = 50,
    ConfigError = 60,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ValidationError => "validation_error",
            Self::Conflict => "conflict",
            Self::NoMatchingProfile => "no_matching_profile",
            Self::ExecutionFailure => "execution_failure",
            Self::Timeout => "timeout",
            Self::InjectionError => "injection_error",
            Self::Unavailable => "unavailable",
            Self::ConfigError => "config_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
