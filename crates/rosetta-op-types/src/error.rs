use thiserror::Error;

/// Errors raised while turning environment variables into a [`crate::Configuration`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be populated")]
    Missing { name: &'static str },

    #[error("{value} is not a valid mode")]
    InvalidMode { value: String },

    #[error("{value} is not a valid network")]
    InvalidNetwork { value: String },

    #[error("unable to parse {name}={value}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(name: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::Invalid {
            name,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
