use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Not an episodes message")]
    ForeignNamespace,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing {what} for {action}")]
    MissingArgument {
        action: &'static str,
        what: &'static str,
    },

    #[error("Invalid mark time: {0}")]
    InvalidTime(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    #[error("Beacon transport unavailable: {0}")]
    Unavailable(String),

    #[error("Beacon request failed: {0}")]
    Request(String),
}
