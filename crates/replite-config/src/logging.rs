use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output format for server log lines.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event, for log shippers.
    #[default]
    Json,
    /// Single-line human-readable output for terminals.
    Compact,
}

/// Error returned when text does not name a [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;
