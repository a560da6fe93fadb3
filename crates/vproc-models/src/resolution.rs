//! Target output resolutions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Target resolution for a processing job.
///
/// Serialized with the wire tags the upload frontend sends
/// (`original`, `640x360`, `1280x720`, `1920x1080`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
pub enum Resolution {
    /// Keep the source resolution
    #[default]
    #[serde(rename = "original")]
    Original,
    /// 640x360 (nHD)
    #[serde(rename = "640x360")]
    Sd360,
    /// 1280x720 (HD)
    #[serde(rename = "1280x720")]
    Hd720,
    /// 1920x1080 (Full HD)
    #[serde(rename = "1920x1080")]
    FullHd1080,
}

/// Error returned when a resolution tag is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized resolution: {0}")]
pub struct ParseResolutionError(pub String);

impl Resolution {
    /// Wire tag for this resolution.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Original => "original",
            Resolution::Sd360 => "640x360",
            Resolution::Hd720 => "1280x720",
            Resolution::FullHd1080 => "1920x1080",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Resolution::Original),
            "640x360" => Ok(Resolution::Sd360),
            "1280x720" => Ok(Resolution::Hd720),
            "1920x1080" => Ok(Resolution::FullHd1080),
            other => Err(ParseResolutionError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_tags() {
        for res in [
            Resolution::Original,
            Resolution::Sd360,
            Resolution::Hd720,
            Resolution::FullHd1080,
        ] {
            assert_eq!(res.as_str().parse::<Resolution>().unwrap(), res);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = "4k".parse::<Resolution>().unwrap_err();
        assert_eq!(err, ParseResolutionError("4k".to_string()));
    }

    #[test]
    fn test_serde_uses_wire_tags() {
        let json = serde_json::to_string(&Resolution::Hd720).unwrap();
        assert_eq!(json, "\"1280x720\"");
        let back: Resolution = serde_json::from_str("\"640x360\"").unwrap();
        assert_eq!(back, Resolution::Sd360);
    }
}
