//! Submit-request shape shared by the enqueue API surface and the producer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{ParseResolutionError, Resolution};

/// Request to submit a processing job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SubmitRequest {
    /// Owning principal; zero is not a valid owner
    #[validate(range(min = 1))]
    pub owner_id: u64,

    /// Project name grouping the input videos
    #[validate(length(min = 1, max = 128))]
    pub project_name: String,

    /// Target resolution tag; absent or empty falls back to `original`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    /// Dequeue priority; lower values dequeue first
    #[serde(default)]
    pub priority: i32,
}

impl SubmitRequest {
    /// Build a request with the default resolution and priority.
    pub fn new(owner_id: u64, project_name: impl Into<String>) -> Self {
        Self {
            owner_id,
            project_name: project_name.into(),
            resolution: None,
            priority: 0,
        }
    }

    /// Set the resolution tag.
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Resolve the resolution tag, defaulting absent/empty to `original`.
    pub fn parse_resolution(&self) -> Result<Resolution, ParseResolutionError> {
        match self.resolution.as_deref() {
            None | Some("") => Ok(Resolution::Original),
            Some(tag) => tag.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let req = SubmitRequest::new(5, "trip").with_resolution("1280x720");
        assert!(req.validate().is_ok());
        assert_eq!(req.parse_resolution().unwrap(), Resolution::Hd720);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let req = SubmitRequest::new(0, "trip");
        assert!(req.validate().is_err());

        let req = SubmitRequest::new(5, "");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_resolution_defaults_to_original() {
        let req = SubmitRequest::new(5, "trip");
        assert_eq!(req.parse_resolution().unwrap(), Resolution::Original);

        let req = SubmitRequest::new(5, "trip").with_resolution("");
        assert_eq!(req.parse_resolution().unwrap(), Resolution::Original);
    }

    #[test]
    fn test_unknown_resolution_rejected() {
        let req = SubmitRequest::new(5, "trip").with_resolution("720p");
        assert!(req.parse_resolution().is_err());
    }
}
