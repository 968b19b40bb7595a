use std::time::Duration;

use thiserror::Error;

/// Failure talking to the remote log source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source asked us to slow down
    #[error("throttled by CloudWatch Logs: {message}")]
    Throttled { message: String },

    /// Network trouble, 5xx responses and anything else worth retrying
    #[error("transient CloudWatch Logs failure: {message}")]
    Transient { message: String },

    /// The query did not finish within the configured timeout
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be decoded
    #[error("malformed response from aws cli: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("log group '{group}' not found")]
    NotFound { group: String },

    /// One of the named streams no longer exists (or never did)
    #[error("log stream not found in log group '{group}'{}", queried(.streams))]
    StreamNotFound { group: String, streams: Vec<String> },

    #[error("access denied for log group '{group}': {message}")]
    AccessDenied { group: String, message: String },

    #[error("invalid request for log group '{group}': {message}")]
    InvalidRequest { group: String, message: String },

    /// The `aws` binary could not be started at all
    #[error("failed to run the aws cli (is it installed and on PATH?): {0}")]
    CliUnavailable(#[source] std::io::Error),
}

impl SourceError {
    /// Whether retrying the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Transient { .. } | Self::Timeout(_) | Self::Decode(_)
        )
    }

    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Classify a failed `aws logs ...` invocation from its stderr
    pub fn from_cli_stderr(group: &str, stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let group = group.to_string();

        if contains_any(&message, &["ThrottlingException", "Rate exceeded", "TooManyRequests"]) {
            Self::Throttled { message }
        } else if message.contains("ResourceNotFoundException") {
            if message.contains("log stream") {
                Self::StreamNotFound {
                    group,
                    streams: Vec::new(),
                }
            } else {
                Self::NotFound { group }
            }
        } else if contains_any(
            &message,
            &[
                "AccessDeniedException",
                "UnrecognizedClientException",
                "ExpiredToken",
                "InvalidSignatureException",
                "Unable to locate credentials",
                "The SSO session",
            ],
        ) {
            Self::AccessDenied { group, message }
        } else if contains_any(
            &message,
            &["InvalidParameterException", "ValidationException", "usage: aws"],
        ) {
            Self::InvalidRequest { group, message }
        } else {
            Self::Transient { message }
        }
    }

    /// Attach the stream names a failed query was restricted to
    pub fn for_streams(self, names: &[String]) -> Self {
        match self {
            Self::StreamNotFound { group, streams } if streams.is_empty() => {
                Self::StreamNotFound {
                    group,
                    streams: names.to_vec(),
                }
            }
            other => other,
        }
    }
}

fn queried(streams: &[String]) -> String {
    if streams.is_empty() {
        String::new()
    } else {
        format!(" (queried: {})", streams.join(", "))
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_throttling() {
        let err = SourceError::from_cli_stderr(
            "grp",
            "An error occurred (ThrottlingException) when calling the FilterLogEvents operation (reached max retries: 2): Rate exceeded\n",
        );
        assert!(err.is_throttle());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_not_found_is_fatal() {
        let err = SourceError::from_cli_stderr(
            "/ecs/web",
            "An error occurred (ResourceNotFoundException) when calling the FilterLogEvents operation: The specified log group does not exist.",
        );
        assert!(matches!(&err, SourceError::NotFound { group } if group == "/ecs/web"));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("/ecs/web"));
    }

    #[test]
    fn test_classify_missing_stream() {
        let err = SourceError::from_cli_stderr(
            "/ecs/web",
            "An error occurred (ResourceNotFoundException) when calling the FilterLogEvents operation: The specified log stream does not exist.",
        );
        assert!(matches!(&err, SourceError::StreamNotFound { group, .. } if group == "/ecs/web"));
        assert!(!err.is_retryable());
        assert!(!err.to_string().contains("log group '/ecs/web' not found"));

        let err = err.for_streams(&["web/abc".to_string(), "web/typo".to_string()]);
        assert_eq!(
            err.to_string(),
            "log stream not found in log group '/ecs/web' (queried: web/abc, web/typo)"
        );
    }

    #[test]
    fn test_for_streams_leaves_other_errors_alone() {
        let err = SourceError::NotFound {
            group: "grp".to_string(),
        }
        .for_streams(&["a".to_string()]);
        assert_eq!(err.to_string(), "log group 'grp' not found");
    }

    #[test]
    fn test_classify_auth_failures() {
        for stderr in [
            "An error occurred (AccessDeniedException) when calling the FilterLogEvents operation",
            "An error occurred (ExpiredTokenException) when calling the FilterLogEvents operation",
            "Unable to locate credentials. You can configure credentials by running \"aws configure\".",
        ] {
            let err = SourceError::from_cli_stderr("grp", stderr);
            assert!(matches!(err, SourceError::AccessDenied { .. }), "{stderr}");
        }
    }

    #[test]
    fn test_classify_unknown_is_transient() {
        let err = SourceError::from_cli_stderr(
            "grp",
            "Could not connect to the endpoint URL: \"https://logs.us-east-1.amazonaws.com/\"",
        );
        assert!(matches!(err, SourceError::Transient { .. }));
        assert!(err.is_retryable());
        assert!(!err.is_throttle());
    }
}
