//! Classifying work item errors into failure categories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix the timeout sweep writes in front of a timed-out item's error.
pub const TIMEOUT_MARKER: &str = "[TIMEOUT]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    EncoderFailure,
    ResourceExhaustion,
    MemoryPressure,
    MediaFailure,
    ExternalApi,
    ContentValidation,
    MissingFile,
    Unknown,
}

/// Substrings checked in order; the first category with a match wins.
const RULES: &[(FailureCategory, &[&str])] = &[
    (FailureCategory::Timeout, &[TIMEOUT_MARKER, "timed out", "deadline exceeded"]),
    (FailureCategory::EncoderFailure, &["ffmpeg", "encoder", "codec", "muxer"]),
    (
        FailureCategory::ResourceExhaustion,
        &["too many open files", "resource temporarily unavailable", "no space left", "eagain"],
    ),
    (
        FailureCategory::MemoryPressure,
        &["out of memory", "oom-kill", "oomkilled", "cannot allocate memory", "heap limit"],
    ),
    (
        FailureCategory::MediaFailure,
        &["image", "thumbnail", "render", "audio", "voiceover", "subtitle"],
    ),
    (
        FailureCategory::ExternalApi,
        // Status codes only count next to an HTTP context word, so numbers
        // inside other messages (offsets, sizes) do not match.
        &[
            "rate limit",
            "too many requests",
            "status 429",
            "status 500",
            "status 502",
            "status 503",
            "status 504",
            "http 429",
            "http 500",
            "http 502",
            "http 503",
            "http 504",
            "internal server error",
            "bad gateway",
            "gateway timeout",
            "connection refused",
            "connection reset",
            "service unavailable",
            "api error",
        ],
    ),
    (
        FailureCategory::ContentValidation,
        &["invalid json", "validation", "malformed", "schema", "parse error", "unexpected token"],
    ),
    (
        FailureCategory::MissingFile,
        &["no such file", "file not found", "enoent", "missing asset"],
    ),
];

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::EncoderFailure => "encoder_failure",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::MemoryPressure => "memory_pressure",
            Self::MediaFailure => "media_failure",
            Self::ExternalApi => "external_api",
            Self::ContentValidation => "content_validation",
            Self::MissingFile => "missing_file",
            Self::Unknown => "unknown",
        }
    }

    pub fn retryable(&self) -> bool {
        !matches!(self, Self::ContentValidation | Self::MissingFile)
    }

    /// Retries allowed for this category under a configured maximum.
    ///
    /// A timeout always gets at least one retry: a starved process is not a
    /// wrong one.
    pub fn retry_limit(&self, max_retries: u32) -> u32 {
        match self {
            Self::Timeout => max_retries.max(1),
            _ if self.retryable() => max_retries,
            _ => 0,
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Timeout => "Check worker capacity; the job was likely starved of resources",
            Self::EncoderFailure => "Inspect encoder logs and the source media format",
            Self::ResourceExhaustion => "Lower gate concurrency or free disk and file handles",
            Self::MemoryPressure => "Reduce concurrent renders or raise the worker memory limit",
            Self::MediaFailure => "Review the generated assets for this job",
            Self::ExternalApi => "Check the upstream service status and rate limits",
            Self::ContentValidation => "Review the proposal; the generated content was rejected",
            Self::MissingFile => "Verify asset paths and deployment configuration",
            Self::Unknown => "Inspect the full job error",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub category: FailureCategory,
    pub retryable: bool,
    pub reason: String,
    pub suggested_action: &'static str,
}

/// Classify an error message. An empty or unmatched message is `Unknown`.
pub fn diagnose(error: &str) -> Diagnosis {
    let lowered = error.to_lowercase();
    let matched = RULES.iter().find_map(|(category, needles)| {
        needles
            .iter()
            .find(|needle| lowered.contains(&needle.to_lowercase()))
            .map(|needle| (*category, *needle))
    });

    let (category, reason) = match matched {
        Some((category, needle)) => (category, format!("matched \"{needle}\"")),
        None => (FailureCategory::Unknown, "no known failure pattern".to_string()),
    };
    Diagnosis {
        category,
        retryable: category.retryable(),
        reason,
        suggested_action: category.suggested_action(),
    }
}

/// First `max_chars` characters of `error`, without splitting a character.
pub fn excerpt(error: &str, max_chars: usize) -> String {
    match error.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &error[..cut]),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_match_in_order() {
        let cases = [
            ("[TIMEOUT] stuck after 41 min (ffmpeg)", FailureCategory::Timeout),
            ("ffmpeg exited with status 1", FailureCategory::EncoderFailure),
            ("Too many open files (os error 24)", FailureCategory::ResourceExhaustion),
            ("worker killed: out of memory", FailureCategory::MemoryPressure),
            ("thumbnail generation failed", FailureCategory::MediaFailure),
            ("upstream returned 503 Service Unavailable", FailureCategory::ExternalApi),
            ("model output was malformed", FailureCategory::ContentValidation),
            ("No such file or directory: intro.mp3", FailureCategory::MissingFile),
            ("something odd happened", FailureCategory::Unknown),
            ("", FailureCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(diagnose(message).category, expected, "{message}");
        }
    }

    #[test]
    fn test_status_codes_need_http_context() {
        let cases = [
            ("request failed with status 429", FailureCategory::ExternalApi),
            ("HTTP 502 Bad Gateway from writer", FailureCategory::ExternalApi),
            ("upstream: 500 Internal Server Error", FailureCategory::ExternalApi),
            ("validation failed at offset 1500", FailureCategory::ContentValidation),
            ("caption exceeds 500 characters", FailureCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(diagnose(message).category, expected, "{message}");
        }
        assert!(!diagnose("validation failed at offset 1500").retryable);
    }

    #[test]
    fn test_retryability() {
        assert!(diagnose("rate limit exceeded").retryable);
        assert!(diagnose("mystery").retryable);
        assert!(!diagnose("validation failed: empty caption").retryable);
        assert!(!diagnose("file not found").retryable);
    }

    #[test]
    fn test_timeout_always_gets_one_retry() {
        assert_eq!(FailureCategory::Timeout.retry_limit(0), 1);
        assert_eq!(FailureCategory::Timeout.retry_limit(2), 2);
        assert_eq!(FailureCategory::ExternalApi.retry_limit(2), 2);
        assert_eq!(FailureCategory::MissingFile.retry_limit(2), 0);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
    }
}
