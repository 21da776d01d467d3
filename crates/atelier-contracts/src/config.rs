use std::env;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::naming::EDITED_PREFIX;

/// Images one generate request may return (one 2x2 composite).
pub const GENERATE_IMAGE_CAP: usize = 4;
/// Images one edit request may return.
pub const EDIT_IMAGE_CAP: usize = 1;
/// Slack subtracted from a chat request's start time before filtering by
/// modification time.
pub const CHAT_SINCE_SLACK: Duration = Duration::from_secs(5);
/// Pause before a chat turn's single listing.
pub const CHAT_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_POLL_MAX_WAIT: Duration = Duration::from_secs(90);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_TRIM_THRESHOLD: u8 = 240;
pub const DEFAULT_TRIM_PADDING: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimSettings {
    /// A pixel with any channel below this value counts as content.
    pub threshold: u8,
    pub padding: u32,
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_TRIM_THRESHOLD,
            padding: DEFAULT_TRIM_PADDING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBounds {
    pub max_wait: Duration,
    pub interval: Duration,
}

impl Default for PollBounds {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_POLL_MAX_WAIT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// One bounded wait for artifacts to appear in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub prefix: String,
    pub min_count: usize,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Only artifacts modified at or after this instant are eligible.
    pub since: Option<SystemTime>,
}

impl PollRequest {
    pub fn generation(bounds: PollBounds) -> Self {
        Self {
            prefix: String::new(),
            min_count: GENERATE_IMAGE_CAP,
            max_wait: bounds.max_wait,
            poll_interval: bounds.interval,
            since: None,
        }
    }

    pub fn edit(bounds: PollBounds) -> Self {
        Self {
            prefix: EDITED_PREFIX.to_string(),
            min_count: EDIT_IMAGE_CAP,
            max_wait: bounds.max_wait,
            poll_interval: bounds.interval,
            since: None,
        }
    }

    /// A single listing of anything written since shortly before the chat
    /// request began.
    pub fn chat(request_started: SystemTime) -> Self {
        Self {
            prefix: String::new(),
            min_count: GENERATE_IMAGE_CAP,
            max_wait: Duration::ZERO,
            poll_interval: Duration::ZERO,
            since: Some(
                request_started
                    .checked_sub(CHAT_SINCE_SLACK)
                    .unwrap_or(SystemTime::UNIX_EPOCH),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub upload_dir: PathBuf,
    pub image_model: String,
    pub gemini_model: String,
    pub poll: PollBounds,
    pub trim: TrimSettings,
    pub events_path: Option<PathBuf>,
    pub bind: String,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            image_model: "dryrun".to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            poll: PollBounds::default(),
            trim: TrimSettings::default(),
            events_path: None,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let has_gemini_key =
            non_empty_env("GEMINI_API_KEY").is_some() || non_empty_env("GOOGLE_API_KEY").is_some();
        Self {
            upload_dir: non_empty_env("ATELIER_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            image_model: non_empty_env("ATELIER_IMAGE_MODEL").unwrap_or_else(|| {
                if has_gemini_key {
                    "gemini".to_string()
                } else {
                    defaults.image_model
                }
            }),
            gemini_model: non_empty_env("ATELIER_GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            poll: PollBounds {
                max_wait: env_secs("ATELIER_POLL_MAX_WAIT_SECS").unwrap_or(defaults.poll.max_wait),
                interval: env_secs("ATELIER_POLL_INTERVAL_SECS").unwrap_or(defaults.poll.interval),
            },
            trim: TrimSettings {
                threshold: non_empty_env("ATELIER_TRIM_THRESHOLD")
                    .and_then(|raw| raw.parse::<u8>().ok())
                    .unwrap_or(defaults.trim.threshold),
                padding: non_empty_env("ATELIER_TRIM_PADDING")
                    .and_then(|raw| raw.parse::<u32>().ok())
                    .unwrap_or(defaults.trim.padding),
            },
            events_path: non_empty_env("ATELIER_EVENTS").map(PathBuf::from),
            bind: non_empty_env("ATELIER_BIND").unwrap_or(defaults.bind),
        }
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    non_empty_env(key).and_then(|raw| parse_secs(&raw))
}

pub fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn default_policies_match_request_kinds() {
        let bounds = PollBounds::default();
        let generation = PollRequest::generation(bounds);
        assert_eq!(generation.prefix, "");
        assert_eq!(generation.min_count, 4);
        assert_eq!(generation.max_wait, Duration::from_secs(90));
        assert_eq!(generation.poll_interval, Duration::from_secs(2));

        let edit = PollRequest::edit(bounds);
        assert_eq!(edit.prefix, "edited_");
        assert_eq!(edit.min_count, 1);
        assert_eq!(edit.since, None);
    }

    #[test]
    fn chat_policy_subtracts_slack() {
        let started = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let request = PollRequest::chat(started);
        assert_eq!(
            request.since,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(995))
        );
        assert_eq!(request.max_wait, Duration::ZERO);
    }

    #[test]
    fn parse_secs_accepts_fractions_and_rejects_negatives() {
        assert_eq!(parse_secs("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_secs("-2"), None);
        assert_eq!(parse_secs("soon"), None);
    }

    #[test]
    fn trim_defaults() {
        let trim = TrimSettings::default();
        assert_eq!(trim.threshold, 240);
        assert_eq!(trim.padding, 5);
    }
}
