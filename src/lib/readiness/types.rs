use std::time::Duration;

/// What a task prints once it has finished booting.
#[derive(Debug, Clone)]
pub enum ReadinessPattern {
    /// Literal text anywhere in the cumulative logs.
    Substring(String),
    /// Glob matched against the last non-empty log line, trimmed.
    LastLineGlob(glob::Pattern),
}

impl ReadinessPattern {
    pub fn substring(text: impl Into<String>) -> Self {
        ReadinessPattern::Substring(text.into())
    }

    pub fn last_line_glob(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(ReadinessPattern::LastLineGlob(glob::Pattern::new(pattern)?))
    }

    pub fn matches(&self, logs: &str) -> bool {
        match self {
            ReadinessPattern::Substring(text) => logs.contains(text.as_str()),
            ReadinessPattern::LastLineGlob(pattern) => {
                let last = logs
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .last()
                    .unwrap_or("");
                pattern.matches(last)
            }
        }
    }
}

/// Sleep interval and optional bound for a poll loop. Without a timeout the
/// loop waits until the condition holds or the run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        PollPolicy {
            interval,
            timeout: None,
        }
    }

    pub fn bounded(interval: Duration, timeout: Duration) -> Self {
        PollPolicy {
            interval,
            timeout: Some(timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("timed out after {waited:?} waiting for {what}")]
    TimedOut { what: String, waited: Duration },

    #[error("cancelled while waiting for {what}")]
    Cancelled { what: String },
}
