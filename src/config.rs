//! Configuration types.
//!
//! Loaded once at service start and passed explicitly into the components
//! that need it. Nothing here is mutated after startup.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::scheduler::DailyWindow;
use crate::submission::UserId;

/// Longest accepted publish interval or grace period.
const MAX_SPAN: Duration = Duration::from_secs(365 * 24 * 3600);

/// Longest accepted retry delay, jitter, publish timeout or tick.
const MAX_STEP: Duration = Duration::from_secs(24 * 3600);

/// Moderator quorum thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumConfig {
    /// Approvals needed to pass.
    pub approve_threshold: u32,
    /// Rejections needed to fail.
    pub reject_threshold: u32,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            approve_threshold: 2,
            reject_threshold: 2,
        }
    }
}

/// Publish queue pacing and retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Minimum spacing between two publishes.
    pub interval: Duration,
    /// Optional time-of-day range in which releases may happen.
    pub daily_window: Option<DailyWindow>,
    /// Retries of the head slot before it is re-queued at the tail.
    pub max_retries: u32,
    /// First retry delay, doubled on every further failure.
    pub retry_base: Duration,
    /// Cap on a single retry delay.
    pub retry_max: Duration,
    /// Upper bound of the random jitter added to each retry delay.
    pub retry_jitter: Duration,
    /// Bound on a single publish call.
    pub publish_timeout: Duration,
    /// How often the ticker wakes up.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            daily_window: None,
            max_retries: 5,
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(300),
            retry_jitter: Duration::from_millis(250),
            publish_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Community retraction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalConfig {
    /// Reports that force a retraction.
    pub report_threshold: u32,
    /// Downvotes minus upvotes that force a retraction.
    pub net_downvote_threshold: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            report_threshold: 5,
            net_downvote_threshold: 10,
        }
    }
}

/// Who may cast moderator votes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModeratorSet {
    /// Anyone reaching the moderation surface.
    #[default]
    Anyone,
    Only(HashSet<UserId>),
}

impl ModeratorSet {
    pub fn contains(&self, user: UserId) -> bool {
        match self {
            Self::Anyone => true,
            Self::Only(ids) => ids.contains(&user),
        }
    }

    /// Parse a comma list of ids; `*` means anyone.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let entries: Vec<&str> = s
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() || entries.contains(&"*") {
            return Ok(Self::Anyone);
        }
        let ids = entries
            .into_iter()
            .map(|e| {
                e.parse::<UserId>().map_err(|_| ConfigError::InvalidValue {
                    key: "SPOTTED_MODERATORS".into(),
                    message: format!("'{e}' is not a user id"),
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self::Only(ids))
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub quorum: QuorumConfig,
    pub scheduler: SchedulerConfig,
    pub signals: SignalConfig,
    pub moderators: ModeratorSet,
    /// Grace period after which a published submission becomes stable.
    pub stable_after: Duration,
    pub db_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumConfig::default(),
            scheduler: SchedulerConfig::default(),
            signals: SignalConfig::default(),
            moderators: ModeratorSet::Anyone,
            stable_after: Duration::from_secs(24 * 3600),
            db_path: PathBuf::from("./data/spotted.db"),
        }
    }
}

impl PipelineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let q = &defaults.quorum;
        let quorum = QuorumConfig {
            approve_threshold: parse_or(&lookup, "SPOTTED_APPROVE_THRESHOLD", q.approve_threshold)?,
            reject_threshold: parse_or(&lookup, "SPOTTED_REJECT_THRESHOLD", q.reject_threshold)?,
        };

        let daily_window = match lookup("SPOTTED_DAILY_WINDOW") {
            Some(raw) if !raw.trim().is_empty() => Some(DailyWindow::parse(&raw).map_err(
                |message| ConfigError::InvalidValue {
                    key: "SPOTTED_DAILY_WINDOW".into(),
                    message,
                },
            )?),
            _ => None,
        };

        let d = &defaults.scheduler;
        let scheduler = SchedulerConfig {
            interval: secs_or(&lookup, "SPOTTED_PUBLISH_INTERVAL_SECS", d.interval)?,
            daily_window,
            max_retries: parse_or(&lookup, "SPOTTED_MAX_PUBLISH_RETRIES", d.max_retries)?,
            retry_base: secs_or(&lookup, "SPOTTED_RETRY_BASE_SECS", d.retry_base)?,
            retry_max: secs_or(&lookup, "SPOTTED_RETRY_MAX_SECS", d.retry_max)?,
            retry_jitter: Duration::from_millis(parse_or(
                &lookup,
                "SPOTTED_RETRY_JITTER_MS",
                d.retry_jitter.as_millis() as u64,
            )?),
            publish_timeout: secs_or(&lookup, "SPOTTED_PUBLISH_TIMEOUT_SECS", d.publish_timeout)?,
            tick_interval: Duration::from_millis(parse_or(
                &lookup,
                "SPOTTED_TICK_MILLIS",
                d.tick_interval.as_millis() as u64,
            )?),
        };

        let sig = &defaults.signals;
        let signals = SignalConfig {
            report_threshold: parse_or(&lookup, "SPOTTED_REPORT_THRESHOLD", sig.report_threshold)?,
            net_downvote_threshold: parse_or(
                &lookup,
                "SPOTTED_NET_DOWNVOTE_THRESHOLD",
                sig.net_downvote_threshold,
            )?,
        };

        let moderators = match lookup("SPOTTED_MODERATORS") {
            Some(raw) => ModeratorSet::parse(&raw)?,
            None => ModeratorSet::Anyone,
        };

        let config = Self {
            quorum,
            scheduler,
            signals,
            moderators,
            stable_after: secs_or(&lookup, "SPOTTED_STABLE_AFTER_SECS", defaults.stable_after)?,
            db_path: lookup("SPOTTED_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall, overflow or trivially short-circuit
    /// the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        };

        if self.quorum.approve_threshold == 0 {
            return Err(invalid("SPOTTED_APPROVE_THRESHOLD", "must be at least 1"));
        }
        if self.quorum.reject_threshold == 0 {
            return Err(invalid("SPOTTED_REJECT_THRESHOLD", "must be at least 1"));
        }
        if self.signals.report_threshold == 0 {
            return Err(invalid("SPOTTED_REPORT_THRESHOLD", "must be at least 1"));
        }
        if self.signals.net_downvote_threshold < 1 {
            return Err(invalid("SPOTTED_NET_DOWNVOTE_THRESHOLD", "must be at least 1"));
        }
        if self.scheduler.interval.is_zero() {
            return Err(invalid("SPOTTED_PUBLISH_INTERVAL_SECS", "must be positive"));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(invalid("SPOTTED_TICK_MILLIS", "must be positive"));
        }
        if self.scheduler.retry_base > self.scheduler.retry_max {
            return Err(invalid(
                "SPOTTED_RETRY_BASE_SECS",
                "must not exceed SPOTTED_RETRY_MAX_SECS",
            ));
        }

        let spans = [
            ("SPOTTED_PUBLISH_INTERVAL_SECS", self.scheduler.interval, MAX_SPAN),
            ("SPOTTED_STABLE_AFTER_SECS", self.stable_after, MAX_SPAN),
            ("SPOTTED_RETRY_MAX_SECS", self.scheduler.retry_max, MAX_STEP),
            ("SPOTTED_RETRY_JITTER_MS", self.scheduler.retry_jitter, MAX_STEP),
            ("SPOTTED_PUBLISH_TIMEOUT_SECS", self.scheduler.publish_timeout, MAX_STEP),
            ("SPOTTED_TICK_MILLIS", self.scheduler.tick_interval, MAX_STEP),
        ];
        for (key, value, max) in spans {
            if value > max {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("must be at most {}s", max.as_secs()),
                });
            }
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("cannot parse '{raw}'"),
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
