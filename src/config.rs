//! Engine and server configuration.
//!
//! Values come from a JSON file ([`EngineConfig::load`]) or from
//! `CLINIC_SCHEDULER_*` environment variables ([`EngineConfig::from_env`]).

use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_PREFIX: &str = "CLINIC_SCHEDULER_";

const MINUTES_PER_DAY: i64 = 24 * 60;
/// Upper bound for `max_range_days`.
pub const RANGE_DAYS_LIMIT: u32 = 366;
/// Upper bound for `cancellation_notice_hours`.
pub const NOTICE_HOURS_LIMIT: i64 = 24 * 366;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid value for {key}: '{value}'")]
    Parse { key: String, value: String },
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of one bookable slot.
    pub slot_minutes: i64,
    /// Days offered when a caller does not pass a range.
    pub horizon_days: u32,
    /// Largest range a single slot query may cover.
    pub max_range_days: u32,
    /// Minimum notice a patient must give to cancel.
    pub cancellation_notice_hours: i64,
    /// The clinic's civil time zone as an offset from UTC.
    pub utc_offset_minutes: i32,
    /// Reject bookings that do not land on an offered slot.
    pub enforce_availability: bool,
    /// Facility used by outer layers when a request names none.
    pub default_facility_id: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            horizon_days: 14,
            max_range_days: 62,
            cancellation_notice_hours: 24,
            utc_offset_minutes: -3 * 60,
            enforce_availability: false,
            default_facility_id: None,
        }
    }
}

impl EngineConfig {
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn with_slot_minutes(mut self, minutes: i64) -> Self {
        self.slot_minutes = minutes;
        self
    }

    pub fn with_enforce_availability(mut self, enforce: bool) -> Self {
        self.enforce_availability = enforce;
        self
    }

    pub fn with_default_facility(mut self, facility_id: i64) -> Self {
        self.default_facility_id = Some(facility_id);
        self
    }

    /// Clamped to a day so an unvalidated config cannot overflow.
    pub fn slot_length(&self) -> Duration {
        Duration::minutes(self.slot_minutes.clamp(0, MINUTES_PER_DAY))
    }

    pub fn cancellation_notice(&self) -> Duration {
        Duration::hours(self.cancellation_notice_hours.clamp(0, NOTICE_HOURS_LIMIT))
    }

    pub fn timezone(&self) -> FixedOffset {
        self.offset().unwrap_or_else(|| Utc.fix())
    }

    fn offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_minutes <= 0 || MINUTES_PER_DAY % self.slot_minutes != 0 {
            return Err(ConfigError::Invalid(format!(
                "slot_minutes must be positive and divide a day evenly (got {})",
                self.slot_minutes
            )));
        }
        if self.horizon_days == 0 {
            return Err(ConfigError::Invalid("horizon_days must be at least 1".into()));
        }
        if self.max_range_days < self.horizon_days {
            return Err(ConfigError::Invalid(format!(
                "max_range_days ({}) must be at least horizon_days ({})",
                self.max_range_days, self.horizon_days
            )));
        }
        if self.max_range_days > RANGE_DAYS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_range_days cannot exceed {RANGE_DAYS_LIMIT} (got {})",
                self.max_range_days
            )));
        }
        if !(0..=NOTICE_HOURS_LIMIT).contains(&self.cancellation_notice_hours) {
            return Err(ConfigError::Invalid(format!(
                "cancellation_notice_hours must be between 0 and {NOTICE_HOURS_LIMIT} (got {})",
                self.cancellation_notice_hours
            )));
        }
        if self.offset().is_none() {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes out of range (got {})",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        if let Some(v) = read(&lookup, "SLOT_MINUTES")? {
            config.slot_minutes = v;
        }
        if let Some(v) = read(&lookup, "HORIZON_DAYS")? {
            config.horizon_days = v;
        }
        if let Some(v) = read(&lookup, "MAX_RANGE_DAYS")? {
            config.max_range_days = v;
        }
        if let Some(v) = read(&lookup, "CANCELLATION_NOTICE_HOURS")? {
            config.cancellation_notice_hours = v;
        }
        if let Some(v) = read(&lookup, "UTC_OFFSET_MINUTES")? {
            config.utc_offset_minutes = v;
        }
        if let Some(v) = read(&lookup, "ENFORCE_AVAILABILITY")? {
            config.enforce_availability = v;
        }
        if let Some(v) = read(&lookup, "DEFAULT_FACILITY_ID")? {
            config.default_facility_id = Some(v);
        }
        config.validate()?;
        Ok(config)
    }
}

fn read<F, T>(lookup: &F, suffix: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    match lookup(&key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Parse { key, value }),
    }
}

/// Settings for the HTTP binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database_path: PathBuf,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = read(&lookup, "HTTP_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
        let database_path = read::<_, PathBuf>(&lookup, "DB")?
            .unwrap_or_else(|| PathBuf::from("clinic-scheduler.db"));
        let engine = match lookup(&format!("{ENV_PREFIX}CONFIG")) {
            Some(path) if !path.trim().is_empty() => EngineConfig::load(path.trim())?,
            _ => EngineConfig::from_lookup(&lookup)?,
        };
        Ok(Self {
            addr,
            database_path,
            engine,
        })
    }
}
