//! Optional config from .assetryrc or ~/.assetryrc (JSON). Merged with env and CLI.
//!
//! The core only consumes resolved values (`Settings`); this module is the one place
//! that turns raw preferences into a validated `GcPolicy`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Months, Utc};
use serde::Deserialize;

use crate::error::{AssetError, Result};

pub const CONFIG_FILE: &str = ".assetryrc";
pub const DEFAULT_BUILD_TOOL: &str = "bun";
pub const DEFAULT_PREFIX: &str = "/assets";
pub const DEFAULT_GC_INTERVAL: i64 = 1;
pub const DEFAULT_GC_UNIT: &str = "months";

/// Raw preferences from file. Env and CLI override these.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub cache_dir: Option<String>,
    pub gc_interval: Option<i64>,
    pub gc_interval_unit: Option<String>,
    pub build_tool: Option<String>,
    pub prefix: Option<String>,
}

/// Fully resolved values the core runs with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub gc: GcPolicy,
    pub build_tool: String,
    pub prefix: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcUnit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl GcUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "years" => Ok(GcUnit::Years),
            "months" => Ok(GcUnit::Months),
            "weeks" => Ok(GcUnit::Weeks),
            "days" => Ok(GcUnit::Days),
            "hours" => Ok(GcUnit::Hours),
            "minutes" => Ok(GcUnit::Minutes),
            "seconds" => Ok(GcUnit::Seconds),
            other => Err(AssetError::config(
                "gc_interval_unit",
                format!(
                    "unknown unit {:?} (expected years, months, weeks, days, hours, minutes or seconds)",
                    other
                ),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GcUnit::Years => "years",
            GcUnit::Months => "months",
            GcUnit::Weeks => "weeks",
            GcUnit::Days => "days",
            GcUnit::Hours => "hours",
            GcUnit::Minutes => "minutes",
            GcUnit::Seconds => "seconds",
        }
    }
}

/// How often the content store may be garbage-collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcPolicy {
    interval: u32,
    unit: GcUnit,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_GC_INTERVAL as u32,
            unit: GcUnit::Months,
        }
    }
}

impl GcPolicy {
    /// Validate raw values. Non-positive intervals and unknown units are fatal.
    pub fn new(interval: i64, unit: &str) -> Result<Self> {
        if interval <= 0 {
            return Err(AssetError::config(
                "gc_interval",
                format!("must be a positive integer, got {}", interval),
            ));
        }
        let interval = u32::try_from(interval)
            .map_err(|_| AssetError::config("gc_interval", format!("{} is too large", interval)))?;
        Ok(Self {
            interval,
            unit: GcUnit::parse(unit)?,
        })
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn unit(&self) -> GcUnit {
        self.unit
    }

    /// The earliest instant at which a GC after `last` is due.
    pub fn next_due(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let n = self.interval;
        match self.unit {
            GcUnit::Years => last.checked_add_months(Months::new(n.checked_mul(12)?)),
            GcUnit::Months => last.checked_add_months(Months::new(n)),
            GcUnit::Weeks => last.checked_add_signed(Duration::weeks(n as i64)),
            GcUnit::Days => last.checked_add_signed(Duration::days(n as i64)),
            GcUnit::Hours => last.checked_add_signed(Duration::hours(n as i64)),
            GcUnit::Minutes => last.checked_add_signed(Duration::minutes(n as i64)),
            GcUnit::Seconds => last.checked_add_signed(Duration::seconds(n as i64)),
        }
    }

    /// Whether the interval since `last` has elapsed at `now`. An interval too large to
    /// represent never elapses.
    pub fn is_due(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_due(last).map(|due| now >= due).unwrap_or(false)
    }
}

impl std::fmt::Display for GcPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.interval, self.unit.name())
    }
}

/// Load config from .assetryrc in dir, then ~/.assetryrc. A missing file means defaults;
/// a file that exists but isn't valid JSON is an error.
pub fn load_config(dir: &Path) -> Result<Config> {
    let mut candidates = vec![dir.join(CONFIG_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(CONFIG_FILE));
    }
    for path in &candidates {
        if path.is_file() {
            let s = std::fs::read_to_string(path)?;
            return serde_json::from_str(&s).map_err(|e| {
                AssetError::config(CONFIG_FILE, format!("{}: {}", path.display(), e))
            });
        }
    }
    Ok(Config::default())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Default cache directory: ASSETRY_CACHE_DIR if set, else `<platform cache dir>/assetry`.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dir) = env_nonempty("ASSETRY_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("assetry")
}

impl Config {
    /// Apply env overrides and defaults, validating GC preferences.
    pub fn resolve(&self) -> Result<Settings> {
        let cache_dir = match (env_nonempty("ASSETRY_CACHE_DIR"), &self.cache_dir) {
            (Some(dir), _) => PathBuf::from(dir),
            (None, Some(dir)) => PathBuf::from(dir),
            (None, None) => default_cache_dir(),
        };

        let interval = match env_nonempty("ASSETRY_GC_INTERVAL") {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AssetError::config("gc_interval", format!("{:?} is not an integer", raw))
            })?,
            None => self.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL),
        };
        let unit = env_nonempty("ASSETRY_GC_INTERVAL_UNIT")
            .or_else(|| self.gc_interval_unit.clone())
            .unwrap_or_else(|| DEFAULT_GC_UNIT.to_string());

        let build_tool = env_nonempty("ASSETRY_BUILD_TOOL")
            .or_else(|| self.build_tool.clone())
            .unwrap_or_else(|| DEFAULT_BUILD_TOOL.to_string());

        let prefix = normalize_prefix(self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX));

        Ok(Settings {
            cache_dir,
            gc: GcPolicy::new(interval, &unit)?,
            build_tool,
            prefix,
        })
    }
}

/// `assets/` → `/assets`; empty → `` (mount at root).
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
