use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::CronGuard;

const PREFIX: &str = "CHAIRBOOK_";

/// Process configuration. Unset or unparseable variables fall back to their
/// defaults; a bad value is logged, not fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Venue civil time as an offset from UTC. Default is UTC-3.
    pub utc_offset_minutes: i32,
    pub cron_secret: Option<String>,
    pub production: bool,
    /// In-process sweep ticker. `None` leaves sweeping to an external cron.
    pub sweep_interval: Option<Duration>,
    /// Inclusive civil hours in which the ticker sweeps.
    pub sweep_window: (u32, u32),
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            utc_offset_minutes: -180,
            cron_secret: None,
            production: false,
            sweep_interval: None,
            sweep_window: (8, 20),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` receives the full variable name, e.g. `CHAIRBOOK_PORT`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            bind: get("BIND").unwrap_or(defaults.bind),
            port: parsed(get("PORT"), "PORT").unwrap_or(defaults.port),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            utc_offset_minutes: parsed(get("UTC_OFFSET_MINUTES"), "UTC_OFFSET_MINUTES")
                .unwrap_or(defaults.utc_offset_minutes),
            cron_secret: get("CRON_SECRET"),
            production: get("ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            sweep_interval: parsed::<u64>(get("SWEEP_INTERVAL_SECS"), "SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            sweep_window: get("SWEEP_WINDOW")
                .and_then(|raw| {
                    let window = parse_hour_window(&raw);
                    if window.is_none() {
                        tracing::warn!(value = %raw, "ignoring invalid {PREFIX}SWEEP_WINDOW");
                    }
                    window
                })
                .unwrap_or(defaults.sweep_window),
            compact_threshold: parsed(get("COMPACT_THRESHOLD"), "COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(get("METRICS_PORT"), "METRICS_PORT"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("chairbook.wal")
    }

    pub fn cron_guard(&self) -> CronGuard {
        CronGuard::new(self.cron_secret.clone(), self.production)
    }
}

fn parsed<T: FromStr>(value: Option<String>, name: &str) -> Option<T> {
    let raw = value?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(value = %raw, "ignoring invalid {PREFIX}{name}");
            None
        }
    }
}

/// `"8-20"` → `(8, 20)`.
fn parse_hour_window(raw: &str) -> Option<(u32, u32)> {
    let (start, end) = raw.split_once('-')?;
    let start: u32 = start.trim().parse().ok()?;
    let end: u32 = end.trim().parse().ok()?;
    (start <= end && end < 24).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/chairbook.wal"));
        assert!(!cfg.cron_guard().is_enforced());
    }

    #[test]
    fn reads_prefixed_variables() {
        let cfg = config(&[
            ("CHAIRBOOK_BIND", "127.0.0.1"),
            ("CHAIRBOOK_PORT", "9000"),
            ("CHAIRBOOK_DATA_DIR", "/var/lib/chairbook"),
            ("CHAIRBOOK_UTC_OFFSET_MINUTES", "60"),
            ("CHAIRBOOK_CRON_SECRET", "abc"),
            ("CHAIRBOOK_ENV", "Production"),
            ("CHAIRBOOK_SWEEP_INTERVAL_SECS", "3600"),
            ("CHAIRBOOK_SWEEP_WINDOW", "7-21"),
            ("CHAIRBOOK_COMPACT_THRESHOLD", "50"),
            ("CHAIRBOOK_METRICS_PORT", "9090"),
        ]);
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/chairbook"));
        assert_eq!(cfg.utc_offset_minutes, 60);
        assert!(cfg.production);
        assert!(cfg.cron_guard().is_enforced());
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.sweep_window, (7, 21));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9090));
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config(&[
            ("CHAIRBOOK_PORT", "eighty"),
            ("CHAIRBOOK_SWEEP_INTERVAL_SECS", "0"),
            ("CHAIRBOOK_SWEEP_WINDOW", "20-8"),
            ("CHAIRBOOK_ENV", "staging"),
        ]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sweep_interval, None);
        assert_eq!(cfg.sweep_window, (8, 20));
        assert!(!cfg.production);
    }

    #[test]
    fn hour_window_bounds() {
        assert_eq!(parse_hour_window("0-23"), Some((0, 23)));
        assert_eq!(parse_hour_window(" 9 - 18 "), Some((9, 18)));
        assert_eq!(parse_hour_window("8-24"), None);
        assert_eq!(parse_hour_window("8"), None);
    }
}
