//! Driver configuration.
//!
//! The classic driver read a one-line template from `ENV:SANA2/magplip.config`; the same syntax
//! is accepted here (`MTU=1500 RETRIES=6 TIMEOUT=500 NOSPECIALSTATS`), either from a string or
//! from the `MAGPLIP_CONFIG` environment variable.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

pub const PLIP_DEFMTU: usize = 1500;
pub const PLIP_MINMTU: usize = 576;
pub const PLIP_MAXMTU: usize = 1500;
pub const PLIP_DEFBPS: u32 = 400_000;
pub const PLIP_DEFRETRIES: u32 = 6;
pub const PLIP_MAXRETRIES: u32 = 64;
pub const PLIP_DEFTIMEOUT: Duration = Duration::from_millis(500);
pub const PLIP_DEFPOLL: Duration = Duration::from_millis(10);

pub const CONFIG_ENV_VAR: &str = "MAGPLIP_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub mtu: usize,
    /// Bit rate reported by `S2_DEVICEQUERY`. Purely informational.
    pub bps: u32,
    /// Attempts per outgoing frame before the write fails.
    pub retries: u32,
    /// Handshake timeout handed to the link.
    pub timeout: Duration,
    /// How long the server task sleeps between link polls when idle.
    pub poll_interval: Duration,
    pub special_stats: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mtu: PLIP_DEFMTU,
            bps: PLIP_DEFBPS,
            retries: PLIP_DEFRETRIES,
            timeout: PLIP_DEFTIMEOUT,
            poll_interval: PLIP_DEFPOLL,
            special_stats: true,
        }
    }
}

impl DeviceConfig {
    /// Parse a configuration line on top of the defaults.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for token in line.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            };

            match (key.to_ascii_uppercase().as_str(), value) {
                ("MTU", Some(v)) => {
                    let mtu = parse_ranged("MTU", v, PLIP_MINMTU as u64, PLIP_MAXMTU as u64)?;
                cfg.mtu = mtu as usize;
                }
                ("BPS", Some(v)) => {
                    cfg.bps = parse_ranged("BPS", v, 1, u32::MAX as u64)? as u32;
                }
                ("RETRIES", Some(v)) => {
                    cfg.retries = parse_ranged("RETRIES", v, 1, PLIP_MAXRETRIES as u64)? as u32;
                }
                ("TIMEOUT", Some(v)) => {
                    cfg.timeout = Duration::from_millis(parse_ranged("TIMEOUT", v, 1, 60_000)?);
                }
                ("POLL", Some(v)) => {
                    cfg.poll_interval = Duration::from_millis(parse_ranged("POLL", v, 1, 1_000)?);
                }
                ("NOSPECIALSTATS", None) => cfg.special_stats = false,
                _ => return Err(ConfigError::UnknownKey(token.to_string())),
            }
        }
        Ok(cfg)
    }

    /// Load from `MAGPLIP_CONFIG`, falling back to defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(CONFIG_ENV_VAR) {
            Ok(line) => Self::parse(&line),
            Err(_) => Ok(Self::default()),
        }
    }
}

fn parse_ranged(key: &'static str, value: &str, min: u64, max: u64) -> Result<u64, ConfigError> {
    let parsed: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })?;
    if !(min..=max).contains(&parsed) {
        return Err(ConfigError::OutOfRange {
            key,
            value: parsed,
            min,
            max,
        });
    }
    Ok(parsed)
}
