//! Session configuration.
//!
//! Parses environment variables to configure the adapter, sensors and
//! sampling loop. Anything unset falls back to the documented default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::peripheral::mcp9808;
use crate::peripheral::rm3100::{self, CalibrationParams, PollConfig};

pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BUS_KHZ: u32 = 100;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to open and run a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Adapter device node
    pub port: String,
    pub mag_address: u8,
    /// Board-local temperature sensor, if fitted
    pub local_temp_address: Option<u8>,
    pub remote_temp_address: u8,
    pub calibration: CalibrationParams,
    pub poll: PollConfig,
    pub bus_khz: u32,
    /// Read the cycle-count registers back after writing them
    pub verify_cycle_counts: bool,
    /// Cadence of the demonstration sampling loop
    pub sample_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            mag_address: rm3100::DEFAULT_ADDRESS,
            local_temp_address: None,
            remote_temp_address: mcp9808::REMOTE_ADDRESS,
            calibration: CalibrationParams::default(),
            poll: PollConfig::default(),
            bus_khz: DEFAULT_BUS_KHZ,
            verify_cycle_counts: true,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Parse configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MAGDATA_PORT`: adapter device node (default: `/dev/ttyACM0`)
    /// - `MAGDATA_MAG_ADDR`: RM3100 address (default: 0x20)
    /// - `MAGDATA_LOCAL_TEMP_ADDR`: local MCP9808 address (default: none)
    /// - `MAGDATA_REMOTE_TEMP_ADDR`: remote MCP9808 address (default: 0x19)
    /// - `MAGDATA_CC`: cycle count for all axes, 1-800 (default: 400)
    /// - `MAGDATA_NOS`: averaging divisor (default: 60)
    /// - `MAGDATA_DRDY_DELAY_MS`: delay between DRDY polls (default: 10)
    /// - `MAGDATA_DRDY_MAX_POLLS`: DRDY polls before timing out (default: 100)
    /// - `MAGDATA_BUS_KHZ`: I2C bus frequency (default: 100)
    /// - `MAGDATA_VERIFY_CC`: read back cycle counts (default: true)
    /// - `MAGDATA_INTERVAL_MS`: sampling interval (default: 1000)
    ///
    /// Addresses accept decimal or `0x`-prefixed hex.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = get("MAGDATA_PORT").unwrap_or(defaults.port);

        let mag_address = match get("MAGDATA_MAG_ADDR") {
            Some(v) => parse_address("MAGDATA_MAG_ADDR", &v)?,
            None => defaults.mag_address,
        };
        let local_temp_address = match get("MAGDATA_LOCAL_TEMP_ADDR") {
            Some(v) if v.eq_ignore_ascii_case("none") => None,
            Some(v) => Some(parse_address("MAGDATA_LOCAL_TEMP_ADDR", &v)?),
            None => defaults.local_temp_address,
        };
        let remote_temp_address = match get("MAGDATA_REMOTE_TEMP_ADDR") {
            Some(v) => parse_address("MAGDATA_REMOTE_TEMP_ADDR", &v)?,
            None => defaults.remote_temp_address,
        };

        let cycle_count = parse_or("MAGDATA_CC", get("MAGDATA_CC"), rm3100::DEFAULT_CYCLE_COUNT)?;
        let nos = parse_or("MAGDATA_NOS", get("MAGDATA_NOS"), rm3100::DEFAULT_NOS)?;
        let calibration = CalibrationParams::uniform(cycle_count, nos)
            .map_err(|e| Error::Config(format!("MAGDATA_CC/MAGDATA_NOS: {e}")))?;

        let drdy_delay_ms = parse_or(
            "MAGDATA_DRDY_DELAY_MS",
            get("MAGDATA_DRDY_DELAY_MS"),
            defaults.poll.drdy_delay.as_millis() as u64,
        )?;
        let max_polls = parse_or(
            "MAGDATA_DRDY_MAX_POLLS",
            get("MAGDATA_DRDY_MAX_POLLS"),
            defaults.poll.max_polls,
        )?;
        if max_polls == 0 {
            return Err(Error::Config("MAGDATA_DRDY_MAX_POLLS must be at least 1".into()));
        }

        let bus_khz = parse_or("MAGDATA_BUS_KHZ", get("MAGDATA_BUS_KHZ"), defaults.bus_khz)?;

        let verify_cycle_counts = match get("MAGDATA_VERIFY_CC") {
            Some(v) => parse_bool("MAGDATA_VERIFY_CC", &v)?,
            None => defaults.verify_cycle_counts,
        };

        let interval_ms = parse_or(
            "MAGDATA_INTERVAL_MS",
            get("MAGDATA_INTERVAL_MS"),
            defaults.sample_interval.as_millis() as u64,
        )?;
        if interval_ms == 0 {
            return Err(Error::Config("MAGDATA_INTERVAL_MS must be non-zero".into()));
        }

        Ok(Self {
            port,
            mag_address,
            local_temp_address,
            remote_temp_address,
            calibration,
            poll: PollConfig {
                drdy_delay: Duration::from_millis(drdy_delay_ms),
                max_polls,
            },
            bus_khz,
            verify_cycle_counts,
            sample_interval: Duration::from_millis(interval_ms),
        })
    }
}

fn parse_or<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse()
            .map_err(|e| Error::Config(format!("{name}={v:?}: {e}"))),
        None => Ok(default),
    }
}

/// Parse a 7-bit I2C address given in decimal or `0x` hex.
fn parse_address(name: &str, value: &str) -> Result<u8> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };

    match parsed {
        Ok(addr) if addr <= 0x7F => Ok(addr),
        Ok(addr) => Err(Error::Config(format!(
            "{name}: 0x{addr:02X} is not a 7-bit address"
        ))),
        Err(e) => Err(Error::Config(format!("{name}={value:?}: {e}"))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{name}={value:?}: expected a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 11] = [
        "MAGDATA_PORT",
        "MAGDATA_MAG_ADDR",
        "MAGDATA_LOCAL_TEMP_ADDR",
        "MAGDATA_REMOTE_TEMP_ADDR",
        "MAGDATA_CC",
        "MAGDATA_NOS",
        "MAGDATA_DRDY_DELAY_MS",
        "MAGDATA_DRDY_MAX_POLLS",
        "MAGDATA_BUS_KHZ",
        "MAGDATA_VERIFY_CC",
        "MAGDATA_INTERVAL_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();

        let config = SessionConfig::from_env().unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.mag_address, 0x20);
        assert_eq!(config.local_temp_address, None);
        assert_eq!(config.remote_temp_address, 0x19);
        assert_eq!(config.calibration.gains(), [148, 148, 148]);
        assert_eq!(config.calibration.nos(), 60);
        assert_eq!(config.poll.drdy_delay, Duration::from_millis(10));
        assert_eq!(config.poll.max_polls, 100);
        assert_eq!(config.bus_khz, 100);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("MAGDATA_PORT", "/dev/ttyACM3");
        std::env::set_var("MAGDATA_MAG_ADDR", "0x23");
        std::env::set_var("MAGDATA_LOCAL_TEMP_ADDR", "24");
        std::env::set_var("MAGDATA_CC", "200");
        std::env::set_var("MAGDATA_NOS", "30");
        std::env::set_var("MAGDATA_DRDY_DELAY_MS", "2");
        std::env::set_var("MAGDATA_BUS_KHZ", "400");
        std::env::set_var("MAGDATA_VERIFY_CC", "off");
        std::env::set_var("MAGDATA_INTERVAL_MS", "250");

        let config = SessionConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.port, "/dev/ttyACM3");
        assert_eq!(config.mag_address, 0x23);
        assert_eq!(config.local_temp_address, Some(0x18));
        assert_eq!(config.calibration.gains(), [74, 74, 74]);
        assert_eq!(config.calibration.nos(), 30);
        assert_eq!(config.poll.drdy_delay, Duration::from_millis(2));
        assert_eq!(config.bus_khz, 400);
        assert!(!config.verify_cycle_counts);
        assert_eq!(config.sample_interval, Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_cycle_count_out_of_range() {
        for bad in ["0", "801", "-5", "lots"] {
            clear_env();
            std::env::set_var("MAGDATA_CC", bad);
            let err = SessionConfig::from_env().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad}: {err}");
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        for (var, value) in [
            ("MAGDATA_MAG_ADDR", "0x80"),
            ("MAGDATA_REMOTE_TEMP_ADDR", "0xZZ"),
            ("MAGDATA_NOS", "0"),
            ("MAGDATA_DRDY_MAX_POLLS", "0"),
            ("MAGDATA_VERIFY_CC", "maybe"),
            ("MAGDATA_INTERVAL_MS", "0"),
        ] {
            clear_env();
            std::env::set_var(var, value);
            let err = SessionConfig::from_env().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{var}={value}: {err}");
        }
        clear_env();
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!(parse_address("A", "0x19").unwrap(), 0x19);
        assert_eq!(parse_address("A", "0X7f").unwrap(), 0x7F);
        assert_eq!(parse_address("A", "32").unwrap(), 0x20);
        assert!(parse_address("A", "128").is_err());
        assert!(parse_address("A", "256").is_err());
    }

    #[test]
    fn test_lookup_ignores_blank_values() {
        let config = SessionConfig::from_lookup(|name| match name {
            "MAGDATA_PORT" => Some("  ".into()),
            "MAGDATA_LOCAL_TEMP_ADDR" => Some("none".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.local_temp_address, None);
    }
}
