use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use config::ConfigError;
use serde::{Deserialize, Deserializer};

use crate::model::{DAY, HOUR, MINUTE, Ms, SECOND};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Login names that act with the staff role.
    #[serde(default)]
    pub staff_users: Vec<String>,
}

/// Business rules for holds, cancellations and room bookings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub max_seats_per_reservation: usize,
    pub hold_ttl_secs: u64,
    /// Holds can no longer be placed or extended this close to the start.
    pub booking_cutoff_mins: u64,
    /// A hold never outlives `start - hold_cap_before_start_mins`.
    pub hold_cap_before_start_mins: u64,
    /// Customers can no longer cancel this close to the start.
    pub cancel_cutoff_hours: u64,
    pub min_advance_days: u64,
    #[serde(deserialize_with = "hh_mm")]
    pub opening_time: NaiveTime,
    #[serde(deserialize_with = "hh_mm")]
    pub closing_time: NaiveTime,
    /// Venue offset from UTC; operating hours are local to it.
    pub utc_offset_minutes: i32,
    pub slot_step_minutes: u32,
    /// 0 disables the periodic expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_seats_per_reservation: 5,
            hold_ttl_secs: 600,
            booking_cutoff_mins: 60,
            hold_cap_before_start_mins: 60,
            cancel_cutoff_hours: 24,
            min_advance_days: 3,
            opening_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
            closing_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset_minutes: 0,
            slot_step_minutes: 30,
            sweep_interval_secs: 5,
        }
    }
}

fn hh_mm<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map_err(|e| serde::de::Error::custom(format!("bad time of day {raw:?}: {e}")))
}

impl Policy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_seats_per_reservation == 0 {
            return Err(ConfigError::Message("max_seats_per_reservation must be > 0".into()));
        }
        if self.hold_ttl_secs == 0 {
            return Err(ConfigError::Message("hold_ttl_secs must be > 0".into()));
        }
        if self.slot_step_minutes == 0 {
            return Err(ConfigError::Message("slot_step_minutes must be > 0".into()));
        }
        if self.closing_time <= self.opening_time {
            return Err(ConfigError::Message(format!(
                "closing_time {} must be after opening_time {}",
                self.closing_time, self.opening_time
            )));
        }
        if FixedOffset::east_opt(self.utc_offset_minutes * 60).is_none() {
            return Err(ConfigError::Message(format!(
                "utc_offset_minutes {} out of range",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn hold_ttl_ms(&self) -> Ms {
        self.hold_ttl_secs as Ms * SECOND
    }

    pub fn booking_cutoff_ms(&self) -> Ms {
        self.booking_cutoff_mins as Ms * MINUTE
    }

    pub fn hold_cap_before_start_ms(&self) -> Ms {
        self.hold_cap_before_start_mins as Ms * MINUTE
    }

    pub fn cancel_cutoff_ms(&self) -> Ms {
        self.cancel_cutoff_hours as Ms * HOUR
    }

    pub fn min_advance_ms(&self) -> Ms {
        self.min_advance_days as Ms * DAY
    }

    pub fn slot_step_ms(&self) -> Ms {
        self.slot_step_minutes as Ms * MINUTE
    }

    pub fn venue_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

impl Config {
    /// Defaults, then an optional `marquee.toml`, then `MARQUEE__*` env vars
    /// (`__` separates sections, e.g. `MARQUEE__POLICY__HOLD_TTL_SECS`).
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("server.bind", "0.0.0.0")?
            .set_default("server.port", 5433_i64)?
            .set_default("server.password", "marquee")?
            .set_default("server.max_connections", 256_i64)?
            .add_source(config::File::with_name("marquee").required(false))
            .add_source(
                config::Environment::with_prefix("MARQUEE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.staff_users")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.policy.validate()?;
        Ok(config)
    }
}
