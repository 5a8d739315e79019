// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration read once from `BEACON_*` environment variables.
//!
//! Unset variables take their defaults. Unparsable values are reported and also fall back to
//! the default, so a typo never keeps a node from joining; only impossible combinations are
//! rejected by [`Config::validate`].

use std::env;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::error;

use crate::attributes::{ReceiverAttributes, SenderAttributes};
use crate::constants::{
    DEFAULT_LOGGING_PORT, DEFAULT_MULTICAST_TTL, DEFAULT_REGISTRATION_ADDRESS,
    DEFAULT_REGISTRATION_PORT, DEFAULT_REGISTRATION_REFRESH, DEFAULT_REGISTRATION_TIMEOUT,
    DEFAULT_SOCKET_BUFFER_SIZE, DEFAULT_SWEEP_INTERVAL, MAX_DATAGRAM_SIZE,
};
use crate::errors::ConfigError;
use crate::frame;
use crate::logging::{LogFilter, SinkFilters};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub registration_address: Ipv4Addr,
    pub registration_port: u16,
    pub logging_address: Ipv4Addr,
    pub logging_port: u16,
    pub multicast_ttl: u32,
    pub broadcast: bool,
    pub loopback: bool,
    /// `0` keeps the OS default
    pub send_buffer_size: usize,
    /// `0` keeps the OS default
    pub receive_buffer_size: usize,
    pub max_datagram_size: usize,
    /// Bytes per second for announcements and log samples, `0` for unlimited
    pub bandwidth_limit: i64,
    pub registration_refresh: Duration,
    pub registration_timeout: Duration,
    pub sweep_interval: Duration,
    pub console_log_filter: LogFilter,
    pub file_log_filter: LogFilter,
    pub network_log_filter: LogFilter,
    /// Collect log records from every host, not only this one
    pub network_enabled: bool,
    pub log_dir: Option<PathBuf>,
    pub unit_name: Option<String>,
    pub hostname: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registration_address: DEFAULT_REGISTRATION_ADDRESS,
            registration_port: DEFAULT_REGISTRATION_PORT,
            logging_address: DEFAULT_REGISTRATION_ADDRESS,
            logging_port: DEFAULT_LOGGING_PORT,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            broadcast: false,
            loopback: true,
            send_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            receive_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            bandwidth_limit: 0,
            registration_refresh: DEFAULT_REGISTRATION_REFRESH,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            console_log_filter: LogFilter::console_default(),
            file_log_filter: LogFilter::verbose_default(),
            network_log_filter: LogFilter::verbose_default(),
            network_enabled: false,
            log_dir: None,
            unit_name: None,
            hostname: None,
            log_level: "info".to_string(),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                error!("Ignoring invalid value '{}' for {}: {}", raw, name, e);
                default
            }
        },
    }
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name).map(|raw| raw.trim().to_lowercase()) {
        None => default,
        Some(raw) => match raw.as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                error!("Ignoring invalid value '{}' for {}", raw, name);
                default
            }
        },
    }
}

fn parse_millis_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Duration {
    let millis = parse_or(lookup, name, u64::try_from(default.as_millis()).unwrap_or(u64::MAX));
    Duration::from_millis(millis)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let registration_address = parse_or(
            &lookup,
            "BEACON_REGISTRATION_ADDRESS",
            defaults.registration_address,
        );

        let config = Self {
            registration_address,
            registration_port: parse_or(
                &lookup,
                "BEACON_REGISTRATION_PORT",
                defaults.registration_port,
            ),
            logging_address: parse_or(&lookup, "BEACON_LOGGING_ADDRESS", registration_address),
            logging_port: parse_or(&lookup, "BEACON_LOGGING_PORT", defaults.logging_port),
            multicast_ttl: parse_or(&lookup, "BEACON_MULTICAST_TTL", defaults.multicast_ttl),
            broadcast: parse_bool_or(&lookup, "BEACON_BROADCAST", defaults.broadcast),
            loopback: parse_bool_or(&lookup, "BEACON_LOOPBACK", defaults.loopback),
            send_buffer_size: parse_or(&lookup, "BEACON_SNDBUF", defaults.send_buffer_size),
            receive_buffer_size: parse_or(&lookup, "BEACON_RCVBUF", defaults.receive_buffer_size),
            max_datagram_size: parse_or(
                &lookup,
                "BEACON_MAX_DATAGRAM_SIZE",
                defaults.max_datagram_size,
            ),
            bandwidth_limit: parse_or(&lookup, "BEACON_BANDWIDTH_LIMIT", defaults.bandwidth_limit),
            registration_refresh: parse_millis_or(
                &lookup,
                "BEACON_REGISTRATION_REFRESH_MS",
                defaults.registration_refresh,
            ),
            registration_timeout: parse_millis_or(
                &lookup,
                "BEACON_REGISTRATION_TIMEOUT_MS",
                defaults.registration_timeout,
            ),
            sweep_interval: parse_millis_or(
                &lookup,
                "BEACON_SWEEP_INTERVAL_MS",
                defaults.sweep_interval,
            ),
            console_log_filter: parse_or(
                &lookup,
                "BEACON_CONSOLE_LOG_FILTER",
                defaults.console_log_filter,
            ),
            file_log_filter: parse_or(&lookup, "BEACON_FILE_LOG_FILTER", defaults.file_log_filter),
            network_log_filter: parse_or(
                &lookup,
                "BEACON_NETWORK_LOG_FILTER",
                defaults.network_log_filter,
            ),
            network_enabled: parse_bool_or(
                &lookup,
                "BEACON_NETWORK_ENABLED",
                defaults.network_enabled,
            ),
            log_dir: non_empty(&lookup, "BEACON_LOG_DIR").map(PathBuf::from),
            unit_name: non_empty(&lookup, "BEACON_UNIT_NAME"),
            hostname: non_empty(&lookup, "BEACON_HOSTNAME"),
            log_level: lookup("BEACON_LOG_LEVEL")
                .map(|level| level.trim().to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registration_port == 0 || self.logging_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "registration and logging ports must be greater than 0".to_string(),
            ));
        }

        if self.registration_address == self.logging_address
            && self.registration_port == self.logging_port
        {
            return Err(ConfigError::InvalidConfig(format!(
                "registration and logging cannot share {}:{}",
                self.registration_address, self.registration_port
            )));
        }

        if self.max_datagram_size <= frame::HEADER_SIZE || self.max_datagram_size > MAX_DATAGRAM_SIZE
        {
            return Err(ConfigError::InvalidConfig(format!(
                "max datagram size must be between {} and {} bytes",
                frame::HEADER_SIZE + 1,
                MAX_DATAGRAM_SIZE
            )));
        }

        if self.registration_refresh.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "registration refresh period must be greater than 0".to_string(),
            ));
        }

        if self.registration_timeout <= self.registration_refresh {
            return Err(ConfigError::InvalidConfig(format!(
                "registration timeout ({} ms) must exceed the refresh period ({} ms)",
                self.registration_timeout.as_millis(),
                self.registration_refresh.as_millis()
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    fn buffer_size(size: usize) -> Option<usize> {
        (size > 0).then_some(size)
    }

    #[must_use]
    pub fn registration_sender(&self) -> SenderAttributes {
        SenderAttributes {
            address: self.registration_address,
            port: self.registration_port,
            ttl: self.multicast_ttl,
            broadcast: self.broadcast,
            loopback: self.loopback,
            send_buffer_size: Self::buffer_size(self.send_buffer_size),
            max_datagram_size: self.max_datagram_size,
        }
    }

    #[must_use]
    pub fn registration_receiver(&self) -> ReceiverAttributes {
        ReceiverAttributes {
            address: self.registration_address,
            port: self.registration_port,
            broadcast: self.broadcast,
            loopback: self.loopback,
            receive_buffer_size: Self::buffer_size(self.receive_buffer_size),
        }
    }

    #[must_use]
    pub fn logging_sender(&self) -> SenderAttributes {
        SenderAttributes {
            address: self.logging_address,
            port: self.logging_port,
            ..self.registration_sender()
        }
    }

    #[must_use]
    pub fn logging_receiver(&self) -> ReceiverAttributes {
        ReceiverAttributes {
            address: self.logging_address,
            port: self.logging_port,
            ..self.registration_receiver()
        }
    }

    #[must_use]
    pub fn sink_filters(&self) -> SinkFilters {
        SinkFilters {
            console: self.console_log_filter,
            file: self.file_log_filter,
            network: self.network_log_filter,
        }
    }
}
