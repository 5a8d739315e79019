// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Level-filtered log distribution and collection of remote records.
//!
//! Local records fan out to up to three sinks, each behind its own [`LogFilter`]. Records
//! arriving from the network are checked against the origin policy and appended to a
//! bounded FIFO buffer that a collector drains periodically.
//!
//! Sink filters and the buffer sit behind separate locks, so a drain never waits for a
//! slow sink and vice versa. Logging must never abort the caller: poisoned locks are
//! recovered and sink errors are counted and dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::constants::MAX_BUFFERED_LOG_RECORDS;
use crate::logging::core_timer::CoreTimer;
use crate::logging::level::{LogFilter, LogLevel};
use crate::logging::sink::LogSink;
use crate::process::ProcessIdentity;
use crate::sample::{self, LogRecord};

/// One filter per sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFilters {
    pub console: LogFilter,
    pub file: LogFilter,
    pub network: LogFilter,
}

impl Default for SinkFilters {
    fn default() -> Self {
        Self {
            console: LogFilter::console_default(),
            file: LogFilter::verbose_default(),
            network: LogFilter::verbose_default(),
        }
    }
}

#[derive(Default)]
pub struct LogSinks {
    pub console: Option<Box<dyn LogSink>>,
    pub file: Option<Box<dyn LogSink>>,
    pub network: Option<Box<dyn LogSink>>,
}

#[derive(Debug, Clone, Copy)]
struct LogSettings {
    filters: SinkFilters,
    level: LogLevel,
}

/// Counters for the monitoring snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    pub accepted: u64,
    pub discarded: u64,
    pub malformed: u64,
    pub evicted: u64,
    pub sink_failures: u64,
}

#[derive(Debug, Default)]
struct LogCounters {
    accepted: AtomicU64,
    discarded: AtomicU64,
    malformed: AtomicU64,
    evicted: AtomicU64,
    sink_failures: AtomicU64,
}

pub struct LogAggregator {
    identity: ProcessIdentity,
    network_enabled: bool,
    settings: RwLock<LogSettings>,
    sinks: LogSinks,
    buffer: Mutex<VecDeque<LogRecord>>,
    max_buffered: usize,
    core_timer: CoreTimer,
    counters: LogCounters,
}

impl LogAggregator {
    /// `network_enabled` accepts remote records from every host instead of only this one.
    #[must_use]
    pub fn new(
        identity: ProcessIdentity,
        filters: SinkFilters,
        sinks: LogSinks,
        network_enabled: bool,
    ) -> Self {
        Self {
            identity,
            network_enabled,
            settings: RwLock::new(LogSettings {
                filters,
                level: LogLevel::Info,
            }),
            sinks,
            buffer: Mutex::new(VecDeque::new()),
            max_buffered: MAX_BUFFERED_LOG_RECORDS,
            core_timer: CoreTimer::new(),
            counters: LogCounters::default(),
        }
    }

    #[must_use]
    pub fn with_buffer_capacity(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered.max(1);
        self
    }

    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn set_filters(&self, filters: SinkFilters) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.filters = filters;
    }

    #[must_use]
    pub fn filters(&self) -> SinkFilters {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .filters
    }

    /// Sets the level used by [`LogAggregator::log_default`].
    pub fn set_log_level(&self, level: LogLevel) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.level = level;
    }

    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .level
    }

    /// Writes `message` to every sink whose filter accepts `level`.
    pub fn log(&self, level: LogLevel, message: &str) {
        if message.is_empty() {
            return;
        }
        let filters = self.filters();
        let targets = [
            (&self.sinks.console, filters.console, "console"),
            (&self.sinks.file, filters.file, "file"),
            (&self.sinks.network, filters.network, "network"),
        ];
        if !targets
            .iter()
            .any(|(sink, filter, _)| sink.is_some() && filter.accepts(level))
        {
            return;
        }

        let record = LogRecord {
            timestamp: Utc::now().timestamp_micros(),
            host_name: self.identity.host_name.clone(),
            process_id: self.identity.process_id,
            process_name: self.identity.process_name.clone(),
            unit_name: self.identity.unit_name.clone(),
            level,
            message: message.to_string(),
        };

        for (sink, filter, name) in targets {
            let Some(sink) = sink else { continue };
            if !filter.accepts(level) {
                continue;
            }
            if let Err(e) = sink.write(&record) {
                self.counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Log sink {} failed: {}", name, e);
            }
        }
    }

    /// Logs at the configured default level.
    pub fn log_default(&self, message: &str) {
        self.log(self.log_level(), message);
    }

    /// Decodes a log sample received from the network and hands it to
    /// [`LogAggregator::on_remote_record`]. Malformed samples are counted and dropped.
    pub fn on_remote_sample(&self, payload: &[u8]) {
        match sample::decode::<LogRecord>(payload) {
            Ok(record) => {
                self.on_remote_record(record);
            }
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping malformed log sample: {}", e);
            }
        }
    }

    /// Buffers `record` if it comes from this host or network-wide collection is enabled.
    /// Returns whether it was accepted.
    pub fn on_remote_record(&self, record: LogRecord) -> bool {
        if !self.network_enabled && record.host_name != self.identity.host_name {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() >= self.max_buffered {
            buffer.pop_front();
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Log buffer full ({} records), dropping oldest record",
                self.max_buffered
            );
        }
        buffer.push_back(record);
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Returns every buffered record in arrival order and empties the buffer.
    pub fn drain_buffer(&self) -> Vec<LogRecord> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffer).into()
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn start_core_timer(&self) {
        self.core_timer.start();
    }

    pub fn stop_core_timer(&self) -> Option<Duration> {
        self.core_timer.stop()
    }

    pub fn set_core_time(&self, elapsed: Duration) {
        self.core_timer.set(elapsed);
    }

    #[must_use]
    pub fn core_time(&self) -> Option<Duration> {
        self.core_timer.get()
    }

    #[must_use]
    pub fn stats(&self) -> LogStats {
        LogStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            sink_failures: self.counters.sink_failures.load(Ordering::Relaxed),
        }
    }
}
