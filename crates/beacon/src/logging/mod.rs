// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Distributed diagnostic logging.
//!
//! Not to be confused with the crate's own `tracing` diagnostics: this is the product
//! feature that routes application log records to console, file and network sinks and
//! collects the records other processes send.

pub mod aggregator;
pub mod core_timer;
pub mod forwarder;
pub mod level;
pub mod sink;

pub use aggregator::{LogAggregator, LogSinks, LogStats, SinkFilters};
pub use level::{LogFilter, LogLevel};
