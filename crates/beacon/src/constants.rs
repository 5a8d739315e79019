// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_REGISTRATION_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 1);
pub const DEFAULT_REGISTRATION_PORT: u16 = 14000;
pub const DEFAULT_LOGGING_PORT: u16 = 14001;
pub const DEFAULT_MULTICAST_TTL: u32 = 2;

// 5 MiB, large enough to absorb a burst of announcements from a busy host
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Largest UDP payload that fits into a single IPv4 datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Receive buffer for a single datagram.
pub const RECEIVE_BUFFER_SIZE: usize = 65_536;

pub const DEFAULT_REGISTRATION_REFRESH: Duration = Duration::from_millis(1000);
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Remote log records kept before the oldest are evicted.
pub const MAX_BUFFERED_LOG_RECORDS: usize = 50_000;

/// Local log records waiting for the network forwarder before new ones are dropped.
pub const MAX_QUEUED_LOG_RECORDS: usize = 10_000;
