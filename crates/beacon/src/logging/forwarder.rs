// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network sink: hands records to a task that serializes and sends them.
//!
//! ```text
//!   LogAggregator::log ──> NetworkSink ──(bounded channel)──> LogForwarder ──> SampleSender
//! ```
//!
//! Logging callers never wait on the socket or the bandwidth throttle; the forwarder task
//! owns both. When the forwarder falls behind and the queue is full, new records are
//! rejected by the sink instead of queued.

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::MAX_QUEUED_LOG_RECORDS;
use crate::errors::TransportError;
use crate::logging::sink::LogSink;
use crate::sample::{self, LogRecord};
use crate::sender::SampleSender;

/// Name of log samples on the wire.
pub const LOG_SAMPLE_NAME: &str = "log";

#[derive(Clone, Debug)]
pub struct NetworkSink {
    tx: mpsc::Sender<LogRecord>,
}

impl LogSink for NetworkSink {
    fn write(&self, record: &LogRecord) -> io::Result<()> {
        self.tx.try_send(record.clone()).map_err(|e| match e {
            TrySendError::Full(_) => {
                io::Error::new(io::ErrorKind::WouldBlock, "log forwarder queue full")
            }
            TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "log forwarder stopped")
            }
        })
    }
}

pub struct LogForwarder {
    sender: Arc<SampleSender>,
    bandwidth: i64,
    rx: mpsc::Receiver<LogRecord>,
}

impl LogForwarder {
    #[must_use]
    pub fn new(sender: Arc<SampleSender>, bandwidth: i64) -> (Self, NetworkSink) {
        Self::with_queue_capacity(sender, bandwidth, MAX_QUEUED_LOG_RECORDS)
    }

    /// `capacity` records may wait for the socket before the sink starts rejecting new ones.
    #[must_use]
    pub fn with_queue_capacity(
        sender: Arc<SampleSender>,
        bandwidth: i64,
        capacity: usize,
    ) -> (Self, NetworkSink) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                bandwidth,
                rx,
            },
            NetworkSink { tx },
        )
    }

    /// Forwards records until cancelled or until every [`NetworkSink`] is dropped.
    ///
    /// Records still queued when the token fires are sent before returning.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    self.rx.close();
                    while let Some(record) = self.rx.recv().await {
                        self.forward(&record).await;
                    }
                    break;
                }
                record = self.rx.recv() => match record {
                    Some(record) => self.forward(&record).await,
                    None => break,
                },
            }
        }
        debug!("Log forwarder stopped");
    }

    async fn forward(&self, record: &LogRecord) {
        let payload = match sample::encode(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize log record: {}", e);
                return;
            }
        };
        match self
            .sender
            .send(LOG_SAMPLE_NAME, &payload, self.bandwidth)
            .await
        {
            Ok(_) => {}
            Err(TransportError::PayloadTooLarge { size, max }) => {
                warn!(
                    "Dropping log record of {} bytes, larger than a datagram ({} bytes)",
                    size, max
                );
            }
            Err(e) => warn!("Failed to forward log record: {}", e),
        }
    }
}
