// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Receiving half of the UDP sample transport.
//!
//! A [`SampleReceiver`] binds (and for multicast, joins) the configured group and runs a
//! background loop that blocks on `recv_from`. Every well-formed datagram is handed to the
//! registered [`SampleCallback`] together with the sender's address; malformed datagrams are
//! counted and dropped. Cancelling the token interrupts the pending receive immediately.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::attributes::{Delivery, ReceiverAttributes};
use crate::constants::RECEIVE_BUFFER_SIZE;
use crate::errors::TransportError;
use crate::frame;

/// A datagram that passed frame decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSample {
    pub name: String,
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// Invoked on the receive task for every decoded datagram. Keep it short.
pub type SampleCallback = Arc<dyn Fn(ReceivedSample) + Send + Sync>;

/// Live counters of a receiver. Shared so they stay readable after the loop took ownership.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    datagrams: AtomicU64,
    malformed: AtomicU64,
    receive_errors: AtomicU64,
}

impl ReceiverStats {
    pub fn datagrams(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn receive_errors(&self) -> u64 {
        self.receive_errors.load(Ordering::Relaxed)
    }
}

// DatagramReader abstracts where datagrams come from.
enum DatagramReader {
    UdpSocket(UdpSocket),

    /// Replays a fixed datagram
    #[cfg(test)]
    MirrorTest(Vec<u8>, SocketAddr),
}

impl DatagramReader {
    async fn read(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            DatagramReader::UdpSocket(socket) => {
                let mut buf = vec![0; RECEIVE_BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                buf.truncate(amt);
                Ok((buf, src))
            }
            #[cfg(test)]
            DatagramReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
        }
    }
}

/// Background receive loop delivering samples to a callback.
pub struct SampleReceiver {
    reader: DatagramReader,
    callback: SampleCallback,
    cancel_token: CancellationToken,
    stats: Arc<ReceiverStats>,
}

impl SampleReceiver {
    /// Binds the socket described by `attributes`.
    ///
    /// Group receivers share their port with other processes on the host (`SO_REUSEADDR`,
    /// plus `SO_REUSEPORT` on Unix). Failures are startup failures.
    pub async fn bind(
        attributes: &ReceiverAttributes,
        callback: SampleCallback,
        cancel_token: CancellationToken,
    ) -> Result<Self, TransportError> {
        let socket = open_socket(attributes)?;
        Ok(Self {
            reader: DatagramReader::UdpSocket(socket),
            callback,
            cancel_token,
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.reader {
            DatagramReader::UdpSocket(socket) => socket.local_addr(),
            #[cfg(test)]
            DatagramReader::MirrorTest(_, src) => Ok(*src),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ReceiverStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the receive loop on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.spin())
    }

    /// Receives until the cancel token fires.
    pub async fn spin(self) {
        debug!("Sample receiver started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                result = self.reader.read() => self.dispatch(result),
            }
        }
        debug!("Sample receiver stopped");
    }

    /// Receives and dispatches exactly one datagram.
    #[cfg(test)]
    async fn consume(&self) {
        let result = self.reader.read().await;
        self.dispatch(result);
    }

    fn dispatch(&self, result: std::io::Result<(Vec<u8>, SocketAddr)>) {
        let (buf, src) = match result {
            Ok(read) => read,
            Err(e) => {
                // a lost packet, not a reason to stop listening
                self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to receive datagram: {}", e);
                return;
            }
        };
        self.stats.datagrams.fetch_add(1, Ordering::Relaxed);

        match frame::decode(&buf) {
            Ok(frame) => {
                trace!(
                    "Received sample '{}' ({} bytes) from {}",
                    frame.name,
                    frame.payload.len(),
                    src
                );
                (self.callback)(ReceivedSample {
                    name: frame.name.to_owned(),
                    payload: frame.payload.to_vec(),
                    source: src,
                });
            }
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping malformed datagram from {}: {}", src, e);
            }
        }
    }
}

fn open_socket(attributes: &ReceiverAttributes) -> Result<UdpSocket, TransportError> {
    let socket_error = |option: &'static str| {
        move |source: std::io::Error| TransportError::Socket { option, source }
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(socket_error("create"))?;

    let delivery = attributes.delivery();
    if delivery != Delivery::Unicast {
        socket
            .set_reuse_address(true)
            .map_err(socket_error("SO_REUSEADDR"))?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket
            .set_reuse_port(true)
            .map_err(socket_error("SO_REUSEPORT"))?;
    }
    if delivery == Delivery::Broadcast {
        socket
            .set_broadcast(true)
            .map_err(socket_error("SO_BROADCAST"))?;
    }
    if let Some(size) = attributes.receive_buffer_size {
        socket
            .set_recv_buffer_size(size)
            .map_err(socket_error("SO_RCVBUF"))?;
    }
    socket
        .set_nonblocking(true)
        .map_err(socket_error("O_NONBLOCK"))?;

    let bind_addr = SocketAddr::V4(attributes.bind_address());
    socket
        .bind(&bind_addr.into())
        .map_err(|source| TransportError::Bind {
            addr: bind_addr,
            source,
        })?;

    if delivery == Delivery::Multicast {
        socket
            .join_multicast_v4(&attributes.address, &Ipv4Addr::UNSPECIFIED)
            .map_err(socket_error("IP_ADD_MEMBERSHIP"))?;
        socket
            .set_multicast_loop_v4(attributes.loopback)
            .map_err(socket_error("IP_MULTICAST_LOOP"))?;
    }

    let socket = UdpSocket::from_std(socket.into()).map_err(socket_error("register"))?;
    debug!(
        "Sample receiver bound to {} ({:?})",
        bind_addr, delivery
    );
    Ok(socket)
}
