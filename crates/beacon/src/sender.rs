// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sending half of the UDP sample transport.
//!
//! A [`SampleSender`] owns one socket configured from [`SenderAttributes`] and writes every
//! sample as exactly one datagram to the configured multicast group, broadcast address or
//! unicast peer. Oversized samples are refused before anything touches the socket; transient
//! socket errors count as a dropped packet and are never retried.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::attributes::{Delivery, SenderAttributes};
use crate::errors::TransportError;
use crate::frame;

/// Counters for a sender, cheap to copy out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderStats {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

#[derive(Debug, Default)]
struct SenderCounters {
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Schedules sends so that the long-run rate stays under a byte budget.
///
/// Each send reserves a slot whose length is `size / bandwidth` seconds, starting at the end
/// of the previously reserved slot or now, whichever is later.
#[derive(Debug, Default)]
pub(crate) struct Throttle {
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Reserves a slot for `size` bytes and returns how long to wait before sending.
    pub(crate) fn reserve(&self, size: usize, bandwidth: i64) -> Duration {
        if bandwidth <= 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_sign_loss)]
        let nanos = (size as u128 * 1_000_000_000) / bandwidth as u128;
        let cost = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        let now = Instant::now();

        #[allow(clippy::expect_used)]
        let mut next_slot = self.next_slot.lock().expect("lock poisoned");
        let start = next_slot.map_or(now, |slot| slot.max(now));
        *next_slot = Some(start + cost);
        start.saturating_duration_since(now)
    }
}

/// Writes framed samples to a fixed destination.
#[derive(Debug)]
pub struct SampleSender {
    socket: UdpSocket,
    destination: SocketAddr,
    attributes: SenderAttributes,
    throttle: Throttle,
    counters: SenderCounters,
}

impl SampleSender {
    /// Creates and configures the socket.
    ///
    /// Failures here are startup failures: the sender never becomes operational.
    pub async fn bind(attributes: &SenderAttributes) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(
            |source| TransportError::Socket {
                option: "create",
                source,
            },
        )?;

        if let Some(size) = attributes.send_buffer_size {
            socket
                .set_send_buffer_size(size)
                .map_err(|source| TransportError::Socket {
                    option: "SO_SNDBUF",
                    source,
                })?;
        }

        match attributes.delivery() {
            Delivery::Multicast => {
                socket
                    .set_multicast_ttl_v4(attributes.ttl)
                    .map_err(|source| TransportError::Socket {
                        option: "IP_MULTICAST_TTL",
                        source,
                    })?;
                socket
                    .set_multicast_loop_v4(attributes.loopback)
                    .map_err(|source| TransportError::Socket {
                        option: "IP_MULTICAST_LOOP",
                        source,
                    })?;
            }
            Delivery::Broadcast => {
                socket
                    .set_broadcast(true)
                    .map_err(|source| TransportError::Socket {
                        option: "SO_BROADCAST",
                        source,
                    })?;
            }
            Delivery::Unicast => {}
        }

        socket
            .set_nonblocking(true)
            .map_err(|source| TransportError::Socket {
                option: "O_NONBLOCK",
                source,
            })?;

        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        socket
            .bind(&local.into())
            .map_err(|source| TransportError::Bind {
                addr: local,
                source,
            })?;

        let socket =
            UdpSocket::from_std(socket.into()).map_err(|source| TransportError::Socket {
                option: "register",
                source,
            })?;

        debug!(
            "Sample sender ready for {} ({:?})",
            attributes.destination(),
            attributes.delivery()
        );

        Ok(Self {
            socket,
            destination: SocketAddr::V4(attributes.destination()),
            attributes: attributes.clone(),
            throttle: Throttle::default(),
            counters: SenderCounters::default(),
        })
    }

    #[must_use]
    pub fn attributes(&self) -> &SenderAttributes {
        &self.attributes
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one sample as one datagram and returns the number of bytes written.
    ///
    /// `bandwidth` is a budget in bytes per second; zero or negative means unlimited. A
    /// throttled send sleeps until its slot comes up.
    ///
    /// Returns [`TransportError::PayloadTooLarge`] without writing anything when the framed
    /// sample exceeds `max_datagram_size`. A failing socket write is logged and reported as
    /// `Ok(0)`, the same as a packet lost on the wire.
    pub async fn send(
        &self,
        sample_name: &str,
        payload: &[u8],
        bandwidth: i64,
    ) -> Result<usize, TransportError> {
        if sample_name.len() > frame::MAX_NAME_LEN {
            return Err(TransportError::InvalidSampleName {
                max: frame::MAX_NAME_LEN,
            });
        }

        let size = frame::encoded_len(sample_name, payload);
        if size > self.attributes.max_datagram_size {
            return Err(TransportError::PayloadTooLarge {
                size,
                max: self.attributes.max_datagram_size,
            });
        }

        let wait = self.throttle.reserve(size, bandwidth);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let datagram = frame::encode(sample_name, payload);
        match self.socket.send_to(&datagram, self.destination).await {
            Ok(sent) => {
                self.counters.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Failed to send sample '{}' to {}: {}",
                    sample_name, self.destination, e
                );
                Ok(0)
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> SenderStats {
        SenderStats {
            datagrams_sent: self.counters.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn unicast_to(port: u16) -> SenderAttributes {
        SenderAttributes {
            address: Ipv4Addr::LOCALHOST,
            port,
            send_buffer_size: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_writes_one_framed_datagram() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();
        let sender = SampleSender::bind(&unicast_to(port)).await.unwrap();

        let sent = sender.send("add", b"{\"x\":1}", 0).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(sent, len);
        let frame = frame::decode(&buf[..len]).unwrap();
        assert_eq!(frame.name, "add");
        assert_eq!(frame.payload, b"{\"x\":1}");

        let stats = sender.stats();
        assert_eq!(stats.datagrams_sent, 1);
        assert_eq!(stats.bytes_sent, len as u64);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_without_write() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();
        let sender = SampleSender::bind(&SenderAttributes {
            max_datagram_size: 64,
            ..unicast_to(port)
        })
        .await
        .unwrap();

        let result = sender.send("big", &[0u8; 128], 0).await;
        assert!(matches!(
            result,
            Err(TransportError::PayloadTooLarge { size: 137, max: 64 })
        ));
        assert_eq!(sender.stats(), SenderStats::default());

        let mut buf = [0u8; 256];
        let received =
            tokio::time::timeout(Duration::from_millis(100), peer.recv_from(&mut buf)).await;
        assert!(received.is_err(), "nothing should have been written");
    }

    // Linux refuses broadcast destinations without SO_BROADCAST
    #[cfg(target_os = "linux")]
    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_failed_write_counts_as_dropped_packet() {
        let sender = SampleSender::bind(&SenderAttributes {
            address: Ipv4Addr::BROADCAST,
            broadcast: false,
            ..unicast_to(14_999)
        })
        .await
        .unwrap();

        assert_eq!(sender.send("add", b"{}", 0).await.unwrap(), 0);
        let stats = sender.stats();
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.datagrams_sent, 0);
        assert!(logs_contain("Failed to send sample 'add'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_sends_by_cost() {
        let throttle = Throttle::default();

        // 1000 bytes/s: 100 bytes cost 100ms
        assert_eq!(throttle.reserve(100, 1000), Duration::ZERO);
        assert_eq!(throttle.reserve(100, 1000), Duration::from_millis(100));
        assert_eq!(throttle.reserve(100, 1000), Duration::from_millis(200));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(throttle.reserve(100, 1000), Duration::ZERO);
    }

    #[test]
    fn test_throttle_unlimited() {
        let throttle = Throttle::default();
        for _ in 0..10 {
            assert_eq!(throttle.reserve(65_000, 0), Duration::ZERO);
            assert_eq!(throttle.reserve(65_000, -1), Duration::ZERO);
        }
    }
}
