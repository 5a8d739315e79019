// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Socket configuration for the sample transport.
//!
//! Attributes are fixed when a sender or receiver is constructed. Broadcast vs. multicast,
//! loopback and TTL are socket options set once; there is no runtime switch.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::constants::{
    DEFAULT_MULTICAST_TTL, DEFAULT_REGISTRATION_ADDRESS, DEFAULT_REGISTRATION_PORT,
    DEFAULT_SOCKET_BUFFER_SIZE, MAX_DATAGRAM_SIZE,
};

/// How an address is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Multicast,
    Broadcast,
    Unicast,
}

impl Delivery {
    fn classify(address: Ipv4Addr, broadcast: bool) -> Self {
        if broadcast {
            Delivery::Broadcast
        } else if address.is_multicast() {
            Delivery::Multicast
        } else {
            Delivery::Unicast
        }
    }
}

/// Destination and socket options of a [`crate::sender::SampleSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderAttributes {
    /// Multicast group, broadcast address or unicast peer
    pub address: Ipv4Addr,
    pub port: u16,
    /// Multicast time-to-live (hops)
    pub ttl: u32,
    pub broadcast: bool,
    /// Deliver own multicast datagrams to listeners on this host
    pub loopback: bool,
    /// `SO_SNDBUF`, left to the OS default when `None`
    pub send_buffer_size: Option<usize>,
    /// Largest datagram the sender will write, header included
    pub max_datagram_size: usize,
}

impl Default for SenderAttributes {
    fn default() -> Self {
        Self {
            address: DEFAULT_REGISTRATION_ADDRESS,
            port: DEFAULT_REGISTRATION_PORT,
            ttl: DEFAULT_MULTICAST_TTL,
            broadcast: false,
            loopback: true,
            send_buffer_size: Some(DEFAULT_SOCKET_BUFFER_SIZE),
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl SenderAttributes {
    #[must_use]
    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }

    #[must_use]
    pub fn delivery(&self) -> Delivery {
        Delivery::classify(self.address, self.broadcast)
    }
}

/// Listening address and socket options of a [`crate::receiver::SampleReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverAttributes {
    /// Multicast group to join, or the unicast address to bind
    pub address: Ipv4Addr,
    /// Port to bind, `0` lets the OS pick one
    pub port: u16,
    pub broadcast: bool,
    pub loopback: bool,
    /// `SO_RCVBUF`, left to the OS default when `None`
    pub receive_buffer_size: Option<usize>,
}

impl Default for ReceiverAttributes {
    fn default() -> Self {
        Self {
            address: DEFAULT_REGISTRATION_ADDRESS,
            port: DEFAULT_REGISTRATION_PORT,
            broadcast: false,
            loopback: true,
            receive_buffer_size: Some(DEFAULT_SOCKET_BUFFER_SIZE),
        }
    }
}

impl ReceiverAttributes {
    #[must_use]
    pub fn delivery(&self) -> Delivery {
        Delivery::classify(self.address, self.broadcast)
    }

    /// Address the socket binds to: the wildcard for group delivery, the address itself otherwise.
    #[must_use]
    pub fn bind_address(&self) -> SocketAddrV4 {
        match self.delivery() {
            Delivery::Multicast | Delivery::Broadcast => {
                SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port)
            }
            Delivery::Unicast => SocketAddrV4::new(self.address, self.port),
        }
    }
}
