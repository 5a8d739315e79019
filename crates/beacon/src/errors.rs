// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the discovery core.
//!
//! Only construction failures and oversized payloads ever reach a caller. Everything else
//! (malformed samples, transient socket errors) is counted and logged where it happens.

use std::io;

/// Errors raised by the UDP sample transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind socket to {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to configure socket ({option}): {source}")]
    Socket {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("payload of {size} bytes exceeds the maximum datagram size of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("sample name is longer than {max} bytes")]
    InvalidSampleName { max: usize },
}

/// A received datagram or sample payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),

    #[error("unexpected frame magic")]
    BadMagic,

    #[error("sample name is not valid UTF-8")]
    InvalidName,

    #[error("malformed sample payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors raised while reading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while creating a [`crate::context::DiscoveryContext`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to create log file in {path}: {source}")]
    LogFile {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}
