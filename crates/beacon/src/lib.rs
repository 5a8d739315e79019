// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Beacon
//!
//! Control-plane core of a decentralized publish/subscribe and RPC middleware.
//!
//! Independent processes periodically announce their publishers, subscribers and services
//! over best-effort UDP multicast. Every receiver keeps a soft-state view of the group: an
//! entry lives only as long as it keeps being re-announced, and quietly expires otherwise.
//! The same transport distributes diagnostic log records between processes.
//!
//! - [`registry`]: generic key-value store with per-entry TTL
//! - [`sender`] / [`receiver`]: UDP sample transport
//! - [`gateway`]: matches local RPC clients against reachable remote service providers
//! - [`logging`]: level-filtered, multi-sink log distribution and remote collection
//! - [`context`]: wires everything together with a defined creation and teardown order

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod announcer;
pub mod attributes;
pub mod config;
pub mod constants;
pub mod context;
pub mod descgate;
pub mod errors;
pub mod frame;
pub mod gateway;
pub mod logging;
pub mod process;
pub mod receiver;
pub mod registry;
pub mod sample;
pub mod sender;
