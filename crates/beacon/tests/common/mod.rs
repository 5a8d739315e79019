// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for the loopback integration tests

#![allow(dead_code)]

use std::future::Future;
use std::io::{self, Write};
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon::attributes::SenderAttributes;
use beacon::config::Config;
use beacon::sender::SampleSender;

/// Two distinct free ports on 127.0.0.1.
pub fn free_ports() -> (u16, u16) {
    let a = UdpSocket::bind("127.0.0.1:0").expect("bind");
    let b = UdpSocket::bind("127.0.0.1:0").expect("bind");
    (
        a.local_addr().expect("addr").port(),
        b.local_addr().expect("addr").port(),
    )
}

/// A node configuration that talks unicast over loopback instead of multicast.
pub fn loopback_config(host_name: &str) -> Config {
    let (registration_port, logging_port) = free_ports();
    Config {
        registration_address: Ipv4Addr::LOCALHOST,
        registration_port,
        logging_address: Ipv4Addr::LOCALHOST,
        logging_port,
        send_buffer_size: 0,
        receive_buffer_size: 0,
        sweep_interval: Duration::from_millis(50),
        unit_name: Some("integration".to_string()),
        hostname: Some(host_name.to_string()),
        ..Default::default()
    }
}

/// A sender aimed at `port` on loopback, standing in for a remote process.
pub async fn remote_sender(port: u16) -> Arc<SampleSender> {
    let sender = SampleSender::bind(&SenderAttributes {
        address: Ipv4Addr::LOCALHOST,
        port,
        send_buffer_size: None,
        ..Default::default()
    })
    .await
    .expect("sender should bind");
    Arc::new(sender)
}

/// Polls `check` until it returns `Some` or `within` elapses.
pub async fn eventually<T, F, Fut>(within: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// In-memory writer shared between a console sink and the test.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().expect("lock").clone()).expect("utf8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
