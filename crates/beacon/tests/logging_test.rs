// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::time::Duration;

use beacon::context::DiscoveryContext;
use beacon::logging::forwarder::LOG_SAMPLE_NAME;
use beacon::logging::sink::{ConsoleSink, FileSink};
use beacon::logging::{LogAggregator, LogFilter, LogLevel, LogSinks, SinkFilters};
use beacon::process::ProcessIdentity;
use beacon::sample::{self, LogRecord};

use common::{eventually, loopback_config, remote_sender, SharedBuffer};

fn identity(host_name: &str) -> ProcessIdentity {
    ProcessIdentity {
        host_name: host_name.to_string(),
        process_id: 4242,
        process_name: "calculator".to_string(),
        unit_name: "calculator".to_string(),
    }
}

fn remote_record(host_name: &str, message: &str) -> LogRecord {
    LogRecord {
        timestamp: 1_700_000_000_000_000,
        host_name: host_name.to_string(),
        process_id: 99,
        process_name: "remote".to_string(),
        unit_name: "remote".to_string(),
        level: LogLevel::Info,
        message: message.to_string(),
    }
}

#[test]
fn warning_skips_console_but_reaches_file() {
    let dir = tempfile::tempdir().unwrap();
    let console = SharedBuffer::default();
    let file = FileSink::create(dir.path(), "calculator", 4242).unwrap();
    let path = file.path().to_path_buf();

    let logs = LogAggregator::new(
        identity("host-a"),
        SinkFilters {
            console: LogFilter::ERROR | LogFilter::FATAL,
            file: "info,warning,error,fatal".parse().unwrap(),
            network: LogFilter::empty(),
        },
        LogSinks {
            console: Some(Box::new(ConsoleSink::with_writer(Box::new(console.clone())))),
            file: Some(Box::new(file)),
            network: None,
        },
        false,
    );

    logs.log(LogLevel::Warning, "low disk space");

    assert_eq!(console.contents(), "");
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.ends_with(" | host-a | calculator | 4242 | warning | low disk space\n"));
}

#[tokio::test]
async fn foreign_record_discarded_when_local_only() {
    let context = DiscoveryContext::create(loopback_config("host-a"))
        .await
        .unwrap();
    let sender = remote_sender(context.logging_addr().port()).await;

    for record in [
        remote_record("host-b", "from another host"),
        remote_record("host-a", "from a neighbour process"),
    ] {
        sender
            .send(LOG_SAMPLE_NAME, &sample::encode(&record).unwrap(), 0)
            .await
            .unwrap();
    }

    let logs = context.logs();
    let drained = eventually(Duration::from_secs(1), || async move {
        (logs.stats().accepted + logs.stats().discarded == 2).then(|| logs.drain_buffer())
    })
    .await
    .expect("both records should arrive");

    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].message, "from a neighbour process");
    assert!(logs.drain_buffer().is_empty());

    context.shutdown().await;
}

#[tokio::test]
async fn network_enabled_collects_every_host() {
    let mut config = loopback_config("host-a");
    config.network_enabled = true;
    let context = DiscoveryContext::create(config).await.unwrap();
    let sender = remote_sender(context.logging_addr().port()).await;

    sender
        .send(
            LOG_SAMPLE_NAME,
            &sample::encode(&remote_record("host-b", "remote")).unwrap(),
            0,
        )
        .await
        .unwrap();

    let logs = context.logs();
    let drained = eventually(Duration::from_secs(1), || async move {
        let drained = logs.drain_buffer();
        (!drained.is_empty()).then_some(drained)
    })
    .await
    .expect("record should arrive");
    assert_eq!(drained[0].host_name, "host-b");

    context.shutdown().await;
}

#[tokio::test]
async fn drain_twice_returns_records_then_nothing() {
    let context = DiscoveryContext::create(loopback_config("host-a"))
        .await
        .unwrap();
    let sender = remote_sender(context.logging_addr().port()).await;

    for i in 0..3 {
        sender
            .send(
                LOG_SAMPLE_NAME,
                &sample::encode(&remote_record("host-a", &format!("record {i}"))).unwrap(),
                0,
            )
            .await
            .unwrap();
    }

    let logs = context.logs();
    let arrived = eventually(Duration::from_secs(1), || async move {
        (logs.buffered() == 3).then_some(())
    })
    .await;
    assert!(arrived.is_some());

    let first: Vec<String> = logs.drain_buffer().into_iter().map(|r| r.message).collect();
    assert_eq!(first, vec!["record 0", "record 1", "record 2"]);
    assert!(logs.drain_buffer().is_empty());

    context.shutdown().await;
}
