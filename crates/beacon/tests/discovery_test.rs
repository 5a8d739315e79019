// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::Arc;
use std::time::Duration;

use beacon::announcer::{Announcer, REGISTRATION_SAMPLE_NAME};
use beacon::config::Config;
use beacon::context::DiscoveryContext;
use beacon::sample::{
    self, Announcement, Command, EntityKind, MethodDescriptor, TypeInformation,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use common::{eventually, loopback_config, remote_sender};

const REFRESH: Duration = Duration::from_millis(500);
const TTL: Duration = Duration::from_millis(600);

fn add_service(host_name: &str, process_id: u32) -> Announcement {
    Announcement {
        command: Command::Register,
        kind: EntityKind::Service,
        host_name: host_name.to_string(),
        process_id,
        process_name: "calculator".to_string(),
        unit_name: "calculator".to_string(),
        entity_name: "Add".to_string(),
        entity_id: format!("add-{process_id}"),
        methods: vec![MethodDescriptor {
            name: "Compute".to_string(),
            request_type: TypeInformation::new("int,int", "raw"),
            response_type: TypeInformation::new("int", "raw"),
        }],
        location: format!("tcp://127.0.0.1:{}", 40000 + process_id),
    }
}

async fn node_b() -> DiscoveryContext {
    let config = Config {
        registration_refresh: REFRESH,
        registration_timeout: TTL,
        ..loopback_config("host-b")
    };
    DiscoveryContext::create(config)
        .await
        .expect("context should start")
}

#[tokio::test]
async fn provider_visible_while_announcing_and_gone_after_ttl() {
    let b = node_b().await;

    // process A announces "Add" every refresh period
    let a = Arc::new(Announcer::new(
        remote_sender(b.registration_addr().port()).await,
        0,
    ));
    a.register(add_service("host-a", 1)).await.unwrap();
    let a_task = Arc::clone(&a).spawn(REFRESH, CancellationToken::new());

    sleep(REFRESH * 3 / 2).await;
    let records = b.gateway().query("Add");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method_name, "Compute");
    assert_eq!(records[0].request_type.name, "int,int");
    assert_eq!(records[0].response_type.name, "int");
    assert_eq!(records[0].host_name, "host-a");

    // A crashes: no more announcements and no unregister
    a_task.abort();
    sleep(REFRESH * 3 / 2).await;
    assert!(b.gateway().query("Add").is_empty());

    b.shutdown().await;
}

#[tokio::test]
async fn graceful_shutdown_unregisters_before_ttl() {
    let b = node_b().await;

    let a = Arc::new(Announcer::new(
        remote_sender(b.registration_addr().port()).await,
        0,
    ));
    a.register(add_service("host-a", 1)).await.unwrap();
    let cancel_token = CancellationToken::new();
    let a_task = Arc::clone(&a).spawn(REFRESH, cancel_token.clone());

    let gateway = b.gateway();
    let visible = eventually(Duration::from_secs(1), || async move {
        (!gateway.query("Add").is_empty()).then_some(())
    })
    .await;
    assert!(visible.is_some());

    cancel_token.cancel();
    a_task.await.unwrap();

    // well before the TTL could have expired it
    let gone = eventually(TTL / 3, || async move {
        gateway.query("Add").is_empty().then_some(())
    })
    .await;
    assert!(gone.is_some());
    assert_eq!(b.gateway().stats().unregistered, 1);

    b.shutdown().await;
}

#[tokio::test]
async fn several_providers_and_malformed_samples() {
    let b = node_b().await;
    let sender = remote_sender(b.registration_addr().port()).await;

    for pid in 1..=3 {
        let payload = sample::encode(&add_service("host-a", pid)).unwrap();
        sender
            .send(REGISTRATION_SAMPLE_NAME, &payload, 0)
            .await
            .unwrap();
    }
    sender
        .send(REGISTRATION_SAMPLE_NAME, b"definitely not json", 0)
        .await
        .unwrap();

    // not even a frame
    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(b"garbage", b.registration_addr()).await.unwrap();

    let gateway = b.gateway();
    let providers = eventually(Duration::from_secs(1), || async move {
        let records = gateway.query("Add");
        (records.len() == 3).then_some(records)
    })
    .await
    .expect("all three providers should arrive");
    let mut locations: Vec<String> = providers.into_iter().map(|r| r.location).collect();
    locations.sort();
    assert_eq!(
        locations,
        vec![
            "tcp://127.0.0.1:40001",
            "tcp://127.0.0.1:40002",
            "tcp://127.0.0.1:40003"
        ]
    );

    let malformed = eventually(Duration::from_secs(1), || async move {
        (gateway.stats().malformed == 1).then_some(())
    })
    .await;
    assert!(malformed.is_some());

    b.shutdown().await;
}

#[tokio::test]
async fn conflicting_types_are_reported_but_registered() {
    let b = node_b().await;
    let sender = remote_sender(b.registration_addr().port()).await;

    let first = add_service("host-a", 1);
    let mut second = add_service("host-c", 2);
    second.methods[0].response_type = TypeInformation::new("float", "raw");

    let gateway = b.gateway();
    for (announcement, expected) in [(&first, 1), (&second, 2)] {
        sender
            .send(
                REGISTRATION_SAMPLE_NAME,
                &sample::encode(announcement).unwrap(),
                0,
            )
            .await
            .unwrap();
        let arrived = eventually(Duration::from_secs(1), || async move {
            (gateway.query("Add").len() == expected).then_some(())
        })
        .await;
        assert!(arrived.is_some());
    }

    assert_eq!(gateway.stats().type_conflicts, 1);
    assert!(!gateway.describe_types(
        "Add",
        "Compute",
        TypeInformation::new("int,int", "raw"),
        TypeInformation::new("float", "raw"),
    ));

    b.shutdown().await;
}
