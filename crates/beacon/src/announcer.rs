// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keeps local entities alive in everyone else's registries.
//!
//! Soft state only survives while it is refreshed: the announcer sends each registered
//! entity right away, re-sends all of them every refresh period, and withdraws them with
//! `unregister` samples when it shuts down.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::sample::{self, Announcement};
use crate::sender::SampleSender;

/// Name of registration samples on the wire.
pub const REGISTRATION_SAMPLE_NAME: &str = "reg";

pub struct Announcer {
    sender: Arc<SampleSender>,
    bandwidth: i64,
    entries: RwLock<HashMap<String, Announcement>>,
}

fn entry_key(announcement: &Announcement) -> String {
    format!(
        "{:?}/{}/{}",
        announcement.kind, announcement.entity_name, announcement.entity_id
    )
}

impl Announcer {
    #[must_use]
    pub fn new(sender: Arc<SampleSender>, bandwidth: i64) -> Self {
        Self {
            sender,
            bandwidth,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Adds or replaces a local entity and announces it immediately.
    pub async fn register(&self, announcement: Announcement) -> Result<(), TransportError> {
        {
            #[allow(clippy::expect_used)]
            let mut entries = self.entries.write().expect("lock poisoned");
            entries.insert(entry_key(&announcement), announcement.clone());
        }
        self.send(&announcement).await
    }

    /// Stops announcing an entity and tells the group it is gone.
    pub async fn unregister(&self, announcement: &Announcement) -> Result<(), TransportError> {
        let removed = {
            #[allow(clippy::expect_used)]
            let mut entries = self.entries.write().expect("lock poisoned");
            entries.remove(&entry_key(announcement))
        };
        match removed {
            Some(registered) => self.send(&registered.to_unregister()).await,
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let entries = self.entries.read().expect("lock poisoned");
        entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Announcement> {
        #[allow(clippy::expect_used)]
        let entries = self.entries.read().expect("lock poisoned");
        entries.values().cloned().collect()
    }

    /// Re-sends every registered entity. Failures are logged per entity.
    pub async fn announce_all(&self) {
        for announcement in self.snapshot() {
            if let Err(e) = self.send(&announcement).await {
                warn!(
                    "Failed to announce {:?} '{}': {}",
                    announcement.kind, announcement.entity_name, e
                );
            }
        }
    }

    async fn withdraw_all(&self) {
        for announcement in self.snapshot() {
            if let Err(e) = self.send(&announcement.to_unregister()).await {
                warn!("Failed to unregister '{}': {}", announcement.entity_name, e);
            }
        }
    }

    async fn send(&self, announcement: &Announcement) -> Result<(), TransportError> {
        let payload = match sample::encode(announcement) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize announcement: {}", e);
                return Ok(());
            }
        };
        self.sender
            .send(REGISTRATION_SAMPLE_NAME, &payload, self.bandwidth)
            .await
            .map(|_| ())
    }

    /// Announces every `period` until cancelled, then unregisters everything.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => self.announce_all().await,
                }
            }
            self.withdraw_all().await;
            debug!("Announcer stopped");
        })
    }
}
