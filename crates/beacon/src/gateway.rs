// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Matches local RPC clients against reachable remote service providers.
//!
//! Providers are soft state fed by service announcements: each one lives in an
//! [`ExpiringRegistry`] keyed by provider identity and disappears from [`ServiceGateway::query`]
//! once it stops re-announcing. Local clients are tracked separately, by identity, without
//! the gateway ever owning them.
//!
//! The provider registry, the client set and the type-description registry each own their
//! lock, so the announcement receive path and client bookkeeping never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::descgate::{MethodTypes, TypeDescriptionGate};
use crate::registry::ExpiringRegistry;
use crate::sample::{self, Announcement, Command, EntityKind, MethodDescriptor, TypeInformation};

/// A local client handle as seen by the gateway.
pub trait ServiceClient: Send + Sync {
    fn service_name(&self) -> &str;

    /// Re-announce this client. Called from [`ServiceGateway::refresh_registrations`].
    fn refresh_registration(&self);
}

/// Identity of one provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub service_name: String,
    pub service_id: String,
    pub host_name: String,
    pub process_id: u32,
}

impl ProviderKey {
    fn of(announcement: &Announcement) -> Self {
        Self {
            service_name: announcement.entity_name.clone(),
            service_id: announcement.entity_id.clone(),
            host_name: announcement.host_name.clone(),
            process_id: announcement.process_id,
        }
    }
}

/// One callable method of one reachable provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProviderRecord {
    pub service_name: String,
    pub service_id: String,
    pub method_name: String,
    pub request_type: TypeInformation,
    pub response_type: TypeInformation,
    pub location: String,
    pub host_name: String,
    pub process_name: String,
    pub process_id: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    pub announcements: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub unregistered: u64,
    pub type_conflicts: u64,
}

#[derive(Debug, Default)]
struct GatewayCounters {
    announcements: AtomicU64,
    malformed: AtomicU64,
    ignored: AtomicU64,
    unregistered: AtomicU64,
    type_conflicts: AtomicU64,
}

pub struct ServiceGateway {
    providers: ExpiringRegistry<ProviderKey, Announcement>,
    clients: RwLock<HashMap<usize, Weak<dyn ServiceClient>>>,
    descriptions: TypeDescriptionGate,
    counters: GatewayCounters,
}

// Clients are identified by the address of their allocation.
fn client_id(client: &Arc<dyn ServiceClient>) -> usize {
    Arc::as_ptr(client).cast::<()>() as usize
}

impl ServiceGateway {
    /// `ttl` applies to providers and recorded type signatures alike.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            providers: ExpiringRegistry::new(ttl),
            clients: RwLock::new(HashMap::new()),
            descriptions: TypeDescriptionGate::new(ttl),
            counters: GatewayCounters::default(),
        }
    }

    /// Decodes a registration sample and applies it. Malformed samples are counted and dropped.
    pub fn apply_announcement(&self, payload: &[u8]) {
        match sample::decode::<Announcement>(payload) {
            Ok(announcement) => self.apply(announcement),
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping malformed announcement: {}", e);
            }
        }
    }

    /// Registers, refreshes or removes the announced provider. Non-service announcements are ignored.
    pub fn apply(&self, announcement: Announcement) {
        if announcement.kind != EntityKind::Service {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters.announcements.fetch_add(1, Ordering::Relaxed);

        let key = ProviderKey::of(&announcement);
        match announcement.command {
            Command::Unregister => {
                if self.providers.remove(&key) {
                    self.counters.unregistered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Service {} unregistered by {}:{}",
                        key.service_name, key.host_name, key.process_id
                    );
                }
            }
            Command::Register => {
                // a mismatch is reported, the provider stays visible
                for method in &announcement.methods {
                    if !self.describe_types(
                        &announcement.entity_name,
                        &method.name,
                        method.request_type.clone(),
                        method.response_type.clone(),
                    ) {
                        self.counters.type_conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                }
                trace!(
                    "Service {} announced by {}:{} at {}",
                    key.service_name,
                    key.host_name,
                    key.process_id,
                    announcement.location
                );
                self.providers.upsert(key, announcement);
            }
        }
    }

    /// Adds a local client. Returns `false` if it was already registered.
    pub fn register_client(&self, client: &Arc<dyn ServiceClient>) -> bool {
        #[allow(clippy::expect_used)]
        let mut clients = self.clients.write().expect("lock poisoned");
        let added = clients
            .insert(client_id(client), Arc::downgrade(client))
            .is_none();
        if added {
            trace!("Registered client of service {}", client.service_name());
        }
        added
    }

    /// Removes a local client. Returns `false` if it was not registered.
    pub fn unregister_client(&self, client: &Arc<dyn ServiceClient>) -> bool {
        #[allow(clippy::expect_used)]
        let mut clients = self.clients.write().expect("lock poisoned");
        clients.remove(&client_id(client)).is_some()
    }

    pub fn client_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        let clients = self.clients.read().expect("lock poisoned");
        clients.len()
    }

    /// Asks every live registered client to re-announce itself and forgets dropped ones.
    pub fn refresh_registrations(&self) {
        let (live, dead): (Vec<_>, Vec<_>) = {
            #[allow(clippy::expect_used)]
            let clients = self.clients.read().expect("lock poisoned");
            clients
                .iter()
                .map(|(id, client)| (*id, client.upgrade()))
                .partition(|(_, client)| client.is_some())
        };

        // outside the lock: clients may call back into the gateway
        for client in live.into_iter().filter_map(|(_, client)| client) {
            client.refresh_registration();
        }

        if !dead.is_empty() {
            #[allow(clippy::expect_used)]
            let mut clients = self.clients.write().expect("lock poisoned");
            for (id, _) in dead {
                // the slot may have been reused by a new registration meanwhile
                if clients.get(&id).is_some_and(|client| client.strong_count() == 0) {
                    clients.remove(&id);
                }
            }
        }
    }

    /// Every reachable method of every live provider of `service_name`.
    pub fn query(&self, service_name: &str) -> Vec<ServiceProviderRecord> {
        self.providers
            .lookup(|key, _| key.service_name == service_name)
            .iter()
            .flat_map(provider_records)
            .collect()
    }

    /// Like [`ServiceGateway::query`], restricted to one method.
    pub fn query_method(&self, service_name: &str, method_name: &str) -> Vec<ServiceProviderRecord> {
        self.query(service_name)
            .into_iter()
            .filter(|record| record.method_name == method_name)
            .collect()
    }

    /// Records the type signature of a service method and checks it against earlier ones.
    ///
    /// Returns `false` when the signature conflicts with the recorded one, which is kept.
    pub fn describe_types(
        &self,
        service_name: &str,
        method_name: &str,
        request_type: TypeInformation,
        response_type: TypeInformation,
    ) -> bool {
        self.descriptions.apply(
            service_name,
            method_name,
            MethodTypes {
                request: request_type,
                response: response_type,
            },
        )
    }

    #[must_use]
    pub fn recorded_types(&self, service_name: &str, method_name: &str) -> Option<MethodTypes> {
        self.descriptions.get(service_name, method_name)
    }

    /// Physically removes expired providers and signatures. Returns the number of providers removed.
    pub fn sweep(&self) -> usize {
        self.descriptions.expire();
        self.providers.expire()
    }

    /// Calls [`ServiceGateway::sweep`] every `period` until `cancel_token` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!("Expired {} service providers", removed);
                        }
                    }
                }
            }
            debug!("Service gateway sweeper stopped");
        })
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            announcements: self.counters.announcements.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            unregistered: self.counters.unregistered.load(Ordering::Relaxed),
            type_conflicts: self.counters.type_conflicts.load(Ordering::Relaxed),
        }
    }
}

fn provider_records(announcement: &Announcement) -> Vec<ServiceProviderRecord> {
    let record = |method: Option<&MethodDescriptor>| ServiceProviderRecord {
        service_name: announcement.entity_name.clone(),
        service_id: announcement.entity_id.clone(),
        method_name: method.map(|m| m.name.clone()).unwrap_or_default(),
        request_type: method.map(|m| m.request_type.clone()).unwrap_or_default(),
        response_type: method.map(|m| m.response_type.clone()).unwrap_or_default(),
        location: announcement.location.clone(),
        host_name: announcement.host_name.clone(),
        process_name: announcement.process_name.clone(),
        process_id: announcement.process_id,
    };
    // a provider without described methods is still reachable
    if announcement.methods.is_empty() {
        return vec![record(None)];
    }
    announcement.methods.iter().map(|m| record(Some(m))).collect()
}
