// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Explicitly constructed runtime shared by the components of one node.
//!
//! Creation order:
//!
//! 1. log sinks and the log forwarder
//! 2. the log receiver feeding [`LogAggregator::on_remote_sample`]
//! 3. the service gateway, its registration receiver and sweeper
//! 4. the announcer
//!
//! [`DiscoveryContext::shutdown`] tears down in reverse: the announcer withdraws every local
//! entity first, then receivers, sweeper and forwarder stop together. Dropping the context
//! without calling `shutdown` still cancels every task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::announcer::{Announcer, REGISTRATION_SAMPLE_NAME};
use crate::config::Config;
use crate::errors::{ContextError, TransportError};
use crate::gateway::ServiceGateway;
use crate::logging::forwarder::{LogForwarder, LOG_SAMPLE_NAME};
use crate::logging::sink::{ConsoleSink, FileSink, LogSink};
use crate::logging::{LogAggregator, LogSinks};
use crate::process::ProcessIdentity;
use crate::receiver::{SampleCallback, SampleReceiver};
use crate::sample::{Announcement, Command, EntityKind};
use crate::sender::SampleSender;

pub struct DiscoveryContext {
    config: Config,
    identity: ProcessIdentity,
    gateway: Arc<ServiceGateway>,
    logs: Arc<LogAggregator>,
    announcer: Arc<Announcer>,
    registration_addr: SocketAddr,
    logging_addr: SocketAddr,
    cancel_token: CancellationToken,
    announcer_token: CancellationToken,
    announcer_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryContext {
    /// Binds every socket and starts every background task.
    ///
    /// Fails if the configuration is invalid, a socket cannot be set up, or the configured
    /// log directory exists but no log file can be created in it.
    pub async fn create(config: Config) -> Result<Self, ContextError> {
        config.validate()?;
        let identity =
            ProcessIdentity::current(config.unit_name.as_deref(), config.hostname.as_deref());
        let cancel_token = CancellationToken::new();
        let mut tasks = Vec::new();

        let logging_sender = Arc::new(SampleSender::bind(&config.logging_sender()).await?);
        let (forwarder, network_sink) = LogForwarder::new(logging_sender, config.bandwidth_limit);
        tasks.push(tokio::spawn(forwarder.run(cancel_token.clone())));

        let logs = Arc::new(LogAggregator::new(
            identity.clone(),
            config.sink_filters(),
            LogSinks {
                console: Some(Box::new(ConsoleSink::stdout())),
                file: file_sink(&config, &identity)?,
                network: Some(Box::new(network_sink)),
            },
            config.network_enabled,
        ));

        let log_receiver = {
            let logs = Arc::clone(&logs);
            let callback: SampleCallback = Arc::new(move |sample| {
                if sample.name == LOG_SAMPLE_NAME {
                    logs.on_remote_sample(&sample.payload);
                } else {
                    trace!("Ignoring '{}' sample on the logging port", sample.name);
                }
            });
            SampleReceiver::bind(&config.logging_receiver(), callback, cancel_token.clone())
                .await?
        };
        let logging_addr = local_addr(&log_receiver)?;
        tasks.push(log_receiver.spawn());

        let gateway = Arc::new(ServiceGateway::new(config.registration_timeout));
        let registration_receiver = {
            let gateway = Arc::clone(&gateway);
            let callback: SampleCallback = Arc::new(move |sample| {
                if sample.name == REGISTRATION_SAMPLE_NAME {
                    gateway.apply_announcement(&sample.payload);
                } else {
                    trace!("Ignoring '{}' sample on the registration port", sample.name);
                }
            });
            SampleReceiver::bind(&config.registration_receiver(), callback, cancel_token.clone())
                .await?
        };
        let registration_addr = local_addr(&registration_receiver)?;
        tasks.push(registration_receiver.spawn());
        tasks.push(
            Arc::clone(&gateway).spawn_sweeper(config.sweep_interval, cancel_token.clone()),
        );

        let registration_sender = SampleSender::bind(&config.registration_sender()).await?;
        let announcer = Arc::new(Announcer::new(
            Arc::new(registration_sender),
            config.bandwidth_limit,
        ));
        let announcer_token = cancel_token.child_token();
        let announcer_task = Some(
            Arc::clone(&announcer).spawn(config.registration_refresh, announcer_token.clone()),
        );

        info!(
            "Discovery context created for {} (pid {}) on {}:{}",
            identity.unit_name,
            identity.process_id,
            config.registration_address,
            registration_addr.port()
        );

        Ok(Self {
            config,
            identity,
            gateway,
            logs,
            announcer,
            registration_addr,
            logging_addr,
            cancel_token,
            announcer_token,
            announcer_task,
            tasks,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<ServiceGateway> {
        &self.gateway
    }

    #[must_use]
    pub fn logs(&self) -> &Arc<LogAggregator> {
        &self.logs
    }

    #[must_use]
    pub fn announcer(&self) -> &Arc<Announcer> {
        &self.announcer
    }

    /// Local address of the registration receiver.
    #[must_use]
    pub fn registration_addr(&self) -> SocketAddr {
        self.registration_addr
    }

    /// Local address of the log receiver.
    #[must_use]
    pub fn logging_addr(&self) -> SocketAddr {
        self.logging_addr
    }

    /// Announcement describing this process itself.
    #[must_use]
    pub fn process_announcement(&self) -> Announcement {
        Announcement {
            command: Command::Register,
            kind: EntityKind::Process,
            host_name: self.identity.host_name.clone(),
            process_id: self.identity.process_id,
            process_name: self.identity.process_name.clone(),
            unit_name: self.identity.unit_name.clone(),
            entity_name: self.identity.process_name.clone(),
            entity_id: self.identity.process_id.to_string(),
            methods: Vec::new(),
            location: String::new(),
        }
    }

    /// Starts announcing this process to the group.
    pub async fn register_process(&self) -> Result<(), TransportError> {
        self.announcer.register(self.process_announcement()).await
    }

    /// Withdraws local entities, then stops every background task and waits for it.
    pub async fn shutdown(mut self) {
        debug!("Shutting down discovery context");
        self.announcer_token.cancel();
        if let Some(task) = self.announcer_task.take() {
            if let Err(e) = task.await {
                error!("Announcer task failed: {}", e);
            }
        }

        self.cancel_token.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
        info!("Discovery context stopped");
    }
}

impl Drop for DiscoveryContext {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn local_addr(receiver: &SampleReceiver) -> Result<SocketAddr, TransportError> {
    receiver
        .local_addr()
        .map_err(|source| TransportError::Socket {
            option: "local address",
            source,
        })
}

fn file_sink(
    config: &Config,
    identity: &ProcessIdentity,
) -> Result<Option<Box<dyn LogSink>>, ContextError> {
    let Some(dir) = &config.log_dir else {
        return Ok(None);
    };
    if !dir.is_dir() {
        warn!(
            "Log directory {} does not exist, file logging disabled",
            dir.display()
        );
        return Ok(None);
    }
    let sink = FileSink::create(dir, &identity.unit_name, identity.process_id).map_err(
        |source| ContextError::LogFile {
            path: dir.clone(),
            source,
        },
    )?;
    debug!("Logging to {}", sink.path().display());
    Ok(Some(Box::new(sink)))
}
