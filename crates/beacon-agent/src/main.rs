// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::env;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, info_span};
use tracing_subscriber::EnvFilter;

use beacon::config::Config;
use beacon::context::DiscoveryContext;
use beacon::logging::LogLevel;

const COLLECT_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("BEACON_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading configuration: {e}");
            return;
        }
    };
    let refresh = config.registration_refresh;

    let context = match DiscoveryContext::create(config).await {
        Ok(context) => context,
        Err(e) => {
            error!("Error creating discovery context: {e}");
            return;
        }
    };

    if let Err(e) = context.register_process().await {
        error!("Failed to announce process: {e}");
    }
    context.logs().log(
        LogLevel::Info,
        &format!(
            "{} started on {} (pid {})",
            context.identity().unit_name,
            context.identity().host_name,
            context.identity().process_id
        ),
    );

    let mut refresh_interval = interval(refresh);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut collect_interval = interval(COLLECT_INTERVAL);
    collect_interval.tick().await; // discard first tick, which is instantaneous

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = refresh_interval.tick() => {
                context.gateway().refresh_registrations();
            }
            _ = collect_interval.tick() => collect(&context),
        }
    }

    context.shutdown().await;
}

fn collect(context: &DiscoveryContext) {
    let records = context.logs().drain_buffer();
    let _span = info_span!("collector", records = records.len()).entered();
    for record in &records {
        info!(
            "{} | {} | {} | {} | {}",
            record.host_name, record.unit_name, record.process_id, record.level, record.message
        );
    }

    let gateway = context.gateway().stats();
    let logs = context.logs().stats();
    debug!(
        "announcements={} malformed={} conflicts={} logs_accepted={} logs_discarded={}",
        gateway.announcements,
        gateway.malformed + logs.malformed,
        gateway.type_conflicts,
        logs.accepted,
        logs.discarded
    );
}
