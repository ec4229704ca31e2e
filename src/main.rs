//! prometheus alertmanager webhook receiver that forwards alerts to a stomp broker
//!
//! Features:
//! - forwards different webhook url paths onto different broker topics
//! - publishes every alert of a batch as its own json message
//! - liveness probe and prometheus metrics endpoints

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::Registry;

use crate::{
    alertmanager_webhook_receiver::State, forwarder::Forwarder, metrics::Metrics,
    settings::Settings, stomp::StompPublisher,
};

mod alert;
mod alertmanager_webhook_receiver;
mod forwarder;
mod log;
mod metrics;
mod settings;
mod stomp;

/// exit the complete program if one thread panics
fn setup_panic_handler() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_handler();

    let settings = Settings::global();

    log::setup_logging().context("could not setup logging")?;

    tracing::info!(
        listen = %settings.receiver.to_socket_addr(),
        broker = settings.broker.addr.as_str(),
        login = settings.broker.login.as_str(),
        debug = settings.log.debug,
        "loaded configuration"
    );

    let registry = Registry::new();
    let metrics =
        Arc::new(Metrics::new(&registry).context("failed to register prometheus meters")?);

    let publisher = StompPublisher::new(&settings.broker);
    let forwarder = Forwarder::new(publisher, metrics.clone());

    let state = Arc::new(State {
        forwarder,
        metrics,
        registry,
    });

    alertmanager_webhook_receiver::run(state).await
}
