use anyhow::{Context, Result};
use log::info;
use pacebms_lib::client::PaceBms;
use pacebms_lib::session::{Session, SessionConfig};
use pacebms_lib::transport::Transport;
use std::sync::atomic::Ordering;

use crate::{config::Options, mqtt};

pub fn run(bms: PaceBms<Box<dyn Transport>>, options: &Options) -> Result<()> {
    info!(
        "Starting daemon mode: connection={:?}, scan_interval={:?}, mqtt={}:{}, base_topic={}",
        options.connection_type,
        options.scan_interval(),
        options.mqtt_host,
        options.mqtt_port,
        options.mqtt_base_topic
    );

    let publisher =
        mqtt::MqttPublisher::new(options).with_context(|| "Failed to create MQTT publisher")?;

    let mut session = Session::new(
        bms,
        publisher,
        SessionConfig {
            scan_interval: options.scan_interval(),
            hints: options.hints(),
        },
    );

    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        info!("Stop requested, finishing current step");
        stop.store(true, Ordering::SeqCst);
    })
    .with_context(|| "Cannot install Ctrl-C handler")?;

    session.run();
    session.publisher_mut().shutdown();
    info!("Daemon stopped");
    Ok(())
}
