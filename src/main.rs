use std::{sync::Arc, thread};

use anyhow::{Context, Result};
use display_agent::{
    Bridge, Config, MqttTransport, OutputRegistry, RegistryOptions, Sway, SystemdNotifier, Topics,
    read_machine_id,
};
use log::{error, info};
use nix::sys::signal::{SigSet, Signal};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let machine_id =
        read_machine_id(&config.machine_id_file).context("unable to determine machine id")?;
    info!(
        "starting as {} with topic prefix {}",
        machine_id, config.topic_prefix
    );

    // Block before spawning anything so every thread inherits the mask.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("unable to block signals")?;

    let transport = Arc::new(
        MqttTransport::connect(
            &config.mqtt_server_url,
            &format!("display-agent-{}", machine_id),
            config.transport_timeout,
        )
        .context("unable to connect to MQTT")?,
    );

    let (mut registry, handle) = OutputRegistry::new(
        Arc::new(Sway::new(config.swaymsg.clone())),
        RegistryOptions {
            refresh_interval: config.refresh_interval,
            launchers: config.launchers.clone(),
        },
    );
    let mut bridge = Bridge::new(
        Topics::new(config.topic_prefix.clone(), machine_id),
        Arc::clone(&transport),
        Box::new(SystemdNotifier::from_env()),
        handle.clone(),
    );
    registry.subscribe(move |event| bridge.handle(event));

    let worker = thread::Builder::new()
        .name("registry".to_string())
        .spawn(move || registry.run())
        .context("unable to start registry thread")?;

    let signal = signals.wait().context("unable to wait for signals")?;
    info!("received {}, shutting down", signal);

    // The registry publishes its tombstones before the thread ends.
    let _ = handle.shutdown();
    if worker.join().is_err() {
        error!("registry thread panicked");
    }
    transport.disconnect();

    info!("stopped");
    Ok(())
}
