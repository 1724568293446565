use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use collector_app::{AppConfig, PrometheusMetricsSink, SolarController, TracingPublisher};
use modbus_client::ModbusClient;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = config_path_from_args(env::args().skip(1));
    let config = AppConfig::load_with_path(config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;

    if !config.enabled {
        info!("controller disabled via configuration");
        return Ok(());
    }

    let client = Arc::new(
        ModbusClient::connect(&config.serial).context("serial connect failed")?,
    );
    info!(
        port = %config.serial.serial_port,
        baud_rate = config.serial.baud_rate,
        slave_id = config.serial.slave_id,
        "connected to charge controller"
    );

    let publisher = Arc::new(TracingPublisher::new(config.topic_prefix.clone()));
    let metrics = Arc::new(PrometheusMetricsSink::new());
    let controller = SolarController::new(&config, client.clone(), publisher, metrics.clone());

    match controller.config().await {
        Ok(device) => info!(
            device_id = %controller.identity().device_id,
            battery_type = ?device.battery_type,
            battery_capacity = device.battery_capacity,
            "device configuration loaded"
        ),
        Err(err) => warn!(error = %err, "initial configuration read failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(controller.scheduler().run(shutdown_rx.clone()));

    signal_service_ready();
    let watchdog_handle = spawn_watchdog_pinger(shutdown_rx.clone());

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal failed")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(err) = scheduler_handle.await {
        warn!(error = %err, "scheduler task join failed");
    }
    client.close().await;
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }

    debug!(exposition = %metrics.render(), "final metrics");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `--config <path>` or `--config=<path>`; the last occurrence wins.
fn config_path_from_args(args: impl IntoIterator<Item = String>) -> Option<String> {
    let args: Vec<String> = args.into_iter().collect();
    let mut path = None;
    for (index, arg) in args.iter().enumerate() {
        match arg.split_once('=') {
            Some(("--config", value)) => path = Some(value.to_string()),
            _ if arg == "--config" => path = args.get(index + 1).cloned(),
            _ => {}
        }
    }
    path
}

#[cfg(target_os = "linux")]
fn signal_service_ready() {
    match sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        Ok(()) => debug!("reported readiness to systemd"),
        Err(err) => warn!(error = %err, "could not report charge controller service readiness"),
    }
}

#[cfg(not(target_os = "linux"))]
fn signal_service_ready() {}

/// Pings the systemd watchdog at half its timeout until shutdown.
#[cfg(target_os = "linux")]
fn spawn_watchdog_pinger(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let period = watchdog_period()?;
    info!(period_ms = period.as_millis() as u64, "systemd watchdog enabled");
    Some(tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "watchdog ping for charge controller service failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn spawn_watchdog_pinger(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_period() -> Option<Duration> {
    let timeout_usec: u64 = env::var("WATCHDOG_USEC").ok()?.parse().ok()?;
    let owner = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok());
    if owner.is_some_and(|pid| pid != std::process::id()) {
        return None;
    }

    // never ping faster than every 100 ms
    Some(Duration::from_micros((timeout_usec / 2).max(100_000)))
}
