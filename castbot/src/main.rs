mod console;
mod logging;

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Result;
use castconfig::{Config, get_config};
use castcontrol::{
    CastController, CatalogResolver, ChromecastDiscovery, CommandHandler, M3uResolver,
    SessionSettings,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{info, warn};

fn main() -> Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========
    let config = get_config();
    let log_control = logging::init_logging(&config)?;
    info!(config_dir=%config.config_directory(), "🚀 Starting castbot");

    // ========== PHASE 2 : Contrôleur ==========
    let controller = build_controller(&config);

    info!("📡 Discovering cast devices...");
    match controller.refresh_devices() {
        Ok(count) => info!("✅ {} device(s) found", count),
        Err(e) => warn!("⚠️ Initial discovery failed: {}", e),
    }
    select_preferred(&controller, config.get_preferred_device());

    let worker = controller.spawn_event_worker();
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let refresher = config
        .get_refresh_interval()
        .map(|interval| spawn_refresher(controller.clone(), interval, stop_rx));

    // ========== PHASE 3 : Console ==========
    let resolver: Arc<dyn CatalogResolver> = Arc::new(M3uResolver::new(config.get_http_timeout()));
    let handler = CommandHandler::new(controller.clone(), resolver)
        .with_max_message_length(config.get_max_message_length());

    info!("✅ castbot is ready, type /help");
    let served = console::serve(&handler, &log_control);

    // ========== Arrêt ==========
    info!("Shutting down");
    drop(stop_tx);
    controller.shutdown();
    if let Some(refresher) = refresher {
        let _ = refresher.join();
    }
    let _ = worker.join();

    served
}

fn build_controller(config: &Config) -> CastController {
    let volume_step = config.get_volume_step() as f32;
    let discovery =
        ChromecastDiscovery::new(config.get_discovery_timeout()).with_volume_step(volume_step);
    let settings = SessionSettings {
        ready_timeout: config.get_ready_timeout(),
        ready_poll_interval: config.get_ready_poll_interval(),
        content_type: config.get_content_type(),
    };
    CastController::new(Box::new(discovery), settings)
}

fn select_preferred(controller: &CastController, preferred: Option<String>) {
    let Some(name) = preferred else {
        return;
    };
    match controller.select_device_by_name(&name) {
        Ok(device) => info!(device=%device.friendly_name, "Preferred device selected"),
        Err(e) => warn!(device=%name, "Preferred device not selected: {}", e),
    }
}

/// Re-runs discovery every `interval` until `stop` is dropped.
fn spawn_refresher(
    controller: CastController,
    interval: Duration,
    stop: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match controller.refresh_devices() {
                    Ok(count) => info!("🔄 Device list refreshed: {} device(s)", count),
                    Err(e) => warn!("⚠️ Periodic discovery failed: {}", e),
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}
