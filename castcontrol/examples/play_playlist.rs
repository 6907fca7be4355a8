//! Plays an M3U playlist on a Chromecast and follows the queue.
//!
//! Usage:
//!   cargo run --example play_playlist -- <device name> <playlist.m3u|url>

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use castcontrol::{
    CastController, CatalogResolver, ChromecastDiscovery, M3uResolver, SessionSettings,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(name), Some(link)) = (args.next(), args.next()) else {
        eprintln!("Usage: play_playlist <device name> <playlist>");
        std::process::exit(1);
    };

    let controller = CastController::new(
        Box::new(ChromecastDiscovery::default()),
        SessionSettings::default(),
    );
    controller.refresh_devices()?;
    let device = controller.select_device_by_name(&name)?;
    println!("Playing on {}", device.friendly_name);

    let resolver: Arc<dyn CatalogResolver> = Arc::new(M3uResolver::default());
    let resolution = resolver.resolve(&link)?;
    println!(
        "{} track(s), {} skipped",
        resolution.tracks.len(),
        resolution.failures
    );

    let worker = controller.spawn_event_worker();
    controller.push_many(resolution.tracks)?;

    loop {
        thread::sleep(Duration::from_secs(10));
        println!("{}\n", controller.format_queue(None));
        if controller.queue_view().pending.is_empty() && controller.snapshot().activity.accepts_immediate_start() {
            break;
        }
    }

    controller.shutdown();
    let _ = worker.join();
    Ok(())
}
