use std::time::Duration;

use castcontrol::chromecast::ChromecastDiscovery;

fn main() -> anyhow::Result<()> {
    // Un tout petit logging optionnel
    tracing_subscriber::fmt::init();

    let secs = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5);
    tracing::info!("Browsing for Chromecasts during {}s...", secs);

    let devices = ChromecastDiscovery::new(Duration::from_secs(secs)).browse()?;

    println!("=====================");
    println!("Chromecasts detected : {}", devices.len());
    for (index, d) in devices.iter().enumerate() {
        println!(
            "{}. {} ({}) [{}] {}",
            index,
            d.friendly_name,
            d.model.as_deref().unwrap_or("?"),
            d.id,
            d.location()
        );
    }
    println!("=====================");
    Ok(())
}
