//! Chromecast backend: Cast v2 control over TLS plus mDNS discovery.

mod discovery;
mod renderer;
mod status;

use std::sync::Once;

pub use discovery::{ChromecastDiscovery, DEFAULT_DISCOVERY_TIMEOUT, SERVICE_NAME};
pub use renderer::{ChromecastDevice, DEFAULT_VOLUME_STEP};

/// Default Cast port.
pub const DEFAULT_CHROMECAST_PORT: u16 = 8009;

/// Installs the rustls crypto provider once per process.
///
/// rust_cast builds its TLS client config with the process default provider,
/// which must exist before the first connection.
pub fn ensure_crypto_provider() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(
            rustls::crypto::aws_lc_rs::default_provider(),
        );
        tracing::debug!("Rustls CryptoProvider initialized");
    });
}
