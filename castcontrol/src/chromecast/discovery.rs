//! Chromecast discovery via mDNS.
//!
//! Cast receivers advertise `_googlecast._tcp.local`. One discovery round
//! sends queries for a bounded window, collects every answer and collapses
//! them by device identifier.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use futures_util::{pin_mut, stream::StreamExt};
use tracing::{debug, info, warn};

use super::renderer::{ChromecastDevice, DEFAULT_VOLUME_STEP};
use super::{DEFAULT_CHROMECAST_PORT, ensure_crypto_provider};
use crate::backend::{DeviceDiscovery, DeviceHandle};
use crate::model::{DeviceId, DeviceInfo};

pub const SERVICE_NAME: &str = "_googlecast._tcp.local";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between two mDNS queries inside a discovery window.
const QUERY_INTERVAL: Duration = Duration::from_secs(1);

pub struct ChromecastDiscovery {
    timeout: Duration,
    volume_step: f32,
}

impl Default for ChromecastDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

impl ChromecastDiscovery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            volume_step: DEFAULT_VOLUME_STEP,
        }
    }

    pub fn with_volume_step(mut self, step: f32) -> Self {
        self.volume_step = step;
        self
    }

    /// Browses the network and returns what answered, sorted by name.
    pub fn browse(&self) -> Result<Vec<DeviceInfo>> {
        let deadline = Instant::now() + self.timeout;
        let mut found: HashMap<String, DeviceInfo> = HashMap::new();

        async_std::task::block_on(async {
            let stream = mdns::discover::all(SERVICE_NAME, QUERY_INTERVAL)
                .map_err(|e| anyhow!("mDNS discovery failed to start: {}", e))?
                .listen();
            pin_mut!(stream);

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match async_std::future::timeout(remaining, stream.next()).await {
                    Ok(Some(Ok(response))) => {
                        if let Some(info) = device_info_from_response(&response) {
                            found.entry(info.id.0.clone()).or_insert(info);
                        }
                    }
                    Ok(Some(Err(e))) => warn!("mDNS error: {}", e),
                    Ok(None) | Err(_) => break,
                }
            }
            Ok::<(), anyhow::Error>(())
        })?;

        let mut devices: Vec<DeviceInfo> = found.into_values().collect();
        devices.sort_by(|a, b| {
            a.friendly_name
                .to_lowercase()
                .cmp(&b.friendly_name.to_lowercase())
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        info!("mDNS browse found {} Chromecast(s)", devices.len());
        Ok(devices)
    }
}

impl DeviceDiscovery for ChromecastDiscovery {
    fn discover(&self) -> Result<Vec<DeviceHandle>> {
        ensure_crypto_provider();
        Ok(self
            .browse()?
            .into_iter()
            .map(|info| {
                Arc::new(ChromecastDevice::new(info).with_volume_step(self.volume_step))
                    as DeviceHandle
            })
            .collect())
    }
}

/// Raw record values extracted from one mDNS response.
#[derive(Debug, Default)]
struct Answer {
    service: Option<String>,
    addresses: Vec<IpAddr>,
    port: Option<u16>,
    txt: Vec<String>,
}

fn device_info_from_response(response: &mdns::Response) -> Option<DeviceInfo> {
    let mut answer = Answer::default();
    for record in response.records() {
        match record.kind {
            mdns::RecordKind::PTR(ref name) if answer.service.is_none() => {
                answer.service = Some(name.clone())
            }
            mdns::RecordKind::A(addr) => answer.addresses.push(IpAddr::V4(addr)),
            mdns::RecordKind::AAAA(addr) => answer.addresses.push(IpAddr::V6(addr)),
            mdns::RecordKind::SRV { port, .. } if answer.port.is_none() => answer.port = Some(port),
            mdns::RecordKind::TXT(ref data) => answer.txt.extend(data.iter().cloned()),
            _ => {}
        }
    }
    answer.into_device_info()
}

impl Answer {
    fn into_device_info(self) -> Option<DeviceInfo> {
        let service = self.service?;

        // IPv4 d'abord, les receivers n'écoutent pas toujours en v6.
        let host = match self
            .addresses
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| self.addresses.first())
        {
            Some(addr) => addr.to_string(),
            None => {
                warn!("No IP address found for Chromecast device: {}", service);
                return None;
            }
        };

        let port = self.port.unwrap_or(DEFAULT_CHROMECAST_PORT);
        let txt = parse_txt(&self.txt);

        let id = txt
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("chromecast-{}-{}", host, port));
        let friendly_name = txt
            .get("fn")
            .cloned()
            .unwrap_or_else(|| name_from_service(&service));
        let model = txt.get("md").cloned();

        debug!(
            "Discovered Chromecast: {} at {}:{} (id: {}, model: {:?})",
            friendly_name, host, port, id, model
        );

        Some(DeviceInfo {
            id: DeviceId(id),
            friendly_name,
            host,
            port,
            model,
        })
    }
}

/// `key=value` TXT strings into a map. Later duplicates lose.
fn parse_txt(entries: &[String]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for entry in entries {
        if let Some((key, value)) = entry.split_once('=') {
            map.entry(key.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

/// Instance name without the service suffix nor the trailing 32-hex uuid.
fn name_from_service(service: &str) -> String {
    let instance = service
        .split(&format!(".{}", SERVICE_NAME))
        .next()
        .unwrap_or(service);
    let name = instance
        .split('-')
        .take_while(|part| !(part.len() == 32 && part.chars().all(|c| c.is_ascii_hexdigit())))
        .collect::<Vec<_>>()
        .join("-");
    let name = name.trim();
    if name.is_empty() {
        "Unknown Chromecast".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn txt(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_txt() {
        let map = parse_txt(&txt(&["id=abc", "fn=Living Room", "md=Chromecast Audio", "junk"]));
        assert_eq!(map.get("id").map(String::as_str), Some("abc"));
        assert_eq!(map.get("fn").map(String::as_str), Some("Living Room"));
        assert_eq!(map.get("md").map(String::as_str), Some("Chromecast Audio"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_txt_value_may_contain_equals() {
        let map = parse_txt(&txt(&["fn=A=B"]));
        assert_eq!(map.get("fn").map(String::as_str), Some("A=B"));
    }

    #[test]
    fn test_name_from_service() {
        assert_eq!(
            name_from_service(
                "Chromecast-Audio-0123456789abcdef0123456789abcdef._googlecast._tcp.local"
            ),
            "Chromecast-Audio"
        );
        assert_eq!(name_from_service("Kitchen._googlecast._tcp.local"), "Kitchen");
    }

    #[test]
    fn test_answer_to_device_info() {
        let answer = Answer {
            service: Some("Kitchen._googlecast._tcp.local".to_string()),
            addresses: vec![
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            ],
            port: Some(8010),
            txt: txt(&["id=42", "fn=Kitchen speaker", "md=Google Home"]),
        };
        let info = answer.into_device_info().unwrap();
        assert_eq!(info.id, DeviceId("42".to_string()));
        assert_eq!(info.friendly_name, "Kitchen speaker");
        assert_eq!(info.host, "192.168.1.20");
        assert_eq!(info.port, 8010);
        assert_eq!(info.model.as_deref(), Some("Google Home"));
        assert_eq!(info.location(), "chromecast://192.168.1.20:8010");
    }

    #[test]
    fn test_answer_defaults() {
        let answer = Answer {
            service: Some("Den._googlecast._tcp.local".to_string()),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))],
            port: None,
            txt: Vec::new(),
        };
        let info = answer.into_device_info().unwrap();
        assert_eq!(info.port, DEFAULT_CHROMECAST_PORT);
        assert_eq!(info.friendly_name, "Den");
        assert_eq!(info.id.0, "chromecast-10.0.0.5-8009");
    }

    #[test]
    fn test_answer_without_address_or_service() {
        let no_addr = Answer {
            service: Some("Den._googlecast._tcp.local".to_string()),
            ..Answer::default()
        };
        assert!(no_addr.into_device_info().is_none());
        assert!(Answer::default().into_device_info().is_none());
    }
}
