//! LAN discovery: figure out the host's reachable address and advertise
//! the service over mDNS so clients on the same network can find it
//! without typing an IP.

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

pub const SERVICE_TYPE: &str = "_syndicate._tcp.local.";

/// Best-guess LAN address for join URLs. `None` when the machine has no
/// usable non-loopback interface.
pub fn network_ip() -> Option<String> {
    match local_ip_address::local_ip() {
        Ok(ip) => Some(ip.to_string()),
        Err(err) => {
            warn!("could not determine LAN address: {}", err);
            None
        }
    }
}

/// Keeps the mDNS advertisement alive. Dropping it unregisters the
/// service.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertisement {
    /// Register the host on the local network. Failure is logged and
    /// surfaced as an error; the caller treats it as non-fatal since the
    /// host is still reachable by direct address.
    pub fn start(instance: &str, ip: &str, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("starting mDNS daemon")?;
        let hostname = format!("{}.local.", instance);
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            instance,
            &hostname,
            ip,
            port,
            &[("path", "/")][..],
        )
        .context("building mDNS service info")?;
        let fullname = service.get_fullname().to_string();
        daemon.register(service).context("registering mDNS service")?;
        info!("advertising {} at {}:{}", fullname, ip, port);
        Ok(Self { daemon, fullname })
    }
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        let _ = self.daemon.unregister(&self.fullname);
    }
}
