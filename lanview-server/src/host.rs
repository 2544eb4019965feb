//! Local identity announced in discovery replies.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

/// Address a LAN peer can reach us on.
///
/// Connecting a UDP socket sends nothing but makes the OS pick the
/// outbound interface; its local address is the one to advertise.
/// Falls back to loopback when there is no route.
pub fn detect_ip() -> IpAddr {
    let route = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match route() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("route lookup failed: {e}; advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// The OS host name, or `"unknown"` when it cannot be read.
pub fn detect_hostname() -> String {
    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy().trim().to_string();
            if name.is_empty() { "unknown".into() } else { name }
        }
        Err(e) => {
            debug!("hostname lookup failed: {e}");
            "unknown".into()
        }
    }
}

/// Configured value, or the detected one when empty.
pub fn advertised_ip(configured: &str) -> String {
    match configured.trim() {
        "" => detect_ip().to_string(),
        ip => ip.to_string(),
    }
}

pub fn advertised_hostname(configured: &str) -> String {
    match configured.trim() {
        "" => detect_hostname(),
        name => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_values_win() {
        assert_eq!(advertised_ip("10.0.0.7"), "10.0.0.7");
        assert_eq!(advertised_hostname(" office-pc "), "office-pc");
    }

    #[test]
    fn detected_hostname_matches_the_os() {
        let os = hostname::get().unwrap();
        assert_eq!(detect_hostname(), os.to_string_lossy().trim());
        assert_eq!(advertised_hostname(""), detect_hostname());
    }

    #[test]
    fn detection_always_yields_something() {
        let ip = detect_ip();
        assert!(!ip.is_unspecified());
        assert!(!detect_hostname().is_empty());
        assert!(!advertised_ip("").is_empty());
    }
}
