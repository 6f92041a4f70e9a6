//! WiFi backends for desktop Linux.
//!
//! [`NmcliWifi`] drives NetworkManager: the hosting side creates a WPA2
//! access point with a shared IPv4 range, the joining side adds a
//! connection that never becomes the default route so the machine keeps
//! its regular internet link. [`StaticWifi`] is for devices that already
//! share a network and only need the transfer itself.

use std::net::IpAddr;

use airhop_core::Credentials;
use airhop_session::{HotspotConfig, SessionError, WifiProvider};
use tokio::process::Command;
use tracing::{debug, info, warn};

const HOTSPOT_CONNECTION: &str = "airhop-hotspot";
const JOIN_CONNECTION: &str = "airhop-join";

pub struct NmcliWifi {
    interface: String,
}

impl NmcliWifi {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn remove_connection(&self, name: &str) -> Result<(), SessionError> {
        if let Err(err) = run("nmcli", &["connection", "down", name]).await {
            debug!(connection = name, "bring down failed: {err}");
        }
        run("nmcli", &["connection", "delete", name]).await.map(|_| ())
    }

    async fn peer_address(&self) -> Result<IpAddr, SessionError> {
        let dhcp = run("nmcli", &["-g", "DHCP4", "device", "show", &self.interface]).await?;
        if let Some(server) = parse_dhcp_server(&dhcp) {
            return Ok(server);
        }

        let routes = run("ip", &["route", "show", "dev", &self.interface]).await?;
        parse_default_gateway(&routes).ok_or_else(|| {
            SessionError::Network(format!(
                "no gateway address on {} after joining",
                self.interface
            ))
        })
    }
}

impl WifiProvider for NmcliWifi {
    async fn start_hotspot(&self) -> Result<HotspotConfig, SessionError> {
        let credentials = Credentials::generate();
        // A leftover profile from an interrupted run would shadow the new one.
        let _ = self.remove_connection(HOTSPOT_CONNECTION).await;

        run(
            "nmcli",
            &[
                "connection",
                "add",
                "type",
                "wifi",
                "ifname",
                &self.interface,
                "con-name",
                HOTSPOT_CONNECTION,
                "autoconnect",
                "no",
                "ssid",
                credentials.ssid(),
                "802-11-wireless.mode",
                "ap",
                "802-11-wireless.band",
                "bg",
                "ipv4.method",
                "shared",
                "ipv6.method",
                "ignore",
                "wifi-sec.key-mgmt",
                "wpa-psk",
                "wifi-sec.proto",
                "rsn",
                "wifi-sec.pairwise",
                "ccmp",
                "wifi-sec.group",
                "ccmp",
                "wifi-sec.pmf",
                "disable",
                "wifi-sec.psk",
                credentials.password(),
            ],
        )
        .await?;
        run("nmcli", &["connection", "up", HOTSPOT_CONNECTION]).await?;

        info!(interface = %self.interface, ssid = credentials.ssid(), "hotspot up");
        Ok(HotspotConfig {
            ssid: credentials.ssid().to_owned(),
            password: credentials.password().to_owned(),
        })
    }

    async fn stop_hotspot(&self) -> Result<(), SessionError> {
        self.remove_connection(HOTSPOT_CONNECTION).await?;
        info!(interface = %self.interface, "hotspot removed");
        Ok(())
    }

    async fn join_network(&self, ssid: &str, password: &str) -> Result<IpAddr, SessionError> {
        let _ = self.remove_connection(JOIN_CONNECTION).await;

        run(
            "nmcli",
            &[
                "connection",
                "add",
                "type",
                "wifi",
                "ifname",
                &self.interface,
                "con-name",
                JOIN_CONNECTION,
                "autoconnect",
                "no",
                "ssid",
                ssid,
                "ipv4.never-default",
                "yes",
                "ipv6.method",
                "ignore",
                "wifi-sec.key-mgmt",
                "wpa-psk",
                "wifi-sec.psk",
                password,
            ],
        )
        .await?;
        run("nmcli", &["connection", "up", JOIN_CONNECTION]).await?;

        let peer = self.peer_address().await?;
        info!(interface = %self.interface, ssid, %peer, "joined peer network");
        Ok(peer)
    }

    async fn leave_network(&self) -> Result<(), SessionError> {
        self.remove_connection(JOIN_CONNECTION).await
    }
}

/// Both devices are already on the same network. Hosting hands out
/// credentials for key derivation only; joining connects to `peer_ip`.
pub struct StaticWifi {
    password: Option<String>,
    peer_ip: Option<IpAddr>,
}

impl StaticWifi {
    pub fn new(password: Option<String>, peer_ip: Option<IpAddr>) -> Self {
        Self { password, peer_ip }
    }
}

impl WifiProvider for StaticWifi {
    async fn start_hotspot(&self) -> Result<HotspotConfig, SessionError> {
        let credentials = match self.password.as_deref() {
            Some(password) => Credentials::from_manual(None, password)?,
            None => Credentials::generate(),
        };
        Ok(HotspotConfig {
            ssid: credentials.ssid().to_owned(),
            password: credentials.password().to_owned(),
        })
    }

    async fn stop_hotspot(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn join_network(&self, _ssid: &str, _password: &str) -> Result<IpAddr, SessionError> {
        self.peer_ip.ok_or_else(|| {
            SessionError::Network("the static network backend needs --peer-ip".to_owned())
        })
    }

    async fn leave_network(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

pub enum CliWifi {
    Nmcli(NmcliWifi),
    Static(StaticWifi),
}

impl WifiProvider for CliWifi {
    async fn start_hotspot(&self) -> Result<HotspotConfig, SessionError> {
        match self {
            CliWifi::Nmcli(wifi) => wifi.start_hotspot().await,
            CliWifi::Static(wifi) => wifi.start_hotspot().await,
        }
    }

    async fn stop_hotspot(&self) -> Result<(), SessionError> {
        match self {
            CliWifi::Nmcli(wifi) => wifi.stop_hotspot().await,
            CliWifi::Static(wifi) => wifi.stop_hotspot().await,
        }
    }

    async fn join_network(&self, ssid: &str, password: &str) -> Result<IpAddr, SessionError> {
        match self {
            CliWifi::Nmcli(wifi) => wifi.join_network(ssid, password).await,
            CliWifi::Static(wifi) => wifi.join_network(ssid, password).await,
        }
    }

    async fn leave_network(&self) -> Result<(), SessionError> {
        match self {
            CliWifi::Nmcli(wifi) => wifi.leave_network().await,
            CliWifi::Static(wifi) => wifi.leave_network().await,
        }
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String, SessionError> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SessionError::Network(format!("failed to run {program}: {e}")))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    warn!(program, status = %output.status, "command failed: {stderr}");
    if is_privilege_error(&stderr) {
        Err(SessionError::PermissionDenied(stderr))
    } else {
        Err(SessionError::Network(format!("{program} failed: {stderr}")))
    }
}

fn is_privilege_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not authorized")
        || lower.contains("insufficient privileges")
        || lower.contains("permission denied")
}

/// Server identifier from `nmcli -g DHCP4 device show` output. Values come
/// back as `name = value` pairs separated by ` | ` or newlines.
pub fn parse_dhcp_server(output: &str) -> Option<IpAddr> {
    output
        .split(['|', '\n'])
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == "dhcp_server_identifier")
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Gateway from the `default via <addr> ...` line of `ip route` output.
pub fn parse_default_gateway(output: &str) -> Option<IpAddr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != "default" {
            return None;
        }
        words.skip_while(|word| *word != "via").nth(1)?.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhcp_server_from_pipe_separated_values() {
        let output = "broadcast_address = 10.42.0.255 | dhcp_lease_time = 3600 | \
                      dhcp_server_identifier = 10.42.0.1 | ip_address = 10.42.0.57";
        assert_eq!(parse_dhcp_server(output), "10.42.0.1".parse().ok());
    }

    #[test]
    fn dhcp_server_from_line_separated_values() {
        let output = "expiry = 1700000000\ndhcp_server_identifier = 192.168.43.1\n";
        assert_eq!(parse_dhcp_server(output), "192.168.43.1".parse().ok());
    }

    #[test]
    fn dhcp_output_without_server_identifier() {
        assert_eq!(parse_dhcp_server(""), None);
        assert_eq!(parse_dhcp_server("routers = 10.0.0.1"), None);
    }

    #[test]
    fn default_gateway_from_ip_route() {
        let output = "10.42.0.0/24 proto kernel scope link src 10.42.0.57 metric 600\n\
                      default via 10.42.0.1 proto dhcp src 10.42.0.57 metric 600\n";
        assert_eq!(parse_default_gateway(output), "10.42.0.1".parse().ok());
    }

    #[test]
    fn no_default_route() {
        let output = "10.42.0.0/24 proto kernel scope link src 10.42.0.57";
        assert_eq!(parse_default_gateway(output), None);
        assert_eq!(parse_default_gateway("default dev wlan0"), None);
    }

    #[test]
    fn privilege_errors_are_recognised() {
        assert!(is_privilege_error(
            "Error: Failed to add 'airhop-hotspot' connection: Insufficient privileges"
        ));
        assert!(is_privilege_error("Error: Not authorized to control networking."));
        assert!(!is_privilege_error("Error: No Wi-Fi device found."));
    }

    #[tokio::test]
    async fn static_backend_hands_out_derived_credentials() {
        let wifi = StaticWifi::new(Some("correct horse".to_owned()), None);
        let config = wifi.start_hotspot().await.expect("start");
        let expected = Credentials::from_password("correct horse").expect("credentials");
        assert_eq!(config.ssid, expected.ssid());
        assert_eq!(config.password, "correct horse");

        let err = wifi.join_network("x", "y").await.unwrap_err();
        assert!(matches!(err, SessionError::Network(_)));
    }

    #[tokio::test]
    async fn static_backend_joins_the_given_peer() {
        let peer: IpAddr = "192.168.1.20".parse().expect("ip");
        let wifi = StaticWifi::new(None, Some(peer));
        assert_eq!(wifi.join_network("x", "y").await.expect("join"), peer);
    }
}
