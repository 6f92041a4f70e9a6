use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Linux,
    #[serde(rename = "mac")]
    MacOs,
    Windows,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Android,
        Platform::Ios,
        Platform::Linux,
        Platform::MacOs,
        Platform::Windows,
    ];

    /// Identifier exchanged through the BLE `OS` characteristic.
    pub fn wire_name(self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Linux => "linux",
            Platform::MacOs => "mac",
            Platform::Windows => "windows",
        }
    }

    pub fn current() -> Option<Platform> {
        if cfg!(target_os = "android") {
            Some(Platform::Android)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else if cfg!(target_os = "ios") {
            Some(Platform::Ios)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "linux" => Ok(Platform::Linux),
            "mac" | "macos" => Ok(Platform::MacOs),
            "windows" => Ok(Platform::Windows),
            _ => Err(CoreError::UnknownPlatform(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Send,
    Receive,
}

impl TransferMode {
    /// Value written during mode negotiation: 1 = sending, 0 = receiving.
    pub fn wire_value(self) -> u64 {
        match self {
            TransferMode::Send => 1,
            TransferMode::Receive => 0,
        }
    }

    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(TransferMode::Send),
            0 => Some(TransferMode::Receive),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            TransferMode::Send => TransferMode::Receive,
            TransferMode::Receive => TransferMode::Send,
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Send => f.write_str("send"),
            TransferMode::Receive => f.write_str("receive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Hosting,
    Joining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapability {
    /// Can start a hotspot without user interaction.
    pub can_auto_host: bool,
    /// Shows out-of-band credentials to this peer as a QR code rather than text.
    pub scans_qr: bool,
}

pub fn capability(platform: Platform) -> PlatformCapability {
    match platform {
        Platform::Android => PlatformCapability {
            can_auto_host: true,
            scans_qr: true,
        },
        Platform::Ios => PlatformCapability {
            can_auto_host: false,
            scans_qr: true,
        },
        Platform::Linux => PlatformCapability {
            can_auto_host: true,
            scans_qr: false,
        },
        Platform::MacOs => PlatformCapability {
            can_auto_host: false,
            scans_qr: false,
        },
        Platform::Windows => PlatformCapability {
            can_auto_host: true,
            scans_qr: false,
        },
    }
}

/// Decide which side creates the network.
///
/// Apple platforms never host. Among hosting-capable platforms, Windows
/// hosts for everyone but another Windows machine that is receiving, Linux
/// defers to Windows, and Android defers to both desktops. Two instances of
/// the same platform split by mode: the receiver hosts.
pub fn resolve_role(
    local: Platform,
    peer: Platform,
    mode: TransferMode,
) -> Result<Role, CoreError> {
    use Platform::*;
    use Role::*;
    use TransferMode::*;

    let role = match (local, peer, mode) {
        (Ios | MacOs, Ios | MacOs, _) => None,
        (Ios | MacOs, Android | Linux | Windows, _) => Some(Joining),
        (Android | Linux | Windows, Ios | MacOs, _) => Some(Hosting),

        (Android, Android, Receive) => Some(Hosting),
        (Android, Android, Send) => Some(Joining),
        (Android, Linux | Windows, _) => Some(Joining),

        (Linux, Android, _) => Some(Hosting),
        (Linux, Linux, Receive) => Some(Hosting),
        (Linux, Linux, Send) => Some(Joining),
        (Linux, Windows, _) => Some(Joining),

        (Windows, Android | Linux, _) => Some(Hosting),
        (Windows, Windows, Receive) => Some(Hosting),
        (Windows, Windows, Send) => Some(Joining),
    };

    role.ok_or(CoreError::UnresolvedRole { local, peer, mode })
}
