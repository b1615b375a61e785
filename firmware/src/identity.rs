#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Device identity derived from the station MAC address.

use core::fmt::Write;

use heapless::String;

/// `AA:BB:CC:DD:EE:FF`
pub const DEVICE_ID_LEN: usize = 17;

pub const HOSTNAME_PREFIX: &str = "EM-";
pub const HOSTNAME_LEN: usize = 7;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceIdentity {
    device_id: String<DEVICE_ID_LEN>,
    hostname: String<HOSTNAME_LEN>,
}

impl DeviceIdentity {
    #[must_use]
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut device_id = String::new();
        for (index, octet) in mac.iter().enumerate() {
            if index > 0 {
                let _ = device_id.push(':');
            }
            let _ = write!(device_id, "{octet:02X}");
        }

        // Last four hex digits of the MAC, i.e. the last two octets.
        let mut hostname = String::new();
        let _ = write!(hostname, "{HOSTNAME_PREFIX}{:02X}{:02X}", mac[4], mac[5]);

        Self {
            device_id,
            hostname,
        }
    }

    /// Identifier sent as `deviceId` with every report.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// DHCP hostname announced on the network.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}
