#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared link status for the firmware target.
//!
//! The Wi-Fi task owns the radio controller and publishes association state
//! and signal strength here; the agent task reads it through [`StatusLink`]
//! without touching the controller.

use meter_core::upload::NetworkLink;
use portable_atomic::{AtomicBool, AtomicI8, Ordering};

use crate::identity::DeviceIdentity;

const UNKNOWN_RSSI: i8 = i8::MIN;

/// Set while associated with an access point and holding a DHCP lease.
static LINK_UP: AtomicBool = AtomicBool::new(false);
/// Last sampled RSSI in dBm (`i8::MIN` == unknown).
static RSSI_DBM: AtomicI8 = AtomicI8::new(UNKNOWN_RSSI);

/// Records association state. Dropping the link also forgets the RSSI.
pub fn set_link_up(up: bool) {
    LINK_UP.store(up, Ordering::Relaxed);
    if !up {
        RSSI_DBM.store(UNKNOWN_RSSI, Ordering::Relaxed);
    }
}

pub fn link_up() -> bool {
    LINK_UP.load(Ordering::Relaxed)
}

pub fn record_rssi(dbm: Option<i8>) {
    RSSI_DBM.store(dbm.unwrap_or(UNKNOWN_RSSI), Ordering::Relaxed);
}

pub fn rssi() -> Option<i8> {
    match RSSI_DBM.load(Ordering::Relaxed) {
        UNKNOWN_RSSI => None,
        dbm => Some(dbm),
    }
}

/// [`NetworkLink`] view over the shared status.
pub struct StatusLink<'a> {
    identity: &'a DeviceIdentity,
}

impl<'a> StatusLink<'a> {
    pub const fn new(identity: &'a DeviceIdentity) -> Self {
        Self { identity }
    }
}

impl NetworkLink for StatusLink<'_> {
    fn is_connected(&self) -> bool {
        link_up()
    }

    fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    fn rssi(&self) -> Option<i8> {
        if link_up() { rssi() } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_view_follows_shared_status() {
        let identity = DeviceIdentity::from_mac([0, 1, 2, 3, 4, 5]);
        let link = StatusLink::new(&identity);
        assert_eq!(link.device_id(), "00:01:02:03:04:05");

        set_link_up(true);
        record_rssi(Some(-61));
        assert!(link.is_connected());
        assert_eq!(link.rssi(), Some(-61));

        set_link_up(false);
        assert!(!link.is_connected());
        assert_eq!(link.rssi(), None);
        assert_eq!(rssi(), None, "dropping the link clears the sample");
    }
}
