use defmt::{error, info, warn};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};

use super::{NETWORK_READY, restart};
use crate::config::{WIFI_PASS, WIFI_SSID};
use crate::status;

/// Association checks allowed at boot before giving up and resetting.
const BOOT_ASSOCIATION_ATTEMPTS: u32 = 100;
const ASSOCIATION_POLL: Duration = Duration::from_secs(1);
/// How often the link state is republished once up.
const LINK_CHECK: Duration = Duration::from_secs(1);
/// Reconnects are attempted at most this often while the link is down.
const RECONNECT_BACKOFF: u32 = 10;

#[embassy_executor::task]
pub async fn run(mut controller: WifiController<'static>, stack: Stack<'static>) -> ! {
    if WIFI_SSID.is_empty() {
        error!("wifi: METER_WIFI_SSID was not set at build time");
    }

    let client = ClientConfig::default()
        .with_ssid(WIFI_SSID.into())
        .with_password(WIFI_PASS.into());
    if let Err(err) = controller.set_config(&ModeConfig::Client(client)) {
        error!("wifi: set_config failed: {:?}", err);
        restart().await;
    }
    if let Err(err) = controller.start() {
        error!("wifi: start failed: {:?}", err);
        restart().await;
    }
    info!("wifi: joining {}", WIFI_SSID);
    if let Err(err) = controller.connect() {
        warn!("wifi: connect failed: {:?}", err);
    }

    let mut attempts = 0;
    while !associated(&controller, stack) {
        attempts += 1;
        if attempts >= BOOT_ASSOCIATION_ATTEMPTS {
            error!("wifi: not associated after {} attempts", attempts);
            restart().await;
        }
        Timer::after(ASSOCIATION_POLL).await;
    }

    if let Some(config) = stack.config_v4() {
        info!(
            "wifi: associated, address {}",
            defmt::Display2Format(&config.address)
        );
    }
    publish(&mut controller, true);
    NETWORK_READY.signal(());

    let mut down_checks = 0;
    loop {
        Timer::after(LINK_CHECK).await;

        let up = associated(&controller, stack);
        if up != status::link_up() {
            if up {
                info!("wifi: link restored");
            } else {
                warn!("wifi: link lost");
            }
        }
        publish(&mut controller, up);

        if up {
            down_checks = 0;
            continue;
        }
        if down_checks % RECONNECT_BACKOFF == 0
            && let Err(err) = controller.connect()
        {
            warn!("wifi: reconnect failed: {:?}", err);
        }
        down_checks += 1;
    }
}

fn associated(controller: &WifiController<'static>, stack: Stack<'static>) -> bool {
    controller.is_connected().unwrap_or(false) && stack.is_config_up()
}

fn publish(controller: &mut WifiController<'static>, up: bool) {
    status::set_link_up(up);
    if up {
        let dbm = controller
            .rssi()
            .ok()
            .and_then(|dbm| i8::try_from(dbm).ok());
        status::record_rssi(dbm);
    }
}
