use core::time::Duration as CoreDuration;

use defmt::{error, info};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use meter_core::config::AgentConfig;
use meter_core::cycle::{BASE_TICK, CycleScheduler, Outcome};
use meter_core::timing::Delay;

use super::{NETWORK_READY, restart};
use crate::bus::Rs485Bus;
use crate::identity::DeviceIdentity;
use crate::indicator::{LogObserver, StatusLed};
use crate::net::HttpTransport;
use crate::status::StatusLink;

/// [`Delay`] backed by the embassy timer queue.
struct EmbassyDelay;

impl Delay for EmbassyDelay {
    async fn delay(&mut self, duration: CoreDuration) {
        Timer::after(to_embassy(duration)).await;
    }
}

fn to_embassy(duration: CoreDuration) -> Duration {
    Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

#[embassy_executor::task]
pub async fn run(
    config: AgentConfig<'static>,
    bus: Rs485Bus<'static>,
    led: StatusLed<'static>,
    identity: &'static DeviceIdentity,
    stack: Stack<'static>,
) -> ! {
    NETWORK_READY.wait().await;
    info!(
        "agent: {} slaves, cycle every {} ticks, collector {}:{}",
        config.slaves.len(),
        config.cycle_ticks,
        config.collector.host,
        config.collector.port
    );

    let transport = HttpTransport::new(stack, config.collector.host, config.collector.port);
    let mut scheduler = CycleScheduler::new(
        &config,
        bus,
        StatusLink::new(identity),
        transport,
        EmbassyDelay,
    );
    let mut observer = (led, LogObserver);

    loop {
        if let Outcome::Restart(notice) = scheduler.tick(&mut observer).await {
            error!("agent: restarting after {}", notice);
            restart().await;
        }
        Timer::after(to_embassy(BASE_TICK)).await;
    }
}
