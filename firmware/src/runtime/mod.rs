use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_net::{DhcpConfig, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use meter_core::meter::sdm;
use panic_rtt_target as _;
use static_cell::StaticCell;

use crate::bus::Rs485Bus;
use crate::config::BUILD_OVERRIDES;
use crate::identity::DeviceIdentity;
use crate::indicator::StatusLed;

mod agent_task;
mod net_task;
mod wifi_task;

esp_bootloader_esp_idf::esp_app_desc!();

/// Signalled once the station is associated and holds a DHCP lease.
pub(super) static NETWORK_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static IDENTITY: StaticCell<DeviceIdentity> = StaticCell::new();

/// Lets the RTT buffer drain before resetting.
const RESET_GRACE: Duration = Duration::from_millis(100);

/// Resets the chip. All counters start from zero afterwards.
pub(super) async fn restart() -> ! {
    Timer::after(RESET_GRACE).await;
    esp_hal::system::software_reset()
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_defmt!();

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_interrupt = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_interrupt.software_interrupt0);

    let config = match BUILD_OVERRIDES.apply() {
        Ok(config) => config,
        Err(err) => {
            error!("config: {}", err);
            park().await
        }
    };

    let led = StatusLed::new(Output::new(
        peripherals.GPIO15,
        Level::High,
        OutputConfig::default(),
    ));

    let uart = match Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(sdm::DEFAULT_BAUD_RATE),
    ) {
        Ok(uart) => uart
            .with_rx(peripherals.GPIO17)
            .with_tx(peripherals.GPIO16)
            .into_async(),
        Err(err) => {
            error!("bus: UART config rejected: {:?}", err);
            park().await
        }
    };
    let bus = Rs485Bus::new(
        uart,
        Output::new(peripherals.GPIO18, Level::Low, OutputConfig::default()),
    );

    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(err) => {
            error!("wifi: radio init failed: {:?}", err);
            restart().await
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                error!("wifi: controller init failed: {:?}", err);
                restart().await
            }
        };

    let identity: &'static DeviceIdentity =
        IDENTITY.init(DeviceIdentity::from_mac(interfaces.sta.mac_address()));
    info!(
        "agent: device {} host {}",
        identity.device_id(),
        identity.hostname()
    );

    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = identity.hostname().try_into().ok();

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(dhcp),
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );

    spawner.must_spawn(net_task::run(runner));
    spawner.must_spawn(wifi_task::run(controller, stack));
    spawner.must_spawn(agent_task::run(config, bus, led, identity, stack));

    park().await
}

async fn park() -> ! {
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}
