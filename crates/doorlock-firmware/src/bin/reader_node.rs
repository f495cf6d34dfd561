//! Reader node: reads badges and, on a grant, triggers the lock node's
//! `/unlock` endpoint. It never drives an actuator itself.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use doorlock_core::authorizer::HttpAuthorizer;
use doorlock_core::clock::EmbassyClock;
use doorlock_core::node::{CycleOutcome, Node};
use doorlock_core::peer::PeerTrigger;
use doorlock_firmware::app_state::hardware::{
    ReaderPins, hardware_error, init_led, init_reader, restart_after_fatal,
};
use doorlock_firmware::app_state::NodeRunState;
use doorlock_firmware::net::{self, NetTransport};
use doorlock_firmware::secrets;
use embassy_executor::Spawner;
use embassy_time::{Delay, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{debug, error, info, warn};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "the node owns its socket and response buffers"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut state = NodeRunState::Booting;
    info!("Reader node booting ({:?})", state);

    let settings = secrets::node_config();
    let mut led = init_led(peripherals.GPIO2.into());

    let Some(peer) = settings.peer else {
        restart_after_fatal(&hardware_error("DOORLOCK_LOCK_HOST not set"), &mut led).await;
    };

    let reader = match init_reader(
        peripherals.SPI2,
        ReaderPins {
            sck: peripherals.GPIO12.into(),
            mosi: peripherals.GPIO11.into(),
            miso: peripherals.GPIO13.into(),
            cs: peripherals.GPIO10.into(),
        },
    ) {
        Ok(reader) => reader,
        Err(e) => restart_after_fatal(&e, &mut led).await,
    };

    state = NodeRunState::WifiConnecting;
    info!("State: {:?}", state);
    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let stack = match net::start(&spawner, peripherals.WIFI, settings.internet, seed) {
        Ok(stack) => stack,
        Err(e) => restart_after_fatal(&e, &mut led).await,
    };

    state = match net::wait_for_network(stack).await {
        Ok(()) => NodeRunState::WifiConnected,
        Err(e) => {
            warn!("{}", e);
            NodeRunState::Error
        }
    };
    info!("State: {:?}", state);

    let authorizer = HttpAuthorizer::new(NetTransport::new(stack), Delay, settings.authorizer);
    let trigger = PeerTrigger::new(NetTransport::new(stack), Delay, peer);
    info!("Triggering lock node at {}:{}", peer.host, peer.port);
    let mut node =
        Node::new(reader, authorizer, trigger, led, Delay, EmbassyClock).configured(&settings);

    match node.authorizer_mut().health().await {
        Ok(health) => info!("Authorizer healthy, {} known faces", health.known),
        Err(e) => warn!("Authorizer health check failed: {}", e),
    }

    state = NodeRunState::Ready;
    info!("State: {:?}", state);

    loop {
        match node.poll_once().await {
            Ok(report) => match report.outcome {
                CycleOutcome::Idle | CycleOutcome::Debounced => {}
                outcome => debug!("Cycle: {:?}", outcome),
            },
            Err(e) => error!("Cycle failed: {}", e),
        }
        Timer::after(settings.poll_interval()).await;
    }
}
