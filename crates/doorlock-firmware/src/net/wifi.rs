//! WiFi station bring-up and the tasks that keep it alive

use doorlock_core::app_state::{FromTruncated, NodeError};
use doorlock_core::config::InternetConfig;
use embassy_executor::Spawner;
use embassy_net::{Runner, Stack, StackResources};
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use heapless::String;
use log::{error, info, warn};
use static_cell::StaticCell;

/// Sockets: one authorizer client, one peer client, one listener and DNS
const SOCKET_COUNT: usize = 4;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const NETWORK_UP_TIMEOUT: Duration = Duration::from_secs(30);

fn wifi_error(what: &str) -> NodeError {
    NodeError::Wifi(String::from_truncated(what))
}

/// Start the radio and the network stack, spawning the tasks that drive them.
///
/// Returns as soon as the tasks run; use [`wait_for_network`] to wait for
/// an address.
pub fn start(
    spawner: &Spawner,
    wifi: esp_hal::peripherals::WIFI<'static>,
    internet: InternetConfig<'static>,
    seed: u64,
) -> Result<Stack<'static>, NodeError> {
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    static RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();

    if internet.ssid.is_empty() {
        return Err(wifi_error("no SSID configured"));
    }

    let radio = RADIO.init(
        esp_radio::init()
            .map_err(|_| NodeError::HardwareInit(String::from_truncated("radio init")))?,
    );
    let (controller, interfaces) = esp_radio::wifi::new(radio, wifi, Default::default())
        .map_err(|_| NodeError::HardwareInit(String::from_truncated("WiFi driver")))?;

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );

    spawner.spawn(
        connection_task(controller, internet).map_err(|_| wifi_error("spawn connection task"))?,
    );
    spawner.spawn(net_task(runner).map_err(|_| wifi_error("spawn net task"))?);

    Ok(stack)
}

/// Wait until the link is up and DHCP handed out an address
pub async fn wait_for_network(stack: Stack<'_>) -> Result<(), NodeError> {
    with_timeout(NETWORK_UP_TIMEOUT, async {
        stack.wait_link_up().await;
        stack.wait_config_up().await;
    })
    .await
    .map_err(|_| wifi_error("no DHCP lease within 30 s"))?;

    if let Some(config) = stack.config_v4() {
        info!("Network up, address {}", config.address);
    }
    Ok(())
}

#[embassy_executor::task]
async fn connection_task(mut controller: WifiController<'static>, internet: InternetConfig<'static>) {
    info!("WiFi connection task started");
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("WiFi disconnected, reconnecting");
            Timer::after(RECONNECT_DELAY).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(internet.ssid.into())
                    .with_password(internet.password.into()),
            );
            if let Err(e) = controller.set_config(&config) {
                error!("WiFi config rejected: {:?}", e);
                Timer::after(RECONNECT_DELAY).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                error!("WiFi start failed: {:?}", e);
                Timer::after(RECONNECT_DELAY).await;
                continue;
            }
        }

        match controller.connect_async().await {
            Ok(()) => info!("WiFi associated with {}", internet.ssid),
            Err(e) => {
                warn!("WiFi connect failed: {:?}", e);
                Timer::after(RECONNECT_DELAY).await;
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}
