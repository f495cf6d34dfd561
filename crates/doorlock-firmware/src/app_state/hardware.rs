//! Hardware initialization for the doorlock nodes
//!
//! Pin assignments follow the ESP32-S3 DevKitC wiring used for both node
//! kinds: the MFRC522 on SPI2, a status LED and (lock node only) the relay
//! driver.

use doorlock_core::actuator::{ActiveLevel, RelayActuator};
use doorlock_core::app_state::{FATAL_RESTART_DELAY_MS, FromTruncated, NodeError};
use doorlock_core::indicator::{LedIndicator, Status, StatusIndicator};
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::Blocking;
use esp_hal::gpio::{AnyPin, Level, Output, OutputConfig};
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use heapless::String;
use log::{error, info};

use crate::rfid::RfidReader;

pub type ReaderSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, embedded_hal_bus::spi::NoDelay>;
pub type Reader = RfidReader<ReaderSpi>;
pub type Led = LedIndicator<Output<'static>, Delay>;
pub type Relay = RelayActuator<Output<'static>>;

pub fn hardware_error(what: &str) -> NodeError {
    NodeError::HardwareInit(String::from_truncated(what))
}

pub struct ReaderPins {
    pub sck: AnyPin<'static>,
    pub mosi: AnyPin<'static>,
    pub miso: AnyPin<'static>,
    pub cs: AnyPin<'static>,
}

/// Bring up SPI2 and the MFRC522 behind it
pub fn init_reader(
    spi2: esp_hal::peripherals::SPI2<'static>,
    pins: ReaderPins,
) -> Result<Reader, NodeError> {
    info!("Configuring RFID reader");
    let spi = Spi::new(
        spi2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(1))
            .with_mode(Mode::_0),
    )
    .map_err(|_| hardware_error("SPI2 config"))?
    .with_sck(pins.sck)
    .with_mosi(pins.mosi)
    .with_miso(pins.miso);

    let cs = Output::new(pins.cs, Level::High, OutputConfig::default());
    let device = ExclusiveDevice::new_no_delay(spi, cs).map_err(|_| hardware_error("SPI CS pin"))?;

    RfidReader::new(device)
}

pub fn init_led(pin: AnyPin<'static>) -> Led {
    LedIndicator::new(Output::new(pin, Level::Low, OutputConfig::default()), Delay)
}

/// The relay starts de-energized, which keeps the strike locked
pub fn init_relay(pin: AnyPin<'static>) -> Relay {
    info!("Configuring lock relay");
    RelayActuator::new(Output::new(pin, Level::Low, OutputConfig::default()), ActiveLevel::High)
}

/// Show the fatal pattern, wait, and restart the chip
pub async fn restart_after_fatal<I: StatusIndicator>(err: &NodeError, indicator: &mut I) -> ! {
    error!("Fatal: {}", err);
    indicator.show(Status::Fatal).await;
    error!("Restarting in {} ms", FATAL_RESTART_DELAY_MS);
    Timer::after(Duration::from_millis(FATAL_RESTART_DELAY_MS)).await;
    esp_hal::system::software_reset()
}
