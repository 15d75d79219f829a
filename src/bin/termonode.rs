// bin/termonode.rs

#[cfg(target_os = "espidf")]
use esp_idf_sys::esp_app_desc;

#[cfg(target_os = "espidf")]
esp_app_desc!();

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::{IOPin, InputPin, PinDriver};
    use esp_idf_hal::prelude::Peripherals;
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs, wifi::EspWifi};
    use termonode::esp::*;
    use termonode::*;

    const LOOP_DELAY_MS: u32 = 10;

    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Hello.");
    info!("Starting up.");

    let config = NodeConfig::default();
    info!("My config:\n{config:#?}");

    let sysloop = EspSystemEventLoop::take()?;
    let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    #[cfg(not(feature = "esp32s"))]
    let button = PinDriver::input(pins.gpio9.downgrade_input())?;
    #[cfg(feature = "esp32s")]
    let button = PinDriver::input(pins.gpio0.downgrade_input())?;

    let sensor_pin = pins.gpio4.downgrade();

    #[cfg(not(feature = "dht"))]
    let (sensor, kind) = (Ds18b20Probe::new(sensor_pin)?, SensorKind::Ds18b20);
    #[cfg(feature = "dht")]
    let (sensor, kind) = (DhtProbe::new(sensor_pin)?, SensorKind::Dht);

    let wifi = EspWifi::new(peripherals.modem, sysloop, Some(nvs_default_partition))?;
    let link = EspLink::new(wifi)?;
    let broker = EspBroker::new(&config.mqtt_url);
    let restart_delay = config.restart_delay_ms;

    let mut node = Node::new(
        config,
        SystemClock::new(),
        link,
        broker,
        sensor,
        kind,
        LogDisplay,
    );

    if let Err(e) = node.boot() {
        error!("Boot failed: {e}");
        restart_with_reason(&mut LogDisplay, e.reason(), restart_delay);
    }

    info!("Entering main loop...");
    let mut pressed = false;
    loop {
        node.tick();

        // boot button resends the current reading
        let low = button.is_low();
        if low && !pressed {
            node.force_refresh();
        }
        pressed = low;

        FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!(
        "termonode v{} is firmware for ESP-IDF targets; build with --target riscv32imc-esp-espidf",
        termonode::FW_VERSION
    )
}

// EOF
