use std::time::Duration;

use tokio::time::sleep;
use wxlink::transport::ConsoleReadings;
use wxlink::{EngineConfig, MockTransport, Reading, SimulatedConsole, Station, WeatherDriver};

fn show(label: &str, reading: Reading, unit: &str) {
    match reading {
        Reading::Value(v) => println!("- {}: {:.1} {}", label, v, unit),
        other => println!("- {}: {:?}", label, other),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Console and transceiver both live in memory
    let mock = MockTransport::new();
    let mut console = SimulatedConsole::new(mock.clone());
    console.set_history(120, 400);
    console.set_readings(ConsoleReadings {
        outdoor_temperature: -3.5,
        wind_speed: 27.0,
        wind_direction: 11,
        ..Default::default()
    });
    console.set_beacon_every(50);
    let console = console.spawn(Duration::from_millis(5));

    let config = EngineConfig {
        poll_interval: Duration::from_millis(10),
        preamble_duration: Duration::from_millis(200),
        device_wait: Duration::from_secs(10),
        register_wait: Duration::from_secs(5),
        ..Default::default()
    };

    println!("Starting link engine:");
    println!("- Poll interval: {:?}", config.poll_interval);
    println!("- Band: {:?}", config.band);

    let mut station = match Station::start(mock, config) {
        Ok(station) => station,
        Err(e) => {
            eprintln!("Bring-up failed: {}", e);
            return;
        }
    };
    println!("- Transceiver frequency: {} Hz", station.settings().frequency());

    println!("\nPairing...");
    match station.pair().await {
        Ok(id) => println!("Paired with console 0x{:04x}", id),
        Err(e) => {
            eprintln!("Pairing failed: {}", e);
            return;
        }
    }

    match station.get_current_weather().await {
        Ok(weather) => {
            println!("\nCurrent weather at {}:", weather.captured_at);
            show("Indoor", weather.indoor_temperature.current, "C");
            show("Outdoor", weather.outdoor_temperature.current, "C");
            show("Humidity", weather.outdoor_humidity.current, "%");
            show("Wind", weather.wind.speed, "km/h");
            if let Some(direction) = weather.wind.direction() {
                println!("- Direction: {}", direction.label());
            }
            show("Pressure", weather.pressure.hpa, "hPa");
        }
        Err(e) => eprintln!("Weather request failed: {}", e),
    }

    match station.get_history(5).await {
        Ok(records) => {
            println!("\nLast {} history records:", records.len());
            for record in records {
                println!(
                    "- slot {}: {:?} outdoor {:?}",
                    record.index, record.time, record.outdoor_temperature
                );
            }
        }
        Err(e) => eprintln!("History request failed: {}", e),
    }

    if let Err(e) = station.set_time().await {
        eprintln!("Setting the console clock failed: {}", e);
    }

    println!("\nPolling packets for 2 seconds...");
    let mut delivered = 0;
    for _ in 0..20 {
        if let Ok(Some(_)) = station.poll_packet() {
            delivered += 1;
        }
        sleep(Duration::from_millis(100)).await;
    }
    println!("Delivered {} packets", delivered);

    let stat = station.last_stat();
    println!("Link quality: {:?}, battery bits: {:?}", stat.link_quality, stat.battery);
    if let Some(seen) = stat.last_seen_local() {
        println!("Last frame at {} (alive: {})", seen, stat.seen_within(Duration::from_secs(5)));
    }

    if let Err(e) = station.close() {
        eprintln!("Shutdown failed: {}", e);
    }
    console.stop();
}
