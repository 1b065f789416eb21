mod common;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::tempdir;

use common::{console, fast_config, fixed_clock, remember_pairing, spawn, TRANSCEIVER_ID};
use wxlink::store::persist::TRANSCEIVER_FILE;
use wxlink::store::StateStore;
use wxlink::transport::Transport;
use wxlink::{Error, MockTransport, Reading, SimulatedConsole, Station, WeatherDriver};

#[tokio::test]
async fn test_pair_then_fetch_weather() {
    let dir = tempdir().unwrap();
    let (mock, handle) = console(false);
    let station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();
    assert!(!station.identity().is_paired());

    let id = station.pair().await.unwrap();
    assert_eq!(id, TRANSCEIVER_ID);
    assert!(station.identity().is_paired());
    assert!(dir.path().join(TRANSCEIVER_FILE).exists());

    let weather = station.get_current_weather().await.unwrap();
    assert_eq!(weather.indoor_temperature.current, Reading::Value(21.5));
    assert_eq!(weather.wind.direction().map(|d| d.label()), Some("E"));
    assert!(station.last_stat().last_seen.is_some());

    let console = handle.stop().unwrap();
    assert_eq!(console.device_id(), Some(TRANSCEIVER_ID));
}

#[tokio::test]
async fn test_pairing_persists_across_restart() {
    let dir = tempdir().unwrap();
    let (mock, handle) = console(false);
    let mut station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();
    station.pair().await.unwrap();
    station.shutdown().unwrap();
    drop(handle);

    let record = StateStore::open(dir.path()).unwrap().load_transceiver().unwrap().unwrap();
    assert_eq!(record.registered_id, Some(TRANSCEIVER_ID));

    let (mock, _handle) = console(true);
    let station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();
    assert!(station.identity().is_paired());
    assert!(station.get_current_weather().await.is_ok());
}

#[tokio::test]
async fn test_history_replay_returns_newest_records() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let mock = MockTransport::new();
    let mut console = SimulatedConsole::paired(mock.clone(), TRANSCEIVER_ID);
    console.set_history(10, 50);
    let _handle = spawn(console);

    let station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();
    let records = station.get_history(5).await.unwrap();
    let indices: Vec<u16> = records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![6, 7, 8, 9, 10]);
    assert!(records.iter().all(|r| r.time.is_some()));
}

#[tokio::test]
async fn test_history_shorter_than_requested() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let mock = MockTransport::new();
    let mut console = SimulatedConsole::paired(mock.clone(), TRANSCEIVER_ID);
    console.set_history(2, 3);
    let _handle = spawn(console);

    let station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();
    let records = station.get_history(10).await.unwrap();
    let indices: Vec<u16> = records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_set_time_sends_clock() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let (mock, handle) = console(true);
    let station = Station::start_with_clock(mock, fast_config(Some(dir.path().to_path_buf())), fixed_clock).unwrap();

    station.set_time().await.unwrap();
    let console = handle.stop().unwrap();
    let frame = console.last_time_frame().unwrap();
    assert_eq!(frame.len(), 12);
    assert_eq!(frame[2], 0xC0);
    assert_eq!(&frame[5..8], &[0x30, 0x42, 0x13]);
}

#[tokio::test]
async fn test_reset_min_max_writes_flags() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let (mock, handle) = console(true);
    let station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();

    let held = station.get_config().await.unwrap();
    assert!(held.is_consistent());
    station.reset_min_max(0x00_0F_00).await.unwrap();

    let console = handle.stop().unwrap();
    let block = console.config_block();
    assert_eq!(&block[39..42], &[0x00, 0x0F, 0x00]);
    assert_eq!(&block[..39], &held.block()[..39]);
}

#[tokio::test]
async fn test_reset_min_max_needs_configuration() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let mock = MockTransport::new();
    let station = Station::start(mock, fast_config(Some(dir.path().to_path_buf()))).unwrap();
    assert!(matches!(station.reset_min_max(1).await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_requests_need_pairing() {
    let station = Station::start(MockTransport::new(), fast_config(None)).unwrap();
    assert!(matches!(station.get_current_weather().await, Err(Error::NotPaired)));
    assert!(matches!(station.get_history(3).await, Err(Error::NotPaired)));
    assert!(matches!(station.set_time().await, Err(Error::NotPaired)));
}

#[tokio::test]
async fn test_silent_console_times_out() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let mut config = fast_config(Some(dir.path().to_path_buf()));
    config.request_ttl = 20;
    let station = Station::start(MockTransport::new(), config).unwrap();

    assert!(matches!(station.get_current_weather().await, Err(Error::Timeout(_))));
    // the poller is free for the next request
    assert!(matches!(station.get_config().await, Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_pairing_without_console_fails() {
    let mut config = fast_config(None);
    config.device_wait = Duration::from_millis(100);
    let station = Station::start(MockTransport::new(), config).unwrap();
    assert!(matches!(station.pair().await, Err(Error::RequestFailed(_))));
    assert!(!station.identity().is_paired());
}

#[tokio::test]
async fn test_bring_up_failure_is_fatal() {
    let mock = MockTransport::new();
    mock.fail_flash_reads(true);
    assert!(matches!(Station::start(mock, fast_config(None)), Err(Error::BringUp(_))));
}

#[tokio::test]
async fn test_transport_errors_do_not_stop_the_link() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let (mock, _handle) = console(true);
    let station = Station::start(mock.clone(), fast_config(Some(dir.path().to_path_buf()))).unwrap();

    mock.simulate_errors(true, 0.1);
    assert!(station.get_current_weather().await.is_ok());
    mock.simulate_errors(false, 0.0);
    assert!(station.get_current_weather().await.is_ok());
}

#[tokio::test]
async fn test_driver_delivers_packets_until_closed() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let (mock, _handle) = console(true);
    let mut station = Station::start(mock.clone(), fast_config(Some(dir.path().to_path_buf()))).unwrap();
    station.open().unwrap();

    let weather = station.get_current_weather().await.unwrap();
    let packet = station.poll_packet().unwrap().unwrap();
    assert!(packet.captured_at >= weather.captured_at);

    station.close().unwrap();
    assert!(!mock.is_open());
    assert!(station.poll_packet().is_err());
    assert!(matches!(station.get_config().await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_driver_delivers_after_clock_steps_back() {
    let dir = tempdir().unwrap();
    remember_pairing(dir.path());
    let (mock, _handle) = console(true);
    let calls = Arc::new(AtomicI64::new(0));
    let clock = {
        let calls = calls.clone();
        move || {
            // every decode lands a minute earlier than the last
            let n = calls.fetch_add(1, Ordering::SeqCst);
            NaiveDate::from_ymd_opt(2024, 10, 27)
                .and_then(|d| d.and_hms_opt(2, 59, 30))
                .unwrap()
                - chrono::Duration::minutes(n)
        }
    };
    let mut station = Station::start_with_clock(mock, fast_config(Some(dir.path().to_path_buf())), clock).unwrap();

    station.get_current_weather().await.unwrap();
    let first = station.poll_packet().unwrap().unwrap();
    station.get_current_weather().await.unwrap();
    let second = station.poll_packet().unwrap().unwrap();
    assert!(second.captured_at < first.captured_at);
}

#[test]
fn test_start_rejects_bad_config() {
    let mut config = fast_config(None);
    config.poll_interval = Duration::ZERO;
    let mut mock = MockTransport::new();
    assert!(matches!(Station::start(mock.clone(), config), Err(Error::Config(_))));
    // nothing was touched
    assert!(mock.events().is_empty());
    assert!(mock.get_state().is_err());
}
