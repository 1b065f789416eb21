//! Simulated console behind a [`MockTransport`]
//!
//! Answers whatever the engine transmits the way a console would: weather for
//! GetCurrent, its configuration for GetConfig, the next history slot for
//! GetHistory, and a NextAction or DataWritten around time and configuration
//! writes. When the engine stays silent it sends a beacon, an unpaired
//! NextAction from 0xF0F0 before pairing or a weather frame after.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::codec::nibble::{encode_date_time, encode_decimal, TEMPERATURE_OFFSET};
use crate::codec::{config_checksum, write_nibbles};
use crate::core::UNPAIRED_DEVICE_ID;
use crate::protocol::frame::{
    address_for_index, index_for_address, parse_ack, AckAction, ACK_LEN, CONFIG_FRAME_ACTION, CONFIG_FRAME_LEN,
    TIME_FRAME_ACTION, TIME_FRAME_LEN,
};
use crate::protocol::history::{index_after, index_before};
use super::MockTransport;

/// Values the simulated sensors report
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleReadings {
    pub indoor_temperature: f64,
    pub outdoor_temperature: f64,
    pub indoor_humidity: f64,
    pub outdoor_humidity: f64,
    pub pressure_hpa: f64,
    /// km/h
    pub wind_speed: f64,
    pub wind_direction: u8,
    /// mm
    pub rain_total: f64,
}

impl Default for ConsoleReadings {
    fn default() -> Self {
        ConsoleReadings {
            indoor_temperature: 21.5,
            outdoor_temperature: 8.25,
            indoor_humidity: 45.0,
            outdoor_humidity: 78.0,
            pressure_hpa: 1013.2,
            wind_speed: 12.5,
            wind_direction: 4,
            rain_total: 12.7,
        }
    }
}

/// Scripted console answering through a mock transceiver
pub struct SimulatedConsole {
    transport: MockTransport,
    device_id: Option<u16>,
    quality: u8,
    battery: u8,
    block: Vec<u8>,
    latest_index: u16,
    stored: u16,
    time: NaiveDateTime,
    readings: ConsoleReadings,
    beacon_every: u32,
    idle_ticks: u32,
    last_time_frame: Option<Vec<u8>>,
}

impl SimulatedConsole {
    /// An unpaired console
    pub fn new(transport: MockTransport) -> Self {
        let mut block = vec![0u8; CONFIG_FRAME_LEN - 4];
        block[0] = 0x21;
        block[1] = 0x35;
        block[2] = 0x07;
        block[25] = 0x02;
        let checksum = config_checksum(&block).to_be_bytes();
        block[42..].copy_from_slice(&checksum);

        SimulatedConsole {
            transport,
            device_id: None,
            quality: 0x50,
            battery: 0,
            block,
            latest_index: 99,
            stored: 100,
            time: NaiveDate::from_ymd_opt(2024, 3, 15)
                .and_then(|d| d.and_hms_opt(8, 0, 0))
                .unwrap_or_default(),
            readings: ConsoleReadings::default(),
            beacon_every: 3,
            idle_ticks: 0,
            last_time_frame: None,
        }
    }

    /// A console already paired on `device_id`
    pub fn paired(transport: MockTransport, device_id: u16) -> Self {
        let mut console = Self::new(transport);
        console.device_id = Some(device_id);
        console
    }

    pub fn device_id(&self) -> Option<u16> {
        self.device_id
    }

    pub fn config_block(&self) -> &[u8] {
        &self.block
    }

    /// Last time frame received from the engine
    pub fn last_time_frame(&self) -> Option<&[u8]> {
        self.last_time_frame.as_deref()
    }

    /// Newest history slot and how many slots hold data
    pub fn set_history(&mut self, latest_index: u16, stored: u16) {
        self.latest_index = latest_index;
        self.stored = stored.max(1);
    }

    pub fn set_readings(&mut self, readings: ConsoleReadings) {
        self.readings = readings;
    }

    pub fn set_battery(&mut self, bits: u8) {
        self.battery = bits & 0x0F;
    }

    /// Idle steps before a beacon is sent
    pub fn set_beacon_every(&mut self, steps: u32) {
        self.beacon_every = steps.max(1);
    }

    /// Answers transmitted frames, or beacons after a silence
    pub fn step(&mut self) {
        let sent = self.transport.take_sent();
        if sent.is_empty() {
            self.idle_ticks += 1;
            if self.idle_ticks >= self.beacon_every && self.transport.pending_frames() == 0 {
                self.idle_ticks = 0;
                let beacon = match self.device_id {
                    Some(id) => self.weather_frame(id),
                    None => self.short_frame(UNPAIRED_DEVICE_ID, 0xA1),
                };
                self.transport.push_frame(beacon);
            }
            return;
        }

        self.idle_ticks = 0;
        for frame in sent {
            if let Some(reply) = self.answer(&frame) {
                self.transport.push_frame(reply);
            }
        }
    }

    /// Runs the console on its own thread
    pub fn spawn(self, interval: Duration) -> ConsoleHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let mut console = self;
        let thread = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                console.step();
                thread::sleep(interval);
            }
            console
        });
        ConsoleHandle {
            stop,
            thread: Some(thread),
        }
    }

    fn answer(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        match frame.len() {
            ACK_LEN => {
                let ack = parse_ack(frame).ok()?;
                match self.device_id {
                    None => {
                        debug!("Simulated console adopting id 0x{:04x}", ack.device_id);
                        self.device_id = Some(ack.device_id);
                    }
                    Some(id) if id != ack.device_id => return None,
                    Some(_) => {}
                }
                let id = ack.device_id;
                Some(match ack.action {
                    AckAction::GetCurrent => self.weather_frame(id),
                    AckAction::GetConfig => self.config_frame(id),
                    AckAction::GetHistory => self.history_frame(id, ack.address),
                    AckAction::ReqSetTime => self.short_frame(id, 0xA3),
                    AckAction::ReqSetConfig => self.short_frame(id, 0xA2),
                })
            }
            TIME_FRAME_LEN if frame[2] == TIME_FRAME_ACTION => {
                self.last_time_frame = Some(frame.to_vec());
                let id = self.device_id?;
                Some(self.short_frame(id, 0x20 | self.battery))
            }
            CONFIG_FRAME_LEN if frame[2] == CONFIG_FRAME_ACTION => {
                self.block = frame[4..].to_vec();
                let id = self.device_id?;
                Some(self.short_frame(id, 0x20 | self.battery))
            }
            _ => None,
        }
    }

    fn header(&self, id: u16, status: u8, len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[0..2].copy_from_slice(&id.to_be_bytes());
        frame[2] = status;
        frame[3] = self.quality;
        frame
    }

    fn short_frame(&self, id: u16, status: u8) -> Vec<u8> {
        self.header(id, status, 6)
    }

    fn config_frame(&self, id: u16) -> Vec<u8> {
        let mut frame = self.header(id, 0x40, CONFIG_FRAME_LEN);
        frame[4..].copy_from_slice(&self.block);
        frame
    }

    fn checksum(&self) -> [u8; 2] {
        config_checksum(&self.block).to_be_bytes()
    }

    fn weather_frame(&self, id: u16) -> Vec<u8> {
        let r = &self.readings;
        let mut frame = self.header(id, 0x60, 215);
        frame[4..6].copy_from_slice(&self.checksum());
        frame[8] = 0x01;

        let time = encode_date_time(self.time);
        let temp = |v: f64| encode_decimal(v, 5, 3, TEMPERATURE_OFFSET);
        for (current, max, min, max_time, min_time, value) in [
            (24, 19, 22, 9, 14, r.indoor_temperature),
            (42, 37, 40, 27, 32, r.outdoor_temperature),
            (60, 55, 58, 45, 50, r.outdoor_temperature),
            (78, 73, 76, 63, 68, r.outdoor_temperature - 2.0),
        ] {
            write_nibbles(&mut frame, current, false, &temp(value));
            write_nibbles(&mut frame, max, false, &temp(value + 1.5));
            write_nibbles(&mut frame, min, true, &temp(value - 1.5));
            write_nibbles(&mut frame, max_time, false, &time);
            write_nibbles(&mut frame, min_time, false, &time);
        }

        for (start, value) in [(81, r.indoor_humidity), (94, r.outdoor_humidity)] {
            write_nibbles(&mut frame, start, true, &time);
            write_nibbles(&mut frame, start + 5, true, &time);
            write_nibbles(&mut frame, start + 10, true, &encode_decimal(value + 5.0, 2, 0, 0.0));
            write_nibbles(&mut frame, start + 11, true, &encode_decimal(value - 5.0, 2, 0, 0.0));
            write_nibbles(&mut frame, start + 12, true, &encode_decimal(value, 2, 0, 0.0));
        }

        write_nibbles(&mut frame, 151, false, &time);
        write_nibbles(&mut frame, 156, false, &encode_decimal(r.rain_total, 7, 3, 0.0));

        let wind = ((r.wind_speed * 25_600.0).round() as u32).to_be_bytes();
        frame[172..175].copy_from_slice(&wind[1..]);
        frame[187..190].copy_from_slice(&wind[1..]);
        frame[162] = r.wind_direction & 0x0F;
        frame[177] = r.wind_direction & 0x0F;

        write_nibbles(&mut frame, 190, true, &time);
        write_nibbles(&mut frame, 195, true, &time);
        for (start, hpa) in [(200, r.pressure_hpa + 4.0), (205, r.pressure_hpa - 4.0), (210, r.pressure_hpa)] {
            write_nibbles(&mut frame, start, true, &encode_decimal(hpa * 0.029_53, 5, 2, 0.0));
            write_nibbles(&mut frame, start + 2, false, &encode_decimal(hpa, 5, 1, 0.0));
        }
        frame
    }

    fn history_frame(&self, id: u16, address: u32) -> Vec<u8> {
        let latest = self.latest_index;
        let oldest = index_before(latest, self.stored - 1);
        let index = match index_for_address(address) {
            Some(i) if i == latest => latest,
            Some(i) => index_after(i, 1),
            None => oldest,
        };

        let mut frame = self.header(id, 0x80, 30);
        frame[4..6].copy_from_slice(&self.checksum());
        frame[6..9].copy_from_slice(&address_for_index(Some(latest)).to_be_bytes()[1..]);
        frame[9..12].copy_from_slice(&address_for_index(Some(index)).to_be_bytes()[1..]);

        let r = &self.readings;
        let wind = ((r.wind_speed / 3.6 * 10.0).round() as u16).min(0xFFD);
        frame[12] = (r.wind_direction << 4) | ((wind >> 8) as u8 & 0x0F);
        frame[13] = wind as u8;
        frame[14] = (r.wind_direction << 4) | ((wind >> 8) as u8 & 0x0F);
        frame[15] = wind as u8;
        write_nibbles(&mut frame, 17, false, &encode_decimal(r.outdoor_humidity, 2, 0, 0.0));
        write_nibbles(&mut frame, 18, false, &encode_decimal(r.indoor_humidity, 2, 0, 0.0));
        write_nibbles(&mut frame, 19, false, &encode_decimal(r.pressure_hpa, 5, 1, 0.0));
        let outdoor = r.outdoor_temperature + (index % 10) as f64 * 0.1;
        write_nibbles(&mut frame, 22, true, &encode_decimal(outdoor, 3, 1, TEMPERATURE_OFFSET));
        write_nibbles(&mut frame, 23, false, &encode_decimal(r.indoor_temperature, 3, 1, TEMPERATURE_OFFSET));
        write_nibbles(&mut frame, 25, true, &encode_date_time(self.time));
        frame
    }
}

/// Running simulated console
pub struct ConsoleHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<SimulatedConsole>>,
}

impl ConsoleHandle {
    /// Stops the console thread and returns its final state
    pub fn stop(mut self) -> Option<SimulatedConsole> {
        self.stop.store(true, Ordering::Release);
        self.thread.take().and_then(|t| t.join().ok())
    }
}

impl Drop for ConsoleHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
