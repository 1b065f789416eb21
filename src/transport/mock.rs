//! Mock transceiver for testing and development
//!
//! Clones share one device, so a test can keep a handle to script incoming
//! frames and inspect what the engine transmitted while the poller owns
//! another handle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{Error, Result};
use crate::radio::{FLASH_CORRECTION_ADDRESS, FLASH_SERIAL_ADDRESS};
use super::{Transport, MAX_FRAME_LEN, STATE_FRAME_READY};

const FLASH_SIZE: usize = 0x200;

/// Operation recorded by the mock, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Open,
    Close,
    Receive,
    Transmit,
    Execute(u8),
    Preamble(u8),
    WriteRegister(u8, u8),
}

struct Inner {
    open: bool,
    incoming: VecDeque<Vec<u8>>,
    loaded: Option<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    flash: Vec<u8>,
    registers: BTreeMap<u8, u8>,
    events: Vec<MockEvent>,
    fail_next: u32,
    fail_flash: bool,
    simulate_errors: bool,
    error_probability: f32,
}

/// Mock transceiver for testing and development
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a mock with transceiver ID 0x0102 and no frequency correction
    pub fn new() -> Self {
        let mock = Self {
            inner: Arc::new(Mutex::new(Inner {
                open: false,
                incoming: VecDeque::new(),
                loaded: None,
                sent: Vec::new(),
                flash: vec![0u8; FLASH_SIZE],
                registers: BTreeMap::new(),
                events: Vec::new(),
                fail_next: 0,
                fail_flash: false,
                simulate_errors: false,
                error_probability: 0.0,
            })),
        };
        mock.set_identity([1, 2, 3, 4, 5], 0x0102);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Programs the serial prefix and transceiver ID into flash
    pub fn set_identity(&self, serial: [u8; 5], transceiver_id: u16) {
        let mut inner = self.lock();
        let base = FLASH_SERIAL_ADDRESS as usize;
        inner.flash[base..base + 5].copy_from_slice(&serial);
        inner.flash[base + 5..base + 7].copy_from_slice(&transceiver_id.to_be_bytes());
    }

    /// Programs the frequency correction into flash
    pub fn set_frequency_correction(&self, correction: i32) {
        let mut inner = self.lock();
        let base = FLASH_CORRECTION_ADDRESS as usize;
        inner.flash[base..base + 4].copy_from_slice(&correction.to_be_bytes());
    }

    /// Queues a frame as if the console had sent it
    pub fn push_frame(&self, frame: Vec<u8>) {
        self.lock().incoming.push_back(frame);
    }

    /// Number of queued incoming frames
    pub fn pending_frames(&self) -> usize {
        self.lock().incoming.len()
    }

    /// Frames transmitted so far
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Removes and returns the transmitted frames
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Operations recorded so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Last value written to each register
    pub fn registers(&self) -> BTreeMap<u8, u8> {
        self.lock().registers.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Makes the next `count` operations fail
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Makes every flash read fail
    pub fn fail_flash_reads(&self, fail: bool) {
        self.lock().fail_flash = fail;
    }

    /// Enable error simulation with given probability (0.0 to 1.0)
    pub fn simulate_errors(&self, enable: bool, probability: f32) {
        let mut inner = self.lock();
        inner.simulate_errors = enable;
        inner.error_probability = probability.clamp(0.0, 1.0);
    }

    fn check(inner: &mut Inner, op: &str) -> Result<()> {
        if !inner.open {
            return Err(Error::transport(format!("{}: device not open", op)));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(Error::transport(format!("{}: injected failure", op)));
        }
        if inner.simulate_errors {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            if rng.gen::<f32>() < inner.error_probability {
                return Err(Error::transport(format!("{}: simulated failure", op)));
            }
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.open = true;
        inner.events.push(MockEvent::Open);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.open = false;
        inner.events.push(MockEvent::Close);
        Ok(())
    }

    fn set_rx(&mut self) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&mut inner, "set_rx")?;
        inner.events.push(MockEvent::Receive);
        Ok(())
    }

    fn set_tx(&mut self) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&mut inner, "set_tx")?;
        if let Some(frame) = inner.loaded.take() {
            inner.sent.push(frame);
        }
        inner.events.push(MockEvent::Transmit);
        Ok(())
    }

    fn get_state(&mut self) -> Result<[u8; 2]> {
        let mut inner = self.lock();
        Self::check(&mut inner, "get_state")?;
        if inner.incoming.is_empty() {
            Ok([0x00, 0x00])
        } else {
            Ok([STATE_FRAME_READY, 0x00])
        }
    }

    fn get_frame(&mut self) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        Self::check(&mut inner, "get_frame")?;
        let mut frame = inner
            .incoming
            .pop_front()
            .ok_or_else(|| Error::transport("get_frame: no frame pending"))?;
        frame.truncate(MAX_FRAME_LEN);
        Ok(frame)
    }

    fn set_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&mut inner, "set_frame")?;
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::transport(format!("set_frame: {} bytes exceeds limit", frame.len())));
        }
        inner.loaded = Some(frame.to_vec());
        Ok(())
    }

    fn read_flash(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        Self::check(&mut inner, "read_flash")?;
        if inner.fail_flash {
            return Err(Error::transport("read_flash: injected failure"));
        }
        let start = address as usize;
        inner
            .flash
            .get(start..start + len)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| Error::transport(format!("read_flash: 0x{:04x}+{} out of range", address, len)))
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&mut inner, "write_register")?;
        inner.registers.insert(address, value);
        inner.events.push(MockEvent::WriteRegister(address, value));
        Ok(())
    }

    fn execute(&mut self, command: u8) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&mut inner, "execute")?;
        inner.events.push(MockEvent::Execute(command));
        Ok(())
    }

    fn set_preamble_pattern(&mut self, pattern: u8) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&mut inner, "set_preamble_pattern")?;
        inner.events.push(MockEvent::Preamble(pattern));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_queue() {
        let mut transport = MockTransport::new();
        transport.open().unwrap();
        assert_eq!(transport.get_state().unwrap()[0], 0x00);

        transport.push_frame(vec![1, 2, 3]);
        assert_eq!(transport.get_state().unwrap()[0], STATE_FRAME_READY);
        assert_eq!(transport.get_frame().unwrap(), vec![1, 2, 3]);
        assert_eq!(transport.pending_frames(), 0);
    }

    #[test]
    fn test_transmit_records_loaded_frame() {
        let mut transport = MockTransport::new();
        transport.open().unwrap();
        transport.set_frame(&[9, 9]).unwrap();
        assert!(transport.sent_frames().is_empty());
        transport.set_tx().unwrap();
        assert_eq!(transport.take_sent(), vec![vec![9, 9]]);
        assert!(transport.sent_frames().is_empty());
    }

    #[test]
    fn test_closed_device_fails() {
        let mut transport = MockTransport::new();
        assert!(matches!(transport.get_state(), Err(Error::Transport(_))));
    }

    #[test]
    fn test_injected_failures() {
        let mut transport = MockTransport::new();
        transport.open().unwrap();
        transport.fail_next(2);
        assert!(transport.get_state().is_err());
        assert!(transport.set_rx().is_err());
        assert!(transport.get_state().is_ok());

        transport.simulate_errors(true, 1.0);
        assert!(transport.execute(5).is_err());
    }

    #[test]
    fn test_flash_layout() {
        let mut transport = MockTransport::new();
        transport.set_identity([10, 20, 30, 40, 50], 0xBEEF);
        transport.set_frequency_correction(-42);
        transport.open().unwrap();

        let serial = transport.read_flash(FLASH_SERIAL_ADDRESS, 7).unwrap();
        assert_eq!(serial, vec![10, 20, 30, 40, 50, 0xBE, 0xEF]);

        let correction = transport.read_flash(FLASH_CORRECTION_ADDRESS, 4).unwrap();
        assert_eq!(i32::from_be_bytes([correction[0], correction[1], correction[2], correction[3]]), -42);
    }
}
