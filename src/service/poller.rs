//! Polling worker
//!
//! The poller owns the transport and the engine. Callers reach it only
//! through a bounded command queue; each command carries a oneshot responder
//! that receives the terminal outcome of the request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::{Error, Result};
use crate::protocol::{Command, Completion, Engine, RadioMode};
use crate::radio::PREAMBLE_PATTERN;
use crate::transport::{Transport, STATE_FRAME_READY};

/// Channel end receiving the outcome of a request
pub type Responder = oneshot::Sender<Result<Completion>>;

/// A caller's request travelling to the poller
pub struct Submission {
    pub command: Command,
    pub respond: Responder,
}

/// Drives the engine from a dedicated thread
pub struct Poller<T: Transport> {
    transport: T,
    engine: Engine,
    commands: mpsc::Receiver<Submission>,
    waiting: Option<Responder>,
    stop: Arc<AtomicBool>,
    interval: Duration,
}

impl<T: Transport> Poller<T> {
    pub fn new(
        transport: T,
        engine: Engine,
        commands: mpsc::Receiver<Submission>,
        stop: Arc<AtomicBool>,
        interval: Duration,
    ) -> Self {
        Poller {
            transport,
            engine,
            commands,
            waiting: None,
            stop,
            interval,
        }
    }

    /// One poll iteration without the trailing sleep
    pub fn step(&mut self, now: Instant) {
        self.accept_command();

        if let Some(mode) = self.engine.advance(now) {
            if let Err(e) = self.switch_radio(mode) {
                warn!("Failed to switch radio to {:?}: {}", mode, e);
            }
        }
        self.deliver();

        if let Err(e) = self.receive(now) {
            warn!("Transceiver error: {}", e);
        }
        self.deliver();
    }

    /// Polls until asked to stop, then hands the transport back
    pub fn run(mut self) -> T {
        info!("Poller started, interval {:?}", self.interval);
        while !self.stop.load(Ordering::Acquire) {
            self.step(Instant::now());
            std::thread::sleep(self.interval);
        }

        if let Some(respond) = self.waiting.take() {
            let _ = respond.send(Err(Error::invalid_state("station shut down")));
        }
        self.commands.close();
        while let Ok(submission) = self.commands.try_recv() {
            let _ = submission.respond.send(Err(Error::invalid_state("station shut down")));
        }
        info!("Poller stopped");
        self.transport
    }

    fn accept_command(&mut self) {
        if self.waiting.as_ref().map_or(false, |respond| respond.is_closed()) {
            self.engine.cancel();
            self.waiting = None;
        }
        if self.waiting.is_some() || self.engine.is_busy() {
            return;
        }

        match self.commands.try_recv() {
            Ok(Submission { command, respond }) => match self.engine.submit(command) {
                Ok(()) => self.waiting = Some(respond),
                Err(e) => {
                    debug!("Refusing {:?}: {}", command, e);
                    let _ = respond.send(Err(e));
                }
            },
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
    }

    fn deliver(&mut self) {
        if let Some(outcome) = self.engine.take_outcome() {
            match self.waiting.take() {
                Some(respond) => {
                    if respond.send(outcome).is_err() {
                        debug!("Caller stopped waiting before the outcome arrived");
                    }
                }
                None => debug!("Request ended with nobody waiting"),
            }
        }
    }

    fn switch_radio(&mut self, mode: RadioMode) -> Result<()> {
        match mode {
            RadioMode::Preamble => {
                self.transport.set_preamble_pattern(PREAMBLE_PATTERN)?;
                self.transport.set_tx()
            }
            RadioMode::Receive => self.transport.set_rx(),
        }
    }

    fn receive(&mut self, now: Instant) -> Result<()> {
        let state = self.transport.get_state()?;
        if state[0] != STATE_FRAME_READY {
            return Ok(());
        }

        let frame = self.transport.get_frame()?;
        if let Some(reply) = self.engine.handle_frame(&frame, now) {
            self.transport.set_frame(&reply)?;
            self.transport.set_tx()?;
            self.transport.set_rx()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeviceIdentity, EngineConfig};
    use crate::protocol::frame::parse_ack;
    use crate::protocol::weather::tests::sample_frame;
    use crate::protocol::AckAction;
    use crate::store::{LastStat, SharedState, StateStore};
    use crate::transport::{MockEvent, MockTransport};

    const CONSOLE: u16 = 0x1234;

    fn poller(identity: DeviceIdentity) -> (Poller<MockTransport>, MockTransport, mpsc::Sender<Submission>) {
        let mut mock = MockTransport::new();
        mock.open().unwrap();
        let shared = Arc::new(SharedState::new(identity.clone(), LastStat::default()));
        let engine = Engine::new(EngineConfig::default(), identity, shared, StateStore::in_memory());
        let (tx, rx) = mpsc::channel(4);
        let poller = Poller::new(mock.clone(), engine, rx, Arc::new(AtomicBool::new(false)), Duration::from_millis(1));
        (poller, mock, tx)
    }

    fn paired() -> DeviceIdentity {
        DeviceIdentity {
            serial: None,
            transceiver_id: 1,
            device_id: CONSOLE,
            registered_id: Some(CONSOLE),
        }
    }

    #[test]
    fn test_reply_is_transmitted_then_receive_resumes() {
        let (mut poller, mock, _tx) = poller(paired());
        mock.push_frame(sample_frame(CONSOLE, 0));
        poller.step(Instant::now());

        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(parse_ack(&sent[0]).unwrap().action, AckAction::GetConfig);
        let events = mock.events();
        assert_eq!(&events[events.len() - 2..], &[MockEvent::Transmit, MockEvent::Receive]);
    }

    #[test]
    fn test_transport_errors_are_contained() {
        let (mut poller, mock, _tx) = poller(paired());
        mock.push_frame(sample_frame(CONSOLE, 0));
        mock.fail_next(1);
        poller.step(Instant::now());
        assert!(mock.sent_frames().is_empty());
        assert_eq!(mock.pending_frames(), 1);

        poller.step(Instant::now());
        assert_eq!(mock.sent_frames().len(), 1);
    }

    #[test]
    fn test_command_outcome_reaches_caller() {
        let (mut poller, mock, tx) = poller(paired());
        let (respond, mut response) = oneshot::channel();
        tx.try_send(Submission { command: Command::GetCurrent, respond }).unwrap();

        poller.step(Instant::now());
        assert!(response.try_recv().is_err());

        mock.push_frame(sample_frame(CONSOLE, 0));
        poller.step(Instant::now());
        assert!(matches!(response.try_recv(), Ok(Ok(Completion::Current(_)))));
    }

    #[test]
    fn test_refused_command_is_answered_immediately() {
        let (mut poller, _mock, tx) = poller(DeviceIdentity::default());
        let (respond, mut response) = oneshot::channel();
        tx.try_send(Submission { command: Command::GetConfig, respond }).unwrap();
        poller.step(Instant::now());
        assert!(matches!(response.try_recv(), Ok(Err(Error::NotPaired))));
    }

    #[test]
    fn test_abandoned_request_is_cancelled() {
        let (mut poller, _mock, tx) = poller(paired());
        let (respond, response) = oneshot::channel();
        tx.try_send(Submission { command: Command::GetConfig, respond }).unwrap();
        poller.step(Instant::now());
        assert!(poller.engine.is_busy());

        drop(response);
        poller.step(Instant::now());
        assert!(!poller.engine.is_busy());
    }

    #[test]
    fn test_pairing_drives_the_radio() {
        let (mut poller, mock, tx) = poller(DeviceIdentity::default());
        let (respond, _response) = oneshot::channel();
        tx.try_send(Submission { command: Command::Pair, respond }).unwrap();

        let start = Instant::now();
        poller.step(start);
        let events = mock.events();
        assert!(events.contains(&MockEvent::Preamble(PREAMBLE_PATTERN)));
        assert_eq!(events.last(), Some(&MockEvent::Transmit));

        poller.step(start + Duration::from_secs(6));
        assert_eq!(mock.events().last(), Some(&MockEvent::Receive));
    }
}
