//! Request lifecycle and response dispatch
//!
//! The engine is driven by the poller: `advance` once per iteration to run
//! timers and the TTL, `handle_frame` for every received frame. It never
//! touches the transport itself; it returns the frame to transmit and, for
//! pairing, the radio mode to switch to.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::core::{
    DeviceIdentity, EngineConfig, Error, Request, RequestKind, RequestState, Result, UNPAIRED_DEVICE_ID,
};
use crate::store::{SharedState, StateStore};
use crate::util::local_now;
use super::config::StationConfig;
use super::frame::{
    address_for_index, build_ack, build_config_frame, build_time_frame, AckAction, FrameHeader, NextAction,
    ResponseType, TimeReply,
};
use super::history::{index_after, index_before, outstanding, HistoryFrame, HistoryRecord};
use super::weather::CurrentWeather;

/// Something a caller asks of the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pair,
    GetCurrent,
    GetHistory { count: usize },
    GetConfig,
    SetTime,
    ResetMinMax { flags: u32 },
}

impl Command {
    pub fn kind(&self) -> RequestKind {
        match self {
            Command::Pair => RequestKind::FirstPairing,
            Command::GetCurrent => RequestKind::GetCurrent,
            Command::GetHistory { .. } => RequestKind::GetHistory,
            Command::GetConfig => RequestKind::GetConfig,
            Command::SetTime => RequestKind::SetTime,
            Command::ResetMinMax { .. } => RequestKind::SetConfig,
        }
    }
}

/// Result delivered to the caller of a finished request
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Paired(u16),
    Current(CurrentWeather),
    History(Vec<HistoryRecord>),
    Config(StationConfig),
    Done,
}

/// Radio mode change requested by the pairing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Broadcast the preamble pattern
    Preamble,
    /// Back to receive
    Receive,
}

/// Progress of a time synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeSync {
    Idle,
    /// Guard window hit, console told to ask again
    Deferred,
    /// Time frame sent, a repeat request gets a fresh one
    Sent,
}

#[derive(Debug, Default)]
struct Pairing {
    candidate: Option<u16>,
    preamble_until: Option<Instant>,
    device_deadline: Option<Instant>,
    register_deadline: Option<Instant>,
}

#[derive(Debug)]
struct HistoryJob {
    count: usize,
    /// Records to collect, fixed by the first history frame
    target: Option<usize>,
    latest: Option<u16>,
    last_accepted: Option<u16>,
    records: Vec<HistoryRecord>,
}

impl HistoryJob {
    fn new(count: usize) -> Self {
        HistoryJob {
            count,
            target: None,
            latest: None,
            last_accepted: None,
            records: Vec::new(),
        }
    }
}

/// Source of local wall-clock time
pub type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

/// Frame protocol engine
pub struct Engine {
    config: EngineConfig,
    identity: DeviceIdentity,
    request: Request,
    shared: Arc<SharedState>,
    store: StateStore,
    clock: Clock,
    pending_reset: Option<u32>,
    config_sent: bool,
    time_sync: TimeSync,
    history: Option<HistoryJob>,
    pairing: Pairing,
    outcome: Option<Result<Completion>>,
}

impl Engine {
    pub fn new(config: EngineConfig, identity: DeviceIdentity, shared: Arc<SharedState>, store: StateStore) -> Self {
        shared.set_identity(identity.clone());
        Engine {
            config,
            identity,
            request: Request::idle(),
            shared,
            store,
            clock: Box::new(local_now),
            pending_reset: None,
            config_sent: false,
            time_sync: TimeSync::Idle,
            history: None,
            pairing: Pairing::default(),
            outcome: None,
        }
    }

    /// Replaces the wall clock used for time frames and capture stamps
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn request(&self) -> Request {
        self.request
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// A request is outstanding or its outcome has not been collected
    pub fn is_busy(&self) -> bool {
        self.request.is_outstanding() || self.outcome.is_some()
    }

    /// Queues a request
    pub fn submit(&mut self, command: Command) -> Result<()> {
        if self.is_busy() {
            return Err(Error::invalid_state(format!(
                "{:?} request already outstanding",
                self.request.kind
            )));
        }
        match command {
            Command::Pair => {
                self.pairing = Pairing::default();
            }
            _ if !self.identity.is_paired() => return Err(Error::NotPaired),
            Command::GetHistory { count } => {
                self.history = Some(HistoryJob::new(count));
            }
            Command::ResetMinMax { flags } => {
                if self.shared.config().is_none() {
                    return Err(Error::invalid_state(
                        "no configuration block held, fetch the configuration first",
                    ));
                }
                self.pending_reset = Some(flags);
                self.config_sent = false;
            }
            _ => {}
        }
        self.request = Request::queued(command.kind(), self.config.request_ttl);
        debug!("Queued {:?} request", command.kind());
        Ok(())
    }

    /// Abandons the outstanding request without notifying anyone
    pub fn cancel(&mut self) {
        if self.request.is_outstanding() {
            warn!("Cancelling {:?} request, caller went away", self.request.kind);
            self.clear_request();
        }
    }

    /// Result of the last terminal request, taken once
    pub fn take_outcome(&mut self) -> Option<Result<Completion>> {
        self.outcome.take()
    }

    /// Runs TTL and pairing timers for one poll iteration
    pub fn advance(&mut self, now: Instant) -> Option<RadioMode> {
        if !self.request.is_outstanding() {
            return None;
        }

        let kind = self.request.kind;
        let state = self.request.state;
        if self.request.tick() {
            warn!("{:?} request expired in state {:?}", kind, state);
            self.request.state = RequestState::Invalid;
            self.fail(Error::timeout(format!("{:?} request expired", kind)));
            return if state == RequestState::Preamble { Some(RadioMode::Receive) } else { None };
        }

        if kind != RequestKind::FirstPairing {
            return None;
        }

        match state {
            RequestState::Queued => {
                self.request.state = RequestState::Preamble;
                self.pairing.preamble_until = Some(now + self.config.preamble_duration);
                self.pairing.device_deadline = Some(now + self.config.device_wait);
                info!("Broadcasting pairing preamble for {:?}", self.config.preamble_duration);
                Some(RadioMode::Preamble)
            }
            RequestState::Preamble => {
                if self.pairing.preamble_until.map_or(true, |t| now >= t) {
                    self.request.state = RequestState::WaitDevice;
                    info!("Waiting for a console to answer");
                    Some(RadioMode::Receive)
                } else {
                    None
                }
            }
            RequestState::WaitDevice => {
                if let Some(deadline) = self.pairing.register_deadline {
                    if now >= deadline {
                        warn!(
                            "Candidate 0x{:04x} did not confirm, waiting for another console",
                            self.pairing.candidate.unwrap_or(0)
                        );
                        self.pairing.candidate = None;
                        self.pairing.register_deadline = None;
                    }
                }
                if self.pairing.device_deadline.map_or(false, |t| now >= t) {
                    self.request.state = RequestState::Error;
                    warn!("No console answered the pairing preamble");
                    self.fail(Error::request_failed("no console answered the pairing preamble"));
                }
                None
            }
            _ => None,
        }
    }

    /// Handles one received frame, returning the reply to transmit
    pub fn handle_frame(&mut self, frame: &[u8], now: Instant) -> Option<Vec<u8>> {
        let header = match FrameHeader::parse(frame) {
            Some(header) => header,
            None => {
                debug!("Dropping runt frame of {} bytes", frame.len());
                return None;
            }
        };

        if self.request.kind == RequestKind::FirstPairing && self.request.is_outstanding() {
            return self.handle_pairing_frame(&header, frame, now);
        }
        if !self.identity.is_paired() {
            debug!("Not paired, dropping frame from 0x{:04x}", header.device_id);
            return None;
        }
        if header.device_id != self.identity.device_id {
            debug!("Dropping frame from foreign device 0x{:04x}", header.device_id);
            return None;
        }

        let response = self.classify(&header, frame)?;
        self.dispatch(response, &header, frame)
    }

    /// Response type of a frame with exactly the expected length
    fn classify(&self, header: &FrameHeader, frame: &[u8]) -> Option<ResponseType> {
        match header.response_type() {
            Some(response) if response.expected_len() == frame.len() => Some(response),
            Some(response) => {
                debug!(
                    "Dropping {:?} frame of {} bytes, expected {}",
                    response,
                    frame.len(),
                    response.expected_len()
                );
                None
            }
            None => {
                debug!("Dropping frame with unknown status 0x{:02x}", header.status);
                None
            }
        }
    }

    fn handle_pairing_frame(&mut self, header: &FrameHeader, frame: &[u8], now: Instant) -> Option<Vec<u8>> {
        if self.request.state != RequestState::WaitDevice {
            debug!("Ignoring frame from 0x{:04x} in {:?}", header.device_id, self.request.state);
            return None;
        }
        let response = self.classify(header, frame)?;
        let sender = header.device_id;

        let known = self.identity.registered_id == Some(sender);
        if self.pairing.candidate == Some(sender) || known {
            self.confirm_pairing(sender);
            return self.dispatch(response, header, frame);
        }

        let candidate = match self.pairing.candidate {
            Some(candidate) if sender == UNPAIRED_DEVICE_ID => candidate,
            Some(candidate) => {
                debug!("Pairing with 0x{:04x}, ignoring 0x{:04x}", candidate, sender);
                return None;
            }
            None => {
                let candidate = if sender == UNPAIRED_DEVICE_ID { self.identity.device_id } else { sender };
                info!("Console 0x{:04x} answered, offering id 0x{:04x}", sender, candidate);
                self.pairing.candidate = Some(candidate);
                self.pairing.register_deadline = Some(now + self.config.register_wait);
                candidate
            }
        };

        Some(build_ack(
            candidate,
            AckAction::GetConfig,
            self.checksum(),
            self.config.comm_interval,
            self.history_address(),
        ))
    }

    fn confirm_pairing(&mut self, id: u16) {
        self.identity.device_id = id;
        self.identity.registered_id = Some(id);
        self.shared.set_identity(self.identity.clone());

        let serial = self.identity.serial.clone();
        let band = self.config.band;
        if let Err(e) = self.store.update_transceiver(|record| {
            record.serial = serial;
            record.registered_id = Some(id);
            record.band = band;
        }) {
            warn!("Failed to persist pairing: {}", e);
        }

        info!("Paired with console 0x{:04x}", id);
        self.finish(Completion::Paired(id));
    }

    fn dispatch(&mut self, response: ResponseType, header: &FrameHeader, frame: &[u8]) -> Option<Vec<u8>> {
        self.shared.update_last_stat(|stat| {
            stat.last_seen = Some(SystemTime::now());
            stat.link_quality = Some(header.quality);
            if response == ResponseType::DataWritten {
                stat.battery = Some(header.low_nibble());
            }
        });

        let reply = match response {
            ResponseType::DataWritten => self.on_data_written(),
            ResponseType::Config => self.on_config(frame),
            ResponseType::CurrentWeather => self.on_current_weather(frame),
            ResponseType::History => self.on_history(frame),
            ResponseType::NextAction => self.on_next_action(header.low_nibble()),
        };

        let stat = self.shared.last_stat();
        if let Err(e) = self.store.save_last_stat(&stat) {
            warn!("Failed to persist link statistics: {}", e);
        }
        reply
    }

    fn on_data_written(&mut self) -> Option<Vec<u8>> {
        let running = self.request.state == RequestState::Running;
        match self.request.kind {
            RequestKind::SetTime if running && self.time_sync == TimeSync::Sent => {
                self.finish(Completion::Done);
            }
            RequestKind::SetConfig if running && self.config_sent => {
                self.finish(Completion::Done);
            }
            _ => debug!("Console acknowledged a write"),
        }
        self.time_sync = TimeSync::Idle;

        if self.request.state == RequestState::Queued {
            Some(self.next_ack())
        } else {
            None
        }
    }

    fn on_config(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        match StationConfig::from_frame(frame) {
            Ok(config) => {
                if !config.is_consistent() {
                    warn!(
                        "Configuration checksum 0x{:04x} does not match content 0x{:04x}",
                        config.in_checksum(),
                        config.checksum()
                    );
                }
                debug!("Received configuration, checksum 0x{:04x}", config.checksum());
                self.shared.set_config(config.clone());
                self.shared.update_last_stat(|stat| stat.last_config_at = Some(SystemTime::now()));
                if self.request.kind == RequestKind::GetConfig && self.request.is_outstanding() {
                    self.mark_running();
                    self.finish(Completion::Config(config));
                }
            }
            Err(e) => warn!("Discarding configuration: {}", e),
        }
        Some(self.next_ack())
    }

    fn on_current_weather(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let weather = match CurrentWeather::decode(frame, (self.clock)()) {
            Ok(weather) => weather,
            Err(e) => {
                warn!("Discarding current weather: {}", e);
                return Some(self.next_ack());
            }
        };
        let console_checksum = weather.config_checksum;

        self.shared.publish_weather(weather.clone());
        self.shared.update_last_stat(|stat| stat.last_current_at = Some(SystemTime::now()));
        if self.request.kind == RequestKind::GetCurrent && self.request.is_outstanding() {
            self.mark_running();
            self.finish(Completion::Current(weather));
        }

        match self.shared.config() {
            Some(config) if config.checksum() == console_checksum => {
                if self.pending_reset.is_some() {
                    Some(self.ack_with(AckAction::ReqSetConfig))
                } else {
                    Some(self.next_ack())
                }
            }
            _ => {
                debug!("Console configuration 0x{:04x} differs from the held copy", console_checksum);
                Some(self.ack_with(AckAction::GetConfig))
            }
        }
    }

    fn on_history(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let decoded = match HistoryFrame::decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding history frame: {}", e);
                return Some(self.next_ack());
            }
        };
        let index = decoded.record.index;

        let mut cursor = self.shared.cursor();
        if decoded.latest_index.is_some() {
            cursor.latest_index = decoded.latest_index;
        }
        if cursor.last_index == Some(index) {
            debug!("Skipping duplicate history slot {}", index);
        } else {
            cursor.last_index = Some(index);
            self.shared.update_last_stat(|stat| {
                stat.last_history_index = Some(index);
                stat.last_history_at = Some(SystemTime::now());
            });
        }
        self.shared.set_cursor(cursor);

        if self.request.kind == RequestKind::GetHistory && self.request.is_outstanding() {
            return Some(self.drive_history(decoded));
        }
        Some(self.next_ack())
    }

    fn drive_history(&mut self, decoded: HistoryFrame) -> Vec<u8> {
        self.mark_running();
        let job = self.history.get_or_insert_with(|| HistoryJob::new(0));
        let index = decoded.record.index;

        let (target, latest) = match (job.target, job.latest) {
            (Some(target), Some(latest)) => (target, latest),
            _ => {
                let latest = decoded.latest_index.unwrap_or(index);
                let available = outstanding(latest, index) as usize + 1;
                let target = job.count.min(available);
                job.target = Some(target);
                job.latest = Some(latest);
                job.last_accepted = Some(index_before(latest, target as u16));
                info!("Replaying {} history records up to slot {}", target, latest);
                (target, latest)
            }
        };

        if target == 0 {
            self.finish(Completion::History(Vec::new()));
            return self.next_ack();
        }

        let expected = job.last_accepted.map(|i| index_after(i, 1));
        if expected == Some(index) {
            job.records.push(decoded.record);
            job.last_accepted = Some(index);
            if job.records.len() >= target || index == latest {
                let records = std::mem::take(&mut job.records);
                self.finish(Completion::History(records));
                return self.next_ack();
            }
        } else {
            debug!("Console sent slot {}, re-requesting {:?}", index, expected);
        }

        let address = address_for_index(job.last_accepted);
        build_ack(
            self.identity.device_id,
            AckAction::GetHistory,
            self.checksum(),
            self.config.comm_interval,
            address,
        )
    }

    fn on_next_action(&mut self, code: u8) -> Option<Vec<u8>> {
        match NextAction::from_code(code) {
            NextAction::FirstConfig | NextAction::SetConfig => self.config_frame(),
            NextAction::SetTime => Some(self.time_frame()),
            NextAction::Other(code) => {
                debug!("Console requested unknown action {}", code);
                Some(self.next_ack())
            }
        }
    }

    /// Reply to a configuration request: the held block mirrored back
    ///
    /// The reset-min/max write path is unverified against a real console, see
    /// [`StationConfig::outgoing_block`].
    fn config_frame(&mut self) -> Option<Vec<u8>> {
        let config = match self.shared.config() {
            Some(config) => config,
            None => {
                warn!("Console asked for the configuration but no block is held");
                return None;
            }
        };
        let flags = self.pending_reset.unwrap_or_else(|| config.reset_flags());
        let quality = self.shared.last_stat().link_quality.unwrap_or(0);
        match build_config_frame(self.identity.device_id, quality, &config.outgoing_block(flags)) {
            Ok(frame) => {
                if self.request.kind == RequestKind::SetConfig {
                    self.request.state = RequestState::Running;
                    self.config_sent = true;
                }
                Some(frame)
            }
            Err(e) => {
                warn!("Failed to build configuration frame: {}", e);
                None
            }
        }
    }

    fn time_frame(&mut self) -> Vec<u8> {
        let now = (self.clock)();
        match build_time_frame(self.identity.device_id, self.checksum(), now, self.history_address()) {
            TimeReply::Frame(frame) => {
                if self.time_sync == TimeSync::Sent {
                    debug!("Console asked for the time again, regenerating");
                }
                self.time_sync = TimeSync::Sent;
                if self.request.kind == RequestKind::SetTime {
                    self.request.state = RequestState::Running;
                }
                frame
            }
            TimeReply::Defer { ack, wait_secs } => {
                debug!("Too close to a minute boundary, deferring time by {}s", wait_secs);
                self.time_sync = TimeSync::Deferred;
                ack
            }
        }
    }

    /// Acknowledgement asking for whatever the outstanding request needs
    fn next_ack(&mut self) -> Vec<u8> {
        let action = if self.request.is_outstanding() {
            match self.request.kind {
                RequestKind::GetHistory => AckAction::GetHistory,
                RequestKind::SetTime => AckAction::ReqSetTime,
                RequestKind::SetConfig => AckAction::ReqSetConfig,
                RequestKind::GetConfig => AckAction::GetConfig,
                _ => AckAction::GetCurrent,
            }
        } else {
            AckAction::GetCurrent
        };
        self.ack_with(action)
    }

    fn ack_with(&mut self, action: AckAction) -> Vec<u8> {
        self.mark_running();
        build_ack(
            self.identity.device_id,
            action,
            self.checksum(),
            self.config.comm_interval,
            self.history_address(),
        )
    }

    /// Queued -> Running for every request except pairing
    fn mark_running(&mut self) {
        if self.request.state == RequestState::Queued && self.request.kind != RequestKind::FirstPairing {
            self.request.state = RequestState::Running;
            debug!("{:?} request running", self.request.kind);
        }
    }

    fn checksum(&self) -> u16 {
        self.shared.config().map(|c| c.checksum()).unwrap_or(0)
    }

    fn history_address(&self) -> u32 {
        match self.history.as_ref().and_then(|job| job.last_accepted) {
            Some(index) => address_for_index(Some(index)),
            None => address_for_index(self.shared.cursor().last_index),
        }
    }

    fn finish(&mut self, completion: Completion) {
        debug_assert!(
            self.request.kind == RequestKind::FirstPairing || self.request.state == RequestState::Running,
            "{:?} request finished from {:?}",
            self.request.kind,
            self.request.state
        );
        info!("{:?} request finished", self.request.kind);
        self.request.state = RequestState::Finished;
        self.outcome = Some(Ok(completion));
        self.clear_request();
    }

    fn fail(&mut self, error: Error) {
        self.outcome = Some(Err(error));
        self.clear_request();
    }

    fn clear_request(&mut self) {
        if self.request.kind == RequestKind::SetConfig {
            self.pending_reset = None;
            self.config_sent = false;
        }
        self.request.reset();
        self.history = None;
        self.pairing = Pairing::default();
    }
}
