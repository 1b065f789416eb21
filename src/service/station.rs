use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::core::{DeviceIdentity, EngineConfig, Error, Result, TransceiverSettings};
use crate::protocol::{Command, Completion, CurrentWeather, Engine, HistoryRecord, StationConfig};
use crate::radio;
use crate::store::{LastStat, SharedState, StateStore, TransceiverRecord, WeatherSnapshot};
use crate::transport::Transport;
use crate::util::local_now;
use super::poller::{Poller, Submission};
use super::WeatherDriver;

/// Client handle to a running console link
///
/// Request methods queue a command for the poller and wait for its outcome
/// under the configured timeout. Snapshot accessors never block on the radio.
pub struct Station {
    config: EngineConfig,
    settings: TransceiverSettings,
    shared: Arc<SharedState>,
    commands: mpsc::Sender<Submission>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Box<dyn Transport>>>,
    delivered: u64,
}

/// Applies a remembered pairing to a freshly read identity
fn restore_pairing(identity: &mut DeviceIdentity, record: &TransceiverRecord) {
    if record.serial.is_some() && record.serial != identity.serial {
        warn!(
            "Stored state belongs to transceiver {:?}, not {:?}; ignoring it",
            record.serial, identity.serial
        );
        return;
    }
    if let Some(id) = record.registered_id {
        info!("Restored pairing with console 0x{:04x}", id);
        identity.device_id = id;
        identity.registered_id = Some(id);
    }
}

impl Station {
    /// Brings up the transceiver and starts the poller
    pub fn start<T: Transport + 'static>(transport: T, config: EngineConfig) -> Result<Self> {
        Self::start_with_clock(transport, config, local_now)
    }

    /// Like [`Station::start`] with an explicit wall clock
    pub fn start_with_clock<T, C>(mut transport: T, config: EngineConfig, clock: C) -> Result<Self>
    where
        T: Transport + 'static,
        C: Fn() -> NaiveDateTime + Send + 'static,
    {
        config.validate()?;
        let store = match &config.state_dir {
            Some(dir) => StateStore::open(dir)?,
            None => StateStore::in_memory(),
        };

        let (mut identity, settings) = radio::bring_up(&mut transport, config.band)?;

        match store.load_transceiver() {
            Ok(Some(record)) => {
                if record.band != config.band {
                    warn!("Stored band {:?} differs from configured {:?}", record.band, config.band);
                }
                restore_pairing(&mut identity, &record);
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable transceiver state: {}", e),
        }
        let last_stat = match store.load_last_stat() {
            Ok(stat) => stat.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable link statistics: {}", e);
                LastStat::default()
            }
        };

        let shared = Arc::new(SharedState::new(identity.clone(), last_stat));
        let engine = Engine::new(config.clone(), identity, shared.clone(), store).with_clock(clock);
        let (commands, queue) = mpsc::channel(config.command_queue);
        let stop = Arc::new(AtomicBool::new(false));

        let transport: Box<dyn Transport> = Box::new(transport);
        let poller = Poller::new(transport, engine, queue, stop.clone(), config.poll_interval);
        let worker = thread::Builder::new()
            .name("rf-poller".to_string())
            .spawn(move || poller.run())?;

        Ok(Station {
            config,
            settings,
            shared,
            commands,
            stop,
            worker: Some(worker),
            delivered: 0,
        })
    }

    /// Pairs with a console, returning its device ID
    pub async fn pair(&self) -> Result<u16> {
        match self.request(Command::Pair, self.config.pairing_timeout).await? {
            Completion::Paired(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Fresh observation from the console
    pub async fn get_current_weather(&self) -> Result<CurrentWeather> {
        match self.paired_request(Command::GetCurrent).await? {
            Completion::Current(weather) => Ok(weather),
            other => Err(unexpected(other)),
        }
    }

    /// Up to `count` of the newest history records, oldest first
    pub async fn get_history(&self, count: usize) -> Result<Vec<HistoryRecord>> {
        match self.paired_request(Command::GetHistory { count }).await? {
            Completion::History(records) => Ok(records),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_config(&self) -> Result<StationConfig> {
        match self.paired_request(Command::GetConfig).await? {
            Completion::Config(config) => Ok(config),
            other => Err(unexpected(other)),
        }
    }

    /// Sets the console clock from the local clock
    pub async fn set_time(&self) -> Result<()> {
        self.paired_request(Command::SetTime).await.map(|_| ())
    }

    /// Clears the console's recorded minima and maxima selected by `flags`
    pub async fn reset_min_max(&self, flags: u32) -> Result<()> {
        self.paired_request(Command::ResetMinMax { flags }).await.map(|_| ())
    }

    /// The latest snapshot if published after sequence number `since`
    pub fn fresh_weather(&self, since: u64) -> Option<WeatherSnapshot> {
        self.shared.fresh_weather(since)
    }

    pub fn last_stat(&self) -> LastStat {
        self.shared.last_stat()
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.shared.identity()
    }

    pub fn settings(&self) -> &TransceiverSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stops the poller and releases the transceiver
    pub fn shutdown(&mut self) -> Result<()> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(()),
        };
        self.stop.store(true, Ordering::Release);
        let mut transport = worker
            .join()
            .map_err(|_| Error::invalid_state("poller thread panicked"))?;
        transport.close()?;
        info!("Station shut down");
        Ok(())
    }

    async fn paired_request(&self, command: Command) -> Result<Completion> {
        if !self.shared.identity().is_paired() {
            return Err(Error::NotPaired);
        }
        self.request(command, self.config.request_timeout).await
    }

    async fn request(&self, command: Command, wait: Duration) -> Result<Completion> {
        if self.worker.is_none() {
            return Err(Error::invalid_state("station is shut down"));
        }
        let (respond, response) = oneshot::channel();
        self.commands
            .send(Submission { command, respond })
            .await
            .map_err(|_| Error::invalid_state("poller is not running"))?;

        match tokio::time::timeout(wait, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::request_failed(format!("{:?} request dropped", command.kind()))),
            Err(_) => Err(Error::timeout(format!("no answer to {:?} within {:?}", command.kind(), wait))),
        }
    }
}

fn unexpected(completion: Completion) -> Error {
    Error::protocol(format!("unexpected completion {:?}", completion))
}

impl WeatherDriver for Station {
    fn open(&mut self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::invalid_state("station has been shut down"))
        }
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown()
    }

    fn poll_packet(&mut self) -> Result<Option<CurrentWeather>> {
        if !self.is_running() {
            return Err(Error::invalid_state("station has been shut down"));
        }
        Ok(self.shared.fresh_weather(self.delivered).map(|snapshot| {
            self.delivered = snapshot.sequence;
            snapshot.weather
        }))
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error while shutting down: {}", e);
        }
    }
}
