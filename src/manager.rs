use std::collections::{BTreeMap, VecDeque};

use log::{debug, error, info, warn};

use crate::config::HubSettings;
use crate::error::{HubError, ProtocolError};
use crate::frame;
use crate::messages::{Command, CommandBody, DeviceType, Payload};
use crate::registry::Registry;
use crate::transport::{self, Reply, ReplyStatus, Transport};
use crate::trigger::{self, Actuation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The mesh answered "no content".
    Success,
    /// The mesh answered with an unexpected status.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Discovering,
    InitialStatusSweep,
    SteadyPolling,
    Terminated(Outcome),
}

/// Drives the hub through discovery and polling. Owns the registry and the
/// table of requests still waiting for a status reply; nothing else mutates
/// them.
pub struct Manager<T> {
    transport: T,
    settings: HubSettings,
    registry: Registry,
    /// Hub time at which each outstanding request was sent, oldest first.
    pending: BTreeMap<u64, VecDeque<u64>>,
    outbox: Vec<Payload>,
    serial: u64,
    hub_time: Option<u64>,
    state: HubState,
}

impl<T: Transport> Manager<T> {
    pub fn new(transport: T, settings: HubSettings) -> Self {
        Manager {
            transport,
            settings,
            registry: Registry::new(),
            pending: BTreeMap::new(),
            outbox: Vec::new(),
            serial: 1,
            hub_time: None,
            state: HubState::Discovering,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn run_loop(&mut self) -> Result<Outcome, HubError> {
        loop {
            if let HubState::Terminated(outcome) = self.state {
                info!("Hub loop finished: {:?}", outcome);
                match self.registry.snapshot_json() {
                    Ok(json) => debug!("Final registry: {json}"),
                    Err(err) => warn!("Could not serialize registry: {err}"),
                }
                return Ok(outcome);
            }
            self.step().await?;
        }
    }

    /// Advance the state machine by one transition.
    pub async fn step(&mut self) -> Result<HubState, HubError> {
        let next = match self.state {
            HubState::Discovering => self.discover().await?,
            HubState::InitialStatusSweep => self.initial_sweep(),
            HubState::SteadyPolling => self.poll().await?,
            terminated @ HubState::Terminated(_) => terminated,
        };
        if next != self.state {
            info!("{:?} -> {:?}", self.state, next);
        }
        self.state = next;
        Ok(next)
    }

    async fn discover(&mut self) -> Result<HubState, HubError> {
        let announce = self.request(
            self.settings.broadcast_address,
            DeviceType::Hub,
            Command::WhoIsHere,
            Some(CommandBody::Name {
                dev_name: self.settings.name.clone(),
            }),
        );
        let reply = self.exchange(&[announce]).await?;

        match ReplyStatus::classify(reply.status) {
            ReplyStatus::Ok => {}
            ReplyStatus::NoContent => {
                info!("No devices on the mesh");
                return Ok(HubState::Terminated(Outcome::Success));
            }
            ReplyStatus::Failed(code) => {
                error!("Discovery failed with status {code}");
                return Ok(HubState::Terminated(Outcome::Failure));
            }
        }

        let bytes = match transport::decode_reply(&reply.body) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Discarding discovery reply: {err}");
                return Ok(HubState::Discovering);
            }
        };
        let replies = decode_replies(&bytes)?;

        self.observe_time(&replies);
        if let Some(now) = self.hub_time {
            self.pending
                .insert(self.settings.broadcast_address, VecDeque::from([now]));
        }
        self.handle_replies(replies);
        self.registry.mark_all_present();
        if self.registry.is_empty() {
            warn!("Discovery reply named no devices");
        } else {
            info!("Discovered {} device(s)", self.registry.len());
        }

        Ok(HubState::InitialStatusSweep)
    }

    /// Queue a status request for every environment sensor. They go out with
    /// the first polling round.
    fn initial_sweep(&mut self) -> HubState {
        let sensors: Vec<u64> = self
            .registry
            .iter()
            .filter(|record| record.device_type == DeviceType::EnvSensor)
            .map(|record| record.address)
            .collect();

        for address in sensors {
            let request = self.request(address, DeviceType::Hub, Command::GetStatus, None);
            self.outbox.push(request);
        }
        HubState::SteadyPolling
    }

    async fn poll(&mut self) -> Result<HubState, HubError> {
        let switches: Vec<u64> = self
            .registry
            .iter()
            .filter(|record| record.device_type == DeviceType::Switch && record.present)
            .map(|record| record.address)
            .collect();
        for address in switches {
            let request = self.request(address, DeviceType::Hub, Command::GetStatus, None);
            self.outbox.push(request);
        }

        let batch = std::mem::take(&mut self.outbox);
        debug!("Sending {} packet(s)", batch.len());
        let reply = self.exchange(&batch).await?;

        match ReplyStatus::classify(reply.status) {
            ReplyStatus::Ok => {}
            ReplyStatus::NoContent => return Ok(HubState::Terminated(Outcome::Success)),
            ReplyStatus::Failed(code) => {
                error!("Polling failed with status {code}");
                return Ok(HubState::Terminated(Outcome::Failure));
            }
        }

        self.record_pending(&batch);

        let bytes = match transport::decode_reply(&reply.body) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Discarding reply batch: {err}");
                return Ok(HubState::SteadyPolling);
            }
        };
        let replies = decode_replies(&bytes)?;

        self.observe_time(&replies);
        self.expire_pending();
        self.handle_replies(replies);

        Ok(HubState::SteadyPolling)
    }

    /// Send `batch`, resending the same bytes after transport errors until
    /// `max_retries` is exhausted.
    async fn exchange(&self, batch: &[Payload]) -> Result<Reply, HubError> {
        let request = transport::encode_request(&frame::encode_batch(batch)?);
        let mut failures = 0;
        loop {
            match self.transport.send(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    failures += 1;
                    if failures > self.settings.max_retries {
                        return Err(HubError::Transport {
                            attempts: failures,
                            source: err,
                        });
                    }
                    warn!(
                        "Transport error ({err}), resending in {:?} (attempt {}/{})",
                        self.settings.retry_delay,
                        failures + 1,
                        self.settings.max_retries + 1
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    fn observe_time(&mut self, replies: &[Payload]) {
        match replies.iter().find_map(Payload::tick_time) {
            Some(time) => self.hub_time = Some(time),
            None => debug!("No clock tick in reply, hub time stays {:?}", self.hub_time),
        }
    }

    fn record_pending(&mut self, batch: &[Payload]) {
        let Some(now) = self.hub_time else {
            return;
        };
        for payload in batch {
            if matches!(payload.command, Command::GetStatus | Command::SetStatus) {
                self.pending.entry(payload.dst).or_default().push_back(now);
            }
        }
    }

    /// Drop every address whose oldest outstanding request is more than the
    /// liveness window behind the current hub time, marking it absent.
    fn expire_pending(&mut self) {
        let Some(now) = self.hub_time else {
            return;
        };
        let window = self.settings.liveness_window;
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, sent)| sent.front().is_some_and(|&t| now.saturating_sub(t) > window))
            .map(|(&address, _)| address)
            .collect();

        for address in expired {
            self.pending.remove(&address);
            self.registry.mark_absent(address);
        }
    }

    fn settle_pending(&mut self, address: u64) {
        if address == self.settings.broadcast_address {
            return;
        }
        if let Some(sent) = self.pending.get_mut(&address) {
            sent.pop_front();
            if sent.is_empty() {
                self.pending.remove(&address);
            }
        }
    }

    fn handle_replies(&mut self, replies: Vec<Payload>) {
        for payload in replies {
            debug!(
                "<- {:#x} {:?} {:?} #{}",
                payload.src, payload.device_type, payload.command, payload.serial
            );

            if let Some(record) = self.registry.get(payload.src) {
                if !record.present && payload.command != Command::WhoIsHere {
                    debug!("Ignoring {:?} from absent {}", payload.command, record.name);
                    continue;
                }
            }

            match payload.command {
                Command::IAmHere => {
                    let present = self.discovery_answered_in_time();
                    self.registry
                        .upsert_discovered(&payload, present, self.hub_time);
                }
                Command::WhoIsHere => {
                    let answer = self.request(
                        self.settings.broadcast_address,
                        DeviceType::Hub,
                        Command::IAmHere,
                        Some(CommandBody::Name {
                            dev_name: self.settings.name.clone(),
                        }),
                    );
                    self.outbox.push(answer);
                    self.registry.upsert_discovered(&payload, true, self.hub_time);
                }
                Command::Status => {
                    self.settle_pending(payload.src);
                    let actuations = match self.registry.apply_status(&payload, self.hub_time) {
                        Some(record) => trigger::evaluate(record),
                        None => continue,
                    };
                    for actuation in actuations {
                        self.actuate(actuation);
                    }
                }
                Command::Tick => {}
                other => debug!("Ignoring {:?} from {:#x}", other, payload.src),
            }
        }
    }

    fn discovery_answered_in_time(&self) -> bool {
        let sent = self
            .pending
            .get(&self.settings.broadcast_address)
            .and_then(|sent| sent.front());
        match (sent, self.hub_time) {
            (Some(&sent), Some(now)) if now.saturating_sub(sent) <= self.settings.liveness_window => {
                true
            }
            (Some(&sent), Some(now)) => {
                debug!("IAmHere arrived {}s after discovery, recording as absent", now - sent);
                false
            }
            _ => {
                debug!("IAmHere with no discovery in flight, recording as absent");
                false
            }
        }
    }

    fn actuate(&mut self, actuation: Actuation) {
        let Some(target) = self.registry.lookup_by_name(&actuation.target) else {
            debug!("No device named {} to set", actuation.target);
            return;
        };
        let (address, device_type) = (target.address, target.device_type);
        debug!("Setting {} ({:#x}) to {}", actuation.target, address, actuation.state);

        let command = self.request(
            address,
            device_type,
            Command::SetStatus,
            Some(CommandBody::SingleValue {
                value: actuation.state,
            }),
        );
        self.outbox.push(command);
    }

    fn request(
        &mut self,
        dst: u64,
        device_type: DeviceType,
        command: Command,
        body: Option<CommandBody>,
    ) -> Payload {
        let serial = self.serial;
        self.serial += 1;
        Payload {
            src: self.settings.address,
            dst,
            serial,
            device_type,
            command,
            body,
        }
    }
}

/// Decode a reply batch, logging and dropping packets whose payload is
/// malformed. Frame-level corruption is still an error.
fn decode_replies(bytes: &[u8]) -> Result<Vec<Payload>, ProtocolError> {
    let batch = frame::decode_batch(bytes)?;
    for (offset, err) in &batch.rejected {
        warn!("Skipping undecodable packet at byte {offset}: {err}");
    }
    Ok(batch.payloads)
}
