//! Per-server supervisor: one task owning the console session, presence
//! tracker, zone registry, and delay timers for a single game server.
//!
//! Everything that mutates a zone (presence transitions, front-end
//! requests, both sweepers) runs on this task, which is what serializes
//! per-zone command batches without any locking. Servers never share
//! state except the store.

use crate::aggregator::{evaluate, DelayFired, DelayTimers, Transition};
use crate::config::{EngineTuning, ServerConfig};
use crate::dispatcher::ZoneCommander;
use crate::error::{TransportError, ZoneError};
use crate::presence::PresenceTracker;
use crate::registry::{zone_from_defaults, Position, Zone, ZoneDefaults, ZoneRegistry, ZoneState};
use crate::store::ZoneStore;
use crate::sweep::{self, ReviewFlag};
use crate::transport::{ConnectionState, RconSession, SessionEvent};
use crate::util::now_ms;
use log::{debug, error, info, warn};
use protocol::events::{parse_line, ConsoleEvent};
use protocol::PlayerRef;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Front-end and lifecycle requests served by the supervisor task.
#[derive(Debug)]
pub enum EngineRequest {
    CreateZone {
        owner: PlayerRef,
        position: Position,
        reply: oneshot::Sender<Result<Zone, ZoneError>>,
    },
    DeleteZone {
        owner_id: String,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    ListZones {
        reply: oneshot::Sender<Vec<Zone>>,
    },
    ReviewFlags {
        reply: oneshot::Sender<Vec<ReviewFlag>>,
    },
    Status {
        reply: oneshot::Sender<ServerStatus>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub server_id: String,
    pub connection: ConnectionState,
    pub degraded: bool,
    pub zones: usize,
    pub players_online: usize,
    pub unrecognized_lines: u64,
    pub review_flags: usize,
}

/// Front door to one supervisor task. Once the task is gone every call
/// resolves to `Cancelled` (or an empty default).
pub struct SupervisorHandle {
    server_id: String,
    tx: mpsc::UnboundedSender<EngineRequest>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub async fn create_zone(&self, owner: PlayerRef, position: Position) -> Result<Zone, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CreateZone {
                owner,
                position,
                reply,
            })
            .map_err(|_| ZoneError::Transport(TransportError::Cancelled))?;
        rx.await
            .map_err(|_| ZoneError::Transport(TransportError::Cancelled))?
    }

    pub async fn delete_zone(&self, owner_id: &str) -> Result<(), ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DeleteZone {
                owner_id: owner_id.to_string(),
                reply,
            })
            .map_err(|_| ZoneError::Transport(TransportError::Cancelled))?;
        rx.await
            .map_err(|_| ZoneError::Transport(TransportError::Cancelled))?
    }

    pub async fn list_zones(&self) -> Vec<Zone> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineRequest::ListZones { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn review_flags(&self) -> Vec<ReviewFlag> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineRequest::ReviewFlags { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn status(&self) -> Option<ServerStatus> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineRequest::Status { reply }).is_err() {
            return None;
        }
        rx.await.ok()
    }

    /// Graceful teardown: timers stop, the session closes, pending
    /// requesters see `Cancelled`.
    pub async fn shutdown(self) {
        let _ = self.tx.send(EngineRequest::Shutdown);
        let _ = self.join.await;
    }
}

/// Consecutive-failure bookkeeping behind the degraded cadence.
#[derive(Debug)]
struct FailureGauge {
    threshold: u32,
    consecutive: u32,
    degraded: bool,
}

impl FailureGauge {
    fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
            degraded: false,
        }
    }

    /// Returns true when this success ends a degraded stretch.
    fn note_ok(&mut self) -> bool {
        self.consecutive = 0;
        std::mem::take(&mut self.degraded)
    }

    /// Returns true when this failure crosses the threshold.
    fn note_failure(&mut self) -> bool {
        self.consecutive += 1;
        if !self.degraded && self.consecutive >= self.threshold {
            self.degraded = true;
            return true;
        }
        false
    }

    fn degraded(&self) -> bool {
        self.degraded
    }
}

pub struct ServerSupervisor {
    config: ServerConfig,
    tuning: EngineTuning,
    session: Arc<RconSession>,
    commander: ZoneCommander,
    tracker: PresenceTracker,
    registry: ZoneRegistry,
    timers: DelayTimers,
    store: Arc<dyn ZoneStore>,
    defaults: ZoneDefaults,
    flags: Vec<ReviewFlag>,
    unrecognized_lines: u64,
    gauge: FailureGauge,
}

impl ServerSupervisor {
    /// Starts the supervisor task for one server and returns its handle.
    pub fn spawn(
        config: ServerConfig,
        tuning: EngineTuning,
        store: Arc<dyn ZoneStore>,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let server_id = config.id.clone();
        let join = tokio::spawn(run(config, tuning, store, rx));
        SupervisorHandle {
            server_id,
            tx,
            join,
        }
    }

    async fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::CreateZone {
                owner,
                position,
                reply,
            } => {
                let _ = reply.send(self.handle_create(owner, position).await);
            }
            EngineRequest::DeleteZone { owner_id, reply } => {
                let _ = reply.send(self.handle_delete(&owner_id).await);
            }
            EngineRequest::ListZones { reply } => {
                let _ = reply.send(self.registry.iter().cloned().collect());
            }
            EngineRequest::ReviewFlags { reply } => {
                let _ = reply.send(self.flags.clone());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // consumed by the run loop before it gets here
            EngineRequest::Shutdown => {}
        }
    }

    async fn handle_create(
        &mut self,
        owner: PlayerRef,
        position: Position,
    ) -> Result<Zone, ZoneError> {
        if !self.defaults.enabled {
            return Err(ZoneError::ServerDisabled);
        }
        let now = now_ms();
        if self.registry.find_by_owner(&owner.id, now).is_some() {
            return Err(ZoneError::DuplicateZone);
        }

        let (members, team_id) = self.commander.team_members(&owner).await;
        // the requester is by definition connected right now
        self.tracker.mark_online(&owner);
        let zone = zone_from_defaults(
            &self.config.id,
            owner,
            members,
            team_id,
            position,
            &self.defaults,
        );
        self.store.upsert_zone(&zone)?;
        self.registry.insert(zone.clone());

        match self.commander.create_zone(&zone).await {
            Ok(()) => {
                self.note_ok();
                info!(
                    "[{}] created zone {} for {}",
                    self.config.id, zone.id, zone.owner.name
                );
            }
            Err(e) => {
                self.note_failure();
                warn!(
                    "[{}] create for {} outcome unknown, deferred to reconciliation: {}",
                    self.config.id, zone.id, e
                );
            }
        }
        Ok(zone)
    }

    async fn handle_delete(&mut self, owner_id: &str) -> Result<(), ZoneError> {
        let zone_id = match self.registry.find_by_owner_any(owner_id) {
            Some(zone) => zone.id.clone(),
            None => return Err(ZoneError::NotFound),
        };

        // Live object first: losing this delete keeps the record so the
        // owner can retry, instead of reconciliation re-adopting a zombie.
        match self.commander.delete_zone(&zone_id).await {
            Ok(_) => self.note_ok(),
            Err(e) => {
                self.note_failure();
                warn!("[{}] delete for {} failed: {}", self.config.id, zone_id, e);
                return Err(e.into());
            }
        }

        self.timers.cancel(&zone_id);
        self.registry.remove(&zone_id);
        self.store.delete_zone(&zone_id)?;
        info!("[{}] deleted zone {}", self.config.id, zone_id);
        Ok(())
    }

    fn status(&self) -> ServerStatus {
        ServerStatus {
            server_id: self.config.id.clone(),
            connection: self.session.state(),
            degraded: self.gauge.degraded(),
            zones: self.registry.len(),
            players_online: self.tracker.online_count(),
            unrecognized_lines: self.unrecognized_lines,
            review_flags: self.flags.len(),
        }
    }

    /// Applies a drained batch of session events, collapsing all presence
    /// flips into one evaluation pass so member churn within a tick can't
    /// flap a zone.
    async fn handle_session_events(&mut self, batch: Vec<SessionEvent>) {
        let mut presence_changed = false;
        let mut reconnected = false;

        for event in batch {
            match event {
                SessionEvent::Connected => reconnected = true,
                SessionEvent::Disconnected => {
                    warn!("[{}] console session dropped", self.config.id);
                }
                SessionEvent::Console { line } => match parse_line(&line) {
                    ConsoleEvent::Joined { player } => {
                        if self.tracker.mark_online(&player) {
                            debug!("[{}] {} is online", self.config.id, player.name);
                            presence_changed = true;
                        }
                    }
                    ConsoleEvent::Left { name } => {
                        if let Some(id) = self.tracker.mark_offline(&name) {
                            debug!("[{}] {} ({}) went offline", self.config.id, name, id);
                            presence_changed = true;
                        }
                    }
                    // killfeed belongs to another module; presence only
                    ConsoleEvent::Kill { .. } => {}
                    ConsoleEvent::Unrecognized => self.unrecognized_lines += 1,
                },
            }
        }

        if reconnected {
            info!("[{}] session established, resyncing", self.config.id);
            self.poll_roster().await;
            self.reconcile().await;
            self.expire_pass().await;
        } else if presence_changed {
            self.evaluate_zones().await;
        }
    }

    async fn evaluate_zones(&mut self) {
        let now = now_ms();
        for zone_id in self.registry.ids() {
            self.evaluate_zone(&zone_id, false, now).await;
        }
    }

    async fn evaluate_zone(&mut self, zone_id: &str, deadline_elapsed: bool, now: u64) {
        let (state, members, expired, delay_ms) = match self.registry.get(zone_id) {
            Some(zone) => (
                zone.state,
                zone.members.clone(),
                zone.is_expired(now),
                zone.delay_seconds.saturating_mul(1000),
            ),
            None => return,
        };
        // past its lifetime: no further commands, the expiration sweeper
        // deletes it
        if expired {
            return;
        }

        let any_online = self.tracker.any_online(&members);
        let (new_state, deadline) = match evaluate(state, any_online, deadline_elapsed) {
            Transition::None => return,
            Transition::EnterDelay => {
                let deadline = now + delay_ms;
                self.timers.arm(zone_id, deadline, now);
                (ZoneState::Delay, Some(deadline))
            }
            Transition::CancelDelay => {
                self.timers.cancel(zone_id);
                (ZoneState::Online, None)
            }
            Transition::GoOffline => (ZoneState::Offline, None),
            Transition::GoOnline => (ZoneState::Online, None),
        };

        let snapshot = match self.registry.get_mut(zone_id) {
            Some(zone) => {
                zone.state = new_state;
                zone.pending_delay_deadline_ms = deadline;
                zone.clone()
            }
            None => return,
        };
        info!(
            "[{}] zone {} -> {:?}",
            self.config.id, zone_id, new_state
        );
        if let Err(e) = self.store.upsert_zone(&snapshot) {
            warn!(
                "[{}] store upsert for {} failed: {}",
                self.config.id, zone_id, e
            );
        }
        match self.commander.apply_color(&snapshot).await {
            Ok(_) => self.note_ok(),
            Err(e) => {
                self.note_failure();
                warn!(
                    "[{}] color for {} deferred to reconciliation: {}",
                    self.config.id, zone_id, e
                );
            }
        }
    }

    async fn handle_delay_fired(&mut self, fired: DelayFired) {
        if !self.timers.acknowledge(&fired.zone_id, fired.deadline_ms) {
            return;
        }
        // the registry must agree this deadline is still the armed one
        let armed = self
            .registry
            .get(&fired.zone_id)
            .and_then(|zone| zone.pending_delay_deadline_ms);
        if armed != Some(fired.deadline_ms) {
            return;
        }
        self.evaluate_zone(&fired.zone_id, true, now_ms()).await;
    }

    async fn poll_roster(&mut self) {
        if self.session.state() != ConnectionState::Connected {
            return;
        }
        match self.commander.roster().await {
            Ok(roster) => {
                self.note_ok();
                let diff = self.tracker.replace_roster(&roster);
                if !diff.is_empty() {
                    debug!(
                        "[{}] roster poll: +{} -{}",
                        self.config.id,
                        diff.went_online.len(),
                        diff.went_offline.len()
                    );
                    self.evaluate_zones().await;
                }
            }
            Err(e) => {
                self.note_failure();
                warn!("[{}] roster poll failed: {}", self.config.id, e);
            }
        }
    }

    async fn reconcile(&mut self) {
        if self.session.state() != ConnectionState::Connected {
            debug!("[{}] reconcile skipped while disconnected", self.config.id);
            return;
        }
        let result = sweep::run_reconcile(
            &self.config.id,
            &self.commander,
            &mut self.registry,
            self.store.as_ref(),
            &self.defaults,
            &mut self.timers,
            &mut self.flags,
            now_ms(),
        )
        .await;
        match result {
            Ok(stats) => {
                self.note_ok();
                if !stats.is_noop() {
                    info!("[{}] reconcile repaired drift: {:?}", self.config.id, stats);
                }
                // adopted or repaired zones get evaluated against the
                // current presence snapshot right away
                self.evaluate_zones().await;
            }
            Err(e) => {
                self.note_failure();
                warn!("[{}] reconcile failed: {}", self.config.id, e);
            }
        }
    }

    async fn expire_pass(&mut self) {
        if self.session.state() != ConnectionState::Connected {
            return;
        }
        let removed = sweep::run_expiration(
            &self.config.id,
            &self.commander,
            &mut self.registry,
            self.store.as_ref(),
            &mut self.timers,
            now_ms(),
        )
        .await;
        if removed > 0 {
            info!("[{}] expired {} zones", self.config.id, removed);
        }
    }

    /// Re-arms delay timers for hydrated zones that were mid-delay when
    /// the engine last stopped. Deadlines already in the past fire
    /// immediately and resolve through the normal evaluation path.
    fn rearm_pending_timers(&mut self) {
        let now = now_ms();
        for zone_id in self.registry.ids() {
            let pending = match self.registry.get(&zone_id) {
                Some(zone) if zone.state == ZoneState::Delay => zone.pending_delay_deadline_ms,
                _ => continue,
            };
            let deadline = match pending {
                Some(deadline) => deadline,
                None => {
                    // inconsistent record: Delay with no deadline
                    if let Some(zone) = self.registry.get_mut(&zone_id) {
                        zone.pending_delay_deadline_ms = Some(now);
                    }
                    now
                }
            };
            self.timers.arm(&zone_id, deadline, now);
        }
    }

    fn note_ok(&mut self) {
        if self.gauge.note_ok() {
            info!("[{}] recovered, resuming normal cadence", self.config.id);
        }
    }

    fn note_failure(&mut self) {
        if self.gauge.note_failure() {
            warn!(
                "[{}] degraded after repeated transport failures, backing off",
                self.config.id
            );
        }
    }

    fn reconcile_period(&self) -> Duration {
        let base = Duration::from_secs(self.tuning.reconcile_secs);
        if self.gauge.degraded() {
            base * self.tuning.degraded_factor
        } else {
            base
        }
    }

    async fn teardown(&mut self) {
        info!("[{}] shutting down", self.config.id);
        self.timers.clear();
        self.session.close().await;
    }
}

async fn run(
    config: ServerConfig,
    tuning: EngineTuning,
    store: Arc<dyn ZoneStore>,
    mut requests: mpsc::UnboundedReceiver<EngineRequest>,
) {
    let (session_tx, mut session_rx) = mpsc::unbounded_channel();
    let session = Arc::new(RconSession::spawn(config.clone(), &tuning, session_tx));
    let commander = ZoneCommander::new(Arc::clone(&session));
    let (timers, mut timer_rx) = DelayTimers::new();

    let defaults = match store.zone_defaults(&config.id) {
        Ok(defaults) => defaults,
        Err(e) => {
            warn!(
                "[{}] defaults unavailable, using built-ins: {}",
                config.id, e
            );
            ZoneDefaults::default()
        }
    };

    let mut registry = ZoneRegistry::new();
    match store.zones_for_server(&config.id) {
        Ok(zones) => {
            info!("[{}] hydrated {} zone records", config.id, zones.len());
            registry.hydrate(zones);
        }
        Err(e) => error!("[{}] store hydration failed: {}", config.id, e),
    }

    let gauge = FailureGauge::new(tuning.degraded_after_failures);
    let mut supervisor = ServerSupervisor {
        config,
        tuning,
        session,
        commander,
        tracker: PresenceTracker::new(),
        registry,
        timers,
        store,
        defaults,
        flags: Vec::new(),
        unrecognized_lines: 0,
        gauge,
    };
    supervisor.rearm_pending_timers();

    let mut roster_interval = interval(Duration::from_secs(supervisor.tuning.roster_poll_secs));
    roster_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut expire_interval = interval(Duration::from_secs(supervisor.tuning.expire_sweep_secs));
    expire_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the first ticks since they fire immediately
    roster_interval.tick().await;
    expire_interval.tick().await;
    let mut next_reconcile = Instant::now() + supervisor.reconcile_period();

    loop {
        tokio::select! {
            request = requests.recv() => {
                match request {
                    Some(EngineRequest::Shutdown) | None => break,
                    Some(request) => supervisor.handle_request(request).await,
                }
            }
            event = session_rx.recv() => {
                if let Some(event) = event {
                    let mut batch = vec![event];
                    while let Ok(more) = session_rx.try_recv() {
                        batch.push(more);
                    }
                    supervisor.handle_session_events(batch).await;
                }
            }
            fired = timer_rx.recv() => {
                if let Some(fired) = fired {
                    supervisor.handle_delay_fired(fired).await;
                }
            }
            _ = roster_interval.tick() => supervisor.poll_roster().await,
            _ = tokio::time::sleep_until(next_reconcile) => {
                supervisor.reconcile().await;
                next_reconcile = Instant::now() + supervisor.reconcile_period();
            }
            _ = expire_interval.tick() => supervisor.expire_pass().await,
        }
    }

    supervisor.teardown().await;
}
