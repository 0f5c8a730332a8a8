//! Game manager and authoritative tick loop

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{tick_interval, Timer, SIMULATION_TPS};
use crate::ws::protocol::{GameSnapshot, ServerMsg, Vec3};

use super::input::InputHandler;
use super::participant::{MovementTuning, Participant};
use super::physics::PhysicsWorld;
use super::snapshot::SnapshotBuilder;

/// Where new participants appear, before jitter
pub const SPAWN_BASE: Vec3 = Vec3::new(0.0, 1.0, 0.0);
/// Max horizontal offset from the spawn base
pub const SPAWN_JITTER: f32 = 5.0;

/// Participant colors, assigned at creation
pub const PALETTE: [&str; 8] = [
    "#ff6b6b", "#4ecdc4", "#45b7d1", "#f9ca24", "#6c5ce7", "#a29bfe", "#fd79a8", "#00b894",
];

/// Events delivered to the simulation loop. Everything that mutates game
/// state arrives here, so it is serialized with ticks.
#[derive(Debug)]
pub enum GameEvent {
    Connected {
        connection_id: Uuid,
        outbound: mpsc::Sender<ServerMsg>,
    },
    Input {
        connection_id: Uuid,
        input: Value,
    },
    Disconnected {
        connection_id: Uuid,
    },
    Diagnostics {
        reply: oneshot::Sender<Diagnostics>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Read-only view for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub participants: usize,
    pub tick_rate: u32,
    pub ticks: u64,
    pub physics_enabled: bool,
    pub physics_bodies: usize,
    pub input_connections: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("simulation loop is not running")]
    LoopClosed,
}

/// Cloneable handle to a running simulation loop
#[derive(Clone)]
pub struct GameHandle {
    events: mpsc::Sender<GameEvent>,
}

impl GameHandle {
    pub fn new(events: mpsc::Sender<GameEvent>) -> Self {
        Self { events }
    }

    async fn send(&self, event: GameEvent) -> Result<(), GameError> {
        self.events.send(event).await.map_err(|_| GameError::LoopClosed)
    }

    pub async fn connect(
        &self,
        connection_id: Uuid,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> Result<(), GameError> {
        self.send(GameEvent::Connected {
            connection_id,
            outbound,
        })
        .await
    }

    pub async fn input(&self, connection_id: Uuid, input: Value) -> Result<(), GameError> {
        self.send(GameEvent::Input {
            connection_id,
            input,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: Uuid) -> Result<(), GameError> {
        self.send(GameEvent::Disconnected { connection_id }).await
    }

    pub async fn diagnostics(&self) -> Result<Diagnostics, GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameEvent::Diagnostics { reply }).await?;
        rx.await.map_err(|_| GameError::LoopClosed)
    }

    /// Stop the loop and wait until every body has been released
    pub async fn shutdown(&self) -> Result<(), GameError> {
        let (done, rx) = oneshot::channel();
        self.send(GameEvent::Shutdown { done }).await?;
        rx.await.map_err(|_| GameError::LoopClosed)
    }
}

/// The authoritative simulation: participant registry, physics world and
/// input intake, all owned by one task.
pub struct GameManager {
    physics: PhysicsWorld,
    participants: BTreeMap<Uuid, Participant>,
    connections: HashMap<Uuid, mpsc::Sender<ServerMsg>>,
    input: InputHandler,
    snapshot_builder: SnapshotBuilder,
    tuning: MovementTuning,
    rng: ChaCha8Rng,
    running: bool,
    last_tick: Option<Instant>,
    tick: u64,
}

impl GameManager {
    pub fn new(
        physics: PhysicsWorld,
        tuning: MovementTuning,
        include_debug_bodies: bool,
        seed: u64,
    ) -> Self {
        Self {
            physics,
            participants: BTreeMap::new(),
            connections: HashMap::new(),
            input: InputHandler::new(),
            snapshot_builder: SnapshotBuilder::new(include_debug_bodies),
            tuning,
            rng: ChaCha8Rng::seed_from_u64(seed),
            running: false,
            last_tick: None,
            tick: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[cfg(test)]
    pub fn participant(&self, id: &Uuid) -> Option<&Participant> {
        self.participants.get(id)
    }

    #[cfg(test)]
    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    /// Begin ticking; elapsed time for the first tick is measured from `now`
    pub fn start(&mut self, now: Instant) {
        if self.running {
            warn!("Game loop already running");
            return;
        }
        self.running = true;
        self.last_tick = Some(now);
        info!(tick_rate = SIMULATION_TPS, "Game loop started");
    }

    /// Cancel future ticks
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!(ticks = self.tick, "Game loop stopped");
        }
    }

    /// Stop and destroy every participant, releasing their bodies
    pub fn shutdown(&mut self) {
        self.stop();
        let count = self.participants.len();
        for (id, mut participant) in std::mem::take(&mut self.participants) {
            participant.destroy(&mut self.physics);
            self.input.cleanup(&id);
        }
        self.connections.clear();
        info!(released = count, "Game manager shut down");
    }

    /// Create and register a participant near `spawn_base`
    pub fn add_participant(&mut self, id: Uuid, spawn_base: Vec3) -> &Participant {
        let spawn = Vec3::new(
            spawn_base.x + self.rng.gen_range(-SPAWN_JITTER..=SPAWN_JITTER),
            spawn_base.y,
            spawn_base.z + self.rng.gen_range(-SPAWN_JITTER..=SPAWN_JITTER),
        );
        let color = PALETTE[self.rng.gen_range(0..PALETTE.len())];

        if let Some(mut previous) = self.participants.remove(&id) {
            warn!(participant = %id, "Replacing existing participant");
            previous.destroy(&mut self.physics);
        }

        let participant = Participant::new(id, color, spawn, &mut self.physics, self.tuning);
        info!(
            participant = %id,
            physics = participant.is_physics_backed(),
            "Participant added"
        );
        self.participants.entry(id).or_insert(participant)
    }

    /// Destroy and unregister; unknown ids are ignored. Returns whether one was removed.
    pub fn remove_participant(&mut self, id: &Uuid) -> bool {
        match self.participants.remove(id) {
            Some(mut participant) => {
                participant.destroy(&mut self.physics);
                info!(participant = %id, "Participant removed");
                true
            }
            None => false,
        }
    }

    /// Route raw input through validation and rate limiting
    pub fn handle_input(&mut self, id: Uuid, raw: &Value) -> bool {
        match self.participants.get_mut(&id) {
            Some(participant) => self.input.process(id, raw, participant),
            None => {
                debug!(connection_id = %id, "Input for unknown participant");
                false
            }
        }
    }

    /// One simulation tick. Returns the broadcast snapshot, if any.
    pub fn tick(&mut self, now: Instant) -> Option<GameSnapshot> {
        if !self.is_running() {
            return None;
        }

        let previous = self.last_tick.replace(now).unwrap_or(now);
        let elapsed = now.saturating_duration_since(previous).as_secs_f32();
        self.tick += 1;

        self.physics.step();
        for participant in self.participants.values_mut() {
            participant.update(&mut self.physics, elapsed);
        }

        if self.participants.is_empty() {
            return None;
        }

        let snapshot = self.snapshot();
        self.broadcast(ServerMsg::GameUpdate(snapshot.clone()), None);
        Some(snapshot)
    }

    pub fn snapshot(&mut self) -> GameSnapshot {
        self.snapshot_builder
            .build(self.participants.values(), &self.physics)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            participants: self.participant_count(),
            tick_rate: SIMULATION_TPS,
            ticks: self.tick,
            physics_enabled: self.physics.is_enabled(),
            physics_bodies: self.physics.body_count(),
            input_connections: self.input.tracked_connections(),
        }
    }

    /// Apply one inbound event
    pub fn handle_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::Connected {
                connection_id,
                outbound,
            } => self.handle_connect(connection_id, outbound),
            GameEvent::Input {
                connection_id,
                input,
            } => {
                self.handle_input(connection_id, &input);
            }
            GameEvent::Disconnected { connection_id } => self.handle_disconnect(connection_id),
            GameEvent::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics());
            }
            GameEvent::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn handle_connect(&mut self, connection_id: Uuid, outbound: mpsc::Sender<ServerMsg>) {
        let player = self.add_participant(connection_id, SPAWN_BASE).state();
        self.connections.insert(connection_id, outbound);

        let snapshot = self.snapshot();
        self.send_to(
            connection_id,
            ServerMsg::GameState {
                your_id: connection_id,
                snapshot,
            },
        );
        self.broadcast(ServerMsg::PlayerJoined { player }, Some(connection_id));
    }

    fn handle_disconnect(&mut self, connection_id: Uuid) {
        self.input.cleanup(&connection_id);
        self.connections.remove(&connection_id);
        if self.remove_participant(&connection_id) {
            self.broadcast(ServerMsg::PlayerLeft { id: connection_id }, None);
        }
    }

    fn send_to(&self, connection_id: Uuid, msg: ServerMsg) {
        if let Some(outbound) = self.connections.get(&connection_id) {
            if let Err(e) = outbound.try_send(msg) {
                warn!(connection_id = %connection_id, error = %e, "Dropping message for slow client");
            }
        }
    }

    fn broadcast(&self, msg: ServerMsg, except: Option<Uuid>) {
        for (id, outbound) in &self.connections {
            if Some(*id) == except {
                continue;
            }
            if let Err(e) = outbound.try_send(msg.clone()) {
                warn!(connection_id = %id, error = %e, "Dropping message for slow client");
            }
        }
    }

    /// Drive ticks and events on one task until shutdown
    pub async fn run(mut self, mut events: mpsc::Receiver<GameEvent>) {
        let period = tick_interval();
        let mut ticker = interval(period);
        // An overrunning tick delays the next one; it is never skipped
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start(Instant::now());

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(GameEvent::Shutdown { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(event) => self.handle_event(event),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                now = ticker.tick() => {
                    let timer = Timer::new();
                    self.tick(now);
                    if timer.elapsed() > period {
                        warn!(
                            tick = self.tick,
                            elapsed_micros = timer.elapsed_micros(),
                            "Tick overran its interval"
                        );
                    }
                }
            }
        }

        info!("Game loop exited");
    }
}
