//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Partial input record; validated by the input handler, not here
    PlayerInput {
        #[serde(default)]
        input: Value,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp, echoed back untouched
        #[serde(default)]
        timestamp: Value,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Full state sent to a connection right after it joins
    #[serde(rename_all = "camelCase")]
    GameState {
        your_id: Uuid,
        #[serde(flatten)]
        snapshot: GameSnapshot,
    },

    /// Per-tick state broadcast
    GameUpdate(GameSnapshot),

    /// Another participant joined
    PlayerJoined { player: PlayerState },

    /// A participant left
    PlayerLeft { id: Uuid },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        timestamp: Value,
    },
}

/// Plain 3-component vector as it appears on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<rapier3d::prelude::Vector<f32>> for Vec3 {
    fn from(v: rapier3d::prelude::Vector<f32>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for rapier3d::prelude::Vector<f32> {
    fn from(v: Vec3) -> Self {
        rapier3d::na::Vector3::new(v.x, v.y, v.z)
    }
}

/// Public state of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: Uuid,
    pub position: Vec3,
    pub velocity: Vec3,
    pub color: String,
    pub grounded: bool,
}

/// Immutable aggregate of all participants at one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub players: Vec<PlayerState>,
    /// Unix milliseconds, never decreasing across snapshots
    pub timestamp: u64,
    pub physics: PhysicsDebug,
}

/// Solver introspection for optional client-side visualization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicsDebug {
    pub enabled: bool,
    pub bodies: Vec<BodyDebug>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyDebug {
    pub id: u32,
    /// "dynamic", "fixed", "kinematic"
    pub kind: String,
    pub position: Vec3,
    /// Orientation quaternion as [x, y, z, w]
    pub quaternion: [f32; 4],
    pub shapes: Vec<ShapeDebug>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeDebug {
    /// Geometric type, e.g. "Ball", "HalfSpace"
    pub shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f32>,
    pub friction: f32,
    pub restitution: f32,
}
