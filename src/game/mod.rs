//! Game simulation modules

pub mod input;
pub mod manager;
pub mod participant;
pub mod physics;
pub mod snapshot;

pub use manager::{GameHandle, GameManager};
pub use participant::MovementTuning;
pub use physics::PhysicsWorld;
