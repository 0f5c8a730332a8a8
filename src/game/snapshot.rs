//! Snapshot building

use crate::util::time::unix_millis;
use crate::ws::protocol::{GameSnapshot, PhysicsDebug};

use super::participant::Participant;
use super::physics::PhysicsWorld;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Include per-body solver descriptors
    include_bodies: bool,
    /// Timestamp of the previous snapshot; wall clock may step backwards
    last_timestamp: u64,
}

impl SnapshotBuilder {
    pub fn new(include_bodies: bool) -> Self {
        Self {
            include_bodies,
            last_timestamp: 0,
        }
    }

    /// Build a snapshot from fully-updated participants
    pub fn build<'a>(
        &mut self,
        participants: impl IntoIterator<Item = &'a Participant>,
        physics: &PhysicsWorld,
    ) -> GameSnapshot {
        self.build_at(unix_millis(), participants, physics)
    }

    fn build_at<'a>(
        &mut self,
        now_ms: u64,
        participants: impl IntoIterator<Item = &'a Participant>,
        physics: &PhysicsWorld,
    ) -> GameSnapshot {
        self.last_timestamp = self.last_timestamp.max(now_ms);

        let bodies = if self.include_bodies {
            physics.debug_snapshot()
        } else {
            Vec::new()
        };

        GameSnapshot {
            players: participants.into_iter().map(Participant::state).collect(),
            timestamp: self.last_timestamp,
            physics: PhysicsDebug {
                enabled: physics.is_enabled(),
                bodies,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::participant::MovementTuning;
    use crate::ws::protocol::Vec3;
    use uuid::Uuid;

    fn world(enabled: bool) -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        let _ = world.initialize(enabled);
        world
    }

    #[test]
    fn timestamps_never_decrease() {
        let physics = world(false);
        let mut builder = SnapshotBuilder::new(true);

        let first = builder.build_at(1_000, std::iter::empty(), &physics);
        let second = builder.build_at(900, std::iter::empty(), &physics);
        let third = builder.build_at(1_200, std::iter::empty(), &physics);

        assert_eq!(first.timestamp, 1_000);
        assert_eq!(second.timestamp, 1_000);
        assert_eq!(third.timestamp, 1_200);
    }

    #[test]
    fn includes_every_participant_and_bodies() {
        let mut physics = world(true);
        let participants: Vec<Participant> = (0..3)
            .map(|i| {
                Participant::new(
                    Uuid::new_v4(),
                    "#45b7d1",
                    Vec3::new(i as f32, 1.0, 0.0),
                    &mut physics,
                    MovementTuning::default(),
                )
            })
            .collect();

        let snapshot = SnapshotBuilder::new(true).build(&participants, &physics);
        assert_eq!(snapshot.players.len(), 3);
        assert!(snapshot.physics.enabled);
        // Ground plus one body each
        assert_eq!(snapshot.physics.bodies.len(), 4);
    }

    #[test]
    fn body_descriptors_can_be_left_out() {
        let physics = world(true);
        let snapshot = SnapshotBuilder::new(false).build(std::iter::empty(), &physics);
        assert!(snapshot.physics.enabled);
        assert!(snapshot.physics.bodies.is_empty());
    }
}
