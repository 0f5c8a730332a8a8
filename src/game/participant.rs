//! Participant entity: one per connection

use rapier3d::prelude::*;
use std::f32::consts::FRAC_1_SQRT_2;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::util::time::normalize_elapsed;
use crate::ws::protocol::{PlayerState, Vec3};

use super::input::{InputPatch, InputState};
use super::physics::{PhysicsWorld, GRAVITY_Y, PARTICIPANT_RADIUS};

/// Movement tuning shared by both movement modes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementTuning {
    /// Top horizontal speed from input (m/s)
    pub move_speed: f32,
    /// Exponential approach rate toward the target velocity (1/s)
    pub acceleration: f32,
    /// Fraction of `acceleration` available while airborne
    pub air_control: f32,
    /// Horizontal speed clamp while grounded
    pub max_ground_speed: f32,
    /// Horizontal speed clamp while airborne
    pub max_air_speed: f32,
    /// Vertical speed applied on jump
    pub jump_speed: f32,
    /// Max gap between feet and ground that still counts as contact
    pub ground_tolerance: f32,
    /// Upward speed above which a ground hit is ignored (just jumped)
    pub max_grounded_rise: f32,
    /// Half-width of the playable square
    pub world_radius: f32,
    /// Lowest allowed height
    pub floor: f32,
    pub respawn_point: Vec3,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            acceleration: 10.0,
            air_control: 0.3,
            max_ground_speed: 6.0,
            max_air_speed: 8.0,
            jump_speed: 5.0,
            ground_tolerance: 0.1,
            max_grounded_rise: 0.5,
            world_radius: 50.0,
            floor: -10.0,
            respawn_point: Vec3::new(0.0, 1.0, 0.0),
        }
    }
}

/// Probe rays start this far above the feet so they never begin inside the ground
const GROUND_PROBE_LIFT: f32 = 0.05;

/// How a participant moves. Chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    /// Backed by a dynamic body in the physics world
    Physics(RigidBodyHandle),
    /// No solver: velocity integrated directly from input
    Kinematic,
    /// Destroyed; body (if any) already released
    Released,
}

#[derive(Debug, thiserror::Error)]
enum MotionError {
    #[error("rigid body missing from physics world")]
    BodyMissing,

    #[error("physics update panicked")]
    SolverPanic,
}

/// A connected participant
#[derive(Debug)]
pub struct Participant {
    id: Uuid,
    color: &'static str,
    position: Vector<Real>,
    velocity: Vector<Real>,
    grounded: bool,
    /// Resting height without a solver: the spawn height
    rest_height: Real,
    input: InputState,
    motion: Motion,
    tuning: MovementTuning,
}

impl Participant {
    pub fn new(
        id: Uuid,
        color: &'static str,
        spawn: Vec3,
        world: &mut PhysicsWorld,
        tuning: MovementTuning,
    ) -> Self {
        let motion = match world.add_body(spawn) {
            Some(handle) => Motion::Physics(handle),
            None => Motion::Kinematic,
        };

        Self {
            id,
            color,
            position: spawn.into(),
            velocity: Vector::zeros(),
            grounded: false,
            rest_height: spawn.y,
            input: InputState::default(),
            motion,
            tuning,
        }
    }

    #[cfg(test)]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[cfg(test)]
    pub fn input(&self) -> InputState {
        self.input
    }

    pub fn is_physics_backed(&self) -> bool {
        matches!(self.motion, Motion::Physics(_))
    }

    /// Overwrite the keys present in `patch`
    pub fn update_input(&mut self, patch: &InputPatch) {
        self.input.apply(patch);
    }

    /// Advance one tick. `elapsed` is seconds, or milliseconds if implausibly large.
    pub fn update(&mut self, world: &mut PhysicsWorld, elapsed: f32) {
        let dt = normalize_elapsed(elapsed);

        match self.motion {
            Motion::Physics(handle) => {
                let outcome = guarded(|| self.update_physics(world, handle, dt));
                if let Err(e) = outcome {
                    warn!(
                        participant = %self.id,
                        error = %e,
                        "Switching participant to kinematic movement"
                    );
                    world.remove_body(handle);
                    self.motion = Motion::Kinematic;
                    self.update_kinematic(dt);
                }
            }
            Motion::Kinematic => self.update_kinematic(dt),
            Motion::Released => {}
        }
    }

    fn update_physics(
        &mut self,
        world: &mut PhysicsWorld,
        handle: RigidBodyHandle,
        dt: f32,
    ) -> Result<(), MotionError> {
        let body = world.body(handle).ok_or(MotionError::BodyMissing)?;
        let position = *body.translation();
        let mut velocity = *body.linvel();

        // Ground check runs before any force so jump eligibility sees this tick's contact
        let probe = position - vector![0.0, PARTICIPANT_RADIUS - GROUND_PROBE_LIFT, 0.0];
        let hit = world.cast_down(
            probe,
            GROUND_PROBE_LIFT + self.tuning.ground_tolerance,
            handle,
        );
        self.grounded = hit.is_some() && velocity.y <= self.tuning.max_grounded_rise;

        let target = self.target_velocity();
        if self.grounded {
            approach_horizontal(&mut velocity, &target, self.tuning.acceleration, dt);
            clamp_horizontal(&mut velocity, self.tuning.max_ground_speed);
        } else {
            let rate = self.tuning.acceleration * self.tuning.air_control;
            approach_horizontal(&mut velocity, &target, rate, dt);
            clamp_horizontal(&mut velocity, self.tuning.max_air_speed);
        }

        if self.input.jump && self.grounded {
            velocity.y = self.tuning.jump_speed;
            self.grounded = false;
        }

        let body = world.body_mut(handle).ok_or(MotionError::BodyMissing)?;
        body.set_linvel(velocity, true);
        body.set_angvel(Vector::zeros(), true);

        if self.is_out_of_bounds(&position) || !is_finite(&velocity) {
            debug!(participant = %self.id, "Out of bounds, respawning");
            let respawn = self.tuning.respawn_point;
            self.teleport(world, respawn);
        } else {
            self.position = position;
            self.velocity = velocity;
        }

        Ok(())
    }

    fn update_kinematic(&mut self, dt: f32) {
        let target = self.target_velocity();
        approach_horizontal(&mut self.velocity, &target, self.tuning.acceleration, dt);

        let on_ground = self.position.y <= self.rest_height && self.velocity.y <= 0.0;
        if on_ground && self.input.jump {
            self.velocity.y = self.tuning.jump_speed;
        } else if on_ground {
            self.velocity.y = 0.0;
        } else {
            self.velocity.y += GRAVITY_Y * dt;
        }

        self.position += self.velocity * dt;

        let radius = self.tuning.world_radius;
        self.position.x = self.position.x.clamp(-radius, radius);
        self.position.z = self.position.z.clamp(-radius, radius);
        self.position.y = self.position.y.max(self.tuning.floor);

        // Landing: the spawn height stands in for the ground plane
        self.grounded = self.position.y <= self.rest_height;
        if self.grounded {
            self.position.y = self.rest_height.max(self.tuning.floor);
            self.velocity.y = self.velocity.y.max(0.0);
        }

        if !is_finite(&self.position) || !is_finite(&self.velocity) {
            warn!(participant = %self.id, "Non-finite kinematic state, respawning");
            self.position = self.tuning.respawn_point.into();
            self.velocity = Vector::zeros();
        }
    }

    /// Horizontal velocity requested by the held directions
    fn target_velocity(&self) -> Vector<Real> {
        let mut x: f32 = 0.0;
        let mut z: f32 = 0.0;
        if self.input.left {
            x -= 1.0;
        }
        if self.input.right {
            x += 1.0;
        }
        if self.input.forward {
            z -= 1.0;
        }
        if self.input.backward {
            z += 1.0;
        }

        let mut scale = self.tuning.move_speed;
        if x != 0.0 && z != 0.0 {
            scale *= FRAC_1_SQRT_2;
        }
        vector![x * scale, 0.0, z * scale]
    }

    fn is_out_of_bounds(&self, position: &Vector<Real>) -> bool {
        let radius = self.tuning.world_radius;
        // Written as negated containment so NaN counts as outside
        !(position.x.abs() <= radius
            && position.z.abs() <= radius
            && position.y >= self.tuning.floor)
    }

    /// Move to `position` at rest. Hard reset, used for respawn.
    pub fn teleport(&mut self, world: &mut PhysicsWorld, position: Vec3) {
        if let Motion::Physics(handle) = self.motion {
            if let Some(body) = world.body_mut(handle) {
                body.set_translation(position.into(), true);
                body.set_linvel(Vector::zeros(), true);
                body.set_angvel(Vector::zeros(), true);
            }
        }
        self.position = position.into();
        self.velocity = Vector::zeros();
    }

    /// Public snapshot; never exposes solver handles
    pub fn state(&self) -> PlayerState {
        PlayerState {
            id: self.id,
            position: self.position.into(),
            velocity: self.velocity.into(),
            color: self.color.to_string(),
            grounded: self.grounded,
        }
    }

    /// Release the body. Safe to call more than once.
    pub fn destroy(&mut self, world: &mut PhysicsWorld) {
        if let Motion::Physics(handle) = self.motion {
            world.remove_body(handle);
        }
        self.motion = Motion::Released;
    }
}

fn is_finite(v: &Vector<Real>) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Run one physics update, turning a solver panic into an error
fn guarded<F>(update: F) -> Result<(), MotionError>
where
    F: FnOnce() -> Result<(), MotionError>,
{
    panic::catch_unwind(AssertUnwindSafe(update)).unwrap_or(Err(MotionError::SolverPanic))
}

/// Exponential approach of the horizontal components, independent of tick jitter
fn approach_horizontal(velocity: &mut Vector<Real>, target: &Vector<Real>, rate: f32, dt: f32) {
    let blend = 1.0 - (-rate * dt).exp();
    velocity.x += (target.x - velocity.x) * blend;
    velocity.z += (target.z - velocity.z) * blend;
}

fn clamp_horizontal(velocity: &mut Vector<Real>, max_speed: f32) {
    let speed = (velocity.x * velocity.x + velocity.z * velocity.z).sqrt();
    if speed > max_speed {
        let scale = max_speed / speed;
        velocity.x *= scale;
        velocity.z *= scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn world(enabled: bool) -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        let _ = world.initialize(enabled);
        world
    }

    fn spawn(world: &mut PhysicsWorld, at: Vec3) -> Participant {
        Participant::new(Uuid::new_v4(), "#4ecdc4", at, world, MovementTuning::default())
    }

    fn tick(world: &mut PhysicsWorld, participant: &mut Participant) {
        world.step();
        participant.update(world, DT);
    }

    fn hold(participant: &mut Participant, patch: InputPatch) {
        participant.update_input(&patch);
    }

    fn forward() -> InputPatch {
        InputPatch {
            forward: Some(true),
            ..Default::default()
        }
    }

    /// A physics-backed participant resting on the ground
    fn settled() -> (PhysicsWorld, Participant) {
        let mut world = world(true);
        let mut participant = spawn(&mut world, Vec3::new(0.0, PARTICIPANT_RADIUS, 0.0));
        for _ in 0..10 {
            tick(&mut world, &mut participant);
        }
        assert!(participant.state().grounded, "participant should settle on the ground");
        (world, participant)
    }

    #[test]
    fn mode_follows_world_availability() {
        let mut enabled = world(true);
        let mut disabled = world(false);

        assert!(spawn(&mut enabled, Vec3::new(0.0, 1.0, 0.0)).is_physics_backed());
        assert!(!spawn(&mut disabled, Vec3::new(0.0, 1.0, 0.0)).is_physics_backed());
    }

    #[test]
    fn forward_moves_along_negative_z_with_physics() {
        let (mut world, mut participant) = settled();
        hold(&mut participant, forward());

        tick(&mut world, &mut participant);
        let mut last = participant.state().position;
        for _ in 0..30 {
            tick(&mut world, &mut participant);
            let pos = participant.state().position;
            assert!(pos.z < last.z, "z should strictly decrease: {} -> {}", last.z, pos.z);
            assert!(pos.x.abs() < 1e-4, "x should not drift: {}", pos.x);
            last = pos;
        }
    }

    #[test]
    fn forward_moves_along_negative_z_kinematic() {
        let mut world = world(false);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        hold(&mut participant, forward());

        let mut last = participant.state().position;
        for _ in 0..30 {
            participant.update(&mut world, DT);
            let pos = participant.state().position;
            assert!(pos.z < last.z);
            assert_eq!(pos.x, 0.0);
            last = pos;
        }
    }

    #[test]
    fn diagonal_speed_never_exceeds_single_axis_speed() {
        let diagonal = InputPatch {
            forward: Some(true),
            left: Some(true),
            ..Default::default()
        };
        let top = MovementTuning::default().move_speed;

        let (mut world, mut participant) = settled();
        hold(&mut participant, diagonal);
        let mut kin_world = self::world(false);
        let mut kinematic = spawn(&mut kin_world, Vec3::new(0.0, 1.0, 0.0));
        hold(&mut kinematic, diagonal);

        for _ in 0..120 {
            tick(&mut world, &mut participant);
            kinematic.update(&mut kin_world, DT);

            for state in [participant.state(), kinematic.state()] {
                let v = state.velocity;
                let speed = (v.x * v.x + v.z * v.z).sqrt();
                assert!(speed <= top + 1e-3, "speed {speed} exceeds {top}");
            }
        }

        let v = kinematic.state().velocity;
        assert!(v.x < 0.0 && v.z < 0.0);
    }

    #[test]
    fn jump_fires_once_while_held() {
        let (mut world, mut participant) = settled();
        let jump_speed = MovementTuning::default().jump_speed;
        hold(
            &mut participant,
            InputPatch {
                jump: Some(true),
                ..Default::default()
            },
        );

        let mut launches = 0;
        for _ in 0..30 {
            tick(&mut world, &mut participant);
            let state = participant.state();
            if state.velocity.y == jump_speed {
                launches += 1;
                assert!(!state.grounded);
            }
        }
        assert_eq!(launches, 1);
    }

    #[test]
    fn jump_is_ignored_while_airborne() {
        let mut world = world(true);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 5.0, 0.0));
        hold(
            &mut participant,
            InputPatch {
                jump: Some(true),
                ..Default::default()
            },
        );

        for _ in 0..5 {
            tick(&mut world, &mut participant);
            let state = participant.state();
            assert!(!state.grounded);
            assert!(state.velocity.y < 0.0, "should keep falling, vy = {}", state.velocity.y);
        }
    }

    #[test]
    fn kinematic_jump_rises_and_lands() {
        let mut world = world(false);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        let jump_speed = MovementTuning::default().jump_speed;
        hold(
            &mut participant,
            InputPatch {
                jump: Some(true),
                ..Default::default()
            },
        );

        participant.update(&mut world, DT);
        let state = participant.state();
        assert!(!state.grounded);
        assert_eq!(state.velocity.y, jump_speed);
        assert!(state.position.y > 1.0);

        // Airborne: jump held but no second launch
        for _ in 0..20 {
            participant.update(&mut world, DT);
            let state = participant.state();
            assert!(!state.grounded);
            assert!(state.velocity.y < jump_speed);
        }

        hold(
            &mut participant,
            InputPatch {
                jump: Some(false),
                ..Default::default()
            },
        );
        for _ in 0..120 {
            participant.update(&mut world, DT);
        }
        let state = participant.state();
        assert!(state.grounded);
        assert_eq!(state.position.y, 1.0);
        assert_eq!(state.velocity.y, 0.0);
    }

    #[test]
    fn non_finite_motion_recovers_in_both_modes() {
        let tuning = MovementTuning {
            move_speed: f32::NAN,
            ..Default::default()
        };

        for enabled in [true, false] {
            let mut world = world(enabled);
            let mut participant = Participant::new(
                Uuid::new_v4(),
                "#fd79a8",
                Vec3::new(0.0, 1.0, 0.0),
                &mut world,
                tuning,
            );
            hold(&mut participant, forward());

            for _ in 0..40 {
                tick(&mut world, &mut participant);
                let state = participant.state();
                for c in [state.position.x, state.position.y, state.position.z] {
                    assert!(c.is_finite(), "physics={enabled} position {:?}", state.position);
                }
            }
        }
    }

    #[test]
    fn nan_position_counts_as_out_of_bounds() {
        let mut world = world(false);
        let participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));

        assert!(participant.is_out_of_bounds(&vector![f32::NAN, 1.0, 0.0]));
        assert!(participant.is_out_of_bounds(&vector![0.0, f32::NAN, 0.0]));
        assert!(!participant.is_out_of_bounds(&vector![10.0, 1.0, -10.0]));
    }

    #[test]
    fn panicking_update_becomes_an_error() {
        let outcome = guarded(|| panic!("solver blew up"));
        assert!(matches!(outcome, Err(MotionError::SolverPanic)));
        assert!(guarded(|| Ok(())).is_ok());
    }

    #[test]
    fn out_of_bounds_respawns_with_physics() {
        let (mut world, mut participant) = settled();
        let respawn = MovementTuning::default().respawn_point;

        participant.teleport(&mut world, Vec3::new(60.0, PARTICIPANT_RADIUS, 0.0));
        tick(&mut world, &mut participant);

        let state = participant.state();
        assert_eq!(state.position, respawn);
        assert_eq!(state.velocity, Vec3::default());
    }

    #[test]
    fn falling_below_floor_respawns() {
        let (mut world, mut participant) = settled();
        let respawn = MovementTuning::default().respawn_point;

        participant.teleport(&mut world, Vec3::new(0.0, -20.0, 0.0));
        tick(&mut world, &mut participant);

        assert_eq!(participant.state().position, respawn);
    }

    #[test]
    fn out_of_bounds_clamps_without_physics() {
        let mut world = world(false);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        let radius = MovementTuning::default().world_radius;

        participant.teleport(&mut world, Vec3::new(80.0, 1.0, -75.0));
        participant.update(&mut world, DT);

        let pos = participant.state().position;
        assert_eq!(pos.x, radius);
        assert_eq!(pos.z, -radius);
        assert_eq!(pos.y, 1.0);
    }

    #[test]
    fn fallback_displacement_tracks_speed_times_time() {
        let mut world = world(false);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        let tuning = MovementTuning::default();
        hold(&mut participant, forward());

        let seconds = 2.0;
        let ticks = (seconds / DT).round() as usize;
        for _ in 0..ticks {
            participant.update(&mut world, DT);
        }

        let travelled = -participant.state().position.z;
        let expected = tuning.move_speed * seconds;
        let smoothing_lag = tuning.move_speed / tuning.acceleration;
        assert!(travelled < expected);
        assert!(
            expected - travelled <= smoothing_lag + 0.05,
            "travelled {travelled}, expected about {expected}"
        );
    }

    #[test]
    fn millisecond_elapsed_matches_seconds() {
        let mut world = world(false);
        let mut secs = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        let mut millis = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        hold(&mut secs, forward());
        hold(&mut millis, forward());

        for _ in 0..10 {
            secs.update(&mut world, 0.016);
            millis.update(&mut world, 16.0);
        }

        let a = secs.state().position.z;
        let b = millis.state().position.z;
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
    }

    #[test]
    fn partial_input_keeps_other_keys() {
        let mut world = world(false);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));

        hold(&mut participant, forward());
        hold(
            &mut participant,
            InputPatch {
                right: Some(true),
                ..Default::default()
            },
        );

        let input = participant.input();
        assert!(input.forward && input.right);
        assert!(!input.left && !input.backward && !input.jump);
    }

    #[test]
    fn destroy_releases_body_once() {
        let mut world = world(true);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(world.body_count(), 2);

        participant.destroy(&mut world);
        participant.destroy(&mut world);
        assert_eq!(world.body_count(), 1);
        assert!(!participant.is_physics_backed());
    }

    #[test]
    fn lost_body_degrades_to_kinematic() {
        let mut world = world(true);
        let mut participant = spawn(&mut world, Vec3::new(0.0, 1.0, 0.0));
        let Motion::Physics(handle) = participant.motion else {
            panic!("expected a physics-backed participant");
        };

        world.remove_body(handle);
        hold(&mut participant, forward());
        tick(&mut world, &mut participant);

        assert!(!participant.is_physics_backed());
        assert!(participant.state().position.z < 0.0);
    }
}
