//! Rigid-body world shared by every participant

use std::panic::{self, AssertUnwindSafe};

use rapier3d::prelude::*;
use tracing::{info, warn};

use crate::util::time::tick_delta;
use crate::ws::protocol::{BodyDebug, ShapeDebug, Vec3};

/// Downward acceleration (m/s²)
pub const GRAVITY_Y: Real = -9.82;
/// Height of the ground plane
pub const GROUND_HEIGHT: Real = 0.0;
pub const GROUND_FRICTION: Real = 0.3;
pub const GROUND_RESTITUTION: Real = 0.0;

/// Participant collision sphere
pub const PARTICIPANT_RADIUS: Real = 0.5;
pub const PARTICIPANT_FRICTION: Real = 0.0;
pub const PARTICIPANT_RESTITUTION: Real = 0.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhysicsError {
    #[error("physics disabled by configuration")]
    DisabledByConfig,

    #[error("rigid-body solver failed to initialize: {0}")]
    SolverInit(String),

    #[error("physics world already initialized")]
    AlreadyInitialized,
}

/// All rapier state needed to advance the simulation
struct Solver {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl Solver {
    fn build() -> Self {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let ground = bodies.insert(
            RigidBodyBuilder::fixed()
                .translation(vector![0.0, GROUND_HEIGHT, 0.0])
                .build(),
        );
        colliders.insert_with_parent(
            ColliderBuilder::halfspace(Vector::y_axis())
                .friction(GROUND_FRICTION)
                .restitution(GROUND_RESTITUTION)
                .build(),
            ground,
            &mut bodies,
        );

        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = tick_delta();

        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        Self {
            gravity: vector![0.0, GRAVITY_Y, 0.0],
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline,
        }
    }

    fn step(&mut self) {
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }
}

enum SolverState {
    Uninitialized,
    Enabled(Box<Solver>),
    Disabled,
}

/// Owner of the rigid-body solver, or of its absence.
///
/// Every consumer branches on [`is_enabled`](Self::is_enabled); once the
/// world is disabled it stays disabled for the life of the process.
pub struct PhysicsWorld {
    state: SolverState,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self {
            state: SolverState::Uninitialized,
        }
    }

    /// Build the solver. One attempt only: failure leaves the world disabled.
    pub fn initialize(&mut self, requested: bool) -> Result<(), PhysicsError> {
        if !matches!(self.state, SolverState::Uninitialized) {
            return Err(PhysicsError::AlreadyInitialized);
        }

        if !requested {
            self.state = SolverState::Disabled;
            info!("Physics disabled by configuration, using kinematic movement");
            return Err(PhysicsError::DisabledByConfig);
        }

        match panic::catch_unwind(AssertUnwindSafe(Solver::build)) {
            Ok(solver) => {
                self.state = SolverState::Enabled(Box::new(solver));
                info!(gravity = GRAVITY_Y, "Physics world initialized");
                Ok(())
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.state = SolverState::Disabled;
                warn!(error = %reason, "Physics unavailable, falling back to kinematic movement");
                Err(PhysicsError::SolverInit(reason))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, SolverState::Enabled(_))
    }

    fn solver(&self) -> Option<&Solver> {
        match &self.state {
            SolverState::Enabled(solver) => Some(&**solver),
            _ => None,
        }
    }

    fn solver_mut(&mut self) -> Option<&mut Solver> {
        match &mut self.state {
            SolverState::Enabled(solver) => Some(&mut **solver),
            _ => None,
        }
    }

    /// Advance one fixed increment
    pub fn step(&mut self) {
        if let Some(solver) = self.solver_mut() {
            solver.step();
        }
    }

    /// Register a participant body at `position`; `None` when disabled
    pub fn add_body(&mut self, position: Vec3) -> Option<RigidBodyHandle> {
        let solver = self.solver_mut()?;

        let body = RigidBodyBuilder::dynamic()
            .translation(position.into())
            .lock_rotations()
            .can_sleep(false)
            .build();
        let handle = solver.bodies.insert(body);

        let collider = ColliderBuilder::ball(PARTICIPANT_RADIUS)
            .friction(PARTICIPANT_FRICTION)
            .friction_combine_rule(CoefficientCombineRule::Min)
            .restitution(PARTICIPANT_RESTITUTION)
            .build();
        solver
            .colliders
            .insert_with_parent(collider, handle, &mut solver.bodies);

        Some(handle)
    }

    /// Unregister a body. Returns whether anything was removed.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        let Some(solver) = self.solver_mut() else {
            return false;
        };

        solver
            .bodies
            .remove(
                handle,
                &mut solver.island_manager,
                &mut solver.colliders,
                &mut solver.impulse_joints,
                &mut solver.multibody_joints,
                true,
            )
            .is_some()
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.solver()?.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.solver_mut()?.bodies.get_mut(handle)
    }

    /// Registered bodies, ground included
    pub fn body_count(&self) -> usize {
        self.solver().map(|s| s.bodies.len()).unwrap_or(0)
    }

    /// Cast a ray straight down, ignoring `exclude`. Returns the hit distance.
    pub fn cast_down(
        &self,
        origin: Vector<Real>,
        max_distance: Real,
        exclude: RigidBodyHandle,
    ) -> Option<Real> {
        let solver = self.solver()?;
        let ray = Ray::new(Point::from(origin), vector![0.0, -1.0, 0.0]);
        let filter = QueryFilter::default().exclude_rigid_body(exclude);

        solver
            .query_pipeline
            .cast_ray(
                &solver.bodies,
                &solver.colliders,
                &ray,
                max_distance,
                true,
                filter,
            )
            .map(|(_, distance)| distance)
    }

    /// Every body with its shapes; empty when disabled
    pub fn debug_snapshot(&self) -> Vec<BodyDebug> {
        let Some(solver) = self.solver() else {
            return Vec::new();
        };

        solver
            .bodies
            .iter()
            .map(|(handle, body)| {
                let rotation = body.rotation();
                let shapes = body
                    .colliders()
                    .iter()
                    .filter_map(|h| solver.colliders.get(*h))
                    .map(|collider| ShapeDebug {
                        shape: format!("{:?}", collider.shape().shape_type()),
                        radius: collider.shape().as_ball().map(|ball| ball.radius),
                        friction: collider.friction(),
                        restitution: collider.restitution(),
                    })
                    .collect();

                BodyDebug {
                    id: handle.into_raw_parts().0,
                    kind: body_kind(body).to_string(),
                    position: Vec3::from(*body.translation()),
                    quaternion: [rotation.i, rotation.j, rotation.k, rotation.w],
                    shapes,
                }
            })
            .collect()
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn body_kind(body: &RigidBody) -> &'static str {
    if body.is_dynamic() {
        "dynamic"
    } else if body.is_fixed() {
        "fixed"
    } else {
        "kinematic"
    }
}
