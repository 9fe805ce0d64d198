//! Game state and core simulation types

use glam::{Mat3, Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::collision::CollisionEngine;
use super::generator::Generator;
use crate::consts::*;
use crate::lane_center;
use crate::memory::{EntityId, EntityPool};

/// Current phase of gameplay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Active gameplay
    Playing,
    /// Game is paused
    Paused,
    /// Run ended
    GameOver,
}

/// What an entity is for collision and gameplay purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColliderKind {
    /// The player
    Ship,
    /// Rival racer sharing the road
    RedShip,
    /// Pickup worth points
    Crystal,
    /// Low debris slab, climbable
    TrailPiece,
    /// Hazard, costs a life
    Asteroid,
    /// Oncoming hazard, costs a life
    EnemySkull,
    /// Solid lane blocker
    Barrier,
}

impl ColliderKind {
    /// Vehicles share a separate lane memory in the generator
    pub fn is_ship(self) -> bool {
        matches!(
            self,
            ColliderKind::Ship | ColliderKind::RedShip | ColliderKind::EnemySkull
        )
    }

    /// Touching the player costs a life
    pub fn is_hazard(self) -> bool {
        matches!(self, ColliderKind::Asteroid | ColliderKind::EnemySkull)
    }
}

/// Axis-aligned box as center and half extents
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub center: Vec3,
    pub half: Vec3,
}

impl Aabb {
    pub fn new(center: Vec3, half: Vec3) -> Self {
        Self { center, half }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half
    }
}

/// A simulated body
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: ColliderKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub scale: Vec3,
    pub rotation: Quat,
    /// Model-space bounds
    pub bounds: Aabb,
    /// World-space box derived from bounds, scale, rotation and position
    pub collider: Aabb,
    /// Kinematic bodies ignore gravity and impulses
    pub kinematic: bool,
    pub lane: usize,
    /// Collisions this entity took part in during the last detection pass
    pub collisions: u32,
}

impl Entity {
    /// Body with model bounds centered on its origin
    pub fn new(kind: ColliderKind, position: Vec3, half_extents: Vec3) -> Self {
        let mut entity = Self {
            kind,
            position,
            velocity: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            bounds: Aabb::new(Vec3::ZERO, half_extents),
            collider: Aabb::default(),
            kinematic: false,
            lane: crate::lane_at(position.x),
            collisions: 0,
        };
        entity.update_collider();
        entity
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_kinematic(mut self, kinematic: bool) -> Self {
        self.kinematic = kinematic;
        self
    }

    pub fn with_transform(mut self, scale: Vec3, rotation: Quat) -> Self {
        self.scale = scale;
        self.rotation = rotation;
        self.update_collider();
        self
    }

    /// Recompute the world-space box
    ///
    /// The rotated, scaled model box is enclosed by the box whose half
    /// extents are `|R * S| * half`.
    pub fn update_collider(&mut self) {
        let m = Mat3::from_quat(self.rotation) * Mat3::from_diagonal(self.scale);
        let abs = Mat3::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs());
        self.collider = Aabb::new(
            self.position + m * self.bounds.center,
            abs * self.bounds.half,
        );
    }
}

/// Half extents per spawned kind
fn template(kind: ColliderKind) -> (Vec3, f32, bool) {
    // (half extents, rest height of the center, kinematic)
    match kind {
        ColliderKind::Ship | ColliderKind::RedShip => (Vec3::new(0.6, 0.4, 1.0), 0.4, false),
        ColliderKind::Crystal => (Vec3::splat(0.3), 1.0, true),
        ColliderKind::TrailPiece => (Vec3::new(0.8, 0.1, 0.8), 0.1, true),
        ColliderKind::Asteroid => (Vec3::splat(0.8), 0.8, true),
        ColliderKind::EnemySkull => (Vec3::splat(0.5), 0.5, true),
        ColliderKind::Barrier => (Vec3::new(0.9, 1.0, 0.3), 1.0, true),
    }
}

/// Everything spawn callbacks may touch
#[derive(Debug, Clone)]
pub struct World {
    pub entities: EntityPool<Entity>,
    pub player: EntityId,
    /// Lane the player is steering toward
    pub target_lane: usize,
    /// Forward speed of the player (units/s)
    pub player_speed: f32,
    pub score: u64,
    pub lives: u8,
    /// Randomness for spawn variation
    pub rng: Pcg32,
}

impl World {
    pub fn new(seed: u64) -> Self {
        let lane = LANE_COUNT / 2;
        let (half, height, _) = template(ColliderKind::Ship);
        let player = Entity::new(
            ColliderKind::Ship,
            Vec3::new(lane_center(lane), height, 0.0),
            half,
        )
        .with_velocity(Vec3::new(0.0, 0.0, PLAYER_START_SPEED));

        let mut entities = EntityPool::new();
        let player = entities.insert(player);
        Self {
            entities,
            player,
            target_lane: lane,
            player_speed: PLAYER_START_SPEED,
            score: 0,
            lives: PLAYER_LIVES,
            rng: Pcg32::seed_from_u64(seed),
        }
    }

    pub fn player(&self) -> Option<&Entity> {
        self.entities.get(self.player)
    }

    /// Forward distance of the player along the road
    pub fn player_z(&self) -> f32 {
        self.player().map(|p| p.position.z).unwrap_or(0.0)
    }

    /// Place a new entity of `kind` in `lane` ahead of the player
    pub fn spawn(&mut self, kind: ColliderKind, lane: usize) -> EntityId {
        let (half, height, kinematic) = template(kind);
        let lane = lane.min(LANE_COUNT - 1);
        let position = Vec3::new(lane_center(lane), height, self.player_z() + SPAWN_DISTANCE);

        let mut entity = Entity::new(kind, position, half).with_kinematic(kinematic);
        match kind {
            ColliderKind::RedShip => {
                entity.velocity = Vec3::new(0.0, 0.0, PLAYER_START_SPEED * 0.5);
            }
            ColliderKind::EnemySkull => {
                entity.velocity = Vec3::new(0.0, 0.0, -PLAYER_START_SPEED * 0.5);
            }
            ColliderKind::Asteroid => {
                let scale = self.rng.random_range(0.8..1.4);
                let spin = Quat::from_rotation_y(self.rng.random_range(0.0..std::f32::consts::TAU));
                entity = entity.with_transform(Vec3::splat(scale), spin);
            }
            _ => {}
        }
        entity.lane = lane;

        let id = self.entities.insert(entity);
        log::trace!("Spawned {:?} in lane {}", kind, lane);
        id
    }
}

/// Complete game state
#[derive(Debug)]
pub struct GameState {
    /// Run seed for reproducibility
    pub seed: u64,
    pub phase: GamePhase,
    /// Simulation tick counter
    pub time_ticks: u64,
    pub world: World,
    pub generator: Generator,
    pub collisions: CollisionEngine,
}

impl GameState {
    /// Create a new game state with the given seed
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            phase: GamePhase::Playing,
            time_ticks: 0,
            world: World::new(seed),
            generator: Generator::standard(seed),
            collisions: CollisionEngine::new(),
        }
    }

    /// Restart the level with the same seed
    ///
    /// The collision engine keeps its buffer but skips its next detection
    /// pass, since fresh entities have no integrated colliders yet.
    pub fn reset(&mut self) {
        self.phase = GamePhase::Playing;
        self.time_ticks = 0;
        self.world = World::new(self.seed);
        self.generator = Generator::standard(self.seed);
        self.collisions.reset();
        log::info!("Level reset (seed {})", self.seed);
    }
}
