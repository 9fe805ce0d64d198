//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Seeded RNG only
//! - Stable iteration order (by entity slot)
//! - No rendering or platform dependencies

pub mod collision;
pub mod generator;
pub mod state;
pub mod tick;

pub use collision::{Collision, CollisionEngine, integrate, penetration, resolve};
pub use generator::{GenParam, Generator, SpawnFn};
pub use state::{Aabb, ColliderKind, Entity, GamePhase, GameState, World};
pub use tick::{CRYSTAL_SCORE, TickInput, TickReport, advance, tick};
