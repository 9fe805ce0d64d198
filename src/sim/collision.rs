//! Box collision detection and response
//!
//! Entities are split into an active set (things that move on their own and
//! care about what they hit) and a passive set (everything they can hit).
//! Detection is a straight pairwise box test; each hit is resolved along a
//! single axis:
//! - x when the boxes overlap less sideways than vertically and the vertical
//!   overlap is above the climb height
//! - y otherwise, which lets a mover ride up onto anything lower than
//!   `CLIMB_HEIGHT`
//!
//! z penetration only gates the overlap test.

use glam::Vec3;

use super::state::{Aabb, Entity};
use crate::consts::{CLIMB_HEIGHT, COLLISION_BUFFER_START, CORRECTION_SLOP};
use crate::memory::{EntityId, EntityPool};

/// One overlapping active/passive pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collision {
    pub active: EntityId,
    pub passive: EntityId,
    /// Unit axis pointing from the passive box toward the active one
    pub normal: Vec3,
    /// Penetration along the normal
    pub depth: f32,
}

/// Per-frame collision detector
///
/// Results live in a buffer owned by the engine and are overwritten by the
/// next [`CollisionEngine::detect`] call.
#[derive(Debug)]
pub struct CollisionEngine {
    hits: Vec<Collision>,
    skip_next: bool,
}

impl Default for CollisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionEngine {
    pub fn new() -> Self {
        Self {
            hits: Vec::with_capacity(COLLISION_BUFFER_START),
            skip_next: true,
        }
    }

    /// Level restart: the next detection pass reports nothing
    pub fn reset(&mut self) {
        self.hits.clear();
        self.skip_next = true;
    }

    /// Test every active entity against every passive one
    ///
    /// Resets the active entities' collision counters, then counts their
    /// hits. Removed handles and self-pairs are skipped. The first call after
    /// construction or [`CollisionEngine::reset`] returns no hits because
    /// colliders are only valid once `integrate` has run.
    pub fn detect(
        &mut self,
        pool: &mut EntityPool<Entity>,
        active: &[EntityId],
        passive: &[EntityId],
    ) -> &[Collision] {
        self.hits.clear();
        for &id in active {
            if let Some(entity) = pool.get_mut(id) {
                entity.collisions = 0;
            }
        }

        if self.skip_next {
            self.skip_next = false;
            return &self.hits;
        }

        for &a in active {
            let Some(box_a) = pool.get(a).map(|e| e.collider) else {
                continue;
            };
            let mut count = 0;
            for &p in passive {
                if p == a {
                    continue;
                }
                let Some(other) = pool.get(p) else {
                    continue;
                };
                if let Some((normal, depth)) = penetration(&box_a, &other.collider) {
                    self.hits.push(Collision {
                        active: a,
                        passive: p,
                        normal,
                        depth,
                    });
                    count += 1;
                }
            }
            if let Some(entity) = pool.get_mut(a) {
                entity.collisions = count;
            }
        }
        &self.hits
    }

    /// Hits from the last detection pass
    pub fn hits(&self) -> &[Collision] {
        &self.hits
    }
}

/// Resolution axis and depth for two overlapping boxes
///
/// The normal follows the sign of the center delta `a - b`; a zero delta
/// counts as positive.
pub fn penetration(a: &Aabb, b: &Aabb) -> Option<(Vec3, f32)> {
    let delta = a.center - b.center;
    let reach = a.half + b.half;

    let px = reach.x - delta.x.abs();
    if px <= 0.0 {
        return None;
    }
    let py = reach.y - delta.y.abs();
    if py <= 0.0 {
        return None;
    }
    let pz = reach.z - delta.z.abs();
    if pz <= 0.0 {
        return None;
    }

    let sign = |d: f32| if d < 0.0 { -1.0 } else { 1.0 };
    if px < py && py > CLIMB_HEIGHT {
        Some((Vec3::new(sign(delta.x), 0.0, 0.0), px))
    } else {
        Some((Vec3::new(0.0, sign(delta.y), 0.0), py))
    }
}

/// Advance every entity by `dt`
///
/// Gravity only acts on non-kinematic bodies; everything moves by its
/// velocity and gets its collider recomputed.
pub fn integrate(pool: &mut EntityPool<Entity>, gravity: Vec3, dt: f32) {
    for (_, entity) in pool.iter_mut() {
        if !entity.kinematic {
            entity.velocity += gravity * dt;
        }
        entity.position += entity.velocity * dt;
        entity.update_collider();
    }
}

/// Push a colliding pair apart
///
/// No-op when the pair is already separating along the normal. Otherwise
/// each body gets the full closing speed along the normal (in opposite
/// directions) and is moved out by half the penetration beyond the slop.
/// Kinematic bodies keep their velocity and position.
pub fn resolve(pool: &mut EntityPool<Entity>, hit: &Collision) {
    let Some((a, b)) = pool.get2_mut(hit.active, hit.passive) else {
        return;
    };

    let closing = (a.velocity - b.velocity).dot(hit.normal);
    if closing >= 0.0 {
        return;
    }
    let impulse = hit.normal * -closing;
    let correction = hit.normal * (hit.depth - CORRECTION_SLOP).max(0.0) * 0.5;

    if !a.kinematic {
        a.velocity += impulse;
        a.position += correction;
        a.update_collider();
    }
    if !b.kinematic {
        b.velocity -= impulse;
        b.position -= correction;
        b.update_collider();
    }
}
