//! Fixed timestep simulation tick
//!
//! Core game loop that advances simulation deterministically.

use super::collision::{Collision, integrate, resolve};
use super::state::{ColliderKind, GamePhase, GameState, World};
use crate::consts::*;
use crate::lane_center;
use crate::memory::EntityId;

/// Points per collected crystal
pub const CRYSTAL_SCORE: u64 = 100;

/// Input commands for a single tick (deterministic)
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// Lane change request: negative steers left, positive right
    pub steer: i8,
    /// Accelerate toward top speed
    pub throttle: bool,
    /// Pause toggle
    pub pause: bool,
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: usize,
    pub collected: u32,
    pub hits_taken: u32,
    pub culled: usize,
}

/// Advance the game state by one fixed timestep
pub fn tick(state: &mut GameState, input: &TickInput, dt: f32) -> TickReport {
    let mut report = TickReport::default();

    // Handle pause toggle
    if input.pause {
        match state.phase {
            GamePhase::Playing => {
                state.phase = GamePhase::Paused;
                return report;
            }
            GamePhase::Paused => state.phase = GamePhase::Playing,
            GamePhase::GameOver => {}
        }
    }

    // Don't tick if paused or game over
    if state.phase != GamePhase::Playing {
        return report;
    }
    state.time_ticks += 1;

    steer_player(&mut state.world, input, dt);

    let speed = state.world.player_speed;
    report.spawned = state
        .generator
        .update(&mut state.world, dt, speed, PLAYER_MAX_SPEED);

    // Player and free movers are active; everything else is passive
    let player = state.world.player;
    let active: Vec<EntityId> = state
        .world
        .entities
        .iter()
        .filter(|(id, e)| *id == player || !e.kinematic)
        .map(|(id, _)| id)
        .collect();
    let passive: Vec<EntityId> = state
        .world
        .entities
        .iter()
        .filter(|(id, _)| *id != player)
        .map(|(id, _)| id)
        .collect();

    let hits = state
        .collisions
        .detect(&mut state.world.entities, &active, &passive);
    dispatch(&mut state.world, hits, &mut report);

    if state.world.lives == 0 {
        state.phase = GamePhase::GameOver;
        log::info!(
            "Game over after {} ticks, score {}",
            state.time_ticks,
            state.world.score
        );
        return report;
    }

    integrate(&mut state.world.entities, GRAVITY, dt);
    settle_on_road(&mut state.world);
    report.culled = cull_behind(&mut state.world);
    report
}

/// Lane changes and throttle
fn steer_player(world: &mut World, input: &TickInput, dt: f32) {
    if input.steer < 0 {
        world.target_lane = world.target_lane.saturating_sub(1);
    } else if input.steer > 0 {
        world.target_lane = (world.target_lane + 1).min(LANE_COUNT - 1);
    }

    if input.throttle {
        world.player_speed = (world.player_speed + PLAYER_ACCEL * dt).min(PLAYER_MAX_SPEED);
    }

    let target_x = lane_center(world.target_lane);
    let speed = world.player_speed;
    let Some(player) = world.entities.get_mut(world.player) else {
        return;
    };
    // Don't overshoot the lane center
    let max_step = PLAYER_STEER_SPEED * dt;
    let step = (target_x - player.position.x).clamp(-max_step, max_step);
    player.velocity.x = if dt > 0.0 { step / dt } else { 0.0 };
    player.velocity.z = speed;
    player.lane = crate::lane_at(player.position.x + step);
}

/// Apply gameplay rules to this frame's hits
fn dispatch(world: &mut World, hits: &[Collision], report: &mut TickReport) {
    for hit in hits {
        let Some(kind) = world.entities.get(hit.passive).map(|e| e.kind) else {
            continue;
        };
        if !world.entities.contains(hit.active) {
            continue;
        }

        if hit.active == world.player {
            match kind {
                ColliderKind::Crystal => {
                    world.entities.remove(hit.passive);
                    world.score += CRYSTAL_SCORE;
                    report.collected += 1;
                }
                kind if kind.is_hazard() => {
                    world.entities.remove(hit.passive);
                    world.lives = world.lives.saturating_sub(1);
                    report.hits_taken += 1;
                    log::debug!("Hit {:?}, {} lives left", kind, world.lives);
                }
                _ => resolve(&mut world.entities, hit),
            }
        } else if kind != ColliderKind::Crystal {
            resolve(&mut world.entities, hit);
        }
    }
}

/// Keep non-kinematic bodies on the road surface
fn settle_on_road(world: &mut World) {
    for (_, entity) in world.entities.iter_mut() {
        if entity.kinematic {
            continue;
        }
        let sink = -entity.collider.min().y;
        if sink > 0.0 {
            entity.position.y += sink;
            entity.velocity.y = entity.velocity.y.max(0.0);
            entity.update_collider();
        }
    }
}

/// Remove entities far behind the player; returns how many
fn cull_behind(world: &mut World) -> usize {
    let limit = world.player_z() - CULL_DISTANCE;
    let player = world.player;
    let stale: Vec<EntityId> = world
        .entities
        .iter()
        .filter(|(id, e)| *id != player && e.position.z < limit)
        .map(|(id, _)| id)
        .collect();
    for id in &stale {
        world.entities.remove(*id);
    }
    stale.len()
}

/// Run as many fixed steps as fit in `frame_time`, capped at `MAX_SUBSTEPS`
///
/// Returns the unconsumed time to carry into the next frame.
pub fn advance(state: &mut GameState, input: &TickInput, frame_time: f32) -> f32 {
    let mut remaining = frame_time;
    let mut steps = 0;
    while remaining >= SIM_DT && steps < MAX_SUBSTEPS {
        // Edge-triggered inputs apply to the first substep only
        let step_input = if steps == 0 {
            input.clone()
        } else {
            TickInput {
                throttle: input.throttle,
                ..Default::default()
            }
        };
        tick(state, &step_input, SIM_DT);
        remaining -= SIM_DT;
        steps += 1;
    }
    if steps == MAX_SUBSTEPS {
        remaining.min(SIM_DT)
    } else {
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::state::Entity;
    use glam::Vec3;

    /// Put `kind` right on top of the player
    fn place_on_player(state: &mut GameState, kind: ColliderKind) -> EntityId {
        let player = state.world.player().unwrap().position;
        let entity = Entity::new(kind, player, Vec3::splat(0.3)).with_kinematic(true);
        state.world.entities.insert(entity)
    }

    fn quiet_state(seed: u64) -> GameState {
        let mut state = GameState::new(seed);
        for param in &mut state.generator.params {
            param.enabled = false;
        }
        state
    }

    #[test]
    fn test_tick_pause() {
        let mut state = quiet_state(12345);
        tick(&mut state, &TickInput::default(), SIM_DT);
        let z = state.world.player_z();

        let input = TickInput {
            pause: true,
            ..Default::default()
        };
        tick(&mut state, &input, SIM_DT);
        assert_eq!(state.phase, GamePhase::Paused);
        tick(&mut state, &TickInput::default(), SIM_DT);
        assert_eq!(state.world.player_z(), z);

        // Unpause
        tick(&mut state, &input, SIM_DT);
        assert_eq!(state.phase, GamePhase::Playing);
        assert!(state.world.player_z() > z);
    }

    #[test]
    fn test_crystal_scores_after_first_frame() {
        let mut state = quiet_state(1);
        let crystal = place_on_player(&mut state, ColliderKind::Crystal);

        // First frame after a (re)start never reports hits
        let report = tick(&mut state, &TickInput::default(), SIM_DT);
        assert_eq!(report.collected, 0);
        assert!(state.world.entities.contains(crystal));

        let report = tick(&mut state, &TickInput::default(), SIM_DT);
        assert_eq!(report.collected, 1);
        assert_eq!(state.world.score, CRYSTAL_SCORE);
        assert!(!state.world.entities.contains(crystal));
    }

    #[test]
    fn test_hazards_cost_lives_until_game_over() {
        let mut state = quiet_state(2);
        tick(&mut state, &TickInput::default(), SIM_DT);
        for lives_left in (0..PLAYER_LIVES).rev() {
            place_on_player(&mut state, ColliderKind::Asteroid);
            let report = tick(&mut state, &TickInput::default(), SIM_DT);
            assert_eq!(report.hits_taken, 1);
            assert_eq!(state.world.lives, lives_left);
        }
        assert_eq!(state.phase, GamePhase::GameOver);

        let ticks = state.time_ticks;
        tick(&mut state, &TickInput::default(), SIM_DT);
        assert_eq!(state.time_ticks, ticks);
    }

    #[test]
    fn test_reset_rearms_first_frame_skip() {
        let mut state = quiet_state(3);
        tick(&mut state, &TickInput::default(), SIM_DT);
        state.reset();
        for param in &mut state.generator.params {
            param.enabled = false;
        }
        place_on_player(&mut state, ColliderKind::Crystal);
        assert_eq!(tick(&mut state, &TickInput::default(), SIM_DT).collected, 0);
        assert_eq!(tick(&mut state, &TickInput::default(), SIM_DT).collected, 1);
    }

    #[test]
    fn test_steering_reaches_lane() {
        let mut state = quiet_state(4);
        let start = state.world.target_lane;
        let input = TickInput {
            steer: 1,
            ..Default::default()
        };
        tick(&mut state, &input, SIM_DT);
        assert_eq!(state.world.target_lane, start + 1);

        for _ in 0..60 {
            tick(&mut state, &TickInput::default(), SIM_DT);
        }
        let player = state.world.player().unwrap();
        assert!((player.position.x - lane_center(start + 1)).abs() < 1e-3);
        assert_eq!(player.lane, start + 1);
    }

    #[test]
    fn test_throttle_caps_at_max_speed() {
        let mut state = quiet_state(5);
        let input = TickInput {
            throttle: true,
            ..Default::default()
        };
        for _ in 0..(60 * 10) {
            tick(&mut state, &input, SIM_DT);
        }
        assert_eq!(state.world.player_speed, PLAYER_MAX_SPEED);
    }

    #[test]
    fn test_player_stays_on_road() {
        let mut state = quiet_state(6);
        for _ in 0..120 {
            tick(&mut state, &TickInput::default(), SIM_DT);
        }
        let player = state.world.player().unwrap();
        assert!(player.collider.min().y >= -1e-4);
    }

    #[test]
    fn test_entities_behind_are_culled() {
        let mut state = quiet_state(7);
        let z = state.world.player_z();
        let behind = Entity::new(
            ColliderKind::Barrier,
            Vec3::new(0.0, 1.0, z - CULL_DISTANCE - 5.0),
            Vec3::ONE,
        )
        .with_kinematic(true);
        let id = state.world.entities.insert(behind);
        let report = tick(&mut state, &TickInput::default(), SIM_DT);
        assert_eq!(report.culled, 1);
        assert!(!state.world.entities.contains(id));
    }

    #[test]
    fn test_determinism() {
        // Two states with same seed should produce identical results
        let mut state1 = GameState::new(99999);
        let mut state2 = GameState::new(99999);

        let inputs = [
            TickInput {
                steer: -1,
                ..Default::default()
            },
            TickInput {
                throttle: true,
                ..Default::default()
            },
            TickInput {
                steer: 1,
                ..Default::default()
            },
            TickInput::default(),
        ];

        for _ in 0..300 {
            for input in &inputs {
                tick(&mut state1, input, SIM_DT);
                tick(&mut state2, input, SIM_DT);
            }
        }

        assert_eq!(state1.time_ticks, state2.time_ticks);
        assert_eq!(state1.world.entities.len(), state2.world.entities.len());
        assert_eq!(state1.world.score, state2.world.score);
        assert_eq!(state1.world.player_z(), state2.world.player_z());
    }

    #[test]
    fn test_advance_caps_substeps() {
        let mut state = quiet_state(8);
        let carry = advance(&mut state, &TickInput::default(), 1.0);
        assert_eq!(state.time_ticks, MAX_SUBSTEPS as u64);
        assert!(carry <= SIM_DT);

        let carry = advance(&mut state, &TickInput::default(), SIM_DT * 1.5);
        assert_eq!(state.time_ticks, MAX_SUBSTEPS as u64 + 1);
        assert!((carry - SIM_DT * 0.5).abs() < 1e-6);
    }
}
