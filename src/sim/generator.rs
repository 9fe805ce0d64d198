//! Procedural spawning
//!
//! Each spawn type runs its own countdown. When it expires the spawn
//! callback places an entity and the next interval is drawn:
//! - randomized types jitter around their base interval
//! - velocity-scaled types shorten the interval as the player speeds up, by
//!   at most `max_timer_decrease` of it
//! - lane-reserving types claim a free lane halfway through the countdown and
//!   skip the cycle if none can be found

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::state::{ColliderKind, World};
use crate::consts::{LANE_COUNT, LANE_RETRY_BUDGET, MAX_TIMER_DECREASE_LIMIT, SPAWN_JITTER};

/// Places one entity in the given lane
pub type SpawnFn = fn(&mut World, usize);

/// Spawn settings and countdown for one entity type
#[derive(Debug, Clone)]
pub struct GenParam {
    pub kind: ColliderKind,
    pub enabled: bool,
    pub randomize: bool,
    pub velocity_scaling: bool,
    pub reserve_lane: bool,
    /// Seconds between spawns before jitter and scaling
    pub base_interval: f32,
    /// Largest fraction of the interval removed at full speed
    pub max_timer_decrease: f32,
    /// Seconds until the next spawn
    pub timer: f32,
    /// Interval the current countdown started from
    pub interval: f32,
    pub reserved_lane: Option<usize>,
    pub spawn: SpawnFn,
}

impl GenParam {
    pub fn new(kind: ColliderKind, base_interval: f32, spawn: SpawnFn) -> Self {
        Self {
            kind,
            enabled: true,
            randomize: false,
            velocity_scaling: false,
            reserve_lane: false,
            base_interval,
            max_timer_decrease: 0.0,
            timer: base_interval,
            interval: base_interval,
            reserved_lane: None,
            spawn,
        }
    }

    pub fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }

    /// Enable velocity scaling; the fraction is capped below 1
    pub fn velocity_scaled(mut self, max_timer_decrease: f32) -> Self {
        self.velocity_scaling = true;
        self.max_timer_decrease = max_timer_decrease.clamp(0.0, MAX_TIMER_DECREASE_LIMIT);
        self
    }

    pub fn reserving(mut self) -> Self {
        self.reserve_lane = true;
        self
    }

    /// Interval for the next countdown
    pub fn next_interval(&self, rng: &mut Pcg32, velocity: f32, max_velocity: f32) -> f32 {
        let mut interval = self.base_interval;
        if self.randomize {
            let jitter = self.base_interval * SPAWN_JITTER;
            interval += rng.random_range(-jitter..=jitter);
        }
        if self.velocity_scaling && max_velocity > 0.0 {
            let ratio = (velocity / max_velocity).clamp(0.0, 1.0);
            let decrease = self.max_timer_decrease.min(MAX_TIMER_DECREASE_LIMIT);
            interval -= interval * decrease * ratio;
        }
        interval
    }
}

fn spawn_crystal(world: &mut World, lane: usize) {
    world.spawn(ColliderKind::Crystal, lane);
}

fn spawn_trail_piece(world: &mut World, lane: usize) {
    world.spawn(ColliderKind::TrailPiece, lane);
}

fn spawn_asteroid(world: &mut World, lane: usize) {
    world.spawn(ColliderKind::Asteroid, lane);
}

fn spawn_red_ship(world: &mut World, lane: usize) {
    world.spawn(ColliderKind::RedShip, lane);
}

fn spawn_enemy_skull(world: &mut World, lane: usize) {
    world.spawn(ColliderKind::EnemySkull, lane);
}

fn spawn_barrier(world: &mut World, lane: usize) {
    world.spawn(ColliderKind::Barrier, lane);
}

/// Spawn scheduler with its own lane memory
#[derive(Debug, Clone)]
pub struct Generator {
    pub params: Vec<GenParam>,
    /// Outstanding reservations per lane
    lane_slots: [u32; LANE_COUNT],
    last_lane: Option<usize>,
    last_ship_lane: Option<usize>,
    rng: Pcg32,
}

impl Generator {
    pub fn new(seed: u64, params: Vec<GenParam>) -> Self {
        Self {
            params,
            lane_slots: [0; LANE_COUNT],
            last_lane: None,
            last_ship_lane: None,
            rng: Pcg32::seed_from_u64(seed),
        }
    }

    /// Default spawn table for a run
    pub fn standard(seed: u64) -> Self {
        Self::new(
            seed,
            vec![
                GenParam::new(ColliderKind::Crystal, 1.5, spawn_crystal).randomized(),
                GenParam::new(ColliderKind::TrailPiece, 2.5, spawn_trail_piece).randomized(),
                GenParam::new(ColliderKind::Asteroid, 3.0, spawn_asteroid)
                    .randomized()
                    .velocity_scaled(0.6),
                GenParam::new(ColliderKind::Barrier, 4.0, spawn_barrier)
                    .velocity_scaled(0.7)
                    .reserving(),
                GenParam::new(ColliderKind::RedShip, 5.0, spawn_red_ship)
                    .velocity_scaled(0.5)
                    .reserving(),
                GenParam::new(ColliderKind::EnemySkull, 7.0, spawn_enemy_skull)
                    .randomized()
                    .velocity_scaled(0.5),
            ],
        )
    }

    pub fn param_mut(&mut self, kind: ColliderKind) -> Option<&mut GenParam> {
        self.params.iter_mut().find(|p| p.kind == kind)
    }

    /// Reservations currently held on a lane
    pub fn lane_slots(&self, lane: usize) -> u32 {
        self.lane_slots.get(lane).copied().unwrap_or(0)
    }

    /// Advance every countdown by `dt`; returns the number of spawns
    pub fn update(
        &mut self,
        world: &mut World,
        dt: f32,
        velocity: f32,
        max_velocity: f32,
    ) -> usize {
        let mut spawned = 0;
        for index in 0..self.params.len() {
            if !self.params[index].enabled {
                continue;
            }
            self.params[index].timer -= dt;

            let param = &self.params[index];
            let wants_lane = param.reserve_lane
                && param.reserved_lane.is_none()
                && param.timer <= param.interval * 0.5;
            if wants_lane {
                match self.reserve_lane() {
                    Some(lane) => self.params[index].reserved_lane = Some(lane),
                    None => {
                        let param = &mut self.params[index];
                        log::debug!("No free lane for {:?}, skipping this spawn", param.kind);
                        param.timer = param.interval;
                        continue;
                    }
                }
            }

            if self.params[index].timer > 0.0 {
                continue;
            }

            let kind = self.params[index].kind;
            let lane = match self.params[index].reserved_lane.take() {
                Some(lane) => {
                    self.lane_slots[lane] = self.lane_slots[lane].saturating_sub(1);
                    self.remember_lane(lane, kind.is_ship());
                    lane
                }
                None => self.next_lane(kind.is_ship()),
            };
            (self.params[index].spawn)(world, lane);
            spawned += 1;

            let interval = self.params[index].next_interval(&mut self.rng, velocity, max_velocity);
            let param = &mut self.params[index];
            param.interval = interval;
            param.timer = interval;
        }
        spawned
    }

    /// Claim a lane with no outstanding reservation
    fn reserve_lane(&mut self) -> Option<usize> {
        for _ in 0..LANE_RETRY_BUDGET {
            let lane = self.rng.random_range(0..LANE_COUNT);
            if self.lane_slots[lane] == 0 {
                self.lane_slots[lane] += 1;
                return Some(lane);
            }
        }
        None
    }

    /// Pick a lane other than the previous one (and the previous ship lane
    /// for ships)
    pub fn next_lane(&mut self, ship: bool) -> usize {
        let candidates: Vec<usize> = (0..LANE_COUNT)
            .filter(|&lane| Some(lane) != self.last_lane)
            .filter(|&lane| !ship || Some(lane) != self.last_ship_lane)
            .collect();
        let lane = if candidates.is_empty() {
            self.rng.random_range(0..LANE_COUNT)
        } else {
            candidates[self.rng.random_range(0..candidates.len())]
        };
        self.remember_lane(lane, ship);
        lane
    }

    fn remember_lane(&mut self, lane: usize, ship: bool) {
        self.last_lane = Some(lane);
        if ship {
            self.last_ship_lane = Some(lane);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counting(world: &mut World, lane: usize) {
        world.score += 1;
        world.target_lane = lane;
    }

    #[test]
    fn test_full_speed_interval() {
        let param = GenParam::new(ColliderKind::Asteroid, 4.0, counting).velocity_scaled(0.9);
        let mut rng = Pcg32::seed_from_u64(1);
        let interval = param.next_interval(&mut rng, 80.0, 80.0);
        assert!((interval - 0.4).abs() < 1e-5);

        // Same scaling applies around the jittered interval
        let param = param.randomized();
        for _ in 0..100 {
            let interval = param.next_interval(&mut rng, 80.0, 80.0);
            assert!(interval >= 4.0 * (1.0 - SPAWN_JITTER) * 0.1 - 1e-5);
            assert!(interval <= 4.0 * (1.0 + SPAWN_JITTER) * 0.1 + 1e-5);
        }
    }

    #[test]
    fn test_max_decrease_is_capped() {
        let param = GenParam::new(ColliderKind::Asteroid, 2.0, counting).velocity_scaled(1.0);
        assert_eq!(param.max_timer_decrease, MAX_TIMER_DECREASE_LIMIT);
        let mut rng = Pcg32::seed_from_u64(1);
        assert!(param.next_interval(&mut rng, 100.0, 80.0) > 0.0);
    }

    #[test]
    fn test_spawns_when_timer_expires() {
        let mut world = World::new(1);
        let mut generator =
            Generator::new(1, vec![GenParam::new(ColliderKind::Crystal, 1.0, counting)]);
        assert_eq!(generator.update(&mut world, 0.6, 0.0, 80.0), 0);
        assert_eq!(generator.update(&mut world, 0.6, 0.0, 80.0), 1);
        assert_eq!(world.score, 1);
        assert!((generator.params[0].timer - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_param_never_spawns() {
        let mut world = World::new(1);
        let mut param = GenParam::new(ColliderKind::Crystal, 0.1, counting);
        param.enabled = false;
        let mut generator = Generator::new(1, vec![param]);
        for _ in 0..100 {
            generator.update(&mut world, 0.1, 0.0, 80.0);
        }
        assert_eq!(world.score, 0);
    }

    #[test]
    fn test_next_lane_avoids_previous() {
        let mut generator = Generator::new(9, Vec::new());
        let mut last = generator.next_lane(false);
        for _ in 0..200 {
            let lane = generator.next_lane(false);
            assert_ne!(lane, last);
            last = lane;
        }
    }

    #[test]
    fn test_ship_lane_memory() {
        let mut generator = Generator::new(9, Vec::new());
        let ship_lane = generator.next_lane(true);
        // A non-ship spawn moves the general memory but not the ship memory
        let other = generator.next_lane(false);
        for _ in 0..50 {
            let mut probe = generator.clone();
            let lane = probe.next_lane(true);
            assert_ne!(lane, ship_lane);
            assert_ne!(lane, other);
        }
    }

    #[test]
    fn test_lane_memory_is_per_generator() {
        let mut a = Generator::new(5, Vec::new());
        let b_first = Generator::new(5, Vec::new()).next_lane(false);
        // Heavy use of `a` doesn't change what a fresh generator picks
        for _ in 0..10 {
            a.next_lane(true);
        }
        assert_eq!(Generator::new(5, Vec::new()).next_lane(false), b_first);
    }

    #[test]
    fn test_reserved_lane_is_used_and_released() {
        let mut world = World::new(1);
        let param = GenParam::new(ColliderKind::Barrier, 1.0, counting).reserving();
        let mut generator = Generator::new(3, vec![param]);

        generator.update(&mut world, 0.6, 0.0, 80.0);
        let reserved = generator.params[0].reserved_lane.unwrap();
        assert_eq!(generator.lane_slots(reserved), 1);

        assert_eq!(generator.update(&mut world, 0.6, 0.0, 80.0), 1);
        assert_eq!(world.target_lane, reserved);
        assert_eq!(generator.lane_slots(reserved), 0);
        assert!(generator.params[0].reserved_lane.is_none());
    }

    #[test]
    fn test_spawn_deferred_when_lanes_full() {
        let mut world = World::new(1);
        let param = GenParam::new(ColliderKind::Barrier, 1.0, counting).reserving();
        let mut generator = Generator::new(3, vec![param]);
        generator.lane_slots = [1; LANE_COUNT];

        generator.update(&mut world, 0.6, 0.0, 80.0);
        assert!(generator.params[0].reserved_lane.is_none());
        assert!((generator.params[0].timer - 1.0).abs() < 1e-6);

        // Still blocked: the countdown keeps resetting and nothing spawns
        for _ in 0..20 {
            generator.update(&mut world, 0.6, 0.0, 80.0);
        }
        assert_eq!(world.score, 0);

        generator.lane_slots = [0; LANE_COUNT];
        generator.update(&mut world, 0.6, 0.0, 80.0);
        generator.update(&mut world, 0.6, 0.0, 80.0);
        assert_eq!(world.score, 1);
    }

    #[test]
    fn test_standard_table_spawns_entities() {
        let mut world = World::new(11);
        let mut generator = Generator::standard(11);
        let mut spawned = 0;
        for _ in 0..600 {
            spawned += generator.update(&mut world, 1.0 / 60.0, 40.0, 80.0);
        }
        assert!(spawned > 0);
        assert_eq!(world.entities.len(), spawned + 1);
    }

    proptest! {
        #[test]
        fn prop_interval_floor(
            base in 0.1f32..10.0,
            decrease in 0.0f32..1.5,
            max_velocity in 1.0f32..200.0,
            steps in 1usize..50,
        ) {
            let param =
                GenParam::new(ColliderKind::Asteroid, base, counting).velocity_scaled(decrease);
            let floor = base * (1.0 - param.max_timer_decrease);
            let mut rng = Pcg32::seed_from_u64(0);
            let mut previous = f32::INFINITY;
            for step in 0..=steps {
                let velocity = max_velocity * step as f32 / steps as f32;
                let interval = param.next_interval(&mut rng, velocity, max_velocity);
                prop_assert!(interval >= floor - floor.abs() * 1e-5);
                prop_assert!(interval <= previous);
                previous = interval;
            }
        }
    }
}
