//! Lane Rush - runtime core of an endless-lane 3D arcade racer
//!
//! Core modules:
//! - `memory`: Arena and entity-pool storage behind one allocator interface
//! - `assets`: Worker pool and the two-phase asset loading state machine
//! - `sim`: Frame simulation (collision, procedural spawning, game state)
//! - `music`: Beat-synchronized music mixer running on its own thread
//! - `device`: Main-thread GPU/audio finalize interface
//! - `platform`: File time service used for hot reload
//! - `settings`: Persisted options file

pub mod assets;
pub mod device;
pub mod memory;
pub mod music;
pub mod platform;
pub mod settings;
pub mod sim;

pub use settings::{OptionValue, Options};

/// Game configuration constants
pub mod consts {
    /// Fixed simulation timestep (60 Hz)
    pub const SIM_DT: f32 = 1.0 / 60.0;
    /// Maximum substeps per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 4;

    /// Number of road lanes
    pub const LANE_COUNT: usize = 5;
    /// Lane width in world units
    pub const LANE_WIDTH: f32 = 2.0;

    /// Gravity applied to non-kinematic bodies (units/s²)
    pub const GRAVITY: glam::Vec3 = glam::Vec3::new(0.0, -9.8, 0.0);
    /// Penetration along y below which a mover climbs instead of being pushed sideways
    pub const CLIMB_HEIGHT: f32 = 0.26;
    /// Penetration slop left in place by positional correction
    pub const CORRECTION_SLOP: f32 = 0.01;
    /// Initial capacity of the per-frame collision buffer
    pub const COLLISION_BUFFER_START: usize = 4;

    /// Player forward speed limits (units/s)
    pub const PLAYER_START_SPEED: f32 = 20.0;
    pub const PLAYER_MAX_SPEED: f32 = 80.0;
    /// Forward acceleration while throttling (units/s²)
    pub const PLAYER_ACCEL: f32 = 10.0;
    /// Lateral speed when changing lanes (units/s)
    pub const PLAYER_STEER_SPEED: f32 = 12.0;
    pub const PLAYER_LIVES: u8 = 3;

    /// Distance ahead of the player where new entities appear
    pub const SPAWN_DISTANCE: f32 = 120.0;
    /// Entities this far behind the player are removed
    pub const CULL_DISTANCE: f32 = 20.0;

    /// Random picks tried when reserving a lane before a spawn is deferred
    pub const LANE_RETRY_BUDGET: u32 = 8;
    /// Fraction of the base interval used as +/- jitter for randomized spawns
    pub const SPAWN_JITTER: f32 = 0.25;
    /// Upper bound on `max_timer_decrease` so an interval never reaches zero
    pub const MAX_TIMER_DECREASE_LIMIT: f32 = 0.95;

    /// Side length of the fallback texture
    pub const PLACEHOLDER_SIZE: u32 = 512;
    /// Glyph cells per atlas row (and column)
    pub const ATLAS_GRID: u32 = 16;
    /// Glyph pixel size used when a font is registered without one
    pub const DEFAULT_FONT_SIZE: u32 = 16;
    /// Queued jobs a worker accepts before the pool prefers another worker
    pub const JOBS_PER_WORKER: usize = 8;
}

/// World-space x coordinate of a lane's center
#[inline]
pub fn lane_center(lane: usize) -> f32 {
    let offset = lane as f32 - (consts::LANE_COUNT as f32 - 1.0) / 2.0;
    offset * consts::LANE_WIDTH
}

/// Nearest lane to a world-space x coordinate
#[inline]
pub fn lane_at(x: f32) -> usize {
    let offset = x / consts::LANE_WIDTH + (consts::LANE_COUNT as f32 - 1.0) / 2.0;
    (offset.round().max(0.0) as usize).min(consts::LANE_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_round_trip() {
        for lane in 0..consts::LANE_COUNT {
            assert_eq!(lane_at(lane_center(lane)), lane);
        }
        assert_eq!(lane_center(consts::LANE_COUNT / 2), 0.0);
    }

    #[test]
    fn test_lane_at_clamps() {
        assert_eq!(lane_at(-1000.0), 0);
        assert_eq!(lane_at(1000.0), consts::LANE_COUNT - 1);
    }
}
