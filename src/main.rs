//! Lane Rush headless runner
//!
//! Streams the asset set from a directory, plays a few seconds of the
//! simulation with the music thread ticking alongside, then polls for
//! changed files once.
//!
//! Usage: `lane-rush [asset-root] [seed]`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use lane_rush::assets::{AssetLoader, LoaderConfig};
use lane_rush::consts::SIM_DT;
use lane_rush::device::{HeadlessDevice, ShaderStage};
use lane_rush::music::{MixerConfig, MusicMaster, NullOutput};
use lane_rush::sim::{GamePhase, GameState, TickInput, advance};

/// Simulated run length in seconds
const RUN_SECONDS: f32 = 10.0;
/// Give up waiting on the loader after this long
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let root = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("assets"));
    let seed = args.next().and_then(|s| s.parse().ok()).unwrap_or(42);
    log::info!("Lane Rush (headless) starting, assets from {}", root.display());

    let mut loader = AssetLoader::new(LoaderConfig::with_root(root), HeadlessDevice::new());
    let road = loader.register_texture("textures/road.png");
    let hud = loader.register_font("fonts/hud.ttf", 16);
    loader.register_shader("shaders/road.vert", ShaderStage::Vertex, "road");
    loader.register_shader("shaders/road.frag", ShaderStage::Fragment, "road");
    loader.set_link_callback("road", |program| log::info!("Road program linked as {:?}", program));
    let pickup = loader.register_sound("sounds/crystal.wav");
    let theme = loader.register_song("music/theme.json");
    let options = loader.load_options("options.json");

    let started = Instant::now();
    while !loader.update() {
        if started.elapsed() > LOAD_TIMEOUT {
            log::error!("Assets still loading after {:?}, giving up", LOAD_TIMEOUT);
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    log::info!(
        "Loaded {} assets in {:?} (road texture {:?}, hud 'A' {:?}, pickup {:?})",
        loader.len(),
        started.elapsed(),
        loader.texture(road),
        loader.font(hud, 'A'),
        loader.sound(pickup)
    );

    let options = loader.options(options).unwrap_or_default();
    let music = loader.song(theme).map(|song| {
        let config = MixerConfig {
            gain: options.music_gain,
            ..Default::default()
        };
        MusicMaster::spawn(&song, NullOutput::default(), config)
    });
    if let Some(music) = &music {
        for track in 0..music.track_count() {
            if let Err(e) = music.play_track(track) {
                log::warn!("Could not start track {}: {}", track, e);
            }
        }
        if let Err(e) = music.on_next_beat(4, |beat| log::info!("Bar starts on beat {}", beat)) {
            log::warn!("Could not schedule the bar callback: {}", e);
        }
    }

    let mut state = GameState::new(seed);
    let input = TickInput {
        throttle: true,
        ..Default::default()
    };
    let frame = SIM_DT * 2.0;
    let mut carry = 0.0;
    let mut elapsed = 0.0;
    while elapsed < RUN_SECONDS && state.phase != GamePhase::GameOver {
        carry = advance(&mut state, &input, carry + frame);
        if let Some(music) = &music {
            if let Err(e) = music.tick(frame) {
                log::warn!("Music tick dropped: {}", e);
            }
        }
        elapsed += frame;
    }
    log::info!(
        "Run finished after {:.1}s: score {}, lives {}, {} entities",
        elapsed,
        state.world.score,
        state.world.lives,
        state.world.entities.len()
    );

    if let Some(music) = &music {
        music.wait_idle(Duration::from_secs(1));
        log::info!("Music status: {:?}", music.status());
    }

    let reloads = loader.check_for_changes();
    log::info!("{} assets queued for reload", reloads);
}
