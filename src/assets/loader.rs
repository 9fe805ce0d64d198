//! Asset registry and two-phase loader
//!
//! Registration allocates the entry (and any GPU ids) on the calling thread
//! and queues the background decode on the worker pool. Once per frame
//! [`AssetLoader::update`] checks whether the pool has drained and, if so,
//! finalizes every decoded entry on the main thread through the [`Device`].

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::decode::{self, FontRasterizer, TofuRasterizer};
use super::entry::{
    AssetEntry, AssetKind, AssetParam, Completion, Decoded, Glyph, Payload, Song, SongManifest,
    SongTrack,
};
use super::error::{AssetError, panic_message};
use super::pool::WorkerPool;
use crate::consts::{DEFAULT_FONT_SIZE, JOBS_PER_WORKER};
use crate::device::{Device, ProgramId, ShaderStage, SoundBufferId, TextureId};
use crate::memory::{Arena, ArenaId};
use crate::platform;
use crate::settings::Options;

/// Handle to a registered asset
pub type AssetId = ArenaId;

/// Callback run when a shader program (re)links
pub type LinkCallback = Box<dyn FnMut(ProgramId)>;

/// Loader configuration
#[derive(Clone)]
pub struct LoaderConfig {
    /// Directory asset filenames are resolved against
    pub root: PathBuf,
    pub max_workers: usize,
    pub jobs_per_worker: usize,
    /// Font backend; `None` yields blank atlases
    pub rasterizer: Option<Arc<dyn FontRasterizer>>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            root: PathBuf::from("assets"),
            // Leave one core for the main thread
            max_workers: cores.saturating_sub(1).max(1),
            jobs_per_worker: JOBS_PER_WORKER,
            rasterizer: Some(Arc::new(TofuRasterizer)),
        }
    }
}

impl LoaderConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

/// State shared with background jobs
struct Shared {
    entries: Arena<AssetEntry>,
    pool: WorkerPool,
    active: AtomicBool,
    root: PathBuf,
    rasterizer: Option<Arc<dyn FontRasterizer>>,
    /// Serializes find-or-register of song streams
    stream_registration: Mutex<()>,
}

impl Shared {
    fn push(&self, filename: &str, name: &str, payload: Payload, one_shot: bool) -> AssetId {
        let kind = payload.kind();
        let entry = AssetEntry::new(filename, self.root.join(filename), name, payload, one_shot);
        let (id, _) = self.entries.push(entry);
        log::debug!("Registered {:?} '{}' as {:?}", kind, filename, id);
        id
    }

    /// Submit the background phase of an entry
    fn kick(self: &Arc<Self>, id: AssetId) -> bool {
        let Some(entry) = self.entries.get(id) else {
            log::warn!("Kick of unknown asset {:?}", id);
            return false;
        };
        let generation = entry.begin_load();
        self.active.store(true, Ordering::Release);

        let shared = Arc::clone(self);
        self.pool.submit(move || {
            let result = catch_unwind(AssertUnwindSafe(|| shared.decode(&entry)))
                .unwrap_or_else(|payload| {
                    Err(AssetError::Panicked(panic_message(payload.as_ref())))
                });
            let loaded_at = platform::file_modified(&entry.path);
            entry.finish_thread_safe(generation, result, loaded_at);
        });
        true
    }

    /// Background phase: blocking I/O and CPU decode
    fn decode(self: &Arc<Self>, entry: &AssetEntry) -> Result<Decoded, AssetError> {
        let path = entry.path.as_path();
        match entry.kind {
            AssetKind::Texture => Ok(Decoded::Texture(decode::decode_png(path))),
            AssetKind::Font => {
                let pixel_size = entry.with_payload(|p| match p {
                    Payload::Font { pixel_size, .. } => *pixel_size,
                    _ => DEFAULT_FONT_SIZE,
                });
                let atlas = decode::load_font(path, pixel_size, self.rasterizer.as_deref());
                Ok(Decoded::Font(atlas))
            }
            AssetKind::Shader => std::fs::read_to_string(path)
                .map(Decoded::Shader)
                .map_err(|e| AssetError::io(path, e)),
            AssetKind::Sound => Ok(Decoded::Sound(decode::load_sound(path))),
            AssetKind::Stream => Ok(Decoded::Stream(decode::load_sound(path).map(Arc::new))),
            AssetKind::Song => {
                let manifest = decode::parse_song_manifest(path)?;
                let streams = manifest
                    .tracks
                    .iter()
                    .map(|track| self.register_stream(track))
                    .collect();
                Ok(Decoded::Song { manifest, streams })
            }
            AssetKind::OptionsLoad => Ok(Decoded::Options(Options::load(path)?)),
            AssetKind::OptionsSave => {
                let options = entry.with_payload(|p| match p {
                    Payload::OptionsSave { options, .. } => options.clone(),
                    _ => Options::default(),
                });
                options.save(path)?;
                Ok(Decoded::Saved)
            }
        }
    }

    /// Find the stream entry for a file, registering and kicking it if new
    fn register_stream(self: &Arc<Self>, filename: &str) -> AssetId {
        let _guard = self.stream_registration.lock();
        if let Some((id, _)) = self
            .entries
            .find(|e| e.kind == AssetKind::Stream && e.filename == filename)
        {
            return id;
        }
        let id = self.push(filename, filename, Payload::Stream { data: None }, false);
        self.kick(id);
        id
    }

    /// Link a song's manifest against the registered stream entries
    fn build_song(&self, manifest: &SongManifest) -> Song {
        let tracks = manifest
            .tracks
            .iter()
            .enumerate()
            .map(|(index, filename)| {
                let stream = self
                    .entries
                    .find(|e| e.kind == AssetKind::Stream && &e.filename == filename)
                    .and_then(|(_, entry)| {
                        entry.with_payload(|p| match p {
                            Payload::Stream { data } => data.clone(),
                            _ => None,
                        })
                    });
                if stream.is_none() {
                    log::warn!("Song track '{}' has no decoded stream", filename);
                }
                let name = manifest
                    .names
                    .iter()
                    .find(|&(_, &i)| i == index)
                    .map(|(name, _)| name.clone());
                SongTrack {
                    filename: filename.clone(),
                    name,
                    stream,
                }
            })
            .collect();
        Song {
            bpm: manifest.bpm,
            tracks,
        }
    }

    fn wait_idle(&self) {
        while !self.pool.is_drained() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn shader_stage_for(filename: &str) -> ShaderStage {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "frag" | "fs" => ShaderStage::Fragment,
        _ => ShaderStage::Vertex,
    }
}

/// Asset registry, worker pool and main-thread finalizer
pub struct AssetLoader<D: Device> {
    shared: Arc<Shared>,
    device: D,
    link_callbacks: HashMap<String, LinkCallback>,
    linked: HashMap<String, ProgramId>,
}

impl<D: Device> AssetLoader<D> {
    pub fn new(config: LoaderConfig, device: D) -> Self {
        log::info!(
            "Asset loader rooted at {} (up to {} workers)",
            config.root.display(),
            config.max_workers
        );
        Self {
            shared: Arc::new(Shared {
                entries: Arena::new(),
                pool: WorkerPool::new(config.max_workers, config.jobs_per_worker),
                active: AtomicBool::new(false),
                root: config.root,
                rasterizer: config.rasterizer,
                stream_registration: Mutex::new(()),
            }),
            device,
            link_callbacks: HashMap::new(),
            linked: HashMap::new(),
        }
    }

    /// Register an asset
    ///
    /// GPU ids are created here, on the calling thread. The typed payload is
    /// allocated immediately so the returned id is valid before any data is
    /// loaded. Unless `kick_now` is false the background phase is queued
    /// right away; deferred entries are started with [`AssetLoader::kick`].
    pub fn register(
        &mut self,
        kind: AssetKind,
        filename: &str,
        name: &str,
        param: AssetParam,
        kick_now: bool,
        one_shot: bool,
    ) -> AssetId {
        let payload = match kind {
            AssetKind::Texture => Payload::Texture {
                texture: self.device.create_texture(),
                image: None,
            },
            AssetKind::Font => Payload::Font {
                texture: self.device.create_texture(),
                pixel_size: match param {
                    AssetParam::FontSize(size) => size,
                    _ => DEFAULT_FONT_SIZE,
                },
                atlas: None,
            },
            AssetKind::Shader => {
                let (stage, program) = match param {
                    AssetParam::Shader { stage, program } => (stage, program),
                    _ => (shader_stage_for(filename), None),
                };
                Payload::Shader {
                    shader: self.device.create_shader(stage),
                    stage,
                    program,
                    source: None,
                    compiled: false,
                }
            }
            AssetKind::Sound => Payload::Sound {
                data: None,
                buffer: None,
            },
            AssetKind::Stream => Payload::Stream { data: None },
            AssetKind::Song => Payload::Song {
                manifest: None,
                streams: Vec::new(),
                song: None,
            },
            AssetKind::OptionsLoad => Payload::OptionsLoad { options: None },
            AssetKind::OptionsSave => Payload::OptionsSave {
                options: match param {
                    AssetParam::Options(options) => options,
                    _ => Options::default(),
                },
                written: false,
            },
        };

        let id = self.shared.push(filename, name, payload, one_shot);
        if kick_now {
            self.shared.kick(id);
        }
        id
    }

    /// Start the background phase of a deferred entry
    pub fn kick(&self, id: AssetId) -> bool {
        self.shared.kick(id)
    }

    pub fn register_texture(&mut self, filename: &str) -> AssetId {
        self.register(AssetKind::Texture, filename, filename, AssetParam::None, true, false)
    }

    pub fn register_font(&mut self, filename: &str, pixel_size: u32) -> AssetId {
        let param = AssetParam::FontSize(pixel_size);
        self.register(AssetKind::Font, filename, filename, param, true, false)
    }

    /// Register one stage of a named shader program
    pub fn register_shader(
        &mut self,
        filename: &str,
        stage: ShaderStage,
        program: &str,
    ) -> AssetId {
        let param = AssetParam::Shader {
            stage,
            program: Some(program.to_string()),
        };
        self.register(AssetKind::Shader, filename, filename, param, true, false)
    }

    pub fn register_sound(&mut self, filename: &str) -> AssetId {
        self.register(AssetKind::Sound, filename, filename, AssetParam::None, true, false)
    }

    /// Register a song; its track streams are registered while it loads
    pub fn register_song(&mut self, filename: &str) -> AssetId {
        self.register(AssetKind::Song, filename, filename, AssetParam::None, true, false)
    }

    pub fn load_options(&mut self, filename: &str) -> AssetId {
        self.register(AssetKind::OptionsLoad, filename, filename, AssetParam::None, true, true)
    }

    pub fn save_options(&mut self, filename: &str, options: Options) -> AssetId {
        let param = AssetParam::Options(options);
        self.register(AssetKind::OptionsSave, filename, filename, param, true, true)
    }

    /// Run `callback` every time `program` links
    pub fn set_link_callback(&mut self, program: &str, callback: impl FnMut(ProgramId) + 'static) {
        self.link_callbacks
            .insert(program.to_string(), Box::new(callback));
    }

    /// Per-frame drain check
    ///
    /// Returns true exactly on the frame the finalize pass ran: the loader
    /// had pending work and the pool has just drained. Every entry decoded
    /// since the last pass is finalized in registration order.
    pub fn update(&mut self) -> bool {
        if !self.shared.active.load(Ordering::Acquire) || !self.shared.pool.is_drained() {
            return false;
        }

        let mut programs: Vec<String> = Vec::new();
        let mut streams: Vec<String> = Vec::new();
        let mut songs: Vec<AssetId> = Vec::new();
        let mut finalized = 0;
        for (id, entry) in self.shared.entries.snapshot() {
            if !self.finalize(&entry, &mut programs) {
                continue;
            }
            finalized += 1;
            match entry.kind {
                AssetKind::Stream => streams.push(entry.filename.clone()),
                AssetKind::Song => songs.push(id),
                _ => {}
            }
        }

        if !streams.is_empty() {
            self.relink_songs(&streams, &songs);
        }
        for program in &programs {
            self.link(program);
        }

        self.shared.active.store(false, Ordering::Release);
        log::info!("Finalized {} assets", finalized);
        true
    }

    /// Main-thread phase of one entry; returns false if it wasn't decoded
    fn finalize(&mut self, entry: &AssetEntry, programs: &mut Vec<String>) -> bool {
        let mut state = entry.lock();
        if state.completion != Completion::ThreadSafe {
            return false;
        }

        let result = match &mut state.payload {
            Payload::Texture { texture, image } => {
                if let Some(image) = image {
                    self.device
                        .upload_texture(*texture, image.width, image.height, &image.pixels);
                }
                Ok(())
            }
            Payload::Font { texture, atlas, .. } => {
                if let Some(atlas) = atlas {
                    let rgba = atlas.to_rgba();
                    self.device.upload_texture(
                        *texture,
                        atlas.size,
                        atlas.size,
                        bytemuck::cast_slice(&rgba),
                    );
                }
                Ok(())
            }
            Payload::Shader {
                shader,
                program,
                source,
                compiled,
                ..
            } => {
                let source = source.as_deref().unwrap_or_default();
                match self.device.compile_shader(*shader, source) {
                    Ok(()) => {
                        *compiled = true;
                        if let Some(program) = program {
                            if !programs.contains(program) {
                                programs.push(program.clone());
                            }
                        }
                        Ok(())
                    }
                    Err(log) => {
                        *compiled = false;
                        Err(AssetError::Shader {
                            name: entry.name.clone(),
                            log,
                        })
                    }
                }
            }
            Payload::Sound { data, buffer } => {
                if let Some(data) = data {
                    *buffer = Some(self.device.upload_sound(
                        &data.samples,
                        data.channels,
                        data.sample_rate,
                    ));
                }
                Ok(())
            }
            Payload::Song { manifest, song, .. } => {
                if let Some(manifest) = manifest {
                    *song = Some(Arc::new(self.shared.build_song(manifest)));
                }
                Ok(())
            }
            Payload::Stream { .. } | Payload::OptionsLoad { .. } | Payload::OptionsSave { .. } => {
                Ok(())
            }
        };

        match result {
            Ok(()) => AssetEntry::finish_thread_unsafe(&mut state, entry.one_shot),
            Err(e) => {
                log::error!("Failed to finalize '{}': {}", entry.filename, e);
                AssetEntry::fail(&mut state, &e);
            }
        }
        true
    }

    /// Rebuild already finalized songs that play one of `streams`
    ///
    /// Songs finalized in the same pass (listed in `fresh`) were built
    /// against the new data already.
    fn relink_songs(&self, streams: &[String], fresh: &[AssetId]) {
        for (id, entry) in self.shared.entries.snapshot() {
            if entry.kind != AssetKind::Song || fresh.contains(&id) {
                continue;
            }
            let mut state = entry.lock();
            if !matches!(
                state.completion,
                Completion::ThreadUnsafe | Completion::Done
            ) {
                continue;
            }
            if let Payload::Song {
                manifest: Some(manifest),
                song,
                ..
            } = &mut state.payload
            {
                if manifest.tracks.iter().any(|t| streams.contains(t)) {
                    *song = Some(Arc::new(self.shared.build_song(manifest)));
                    log::info!("Relinked song '{}' to reloaded streams", entry.filename);
                }
            }
        }
    }

    /// Link a program once both of its stages are compiled
    fn link(&mut self, program: &str) {
        let mut vertex = None;
        let mut fragment = None;
        for (_, entry) in self.shared.entries.snapshot() {
            if entry.kind != AssetKind::Shader {
                continue;
            }
            entry.with_payload(|p| match p {
                Payload::Shader {
                    shader,
                    stage,
                    program: Some(name),
                    compiled: true,
                    ..
                } if name == program => match stage {
                    ShaderStage::Vertex => vertex = Some(*shader),
                    ShaderStage::Fragment => fragment = Some(*shader),
                },
                _ => {}
            });
        }

        let (Some(vertex), Some(fragment)) = (vertex, fragment) else {
            log::debug!("Program '{}' waiting for its other stage", program);
            return;
        };
        match self.device.link_program(vertex, fragment) {
            Ok(id) => {
                log::info!("Linked program '{}'", program);
                self.linked.insert(program.to_string(), id);
                if let Some(callback) = self.link_callbacks.get_mut(program) {
                    callback(id);
                }
            }
            Err(log) => log::error!("Program '{}' failed to link: {}", program, log),
        }
    }

    /// Queue a reload for every entry whose file changed since it loaded
    ///
    /// Done and in-flight entries are skipped. A failed entry is retried once
    /// its file changes, unless it is one-shot. Reloaded entries are
    /// finalized again into the GPU objects created at registration, so
    /// anything still bound to them sees the new data mid-use.
    pub fn check_for_changes(&self) -> usize {
        let mut reloads = 0;
        for (id, entry) in self.shared.entries.snapshot() {
            if entry.kind == AssetKind::OptionsSave {
                continue;
            }
            let (completion, recorded) = {
                let state = entry.lock();
                (state.completion, state.loaded_at)
            };
            let reloadable = match completion {
                Completion::ThreadUnsafe => true,
                Completion::Failed => !entry.one_shot,
                _ => false,
            };
            if !reloadable {
                continue;
            }
            if platform::file_changed(recorded, platform::file_modified(&entry.path)) {
                log::info!("Reloading '{}'", entry.filename);
                self.shared.kick(id);
                reloads += 1;
            }
        }
        reloads
    }

    pub fn completion(&self, id: AssetId) -> Option<Completion> {
        self.shared.entries.get(id).map(|e| e.completion())
    }

    pub fn entry(&self, id: AssetId) -> Option<Arc<AssetEntry>> {
        self.shared.entries.get(id)
    }

    /// Look up an entry by kind and name
    pub fn find(&self, kind: AssetKind, name: &str) -> Option<AssetId> {
        self.shared
            .entries
            .find(|e| e.kind == kind && e.name == name)
            .map(|(id, _)| id)
    }

    /// Run `f` against an entry's payload
    pub fn with_payload<R>(&self, id: AssetId, f: impl FnOnce(&Payload) -> R) -> Option<R> {
        self.shared.entries.get(id).map(|e| e.with_payload(f))
    }

    /// GPU texture of a texture or font entry
    pub fn texture(&self, id: AssetId) -> Option<TextureId> {
        self.with_payload(id, |p| match p {
            Payload::Texture { texture, .. } | Payload::Font { texture, .. } => Some(*texture),
            _ => None,
        })
        .flatten()
    }

    /// Atlas placement of one glyph of a loaded font
    pub fn font(&self, id: AssetId, ch: char) -> Option<Glyph> {
        self.with_payload(id, |p| match p {
            Payload::Font {
                atlas: Some(atlas), ..
            } => atlas.glyph(ch).copied(),
            _ => None,
        })
        .flatten()
    }

    /// Audio buffer of a sound entry; `None` if the file was missing
    pub fn sound(&self, id: AssetId) -> Option<SoundBufferId> {
        self.with_payload(id, |p| match p {
            Payload::Sound { buffer, .. } => *buffer,
            _ => None,
        })
        .flatten()
    }

    /// Finalized song with its tracks linked to streams
    pub fn song(&self, id: AssetId) -> Option<Arc<Song>> {
        self.with_payload(id, |p| match p {
            Payload::Song { song, .. } => song.clone(),
            _ => None,
        })
        .flatten()
    }

    pub fn options(&self, id: AssetId) -> Option<Options> {
        self.with_payload(id, |p| match p {
            Payload::OptionsLoad { options } => options.clone(),
            Payload::OptionsSave { options, written: true } => Some(options.clone()),
            _ => None,
        })
        .flatten()
    }

    pub fn program(&self, name: &str) -> Option<ProgramId> {
        self.linked.get(name).copied()
    }

    /// True while registrations are waiting for a finalize pass
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Level teardown: wait for in-flight jobs, then drop every entry
    pub fn reset(&mut self) {
        self.shared.wait_idle();
        self.shared.entries.reset();
        self.shared.active.store(false, Ordering::Release);
        self.linked.clear();
        log::info!("Asset registry reset");
    }
}

impl<D: Device> Drop for AssetLoader<D> {
    fn drop(&mut self) {
        // Jobs hold the shared state; let them finish so the pool is torn
        // down here rather than on one of its own workers.
        self.shared.wait_idle();
    }
}
