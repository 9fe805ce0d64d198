//! Asset entries and their typed payloads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;

use super::error::AssetError;
use crate::device::{ShaderId, ShaderStage, SoundBufferId, TextureId};
use crate::platform::FileTime;
use crate::settings::Options;

/// Asset kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Texture,
    Font,
    Shader,
    Sound,
    Stream,
    Song,
    OptionsLoad,
    OptionsSave,
}

/// Stage an entry has reached in its two-phase load
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Completion {
    /// Background job queued or running
    Incomplete,
    /// CPU-side data ready, waiting for the main-thread finalize pass
    ThreadSafe,
    /// Finalized; still eligible for hot reload
    ThreadUnsafe,
    /// Finalized one-shot entry
    Done,
    /// Background or finalize phase failed
    Failed,
}

impl Completion {
    /// Finalized (successfully or not)
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Completion::ThreadUnsafe | Completion::Done | Completion::Failed
        )
    }
}

/// Per-kind registration parameter
#[derive(Debug, Clone, Default)]
pub enum AssetParam {
    #[default]
    None,
    /// Requested glyph pixel size for fonts
    FontSize(u32),
    /// Shader stage and the program the stage belongs to
    Shader {
        stage: ShaderStage,
        program: Option<String>,
    },
    /// Options to write for `OptionsSave`
    Options(Options),
}

/// Decoded RGBA8 image
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows
    pub pixels: Vec<u8>,
}

impl Image {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let texels: &[[u8; 4]] = bytemuck::cast_slice(&self.pixels);
        texels.get((y * self.width + x) as usize).copied()
    }

    /// Pixels as RGBA texels
    pub fn texels(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.pixels)
    }
}

/// Placement and metrics of one glyph inside a font atlas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub ch: char,
    /// Top-left of the glyph bitmap in the atlas (pixels)
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub advance: f32,
    pub bearing_x: f32,
    pub bearing_y: f32,
}

/// Square, power-of-two single-channel glyph atlas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontAtlas {
    /// Atlas side length in pixels
    pub size: u32,
    /// Side length of one glyph cell
    pub cell: u32,
    pub pixel_size: u32,
    /// Coverage values, `size * size` bytes
    pub coverage: Vec<u8>,
    pub glyphs: Vec<Glyph>,
}

impl FontAtlas {
    pub fn glyph(&self, ch: char) -> Option<&Glyph> {
        self.glyphs.iter().find(|g| g.ch == ch)
    }

    /// Coverage expanded to white RGBA texels for upload
    pub fn to_rgba(&self) -> Vec<[u8; 4]> {
        self.coverage.iter().map(|&a| [255, 255, 255, a]).collect()
    }
}

/// Interleaved PCM16 audio
#[derive(Debug, Clone, PartialEq)]
pub struct SoundData {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl SoundData {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Song manifest as stored on disk
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SongManifest {
    pub bpm: u32,
    pub tracks: Vec<String>,
    #[serde(default)]
    pub names: HashMap<String, usize>,
}

/// One track of a finalized song
#[derive(Debug, Clone)]
pub struct SongTrack {
    pub filename: String,
    pub name: Option<String>,
    /// Decoded stream, `None` if the stream file was missing
    pub stream: Option<Arc<SoundData>>,
}

/// Finalized song: manifest with every track linked to its stream
#[derive(Debug, Clone)]
pub struct Song {
    pub bpm: u32,
    pub tracks: Vec<SongTrack>,
}

impl Song {
    pub fn track_index(&self, name: &str) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.name.as_deref() == Some(name))
    }
}

/// Typed per-kind payload
#[derive(Debug, Clone)]
pub enum Payload {
    Texture {
        texture: TextureId,
        image: Option<Image>,
    },
    Font {
        texture: TextureId,
        pixel_size: u32,
        atlas: Option<FontAtlas>,
    },
    Shader {
        shader: ShaderId,
        stage: ShaderStage,
        program: Option<String>,
        source: Option<String>,
        compiled: bool,
    },
    Sound {
        data: Option<SoundData>,
        buffer: Option<SoundBufferId>,
    },
    Stream {
        data: Option<Arc<SoundData>>,
    },
    Song {
        manifest: Option<SongManifest>,
        streams: Vec<crate::memory::ArenaId>,
        song: Option<Arc<Song>>,
    },
    OptionsLoad {
        options: Option<Options>,
    },
    OptionsSave {
        options: Options,
        written: bool,
    },
}

impl Payload {
    pub fn kind(&self) -> AssetKind {
        match self {
            Payload::Texture { .. } => AssetKind::Texture,
            Payload::Font { .. } => AssetKind::Font,
            Payload::Shader { .. } => AssetKind::Shader,
            Payload::Sound { .. } => AssetKind::Sound,
            Payload::Stream { .. } => AssetKind::Stream,
            Payload::Song { .. } => AssetKind::Song,
            Payload::OptionsLoad { .. } => AssetKind::OptionsLoad,
            Payload::OptionsSave { .. } => AssetKind::OptionsSave,
        }
    }
}

/// Result of an entry's background phase
#[derive(Debug)]
pub(crate) enum Decoded {
    Texture(Image),
    Font(Option<FontAtlas>),
    Shader(String),
    Sound(Option<SoundData>),
    Stream(Option<Arc<SoundData>>),
    Song {
        manifest: SongManifest,
        streams: Vec<crate::memory::ArenaId>,
    },
    Options(Options),
    Saved,
}

#[derive(Debug)]
pub(crate) struct EntryState {
    pub completion: Completion,
    pub loaded_at: Option<FileTime>,
    pub payload: Payload,
    pub error: Option<String>,
}

/// One registered asset
#[derive(Debug)]
pub struct AssetEntry {
    pub kind: AssetKind,
    /// Filename as registered (used for lookups)
    pub filename: String,
    /// Resolved on-disk path
    pub path: PathBuf,
    /// Caller-chosen identifier
    pub name: String,
    pub one_shot: bool,
    generation: AtomicU32,
    state: Mutex<EntryState>,
}

impl AssetEntry {
    pub(crate) fn new(
        filename: &str,
        path: PathBuf,
        name: &str,
        payload: Payload,
        one_shot: bool,
    ) -> Self {
        Self {
            kind: payload.kind(),
            filename: filename.to_string(),
            path,
            name: name.to_string(),
            one_shot,
            generation: AtomicU32::new(0),
            state: Mutex::new(EntryState {
                completion: Completion::Incomplete,
                loaded_at: None,
                payload,
                error: None,
            }),
        }
    }

    pub fn completion(&self) -> Completion {
        self.state.lock().completion
    }

    /// Reload epoch; bumped every time a background job is submitted
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn loaded_at(&self) -> Option<FileTime> {
        self.state.lock().loaded_at
    }

    /// Message of the last failure, if the entry failed
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Run `f` with the payload locked
    pub fn with_payload<R>(&self, f: impl FnOnce(&Payload) -> R) -> R {
        f(&self.state.lock().payload)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock()
    }

    /// Start a new load epoch and return it
    pub(crate) fn begin_load(&self) -> u32 {
        let mut state = self.state.lock();
        state.completion = Completion::Incomplete;
        state.error = None;
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Commit a background result; returns false if the epoch is stale
    pub(crate) fn finish_thread_safe(
        &self,
        generation: u32,
        result: Result<Decoded, AssetError>,
        loaded_at: Option<FileTime>,
    ) -> bool {
        let mut state = self.state.lock();
        if self.generation() != generation {
            log::debug!(
                "Discarding stale load of '{}' (epoch {} superseded)",
                self.filename,
                generation
            );
            return false;
        }

        state.loaded_at = loaded_at;
        match result {
            Ok(decoded) => {
                apply_decoded(&mut state.payload, decoded);
                state.completion = Completion::ThreadSafe;
            }
            Err(e) => {
                log::error!("Failed to load '{}': {}", self.filename, e);
                state.error = Some(e.to_string());
                state.completion = Completion::Failed;
            }
        }
        true
    }

    pub(crate) fn finish_thread_unsafe(state: &mut EntryState, one_shot: bool) {
        state.completion = if one_shot {
            Completion::Done
        } else {
            Completion::ThreadUnsafe
        };
    }

    pub(crate) fn fail(state: &mut EntryState, error: &AssetError) {
        state.error = Some(error.to_string());
        state.completion = Completion::Failed;
    }
}

fn apply_decoded(payload: &mut Payload, decoded: Decoded) {
    match (payload, decoded) {
        (Payload::Texture { image, .. }, Decoded::Texture(img)) => *image = Some(img),
        (Payload::Font { atlas, .. }, Decoded::Font(a)) => *atlas = a,
        (Payload::Shader { source, .. }, Decoded::Shader(src)) => *source = Some(src),
        (Payload::Sound { data, .. }, Decoded::Sound(d)) => *data = d,
        (Payload::Stream { data }, Decoded::Stream(d)) => *data = d,
        (
            Payload::Song {
                manifest, streams, ..
            },
            Decoded::Song {
                manifest: m,
                streams: s,
            },
        ) => {
            *manifest = Some(m);
            *streams = s;
        }
        (Payload::OptionsLoad { options }, Decoded::Options(o)) => *options = Some(o),
        (Payload::OptionsSave { written, .. }, Decoded::Saved) => *written = true,
        (payload, decoded) => {
            log::error!(
                "Decoded {:?} doesn't match {:?} payload",
                decoded,
                payload.kind()
            );
        }
    }
}
