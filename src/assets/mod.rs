//! Asynchronous asset streaming
//!
//! - `pool`: Lazily grown worker threads with per-worker bounded queues
//! - `entry`: Registry entries, typed payloads and the completion state machine
//! - `decode`: Background-phase decoders (PNG, font atlas, WAV, song manifest)
//! - `loader`: Registration, per-frame finalize pass and hot reload

pub mod decode;
pub mod entry;
pub mod error;
pub mod loader;
pub mod pool;

pub use decode::{FontRasterizer, GlyphBitmap, TofuRasterizer};
pub use entry::{
    AssetEntry, AssetKind, AssetParam, Completion, FontAtlas, Glyph, Image, Payload, Song,
    SongManifest, SongTrack, SoundData,
};
pub use error::AssetError;
pub use loader::{AssetId, AssetLoader, LinkCallback, LoaderConfig};
pub use pool::WorkerPool;
