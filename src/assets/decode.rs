//! Background-phase decoders
//!
//! Each function here does blocking I/O and CPU-side decoding only; none of
//! them touches the device. Bad input is handled locally wherever a sane
//! fallback exists; only structured data (manifests) reports errors.

use std::path::Path;

use super::entry::{FontAtlas, Glyph, Image, SongManifest, SoundData};
use super::error::AssetError;
use crate::consts::{ATLAS_GRID, PLACEHOLDER_SIZE};

/// Placeholder color for textures that failed to decode
pub const MAGENTA: [u8; 4] = [255, 0, 255, 255];

/// First and last character rasterized into font atlases
pub const FIRST_GLYPH: char = ' ';
pub const LAST_GLYPH: char = '~';

/// Fixed-size all-magenta RGBA image
pub fn placeholder_image() -> Image {
    let texels = (PLACEHOLDER_SIZE * PLACEHOLDER_SIZE) as usize;
    Image {
        width: PLACEHOLDER_SIZE,
        height: PLACEHOLDER_SIZE,
        pixels: MAGENTA.repeat(texels),
    }
}

/// Decode a PNG into RGBA8
///
/// Never fails: a missing or corrupt file is logged and replaced by the
/// magenta placeholder so the broken asset is visible in game.
pub fn decode_png(path: &Path) -> Image {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Texture '{}' unreadable ({}), using placeholder", path.display(), e);
            return placeholder_image();
        }
    };

    match image::load_from_memory_with_format(&bytes, image::ImageFormat::Png) {
        Ok(img) => {
            let rgba = img.to_rgba8();
            Image {
                width: rgba.width(),
                height: rgba.height(),
                pixels: rgba.into_raw(),
            }
        }
        Err(e) => {
            log::warn!("Texture '{}' failed to decode ({}), using placeholder", path.display(), e);
            placeholder_image()
        }
    }
}

/// One rasterized glyph
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphBitmap {
    pub width: u32,
    pub height: u32,
    /// Row-major coverage, `width * height` bytes
    pub coverage: Vec<u8>,
    pub advance: f32,
    pub bearing_x: f32,
    pub bearing_y: f32,
}

/// Font rasterizer backend
pub trait FontRasterizer: Send + Sync {
    /// Rasterize `ch` from the font file contents at `pixel_size`
    fn rasterize(&self, font: &[u8], pixel_size: u32, ch: char) -> Option<GlyphBitmap>;
}

/// Rasterizer that draws every visible glyph as a hollow box
///
/// Keeps text layout measurable when no real font backend is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TofuRasterizer;

impl FontRasterizer for TofuRasterizer {
    fn rasterize(&self, _font: &[u8], pixel_size: u32, ch: char) -> Option<GlyphBitmap> {
        let height = pixel_size.max(2);
        let width = (height / 2).max(2);
        let advance = width as f32 + 1.0;
        if ch == ' ' {
            return Some(GlyphBitmap {
                width: 0,
                height: 0,
                coverage: Vec::new(),
                advance,
                bearing_x: 0.0,
                bearing_y: 0.0,
            });
        }

        let mut coverage = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                    coverage[(y * width + x) as usize] = 255;
                }
            }
        }
        Some(GlyphBitmap {
            width,
            height,
            coverage,
            advance,
            bearing_x: 0.0,
            bearing_y: height as f32,
        })
    }
}

/// Rasterize the printable ASCII range into a square atlas
///
/// Each glyph gets a cell of `next_power_of_two(pixel_size)` pixels placed by
/// character code on a 16x16 grid, so the atlas side is a power of two too.
/// Glyphs larger than their cell are clipped.
pub fn build_font_atlas(
    font: &[u8],
    pixel_size: u32,
    rasterizer: &dyn FontRasterizer,
) -> FontAtlas {
    let mut atlas = blank_atlas(pixel_size);
    let cell = atlas.cell;

    for ch in FIRST_GLYPH..=LAST_GLYPH {
        let Some(bitmap) = rasterizer.rasterize(font, pixel_size, ch) else {
            continue;
        };
        let code = ch as u32;
        let origin_x = (code % ATLAS_GRID) * cell;
        let origin_y = (code / ATLAS_GRID) * cell;
        let width = bitmap.width.min(cell);
        let height = bitmap.height.min(cell);

        for y in 0..height {
            let src = (y * bitmap.width) as usize;
            let dst = ((origin_y + y) * atlas.size + origin_x) as usize;
            atlas.coverage[dst..dst + width as usize]
                .copy_from_slice(&bitmap.coverage[src..src + width as usize]);
        }

        atlas.glyphs.push(Glyph {
            ch,
            x: origin_x,
            y: origin_y,
            width,
            height,
            advance: bitmap.advance,
            bearing_x: bitmap.bearing_x,
            bearing_y: bitmap.bearing_y,
        });
    }
    atlas
}

/// Correctly sized atlas with no glyphs (renders as invisible text)
pub fn blank_atlas(pixel_size: u32) -> FontAtlas {
    let cell = pixel_size.max(1).next_power_of_two();
    let size = cell * ATLAS_GRID;
    FontAtlas {
        size,
        cell,
        pixel_size,
        coverage: vec![0; (size * size) as usize],
        glyphs: Vec::new(),
    }
}

/// Load and rasterize a font file
///
/// Returns `None` when the file can't be read; the entry keeps an empty
/// payload and text using it renders blank.
pub fn load_font(
    path: &Path,
    pixel_size: u32,
    rasterizer: Option<&dyn FontRasterizer>,
) -> Option<FontAtlas> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Font '{}' unreadable ({}), text will be blank", path.display(), e);
            return None;
        }
    };
    match rasterizer {
        Some(r) => Some(build_font_atlas(&bytes, pixel_size, r)),
        None => {
            log::warn!("No font rasterizer configured for '{}'", path.display());
            Some(blank_atlas(pixel_size))
        }
    }
}

/// Read a PCM16 WAV file
pub fn read_wav(path: &Path) -> Result<SoundData, AssetError> {
    let audio_err = |source| AssetError::Audio {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = hound::WavReader::open(path).map_err(audio_err)?;
    let spec = reader.spec();
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(audio_err)?;
    Ok(SoundData {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Read a sound file, leaving the entry silent on failure
pub fn load_sound(path: &Path) -> Option<SoundData> {
    match read_wav(path) {
        Ok(sound) => Some(sound),
        Err(e) => {
            log::warn!("Sound unavailable: {}", e);
            None
        }
    }
}

/// Parse a song manifest; malformed JSON is an error
pub fn parse_song_manifest(path: &Path) -> Result<SongManifest, AssetError> {
    let text = std::fs::read_to_string(path).map_err(|e| AssetError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| AssetError::Json {
        path: path.to_path_buf(),
        source,
    })
}
