//! Main-thread device interface
//!
//! Everything that must run on the thread owning the graphics/audio context
//! goes through [`Device`]: creating GPU object ids, uploading decoded
//! textures and sample buffers, compiling and linking shaders. The asset
//! loader only calls it from `register` and from its finalize pass.

use std::collections::HashMap;

/// Opaque GPU texture id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Opaque GPU shader id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

/// Opaque linked program id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Opaque audio buffer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundBufferId(pub u32);

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Main-thread finalize operations
pub trait Device {
    fn create_texture(&mut self) -> TextureId;
    /// Upload tightly packed RGBA8 pixels
    fn upload_texture(&mut self, texture: TextureId, width: u32, height: u32, rgba: &[u8]);
    fn create_shader(&mut self, stage: ShaderStage) -> ShaderId;
    /// Compile shader source, returning the compiler log on failure
    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> Result<(), String>;
    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String>;
    /// Upload interleaved PCM16 samples
    fn upload_sound(&mut self, samples: &[i16], channels: u16, sample_rate: u32) -> SoundBufferId;
}

/// Device that records every call instead of talking to a GPU
///
/// Used by the headless runner and tests. Shader sources containing the
/// word `error` fail to compile so failure paths can be exercised.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: u32,
    /// Bytes uploaded per texture (latest upload wins)
    pub textures: HashMap<TextureId, (u32, u32, usize)>,
    /// Number of uploads per texture
    pub texture_uploads: HashMap<TextureId, u32>,
    pub shaders: HashMap<ShaderId, ShaderStage>,
    pub compiled: Vec<ShaderId>,
    pub programs: Vec<(ProgramId, ShaderId, ShaderId)>,
    pub sounds: Vec<(SoundBufferId, usize)>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl Device for HeadlessDevice {
    fn create_texture(&mut self) -> TextureId {
        TextureId(self.next())
    }

    fn upload_texture(&mut self, texture: TextureId, width: u32, height: u32, rgba: &[u8]) {
        self.textures.insert(texture, (width, height, rgba.len()));
        *self.texture_uploads.entry(texture).or_insert(0) += 1;
    }

    fn create_shader(&mut self, stage: ShaderStage) -> ShaderId {
        let id = ShaderId(self.next());
        self.shaders.insert(id, stage);
        id
    }

    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> Result<(), String> {
        if source.contains("error") {
            return Err(format!("shader {} failed to compile", shader.0));
        }
        self.compiled.push(shader);
        Ok(())
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String> {
        if !self.compiled.contains(&vertex) || !self.compiled.contains(&fragment) {
            return Err("link requires two compiled stages".into());
        }
        let id = ProgramId(self.next());
        self.programs.push((id, vertex, fragment));
        Ok(id)
    }

    fn upload_sound(
        &mut self,
        samples: &[i16],
        _channels: u16,
        _sample_rate: u32,
    ) -> SoundBufferId {
        let id = SoundBufferId(self.next());
        self.sounds.push((id, samples.len()));
        id
    }
}
