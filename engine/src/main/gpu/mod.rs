use thiserror::Error;

use super::resources::{BufferId, TextureId};

pub mod recording;
pub mod sampler_cache;
pub mod shader_cache;
pub mod wgpu_device;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    D2Array,
    /// six layers, +x -x +y -y +z -z
    Cube,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
}

impl TextureDesc {
    pub fn d2(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            layers: 1,
            mip_levels: 1,
            format,
            kind: TextureKind::D2,
        }
    }

    pub fn d2_array(
        label: &str,
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
    ) -> Self {
        Self {
            layers,
            kind: TextureKind::D2Array,
            ..Self::d2(label, width, height, format)
        }
    }

    pub fn cube(label: &str, size: u32, mip_levels: u32, format: TextureFormat) -> Self {
        Self {
            layers: 6,
            mip_levels: mip_levels.max(1),
            kind: TextureKind::Cube,
            ..Self::d2(label, size, size, format)
        }
    }

    pub fn mip_size(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Bytes expected by an upload: every mip of every layer, layer-major
    pub fn upload_size(&self) -> usize {
        let per_layer: u64 = (0..self.mip_levels)
            .map(|mip| {
                let (w, h) = self.mip_size(mip);
                w as u64 * h as u64 * self.format.bytes_per_pixel() as u64
            })
            .sum();
        (per_layer * self.layers as u64) as usize
    }

    pub fn check_target(&self, texture: TextureId, layer: u32, mip: u32) -> Result<(), GpuError> {
        if layer >= self.layers || mip >= self.mip_levels {
            return Err(GpuError::InvalidTarget {
                texture,
                layer,
                mip,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Uniform,
    Storage,
    Vertex,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn uniform(label: &str, size: u64) -> Self {
        Self {
            label: label.to_string(),
            size,
            usage: BufferUsage::Uniform,
        }
    }

    pub fn storage(label: &str, size: u64) -> Self {
        Self {
            usage: BufferUsage::Storage,
            ..Self::uniform(label, size)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    Linear,
    Nearest,
}

/// Bound in order to group 0, binding 0..n
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Binding {
    Texture(TextureId),
    Sampler(SamplerKind),
    Uniform(BufferId),
    Storage(BufferId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderTarget {
    /// Off-screen frame attachment handed to the presenter
    Frame,
    Texture { texture: TextureId, layer: u32, mip: u32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Replace,
    Additive,
}

/// One full-target draw of a named program, vertices are generated in the vertex stage
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub label: String,
    pub program: String,
    pub target: RenderTarget,
    pub bindings: Vec<Binding>,
    pub vertex_count: u32,
    pub clear: Option<[f32; 4]>,
    pub blend: BlendMode,
}

impl DrawCall {
    pub fn new(program: &str, target: RenderTarget) -> Self {
        Self {
            label: program.to_string(),
            program: program.to_string(),
            target,
            bindings: Vec::new(),
            vertex_count: 3,
            clear: None,
            blend: BlendMode::Replace,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn bind(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn vertices(mut self, count: u32) -> Self {
        self.vertex_count = count;
        self
    }

    pub fn clear(mut self, color: [f32; 4]) -> Self {
        self.clear = Some(color);
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GpuError {
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("{texture:?} has no layer {layer} mip {mip}")]
    InvalidTarget { texture: TextureId, layer: u32, mip: u32 },
    #[error("{0:?} is sampled by the draw that renders to it")]
    TargetBound(TextureId),
    #[error("write of {len} bytes at {offset} overruns '{label}' ({size} bytes)")]
    OutOfBounds { label: String, offset: u64, len: usize, size: u64 },
    #[error("'{label}' expects {expected} bytes of texel data, got {actual}")]
    DataSize { label: String, expected: usize, actual: usize },
    #[error("no suitable adapter: {0}")]
    AdapterUnavailable(String),
    #[error("device error: {0}")]
    Device(String),
}

/// Everything a pass may ask of the graphics backend
pub trait RenderDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;
    fn create_texture_with_data(
        &mut self,
        desc: &TextureDesc,
        data: &[u8],
    ) -> Result<TextureId, GpuError>;
    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId;
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError>;
    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError>;
    /// Marks the frame attachment stale, the next draw into it clears colour and depth
    fn begin_frame(&mut self);
    fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc>;
    fn frame_size(&self) -> (u32, u32);
}

/// Colour the frame starts from when no pass clears it
pub const FRAME_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Clear applied by a draw, given whether the frame attachment was written since `begin_frame`
pub(crate) fn resolve_clear(call: &DrawCall, frame_written: bool) -> Option<[f32; 4]> {
    match (call.target, call.clear) {
        (RenderTarget::Frame, None) if !frame_written => Some(FRAME_CLEAR_COLOR),
        (_, clear) => clear,
    }
}

pub(crate) fn check_write(label: &str, size: u64, offset: u64, len: usize) -> Result<(), GpuError> {
    if offset.checked_add(len as u64).map_or(true, |end| end > size) {
        return Err(GpuError::OutOfBounds {
            label: label.to_string(),
            offset,
            len,
            size,
        });
    }
    Ok(())
}

pub(crate) fn check_upload(desc: &TextureDesc, data: &[u8]) -> Result<(), GpuError> {
    let expected = desc.upload_size();
    if data.len() != expected {
        return Err(GpuError::DataSize {
            label: desc.label.clone(),
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
