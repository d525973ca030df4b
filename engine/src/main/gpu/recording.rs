use generational_arena::Arena;
use log::trace;

use super::{
    check_upload, check_write, resolve_clear, Binding, BufferDesc, DrawCall, GpuError, RenderDevice,
    RenderTarget, TextureDesc,
};
use crate::main::resources::{BufferId, TextureId};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateTexture { texture: TextureId, label: String },
    UploadTexture { texture: TextureId, bytes: usize },
    CreateBuffer { buffer: BufferId, label: String, size: u64 },
    WriteBuffer { buffer: BufferId, offset: u64, len: usize },
    /// Recorded with the clear the draw actually applies
    Draw(DrawCall),
    BeginFrame,
}

struct RecordedBuffer {
    desc: BufferDesc,
    contents: Vec<u8>,
}

/// Device without a GPU. Validates every call the way the wgpu backend would and keeps a log.
pub struct RecordingDevice {
    textures: Arena<TextureDesc>,
    buffers: Arena<RecordedBuffer>,
    commands: Vec<Command>,
    frame_size: (u32, u32),
    frame_written: bool,
}

impl RecordingDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            textures: Arena::new(),
            buffers: Arena::new(),
            commands: Vec::new(),
            frame_size: (width, height),
            frame_written: false,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|command| match command {
            Command::Draw(call) => Some(call),
            _ => None,
        })
    }

    pub fn draw_count(&self, program: &str) -> usize {
        self.draws().filter(|call| call.program == program).count()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(buffer.index()).map(|b| b.contents.as_slice())
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn check_binding(&self, binding: &Binding) -> Result<(), GpuError> {
        match *binding {
            Binding::Texture(texture) if !self.textures.contains(texture.index()) => {
                Err(GpuError::UnknownTexture(texture))
            }
            Binding::Uniform(buffer) | Binding::Storage(buffer)
                if !self.buffers.contains(buffer.index()) =>
            {
                Err(GpuError::UnknownBuffer(buffer))
            }
            _ => Ok(()),
        }
    }
}

impl RenderDevice for RecordingDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let texture = TextureId::from_index(self.textures.insert(desc.clone()));
        self.commands.push(Command::CreateTexture {
            texture,
            label: desc.label.clone(),
        });
        texture
    }

    fn create_texture_with_data(
        &mut self,
        desc: &TextureDesc,
        data: &[u8],
    ) -> Result<TextureId, GpuError> {
        check_upload(desc, data)?;
        let texture = self.create_texture(desc);
        self.commands.push(Command::UploadTexture {
            texture,
            bytes: data.len(),
        });
        Ok(texture)
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId {
        let buffer = BufferId::from_index(self.buffers.insert(RecordedBuffer {
            desc: desc.clone(),
            contents: vec![0; desc.size as usize],
        }));
        self.commands.push(Command::CreateBuffer {
            buffer,
            label: desc.label.clone(),
            size: desc.size,
        });
        buffer
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let recorded = self.buffers.get_mut(buffer.index()).ok_or(GpuError::UnknownBuffer(buffer))?;
        check_write(&recorded.desc.label, recorded.desc.size, offset, data.len())?;
        let start = offset as usize;
        recorded.contents[start..start + data.len()].copy_from_slice(data);
        self.commands.push(Command::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
        if let RenderTarget::Texture { texture, layer, mip } = call.target {
            let desc = self.textures.get(texture.index()).ok_or(GpuError::UnknownTexture(texture))?;
            desc.check_target(texture, layer, mip)?;
            if call.bindings.contains(&Binding::Texture(texture)) {
                return Err(GpuError::TargetBound(texture));
            }
        }
        for binding in &call.bindings {
            self.check_binding(binding)?;
        }
        trace!("draw '{}' ({})", call.label, call.program);
        let mut recorded = call.clone();
        recorded.clear = resolve_clear(call, self.frame_written);
        if call.target == RenderTarget::Frame {
            self.frame_written = true;
        }
        self.commands.push(Command::Draw(recorded));
        Ok(())
    }

    fn begin_frame(&mut self) {
        self.frame_written = false;
        self.commands.push(Command::BeginFrame);
    }

    fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture.index())
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main::gpu::{BufferDesc, TextureFormat};

    #[test]
    fn rejects_draws_into_missing_layers() {
        let mut device = RecordingDevice::new(8, 8);
        let cube =
            device.create_texture(&TextureDesc::cube("sky", 16, 2, TextureFormat::Rgba16Float));

        let ok = DrawCall::new("p", RenderTarget::Texture { texture: cube, layer: 5, mip: 1 });
        assert!(device.draw(&ok).is_ok());
        let bad = DrawCall::new("p", RenderTarget::Texture { texture: cube, layer: 6, mip: 0 });
        assert_eq!(
            device.draw(&bad),
            Err(GpuError::InvalidTarget { texture: cube, layer: 6, mip: 0 })
        );
        assert_eq!(device.draw_count("p"), 1);
    }

    #[test]
    fn buffer_writes_land_and_are_bounded() {
        let mut device = RecordingDevice::new(8, 8);
        let buffer = device.create_buffer(&BufferDesc::uniform("u", 8));
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_contents(buffer), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
        assert!(device.write_buffer(buffer, 6, &[0; 4]).is_err());
    }

    #[test]
    fn frame_clears_once_per_begin_frame() {
        let mut device = RecordingDevice::new(8, 8);
        let frame_draw = DrawCall::new("p", RenderTarget::Frame);
        for _ in 0..2 {
            device.begin_frame();
            device.draw(&frame_draw).unwrap();
            device.draw(&frame_draw).unwrap();
        }
        let clears: Vec<_> = device.draws().map(|call| call.clear.is_some()).collect();
        assert_eq!(clears, [true, false, true, false]);
    }

    #[test]
    fn upload_must_match_texture_size() {
        let mut device = RecordingDevice::new(8, 8);
        let desc = TextureDesc::d2("lut", 2, 2, TextureFormat::Rgba8Unorm);
        assert!(device.create_texture_with_data(&desc, &[0; 16]).is_ok());
        assert!(matches!(
            device.create_texture_with_data(&desc, &[0; 15]),
            Err(GpuError::DataSize { expected: 16, actual: 15, .. })
        ));
    }
}
