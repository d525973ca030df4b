use log::debug;

use super::{create_camera_buffer, create_face_buffers, write_camera};
use crate::main::{
    gpu::{Binding, DrawCall, RenderTarget, SamplerKind, TextureDesc, TextureFormat},
    render_pass::{FrameContext, PassDesc, PassError, RenderPass},
    resources::{keys, BufferId, TextureId},
};

pub const DEFAULT_FACE_SIZE: u32 = 512;
pub const CLEAR_COLOR: [f32; 4] = [0.2, 0.3, 0.4, 1.0];

/// Captures the procedural sky into a cubemap once, then draws it behind everything each frame.
/// Publishes `skybox_texture`.
pub struct SkyboxPass {
    face_size: u32,
    cubemap: Option<TextureId>,
    camera: Option<BufferId>,
}

impl SkyboxPass {
    pub const NAME: &'static str = "skybox";
    pub const ORDER: i32 = 0;

    pub fn new(face_size: u32) -> Self {
        Self {
            face_size,
            cubemap: None,
            camera: None,
        }
    }

    pub fn desc() -> PassDesc {
        PassDesc::new(Self::NAME, Self::ORDER)
    }

    pub fn cubemap(&self) -> Option<TextureId> {
        self.cubemap
    }
}

impl Default for SkyboxPass {
    fn default() -> Self {
        Self::new(DEFAULT_FACE_SIZE)
    }
}

impl RenderPass for SkyboxPass {
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let cubemap = ctx.device.create_texture(&TextureDesc::cube(
            "skybox",
            self.face_size,
            1,
            TextureFormat::Rgba16Float,
        ));
        let faces = create_face_buffers(ctx.device, "skybox capture")?;
        for (layer, face) in faces.iter().enumerate() {
            let target = RenderTarget::Texture {
                texture: cubemap,
                layer: layer as u32,
                mip: 0,
            };
            ctx.device.draw(
                &DrawCall::new("skybox_capture", target)
                    .label(format!("skybox capture face {}", layer))
                    .bind(Binding::Uniform(*face))
                    .clear([0.0; 4]),
            )?;
        }
        debug!("captured {}x{} skybox", self.face_size, self.face_size);

        ctx.resources.set(keys::SKYBOX_TEXTURE, cubemap);
        self.cubemap = Some(cubemap);
        self.camera = Some(create_camera_buffer(ctx.device, "skybox camera"));
        Ok(())
    }

    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let (Some(cubemap), Some(camera)) = (self.cubemap, self.camera) else {
            return Err(PassError::not_initialized(Self::NAME));
        };
        write_camera(ctx.device, camera, ctx.camera)?;
        ctx.device.draw(
            &DrawCall::new("skybox", RenderTarget::Frame)
                .bind(Binding::Uniform(camera))
                .bind(Binding::Texture(cubemap))
                .bind(Binding::Sampler(SamplerKind::Linear))
                .clear(CLEAR_COLOR),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main::passes::tests::Harness;

    #[test]
    fn init_captures_every_face_and_publishes() {
        let mut harness = Harness::new();
        let mut pass = SkyboxPass::new(16);
        pass.init(&mut harness.ctx()).unwrap();

        let cubemap = harness.resources.get_texture(keys::SKYBOX_TEXTURE).unwrap();
        assert_eq!(Some(cubemap), pass.cubemap());
        let layers: Vec<_> = harness
            .device
            .draws()
            .filter(|call| call.program == "skybox_capture")
            .map(|call| match call.target {
                RenderTarget::Texture { layer, .. } => layer,
                RenderTarget::Frame => u32::MAX,
            })
            .collect();
        assert_eq!(layers, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn tick_clears_frame_and_draws_sky() {
        let mut harness = Harness::new();
        let mut pass = SkyboxPass::new(16);
        pass.init(&mut harness.ctx()).unwrap();
        harness.device.clear_commands();

        pass.tick(&mut harness.ctx()).unwrap();

        let draw = harness.device.draws().next().unwrap();
        assert_eq!(draw.program, "skybox");
        assert_eq!(draw.target, RenderTarget::Frame);
        assert_eq!(draw.clear, Some(CLEAR_COLOR));
        assert_eq!(draw.bindings[1], Binding::Texture(pass.cubemap().unwrap()));
    }

    #[test]
    fn tick_before_init_is_an_error() {
        let mut harness = Harness::new();
        assert!(matches!(SkyboxPass::default().tick(&mut harness.ctx()), Err(PassError::Setup(_))));
    }
}
