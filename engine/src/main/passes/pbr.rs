use super::{create_camera_buffer, write_camera, MeshDraw};
use crate::main::{
    gpu::{Binding, DrawCall, RenderTarget, SamplerKind},
    render_pass::{FrameContext, PassDesc, PassError, RenderPass},
    resources::{keys, BufferId, TextureId},
};

struct Environment {
    irradiance: TextureId,
    prefiltered: TextureId,
    brdf_lut: TextureId,
    camera: BufferId,
}

/// Image-lit static mesh
pub struct PbrPass {
    mesh: MeshDraw,
    environment: Option<Environment>,
}

impl PbrPass {
    pub const NAME: &'static str = "pbr";
    pub const ORDER: i32 = 10;

    pub fn new(mesh: MeshDraw) -> Self {
        Self {
            mesh,
            environment: None,
        }
    }

    pub fn desc() -> PassDesc {
        PassDesc::new(Self::NAME, Self::ORDER)
    }
}

impl RenderPass for PbrPass {
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        self.environment = Some(Environment {
            irradiance: ctx.resources.get_texture(keys::IRRADIANCE_TEXTURE)?,
            prefiltered: ctx.resources.get_texture(keys::PREFILTERED_TEXTURE)?,
            brdf_lut: ctx.resources.get_texture(keys::IBL_BRDF_LUT)?,
            camera: create_camera_buffer(ctx.device, "pbr camera"),
        });
        Ok(())
    }

    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let Some(env) = &self.environment else {
            return Err(PassError::not_initialized(Self::NAME));
        };
        write_camera(ctx.device, env.camera, ctx.camera)?;
        ctx.device.draw(
            &DrawCall::new("pbr", RenderTarget::Frame)
                .vertices(self.mesh.vertex_count)
                .bind(Binding::Uniform(env.camera))
                .bind(Binding::Storage(self.mesh.vertices))
                .bind(Binding::Texture(env.irradiance))
                .bind(Binding::Texture(env.prefiltered))
                .bind(Binding::Texture(env.brdf_lut))
                .bind(Binding::Sampler(SamplerKind::Linear)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main::{
        gpu::{BufferDesc, RenderDevice},
        passes::{ibl::IblSizes, tests::Harness, IblPass, SkyboxPass},
    };

    fn mesh(harness: &mut Harness) -> MeshDraw {
        MeshDraw {
            vertices: harness.device.create_buffer(&BufferDesc::storage("mesh", 36 * 32)),
            vertex_count: 36,
        }
    }

    #[test]
    fn draws_with_baked_environment() {
        let mut harness = Harness::new();
        SkyboxPass::new(8).init(&mut harness.ctx()).unwrap();
        IblPass::new(IblSizes::default()).init(&mut harness.ctx()).unwrap();
        let mesh = mesh(&mut harness);
        let mut pass = PbrPass::new(mesh);
        pass.init(&mut harness.ctx()).unwrap();
        harness.device.clear_commands();

        pass.tick(&mut harness.ctx()).unwrap();

        let draw = harness.device.draws().next().unwrap();
        assert_eq!(draw.vertex_count, 36);
        assert_eq!(draw.bindings[1], Binding::Storage(mesh.vertices));
        assert_eq!(
            draw.bindings[4],
            Binding::Texture(harness.resources.get_texture(keys::IBL_BRDF_LUT).unwrap())
        );
    }

    #[test]
    fn init_needs_ibl_outputs() {
        let mut harness = Harness::new();
        let mesh = mesh(&mut harness);
        assert!(matches!(PbrPass::new(mesh).init(&mut harness.ctx()), Err(PassError::Registry(_))));
    }
}
