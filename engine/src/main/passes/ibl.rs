use log::info;

use super::create_face_buffers;
use crate::main::{
    gpu::{Binding, BufferDesc, DrawCall, RenderTarget, SamplerKind, TextureDesc, TextureFormat},
    render_pass::{FrameContext, PassDesc, PassError, RenderPass},
    resources::{keys, BufferId, TextureId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IblSizes {
    pub irradiance: u32,
    pub prefilter: u32,
    pub prefilter_mip_levels: u32,
    pub brdf_lut: u32,
}

impl Default for IblSizes {
    fn default() -> Self {
        Self {
            irradiance: 32,
            prefilter: 128,
            prefilter_mip_levels: 5,
            brdf_lut: 512,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrefilterUniform {
    pub roughness: f32,
    /// face size of the source cubemap, for mip selection while sampling
    pub source_size: f32,
    pub _pad: [f32; 2],
}

/// Roughness baked into each prefilter mip, 0 at the top and 1 at the last mip
pub fn mip_roughness(mip: u32, mip_levels: u32) -> f32 {
    if mip_levels <= 1 {
        0.0
    } else {
        mip as f32 / (mip_levels - 1) as f32
    }
}

struct Targets {
    skybox: TextureId,
    irradiance: TextureId,
    prefiltered: TextureId,
    brdf_lut: TextureId,
    faces: Vec<BufferId>,
    roughness: Vec<BufferId>,
}

/// Image based lighting bake. Reads `skybox_texture` and publishes `irradiance_texture`,
/// `prefiltered_texture` and `ibl_brdf_lut`; the convolutions run on its single tick.
pub struct IblPass {
    sizes: IblSizes,
    targets: Option<Targets>,
}

impl IblPass {
    pub const NAME: &'static str = "ibl";
    pub const ORDER: i32 = 1;

    pub fn new(sizes: IblSizes) -> Self {
        Self { sizes, targets: None }
    }

    pub fn desc() -> PassDesc {
        PassDesc::one_shot(Self::NAME, Self::ORDER)
    }
}

impl RenderPass for IblPass {
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let skybox = ctx.resources.get_texture(keys::SKYBOX_TEXTURE)?;
        let source_size = ctx.device.texture_desc(skybox).map_or(0, |desc| desc.width);
        let sizes = self.sizes;

        let irradiance = ctx.device.create_texture(&TextureDesc::cube(
            "irradiance",
            sizes.irradiance,
            1,
            TextureFormat::Rgba16Float,
        ));
        let prefiltered = ctx.device.create_texture(&TextureDesc::cube(
            "prefiltered",
            sizes.prefilter,
            sizes.prefilter_mip_levels,
            TextureFormat::Rgba16Float,
        ));
        let brdf_lut = ctx.device.create_texture(&TextureDesc::d2(
            "ibl brdf lut",
            sizes.brdf_lut,
            sizes.brdf_lut,
            TextureFormat::Rg16Float,
        ));

        let faces = create_face_buffers(ctx.device, "ibl capture")?;
        let roughness = (0..sizes.prefilter_mip_levels)
            .map(|mip| {
                let buffer = ctx.device.create_buffer(&BufferDesc::uniform(
                    &format!("prefilter mip {}", mip),
                    std::mem::size_of::<PrefilterUniform>() as u64,
                ));
                let uniform = PrefilterUniform {
                    roughness: mip_roughness(mip, sizes.prefilter_mip_levels),
                    source_size: source_size as f32,
                    _pad: [0.0; 2],
                };
                ctx.device.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform))?;
                Ok::<_, PassError>(buffer)
            })
            .collect::<Result<Vec<_>, PassError>>()?;

        ctx.resources.set(keys::IRRADIANCE_TEXTURE, irradiance);
        ctx.resources.set(keys::PREFILTERED_TEXTURE, prefiltered);
        ctx.resources.set(keys::IBL_BRDF_LUT, brdf_lut);
        self.targets = Some(Targets {
            skybox,
            irradiance,
            prefiltered,
            brdf_lut,
            faces,
            roughness,
        });
        Ok(())
    }

    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let Some(targets) = &self.targets else {
            return Err(PassError::not_initialized(Self::NAME));
        };

        for (layer, face) in targets.faces.iter().enumerate() {
            let target = RenderTarget::Texture {
                texture: targets.irradiance,
                layer: layer as u32,
                mip: 0,
            };
            ctx.device.draw(
                &DrawCall::new("ibl_irradiance", target)
                    .label(format!("irradiance face {}", layer))
                    .bind(Binding::Uniform(*face))
                    .bind(Binding::Texture(targets.skybox))
                    .bind(Binding::Sampler(SamplerKind::Linear)),
            )?;
        }

        for (mip, roughness) in targets.roughness.iter().enumerate() {
            for (layer, face) in targets.faces.iter().enumerate() {
                let target = RenderTarget::Texture {
                    texture: targets.prefiltered,
                    layer: layer as u32,
                    mip: mip as u32,
                };
                ctx.device.draw(
                    &DrawCall::new("ibl_prefilter", target)
                        .label(format!("prefilter mip {} face {}", mip, layer))
                        .bind(Binding::Uniform(*face))
                        .bind(Binding::Uniform(*roughness))
                        .bind(Binding::Texture(targets.skybox))
                        .bind(Binding::Sampler(SamplerKind::Linear)),
                )?;
            }
        }

        ctx.device.draw(&DrawCall::new(
            "ibl_brdf_lut",
            RenderTarget::Texture {
                texture: targets.brdf_lut,
                layer: 0,
                mip: 0,
            },
        ))?;

        info!(
            "baked image based lighting ({} irradiance, {}x{} mips prefiltered)",
            self.sizes.irradiance, self.sizes.prefilter, self.sizes.prefilter_mip_levels
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main::{
        gpu::RenderDevice,
        passes::{tests::Harness, SkyboxPass},
        resources::RegistryError,
    };

    #[test]
    fn init_without_skybox_fails_with_missing_key() {
        let mut harness = Harness::new();
        let err = IblPass::new(IblSizes::default()).init(&mut harness.ctx()).unwrap_err();
        assert!(matches!(
            err,
            PassError::Registry(RegistryError::NotFound(key)) if key == "skybox_texture"
        ));
        assert!(!harness.resources.contains(keys::IRRADIANCE_TEXTURE));
    }

    #[test]
    fn bake_covers_every_face_and_mip() {
        let mut harness = Harness::new();
        SkyboxPass::new(16).init(&mut harness.ctx()).unwrap();
        let mut pass = IblPass::new(IblSizes::default());
        pass.init(&mut harness.ctx()).unwrap();

        let prefiltered = harness.resources.get_texture(keys::PREFILTERED_TEXTURE).unwrap();
        let desc = harness.device.texture_desc(prefiltered).unwrap();
        assert_eq!((desc.width, desc.mip_levels, desc.layers), (128, 5, 6));
        assert!(harness.resources.contains(keys::IBL_BRDF_LUT));

        harness.device.clear_commands();
        pass.tick(&mut harness.ctx()).unwrap();

        assert_eq!(harness.device.draw_count("ibl_irradiance"), 6);
        assert_eq!(harness.device.draw_count("ibl_prefilter"), 30);
        assert_eq!(harness.device.draw_count("ibl_brdf_lut"), 1);
    }

    #[test]
    fn roughness_spans_mip_chain() {
        assert_eq!(mip_roughness(0, 5), 0.0);
        assert_eq!(mip_roughness(2, 5), 0.5);
        assert_eq!(mip_roughness(4, 5), 1.0);
        assert_eq!(mip_roughness(0, 1), 0.0);
    }
}
