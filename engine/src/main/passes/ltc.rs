use glam::Vec3;
use log::debug;

use super::{create_camera_buffer, write_camera};
use crate::main::{
    gpu::{Binding, BufferDesc, DrawCall, RenderTarget, TextureDesc, TextureFormat},
    render_pass::{FrameContext, PassDesc, PassError, RenderPass},
    resources::{keys, BufferId, TextureId},
};

pub const LTC_TABLE_SIZE: u32 = 64;
/// f32 values in one RGBA table
pub const LTC_TABLE_LEN: usize = (LTC_TABLE_SIZE * LTC_TABLE_SIZE * 4) as usize;

pub const DEFAULT_LIGHT_COLOR: Vec3 = Vec3::splat(0.7);
const DEFAULT_INTENSITY: f32 = 4.0;
const MAX_INTENSITY: f32 = 10.0;
const DEFAULT_ROUGHNESS: f32 = 0.5;
const ALBEDO: Vec3 = Vec3::splat(0.5);

/// Quad corners of the area light, in winding order
pub const LIGHT_POINTS: [Vec3; 4] = [
    Vec3::new(-8.0, 2.4, -1.0),
    Vec3::new(-8.0, 2.4, 1.0),
    Vec3::new(-8.0, 0.4, 1.0),
    Vec3::new(-8.0, 0.4, -1.0),
];

/// Inverse-matrix and magnitude lookup tables, indexed by roughness and view angle
#[derive(Clone, Debug, PartialEq)]
pub struct LtcTables {
    ltc_1: Vec<f32>,
    ltc_2: Vec<f32>,
}

impl LtcTables {
    pub fn new(ltc_1: Vec<f32>, ltc_2: Vec<f32>) -> Result<Self, PassError> {
        for (name, table) in [("ltc_1", &ltc_1), ("ltc_2", &ltc_2)] {
            if table.len() != LTC_TABLE_LEN {
                return Err(PassError::Setup(format!(
                    "{} holds {} values, expected {}",
                    name,
                    table.len(),
                    LTC_TABLE_LEN
                )));
            }
        }
        Ok(Self { ltc_1, ltc_2 })
    }

    /// Tables describing a plain cosine lobe at every entry
    pub fn identity() -> Self {
        let ltc_1 = [1.0, 0.0, 0.0, 1.0].repeat(LTC_TABLE_LEN / 4);
        let ltc_2 = [1.0, 0.0, 0.0, 1.0].repeat(LTC_TABLE_LEN / 4);
        Self { ltc_1, ltc_2 }
    }

    pub fn ltc_1(&self) -> &[f32] {
        &self.ltc_1
    }

    pub fn ltc_2(&self) -> &[f32] {
        &self.ltc_2
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AreaLightUniform {
    pub points: [[f32; 4]; 4],
    /// rgb colour, w intensity
    pub color_intensity: [f32; 4],
    /// rgb albedo, w roughness
    pub albedo_roughness: [f32; 4],
    /// x is 1 when the light emits from both faces
    pub flags: [f32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaLight {
    pub color: Vec3,
    pub intensity: f32,
    pub roughness: f32,
    pub two_sided: bool,
}

impl Default for AreaLight {
    fn default() -> Self {
        Self {
            color: DEFAULT_LIGHT_COLOR,
            intensity: DEFAULT_INTENSITY,
            roughness: DEFAULT_ROUGHNESS,
            two_sided: true,
        }
    }
}

impl AreaLight {
    pub fn to_uniform(&self) -> AreaLightUniform {
        AreaLightUniform {
            points: LIGHT_POINTS.map(|p| p.extend(1.0).to_array()),
            color_intensity: self.color.extend(self.intensity).to_array(),
            albedo_roughness: ALBEDO.extend(self.roughness).to_array(),
            flags: [if self.two_sided { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        }
    }
}

struct Resources {
    ltc_1: TextureId,
    ltc_2: TextureId,
    light: BufferId,
    camera: BufferId,
}

/// Linearly transformed cosine area light over a textured floor plane.
/// Uploads and publishes `ltc_1` and `ltc_2`.
pub struct LtcPass {
    tables: LtcTables,
    light: AreaLight,
    resources: Option<Resources>,
}

impl LtcPass {
    pub const NAME: &'static str = "ltc";
    pub const ORDER: i32 = 12;

    pub fn new(tables: LtcTables) -> Self {
        Self {
            tables,
            light: AreaLight::default(),
            resources: None,
        }
    }

    pub fn desc() -> PassDesc {
        PassDesc::new(Self::NAME, Self::ORDER)
    }

    pub fn light(&self) -> &AreaLight {
        &self.light
    }

    pub fn set_light_color(&mut self, color: Vec3) {
        self.light.color = color;
    }

    pub fn increment_roughness(&mut self, step: f32) {
        self.light.roughness = (self.light.roughness + step).clamp(0.0, 1.0);
    }

    pub fn increment_light_intensity(&mut self, step: f32) {
        self.light.intensity = (self.light.intensity + step).clamp(0.0, MAX_INTENSITY);
    }

    pub fn set_two_sided(&mut self, two_sided: bool) {
        self.light.two_sided = two_sided;
    }
}

impl RenderPass for LtcPass {
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let desc = |label| {
            TextureDesc::d2(label, LTC_TABLE_SIZE, LTC_TABLE_SIZE, TextureFormat::Rgba32Float)
        };
        let ltc_1 = ctx
            .device
            .create_texture_with_data(&desc("ltc_1"), bytemuck::cast_slice(self.tables.ltc_1()))?;
        let ltc_2 = ctx
            .device
            .create_texture_with_data(&desc("ltc_2"), bytemuck::cast_slice(self.tables.ltc_2()))?;
        let light = ctx.device.create_buffer(&BufferDesc::uniform(
            "area light",
            std::mem::size_of::<AreaLightUniform>() as u64,
        ));

        ctx.resources.set(keys::LTC_1, ltc_1);
        ctx.resources.set(keys::LTC_2, ltc_2);
        self.resources = Some(Resources {
            ltc_1,
            ltc_2,
            light,
            camera: create_camera_buffer(ctx.device, "ltc camera"),
        });
        debug!("uploaded {0}x{0} ltc tables", LTC_TABLE_SIZE);
        Ok(())
    }

    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let Some(res) = &self.resources else {
            return Err(PassError::not_initialized(Self::NAME));
        };
        write_camera(ctx.device, res.camera, ctx.camera)?;
        ctx.device
            .write_buffer(res.light, 0, bytemuck::bytes_of(&self.light.to_uniform()))?;

        ctx.device.draw(
            &DrawCall::new("ltc_plane", RenderTarget::Frame)
                .vertices(6)
                .bind(Binding::Uniform(res.camera))
                .bind(Binding::Uniform(res.light))
                .bind(Binding::Texture(res.ltc_1))
                .bind(Binding::Texture(res.ltc_2)),
        )?;
        ctx.device.draw(
            &DrawCall::new("ltc_area_light", RenderTarget::Frame)
                .vertices(6)
                .bind(Binding::Uniform(res.camera))
                .bind(Binding::Uniform(res.light)),
        )?;
        Ok(())
    }
}
