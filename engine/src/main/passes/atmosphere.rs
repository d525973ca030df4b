use glam::Vec3;
use log::{debug, info};

use super::{create_camera_buffer, write_camera};
use crate::main::{
    gpu::{
        Binding, BlendMode, BufferDesc, DrawCall, RenderDevice, RenderTarget, SamplerKind,
        TextureDesc, TextureFormat,
    },
    render_pass::{FrameContext, PassDesc, PassError, RenderPass},
    resources::{keys, BufferId, TextureId},
};

pub const TRANSMITTANCE_WIDTH: u32 = 256;
pub const TRANSMITTANCE_HEIGHT: u32 = 64;

pub const SCATTERING_R_SIZE: u32 = 32;
pub const SCATTERING_MU_SIZE: u32 = 128;
pub const SCATTERING_MU_S_SIZE: u32 = 32;
pub const SCATTERING_NU_SIZE: u32 = 8;

pub const SCATTERING_WIDTH: u32 = SCATTERING_NU_SIZE * SCATTERING_MU_S_SIZE;
pub const SCATTERING_HEIGHT: u32 = SCATTERING_MU_SIZE;
/// one array layer per altitude sample
pub const SCATTERING_DEPTH: u32 = SCATTERING_R_SIZE;

pub const IRRADIANCE_WIDTH: u32 = 64;
pub const IRRADIANCE_HEIGHT: u32 = 16;

pub const DEFAULT_SCATTERING_ORDERS: u32 = 4;

const BOTTOM_RADIUS_KM: f32 = 6360.0;
const SUN_ANGULAR_RADIUS: f32 = 0.00935 / 2.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LayerUniform {
    pub layer: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OrderUniform {
    pub scattering_order: u32,
    pub _pad: [u32; 3],
}

/// Multiple scattering is written raw to its delta table and divided by the rayleigh phase
/// when accumulated into the scattering table
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OutputUniform {
    pub divide_by_rayleigh_phase: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkyUniform {
    /// xyz direction towards the sun, w exposure
    pub sun_direction: [f32; 4],
    /// in kilometres, w unused
    pub earth_center: [f32; 4],
    /// tan and cos of the sun's angular radius
    pub sun_size: [f32; 4],
}

/// Sun position and exposure for the sky draw
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunParams {
    pub zenith: f32,
    pub azimuth: f32,
    pub exposure: f32,
}

impl Default for SunParams {
    fn default() -> Self {
        Self {
            zenith: 1.3,
            azimuth: 2.9,
            exposure: 10.0,
        }
    }
}

impl SunParams {
    /// z is up
    pub fn direction(&self) -> Vec3 {
        Vec3::new(
            self.azimuth.cos() * self.zenith.sin(),
            self.azimuth.sin() * self.zenith.sin(),
            self.zenith.cos(),
        )
    }

    fn to_uniform(self) -> SkyUniform {
        SkyUniform {
            sun_direction: self.direction().extend(self.exposure).to_array(),
            earth_center: [0.0, 0.0, -BOTTOM_RADIUS_KM, 0.0],
            sun_size: [SUN_ANGULAR_RADIUS.tan(), SUN_ANGULAR_RADIUS.cos(), 0.0, 0.0],
        }
    }
}

struct Textures {
    transmittance: TextureId,
    scattering: TextureId,
    irradiance: TextureId,
    delta_irradiance: TextureId,
    /// rayleigh in rgb, mie red in alpha
    delta_single_scattering: TextureId,
    delta_multiple_scattering: TextureId,
    delta_scattering_density: TextureId,
}

struct Buffers {
    layers: Vec<BufferId>,
    orders: Vec<BufferId>,
    /// raw, phase divided
    outputs: [BufferId; 2],
    sky: BufferId,
    camera: BufferId,
}

fn layer_target(texture: TextureId, layer: u32) -> RenderTarget {
    RenderTarget::Texture { texture, layer, mip: 0 }
}

fn uniform_buffer<T: bytemuck::Pod>(
    device: &mut dyn RenderDevice,
    label: &str,
    value: &T,
) -> Result<BufferId, PassError> {
    let buffer = device.create_buffer(&BufferDesc::uniform(label, std::mem::size_of::<T>() as u64));
    device.write_buffer(buffer, 0, bytemuck::bytes_of(value))?;
    Ok(buffer)
}

/// Precomputed atmospheric scattering. The lookup tables are built on the first tick,
/// every tick after that draws the sky from them. Publishes `atmosphere_transmittance`,
/// `atmosphere_scattering` and `atmosphere_irradiance`.
pub struct AtmospherePass {
    scattering_orders: u32,
    sun: SunParams,
    textures: Option<Textures>,
    buffers: Option<Buffers>,
    precomputed: bool,
}

impl AtmospherePass {
    pub const NAME: &'static str = "atmosphere";
    pub const ORDER: i32 = 2;

    pub fn new(scattering_orders: u32) -> Self {
        Self {
            scattering_orders: scattering_orders.max(1),
            sun: SunParams::default(),
            textures: None,
            buffers: None,
            precomputed: false,
        }
    }

    pub fn desc() -> PassDesc {
        PassDesc::new(Self::NAME, Self::ORDER)
    }

    pub fn is_precomputed(&self) -> bool {
        self.precomputed
    }

    pub fn sun(&self) -> SunParams {
        self.sun
    }

    /// Takes effect on the next tick
    pub fn set_sun(&mut self, sun: SunParams) {
        self.sun = sun;
    }

    fn precompute(
        &self,
        device: &mut dyn RenderDevice,
        t: &Textures,
        b: &Buffers,
    ) -> Result<usize, PassError> {
        let mut draws = Vec::new();

        draws.push(DrawCall::new("atmosphere_transmittance", layer_target(t.transmittance, 0)));
        // direct light stays in the delta table, the irradiance table only gathers sky light
        draws.push(
            DrawCall::new("atmosphere_direct_irradiance", layer_target(t.delta_irradiance, 0))
                .bind(Binding::Texture(t.transmittance))
                .bind(Binding::Sampler(SamplerKind::Linear)),
        );

        for (layer, layer_buffer) in b.layers.iter().enumerate() {
            let layer = layer as u32;
            for target in [t.delta_single_scattering, t.scattering] {
                draws.push(
                    DrawCall::new("atmosphere_single_scattering", layer_target(target, layer))
                        .label(format!("single scattering layer {}", layer))
                        .bind(Binding::Uniform(*layer_buffer))
                        .bind(Binding::Texture(t.transmittance))
                        .bind(Binding::Sampler(SamplerKind::Linear)),
                );
            }
        }

        for (order, order_buffer) in (2..).zip(&b.orders) {
            for (layer, layer_buffer) in b.layers.iter().enumerate() {
                let layer = layer as u32;
                draws.push(
                    DrawCall::new(
                        "atmosphere_scattering_density",
                        layer_target(t.delta_scattering_density, layer),
                    )
                    .label(format!("scattering density order {} layer {}", order, layer))
                    .bind(Binding::Uniform(*layer_buffer))
                    .bind(Binding::Uniform(*order_buffer))
                    .bind(Binding::Texture(t.transmittance))
                    .bind(Binding::Texture(t.delta_single_scattering))
                    .bind(Binding::Texture(t.delta_multiple_scattering))
                    .bind(Binding::Texture(t.delta_irradiance))
                    .bind(Binding::Sampler(SamplerKind::Linear)),
                );
            }

            for (target, blend) in [
                (t.delta_irradiance, BlendMode::Replace),
                (t.irradiance, BlendMode::Additive),
            ] {
                let mut draw =
                    DrawCall::new("atmosphere_indirect_irradiance", layer_target(target, 0))
                        .label(format!("indirect irradiance order {}", order))
                        .blend(blend)
                        .bind(Binding::Uniform(*order_buffer))
                        .bind(Binding::Texture(t.delta_single_scattering))
                        .bind(Binding::Texture(t.delta_multiple_scattering))
                        .bind(Binding::Sampler(SamplerKind::Linear));
                // starts the table over if an earlier precompute failed partway
                if order == 2 && target == t.irradiance {
                    draw = draw.clear([0.0; 4]);
                }
                draws.push(draw);
            }

            for (layer, layer_buffer) in b.layers.iter().enumerate() {
                let layer = layer as u32;
                for (target, blend, output) in [
                    (t.delta_multiple_scattering, BlendMode::Replace, b.outputs[0]),
                    (t.scattering, BlendMode::Additive, b.outputs[1]),
                ] {
                    draws.push(
                        DrawCall::new("atmosphere_multiple_scattering", layer_target(target, layer))
                            .label(format!("multiple scattering order {} layer {}", order, layer))
                            .blend(blend)
                            .bind(Binding::Uniform(*layer_buffer))
                            .bind(Binding::Uniform(output))
                            .bind(Binding::Texture(t.transmittance))
                            .bind(Binding::Texture(t.delta_scattering_density))
                            .bind(Binding::Sampler(SamplerKind::Linear)),
                    );
                }
            }
        }

        for call in &draws {
            device.draw(call)?;
        }
        Ok(draws.len())
    }
}

impl Default for AtmospherePass {
    fn default() -> Self {
        Self::new(DEFAULT_SCATTERING_ORDERS)
    }
}

impl RenderPass for AtmospherePass {
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let device = &mut *ctx.device;
        let format = TextureFormat::Rgba16Float;
        let scattering_array = |device: &mut dyn RenderDevice, label: &str| {
            device.create_texture(&TextureDesc::d2_array(
                label,
                SCATTERING_WIDTH,
                SCATTERING_HEIGHT,
                SCATTERING_DEPTH,
                format,
            ))
        };
        let textures = Textures {
            transmittance: device.create_texture(&TextureDesc::d2(
                "atmosphere transmittance",
                TRANSMITTANCE_WIDTH,
                TRANSMITTANCE_HEIGHT,
                format,
            )),
            scattering: scattering_array(&mut *device, "atmosphere scattering"),
            irradiance: device.create_texture(&TextureDesc::d2(
                "atmosphere irradiance",
                IRRADIANCE_WIDTH,
                IRRADIANCE_HEIGHT,
                format,
            )),
            delta_irradiance: device.create_texture(&TextureDesc::d2(
                "delta irradiance",
                IRRADIANCE_WIDTH,
                IRRADIANCE_HEIGHT,
                format,
            )),
            delta_single_scattering: scattering_array(&mut *device, "delta single scattering"),
            delta_multiple_scattering: scattering_array(&mut *device, "delta multiple scattering"),
            delta_scattering_density: scattering_array(&mut *device, "delta scattering density"),
        };

        let layers = (0..SCATTERING_DEPTH)
            .map(|layer| {
                let uniform = LayerUniform { layer, _pad: [0; 3] };
                uniform_buffer(device, &format!("atmosphere layer {}", layer), &uniform)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let orders = (2..=self.scattering_orders)
            .map(|scattering_order| {
                uniform_buffer(
                    device,
                    &format!("scattering order {}", scattering_order),
                    &OrderUniform {
                        scattering_order,
                        _pad: [0; 3],
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let output = |device: &mut dyn RenderDevice, divide_by_rayleigh_phase: u32| {
            uniform_buffer(
                device,
                "multiple scattering output",
                &OutputUniform {
                    divide_by_rayleigh_phase,
                    _pad: [0; 3],
                },
            )
        };
        let buffers = Buffers {
            layers,
            orders,
            outputs: [output(&mut *device, 0)?, output(&mut *device, 1)?],
            sky: uniform_buffer(device, "atmosphere sky", &self.sun.to_uniform())?,
            camera: create_camera_buffer(device, "atmosphere camera"),
        };

        ctx.resources.set(keys::ATMOSPHERE_TRANSMITTANCE, textures.transmittance);
        ctx.resources.set(keys::ATMOSPHERE_SCATTERING, textures.scattering);
        ctx.resources.set(keys::ATMOSPHERE_IRRADIANCE, textures.irradiance);
        self.textures = Some(textures);
        self.buffers = Some(buffers);
        self.precomputed = false;
        Ok(())
    }

    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let (Some(textures), Some(buffers)) = (&self.textures, &self.buffers) else {
            return Err(PassError::not_initialized(Self::NAME));
        };

        if !self.precomputed {
            let draws = self.precompute(ctx.device, textures, buffers)?;
            info!(
                "precomputed atmosphere, {} scattering orders in {} draws",
                self.scattering_orders, draws
            );
            self.precomputed = true;
            return Ok(());
        }

        write_camera(ctx.device, buffers.camera, ctx.camera)?;
        ctx.device
            .write_buffer(buffers.sky, 0, bytemuck::bytes_of(&self.sun.to_uniform()))?;
        ctx.device.draw(
            &DrawCall::new("atmosphere_sky", RenderTarget::Frame)
                .bind(Binding::Uniform(buffers.camera))
                .bind(Binding::Uniform(buffers.sky))
                .bind(Binding::Texture(textures.transmittance))
                .bind(Binding::Texture(textures.scattering))
                .bind(Binding::Texture(textures.irradiance))
                .bind(Binding::Sampler(SamplerKind::Linear)),
        )?;
        debug!("drew atmosphere sky, frame {}", ctx.frame_index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        game::camera::Camera,
        main::{
            gpu::{recording::RecordingDevice, GpuError},
            passes::tests::Harness,
            resources::ResourceRegistry,
        },
    };

    fn ready(orders: u32) -> (Harness, AtmospherePass) {
        let mut harness = Harness::new();
        let mut pass = AtmospherePass::new(orders);
        pass.init(&mut harness.ctx()).unwrap();
        harness.device.clear_commands();
        (harness, pass)
    }

    #[test]
    fn init_publishes_lookup_tables() {
        let (harness, pass) = ready(4);
        let scattering = harness.resources.get_texture(keys::ATMOSPHERE_SCATTERING).unwrap();
        let desc = harness.device.texture_desc(scattering).unwrap();
        assert_eq!((desc.width, desc.height, desc.layers), (256, 128, 32));
        assert!(harness.resources.contains(keys::ATMOSPHERE_TRANSMITTANCE));
        assert!(harness.resources.contains(keys::ATMOSPHERE_IRRADIANCE));
        assert!(!pass.is_precomputed());
    }

    #[test]
    fn first_tick_runs_every_order() {
        let (mut harness, mut pass) = ready(4);
        pass.tick(&mut harness.ctx()).unwrap();

        let device = &harness.device;
        assert!(pass.is_precomputed());
        assert_eq!(device.draw_count("atmosphere_transmittance"), 1);
        assert_eq!(device.draw_count("atmosphere_direct_irradiance"), 1);
        assert_eq!(device.draw_count("atmosphere_single_scattering"), 2 * 32);
        assert_eq!(device.draw_count("atmosphere_scattering_density"), 3 * 32);
        assert_eq!(device.draw_count("atmosphere_indirect_irradiance"), 3 * 2);
        assert_eq!(device.draw_count("atmosphere_multiple_scattering"), 3 * 2 * 32);
        assert_eq!(device.draw_count("atmosphere_sky"), 0);

        let irradiance = harness.resources.get_texture(keys::ATMOSPHERE_IRRADIANCE).unwrap();
        assert!(device
            .draws()
            .filter(|call| call.target == layer_target(irradiance, 0))
            .all(|call| call.blend == BlendMode::Additive));
    }

    #[test]
    fn single_order_skips_multiple_scattering() {
        let (mut harness, mut pass) = ready(1);
        pass.tick(&mut harness.ctx()).unwrap();
        assert_eq!(harness.device.draw_count("atmosphere_single_scattering"), 64);
        assert_eq!(harness.device.draw_count("atmosphere_scattering_density"), 0);
    }

    #[test]
    fn later_ticks_draw_sky_only() {
        let (mut harness, mut pass) = ready(2);
        pass.tick(&mut harness.ctx()).unwrap();
        harness.device.clear_commands();

        pass.tick(&mut harness.ctx()).unwrap();
        pass.tick(&mut harness.ctx()).unwrap();

        assert_eq!(harness.device.draw_count("atmosphere_sky"), 2);
        assert_eq!(harness.device.draws().count(), 2);
    }

    /// Fails the draw numbered `fail_at`, counting from zero
    struct FailingDevice {
        inner: RecordingDevice,
        draws: usize,
        fail_at: usize,
    }

    impl RenderDevice for FailingDevice {
        fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
            self.inner.create_texture(desc)
        }

        fn create_texture_with_data(
            &mut self,
            desc: &TextureDesc,
            data: &[u8],
        ) -> Result<TextureId, GpuError> {
            self.inner.create_texture_with_data(desc, data)
        }

        fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId {
            self.inner.create_buffer(desc)
        }

        fn write_buffer(
            &mut self,
            buffer: BufferId,
            offset: u64,
            data: &[u8],
        ) -> Result<(), GpuError> {
            self.inner.write_buffer(buffer, offset, data)
        }

        fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
            let index = self.draws;
            self.draws += 1;
            if index == self.fail_at {
                return Err(GpuError::Device(format!("lost '{}'", call.label)));
            }
            self.inner.draw(call)
        }

        fn begin_frame(&mut self) {
            self.inner.begin_frame();
        }

        fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
            self.inner.texture_desc(texture)
        }

        fn frame_size(&self) -> (u32, u32) {
            self.inner.frame_size()
        }
    }

    #[test]
    fn retried_precompute_restarts_irradiance() {
        // two orders: 2 + 64 single scattering + 32 density + 2 irradiance + 64 multiple scattering
        let precompute_draws = 2 + 64 + 32 + 2 + 64;
        let mut device = FailingDevice {
            inner: RecordingDevice::new(64, 64),
            draws: 0,
            fail_at: precompute_draws - 1,
        };
        let mut resources = ResourceRegistry::new();
        let camera = Camera::new(64, 64);
        let mut pass = AtmospherePass::new(2);
        let mut ctx = FrameContext {
            device: &mut device,
            resources: &mut resources,
            camera: &camera,
            dt: 0.1,
            frame_index: 0,
        };
        pass.init(&mut ctx).unwrap();
        assert!(pass.tick(&mut ctx).is_err());
        assert!(!pass.is_precomputed());
        pass.tick(&mut ctx).unwrap();
        assert!(pass.is_precomputed());

        let irradiance = resources.get_texture(keys::ATMOSPHERE_IRRADIANCE).unwrap();
        let into_irradiance: Vec<_> = device
            .inner
            .draws()
            .filter(|call| call.target == layer_target(irradiance, 0))
            .map(|call| call.clear.is_some())
            .collect();
        // every attempt starts the table from zero
        assert_eq!(into_irradiance, [true, true]);
    }

    #[test]
    fn sun_direction_follows_angles() {
        let overhead = SunParams {
            zenith: 0.0,
            ..SunParams::default()
        };
        assert!(overhead.direction().abs_diff_eq(Vec3::Z, 1e-6));
        let horizon = SunParams {
            zenith: std::f32::consts::FRAC_PI_2,
            azimuth: 0.0,
            exposure: 1.0,
        };
        assert!(horizon.direction().abs_diff_eq(Vec3::X, 1e-6));
    }
}
