use std::{collections::HashMap, path::PathBuf, sync::Arc};

use generational_arena::Arena;
use log::{error, info, warn};
use pollster::FutureExt as _;
use wgpu::util::DeviceExt as _;

use super::{
    check_upload, check_write, resolve_clear, sampler_cache::SamplerCache,
    shader_cache::ShaderCache, Binding, BlendMode, BufferDesc, BufferUsage, DrawCall, GpuError,
    RenderDevice, RenderTarget, TextureDesc, TextureFormat, TextureKind,
};
use crate::main::resources::{BufferId, TextureId};

pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct GpuTexture {
    desc: TextureDesc,
    texture: wgpu::Texture,
    /// whole resource, viewed as its kind
    view: wgpu::TextureView,
}

struct GpuBuffer {
    desc: BufferDesc,
    buffer: wgpu::Buffer,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: String,
    format: wgpu::TextureFormat,
    blend: BlendMode,
    depth: bool,
}

struct CachedPipeline {
    pipeline: wgpu::RenderPipeline,
    is_fallback: bool,
}

/// Off-screen color and depth attachments that `RenderTarget::Frame` resolves to
pub struct FrameAttachment {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub depth_view: wgpu::TextureView,
}

pub struct WgpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    frame: FrameAttachment,
    frame_size: (u32, u32),
    textures: Arena<GpuTexture>,
    buffers: Arena<GpuBuffer>,
    shader_cache: ShaderCache,
    sampler_cache: SamplerCache,
    pipelines: HashMap<PipelineKey, Arc<CachedPipeline>>,
    frame_written: bool,
}

impl WgpuDevice {
    /// Device without a surface, the frame attachment is read back or presented by the caller
    pub fn new_headless(
        width: u32,
        height: u32,
        shader_dir: impl Into<PathBuf>,
    ) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .block_on()
            .map_err(|e| GpuError::AdapterUnavailable(e.to_string()))?;
        let info = adapter.get_info();
        info!("using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("gengine device"),
                // derived layouts mark every float texture filterable, ltc tables are Rgba32Float
                required_features: adapter.features() & wgpu::Features::FLOAT32_FILTERABLE,
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                ..Default::default()
            })
            .block_on()
            .map_err(|e| GpuError::Device(e.to_string()))?;
        device.on_uncaptured_error(Box::new(|e| error!("uncaptured wgpu error: {}", e)));

        let frame = create_frame(&device, width, height);
        Ok(Self {
            device,
            queue,
            frame,
            frame_size: (width, height),
            textures: Arena::new(),
            buffers: Arena::new(),
            shader_cache: ShaderCache::new(shader_dir),
            sampler_cache: SamplerCache::new(),
            pipelines: HashMap::new(),
            frame_written: false,
        })
    }

    pub fn frame(&self) -> &FrameAttachment {
        &self.frame
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.frame = create_frame(&self.device, width, height);
        self.frame_size = (width, height);
        self.frame_written = false;
    }

    pub fn reload_shaders(&mut self) {
        self.shader_cache.clear();
        self.pipelines.clear();
    }

    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(id.index()).map(|t| &t.texture)
    }

    fn pipeline(&mut self, key: PipelineKey) -> Arc<CachedPipeline> {
        if let Some(cached) = self.pipelines.get(&key) {
            return cached.clone();
        }
        let shader = self.shader_cache.get(&key.program, &self.device);
        let blend = match key.blend {
            BlendMode::Replace => wgpu::BlendState::REPLACE,
            BlendMode::Additive => {
                let add = wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                };
                wgpu::BlendState { color: add, alpha: add }
            }
        };
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&key.program),
            // derived from the shader, bind group 0 holds the draw's bindings in order
            layout: None,
            vertex: wgpu::VertexState {
                module: &shader.module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader.module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                // capture cubes are seen from the inside
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: key.depth.then(|| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let cached = Arc::new(CachedPipeline {
            pipeline,
            is_fallback: shader.is_fallback,
        });
        self.pipelines.insert(key, cached.clone());
        cached
    }

    fn bind_group(
        &mut self,
        call: &DrawCall,
        layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::BindGroup, GpuError> {
        let samplers: Vec<_> = call
            .bindings
            .iter()
            .map(|binding| match binding {
                Binding::Sampler(kind) => Some(self.sampler_cache.get(*kind, &self.device)),
                _ => None,
            })
            .collect();
        let mut entries = Vec::with_capacity(call.bindings.len());
        for (i, binding) in call.bindings.iter().enumerate() {
            let resource = match binding {
                Binding::Texture(id) => {
                    let texture = self
                        .textures
                        .get(id.index())
                        .ok_or(GpuError::UnknownTexture(*id))?;
                    wgpu::BindingResource::TextureView(&texture.view)
                }
                Binding::Uniform(id) | Binding::Storage(id) => {
                    let buffer = self.buffers.get(id.index()).ok_or(GpuError::UnknownBuffer(*id))?;
                    buffer.buffer.as_entire_binding()
                }
                Binding::Sampler(_) => match &samplers[i] {
                    Some(sampler) => wgpu::BindingResource::Sampler(sampler),
                    None => return Err(GpuError::Device("sampler cache miss".into())),
                },
            };
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32,
                resource,
            });
        }
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&call.label),
            layout,
            entries: &entries,
        }))
    }

    fn encode(
        &mut self,
        call: &DrawCall,
        clear: Option<[f32; 4]>,
    ) -> Result<wgpu::CommandBuffer, GpuError> {
        let (format, depth) = match call.target {
            RenderTarget::Frame => (FRAME_FORMAT, true),
            RenderTarget::Texture { texture, layer, mip } => {
                let gpu = self
                    .textures
                    .get(texture.index())
                    .ok_or(GpuError::UnknownTexture(texture))?;
                gpu.desc.check_target(texture, layer, mip)?;
                (to_wgpu_format(gpu.desc.format), false)
            }
        };

        let pipeline = self.pipeline(PipelineKey {
            program: call.program.clone(),
            format,
            blend: call.blend,
            depth,
        });
        let bind_group = if pipeline.is_fallback || call.bindings.is_empty() {
            None
        } else {
            let layout = pipeline.pipeline.get_bind_group_layout(0);
            Some(self.bind_group(call, &layout)?)
        };

        let layer_view;
        let target_view = match call.target {
            RenderTarget::Frame => &self.frame.view,
            RenderTarget::Texture { texture, layer, mip } => {
                let gpu = self
                    .textures
                    .get(texture.index())
                    .ok_or(GpuError::UnknownTexture(texture))?;
                layer_view = gpu.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&call.label),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                });
                &layer_view
            }
        };

        let load = match clear {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&call.label),
        });
        {
            let depth_attachment = depth.then(|| wgpu::RenderPassDepthStencilAttachment {
                view: &self.frame.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: match clear {
                        Some(_) => wgpu::LoadOp::Clear(1.0),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&call.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            if let Some(bind_group) = &bind_group {
                pass.set_bind_group(0, bind_group, &[]);
            }
            pass.draw(0..call.vertex_count, 0..1);
        }
        Ok(encoder.finish())
    }
}

impl RenderDevice for WgpuDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let texture = self.device.create_texture(&texture_descriptor(desc));
        let view = full_view(&texture, desc);
        TextureId::from_index(self.textures.insert(GpuTexture {
            desc: desc.clone(),
            texture,
            view,
        }))
    }

    fn create_texture_with_data(
        &mut self,
        desc: &TextureDesc,
        data: &[u8],
    ) -> Result<TextureId, GpuError> {
        check_upload(desc, data)?;
        let texture = self.device.create_texture_with_data(
            &self.queue,
            &texture_descriptor(desc),
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );
        let view = full_view(&texture, desc);
        Ok(TextureId::from_index(self.textures.insert(GpuTexture {
            desc: desc.clone(),
            texture,
            view,
        })))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId {
        let usage = match desc.usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE,
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage,
            mapped_at_creation: false,
        });
        BufferId::from_index(self.buffers.insert(GpuBuffer {
            desc: desc.clone(),
            buffer,
        }))
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let gpu = self.buffers.get(buffer.index()).ok_or(GpuError::UnknownBuffer(buffer))?;
        check_write(&gpu.desc.label, gpu.desc.size, offset, data.len())?;
        self.queue.write_buffer(&gpu.buffer, offset, data);
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let clear = resolve_clear(call, self.frame_written);
        let result = match self.encode(call, clear) {
            Ok(commands) => {
                self.queue.submit(Some(commands));
                if call.target == RenderTarget::Frame {
                    self.frame_written = true;
                }
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Some(e) = self.device.pop_error_scope().block_on() {
            warn!("draw '{}' ({}) rejected by the device", call.label, call.program);
            return Err(GpuError::Device(e.to_string()));
        }
        result
    }

    fn begin_frame(&mut self) {
        self.frame_written = false;
    }

    fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture.index()).map(|t| &t.desc)
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }
}

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
    }
}

fn texture_descriptor(desc: &TextureDesc) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(&desc.label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers,
        },
        mip_level_count: desc.mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: to_wgpu_format(desc.format),
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    }
}

fn full_view(texture: &wgpu::Texture, desc: &TextureDesc) -> wgpu::TextureView {
    let dimension = match desc.kind {
        TextureKind::D2 => wgpu::TextureViewDimension::D2,
        TextureKind::D2Array => wgpu::TextureViewDimension::D2Array,
        TextureKind::Cube => wgpu::TextureViewDimension::Cube,
    };
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(&desc.label),
        dimension: Some(dimension),
        ..Default::default()
    })
}

fn create_frame(device: &wgpu::Device, width: u32, height: u32) -> FrameAttachment {
    let size = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Frame Texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FRAME_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Frame Depth Texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    FrameAttachment {
        view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
        depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
        texture,
    }
}
