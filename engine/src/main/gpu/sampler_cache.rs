use std::{collections::HashMap, sync::Arc};

use super::SamplerKind;

pub struct SamplerCache {
    pub cache: HashMap<SamplerKind, Arc<wgpu::Sampler>>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, kind: SamplerKind, device: &wgpu::Device) -> Arc<wgpu::Sampler> {
        self.cache
            .entry(kind)
            .or_insert_with(|| Arc::new(device.create_sampler(&descriptor(kind))))
            .clone()
    }
}

fn descriptor(kind: SamplerKind) -> wgpu::SamplerDescriptor<'static> {
    let filter = match kind {
        SamplerKind::Linear => wgpu::FilterMode::Linear,
        SamplerKind::Nearest => wgpu::FilterMode::Nearest,
    };
    wgpu::SamplerDescriptor {
        label: Some(match kind {
            SamplerKind::Linear => "linear sampler",
            SamplerKind::Nearest => "nearest sampler",
        }),
        // clamp on every axis so cubemap seams don't wrap
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        lod_min_clamp: 0.0,
        lod_max_clamp: 100.0,
        ..Default::default()
    }
}
