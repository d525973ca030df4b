use std::rc::Rc;

use anyhow::Context as _;
use gengine::{
    game::animation::{
        AnimationClip, SharedSkinning, SkinningData, SourceAnimation, SourceChannel, SourceNode,
    },
    main::{
        gpu::{BufferDesc, BufferUsage, RenderDevice},
        passes::MeshDraw,
    },
};
use glam::{Mat4, Quat, Vec3};

const SEGMENT_HEIGHT: f32 = 1.0;
const HALF_WIDTH: f32 = 0.2;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 4],
    normal: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SkinnedVertex {
    position: [f32; 4],
    normal: [f32; 4],
    joints: [u32; 4],
    weights: [f32; 4],
}

/// Two-segment arm: root -> shoulder -> elbow
pub struct DemoRig {
    pub idle: Rc<AnimationClip>,
    pub wave: Rc<AnimationClip>,
    pub skinning: SharedSkinning,
}

fn skeleton() -> SourceNode {
    SourceNode::new(
        "root",
        Mat4::IDENTITY,
        vec![SourceNode::new(
            "shoulder",
            Mat4::IDENTITY,
            vec![SourceNode::new(
                "elbow",
                Mat4::from_translation(Vec3::Y * SEGMENT_HEIGHT),
                vec![],
            )],
        )],
    )
}

fn swing(node: &str, amplitude: f32, duration: f32) -> SourceChannel {
    let rotation_keys = (0..=4)
        .map(|i| {
            let t = duration * i as f32 / 4.0;
            let angle = amplitude * (t / duration * std::f32::consts::TAU).sin();
            (t, Quat::from_rotation_z(angle))
        })
        .collect();
    let rest = match node {
        "elbow" => Vec3::Y * SEGMENT_HEIGHT,
        _ => Vec3::ZERO,
    };
    SourceChannel {
        node_name: node.to_string(),
        position_keys: vec![(0.0, rest)],
        rotation_keys,
        scale_keys: vec![(0.0, Vec3::ONE)],
    }
}

fn clip(name: &str, amplitudes: (f32, f32), duration: f32) -> SourceAnimation {
    SourceAnimation {
        name: name.to_string(),
        duration,
        ticks_per_second: 24.0,
        channels: vec![
            swing("shoulder", amplitudes.0, duration),
            swing("elbow", amplitudes.1, duration),
        ],
    }
}

impl DemoRig {
    pub fn new() -> anyhow::Result<Self> {
        let mut mesh = SkinningData::new();
        mesh.insert_bone("shoulder", Mat4::IDENTITY);
        mesh.insert_bone("elbow", Mat4::from_translation(-Vec3::Y * SEGMENT_HEIGHT));
        let skinning = mesh.shared();

        let root = skeleton();
        let idle = AnimationClip::new(&clip("idle", (0.05, 0.1), 48.0), &root, &skinning)
            .context("idle clip")?;
        let wave = AnimationClip::new(&clip("wave", (0.4, 0.9), 24.0), &root, &skinning)
            .context("wave clip")?;
        Ok(Self {
            idle: Rc::new(idle),
            wave: Rc::new(wave),
            skinning,
        })
    }
}

/// Quad strip up the arm, the lower half follows the shoulder and the upper half the elbow
pub fn arm_mesh(device: &mut dyn RenderDevice) -> anyhow::Result<MeshDraw> {
    let normal = [0.0, 0.0, 1.0, 0.0];
    let vertex = |x: f32, y: f32, joint: u32| SkinnedVertex {
        position: [x, y, 0.0, 1.0],
        normal,
        joints: [joint, 0, 0, 0],
        weights: [1.0, 0.0, 0.0, 0.0],
    };
    let mut vertices = Vec::new();
    for segment in 0..2u32 {
        let y0 = segment as f32 * SEGMENT_HEIGHT;
        let y1 = y0 + SEGMENT_HEIGHT;
        let (a, b, c, d) = (
            vertex(-HALF_WIDTH, y0, segment),
            vertex(HALF_WIDTH, y0, segment),
            vertex(HALF_WIDTH, y1, segment),
            vertex(-HALF_WIDTH, y1, segment),
        );
        vertices.extend([a, b, c, a, c, d]);
    }
    upload(device, "arm vertices", &vertices)
}

/// Flat shaded octahedron
pub fn probe_mesh(device: &mut dyn RenderDevice, centre: Vec3) -> anyhow::Result<MeshDraw> {
    let axes = [Vec3::X, Vec3::Z, -Vec3::X, -Vec3::Z];
    let mut vertices = Vec::new();
    for pole in [Vec3::Y, -Vec3::Y] {
        for i in 0..4 {
            let (a, b) = (axes[i], axes[(i + 1) % 4]);
            let (a, b) = if pole.y > 0.0 { (b, a) } else { (a, b) };
            let normal = (a - pole).cross(b - pole).normalize();
            for p in [pole, a, b] {
                vertices.push(Vertex {
                    position: (centre + p * 0.5).extend(1.0).to_array(),
                    normal: normal.extend(0.0).to_array(),
                });
            }
        }
    }
    upload(device, "probe vertices", &vertices)
}

fn upload<T: bytemuck::Pod>(
    device: &mut dyn RenderDevice,
    label: &str,
    vertices: &[T],
) -> anyhow::Result<MeshDraw> {
    let bytes: &[u8] = bytemuck::cast_slice(vertices);
    let buffer = device.create_buffer(&BufferDesc {
        label: label.to_string(),
        size: bytes.len() as u64,
        usage: BufferUsage::Vertex,
    });
    device.write_buffer(buffer, 0, bytes)?;
    Ok(MeshDraw {
        vertices: buffer,
        vertex_count: vertices.len() as u32,
    })
}
