use glam::{Mat4, Vec4};

use super::{
    gpu::{BufferDesc, RenderDevice},
    render_pass::PassError,
    resources::BufferId,
};
use crate::game::camera::Camera;

pub mod atmosphere;
pub mod ibl;
pub mod ltc;
pub mod pbr;
pub mod skinned;
pub mod skybox;

pub use atmosphere::AtmospherePass;
pub use ibl::IblPass;
pub use ltc::{LtcPass, LtcTables};
pub use pbr::PbrPass;
pub use skinned::SkinnedMeshPass;
pub use skybox::SkyboxPass;

/// Vertex-pulled geometry supplied by the mesh loader
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshDraw {
    pub vertices: BufferId,
    pub vertex_count: u32,
}

/// Maps a face's clip-space xy (z = 1) to a world direction, one per cube layer.
/// Follows the wgpu cube convention with texture v growing downwards.
pub fn capture_face_basis() -> [Mat4; 6] {
    let x = Vec4::X;
    let y = Vec4::Y;
    let z = Vec4::Z;
    [
        // +x
        Mat4::from_cols(-z, y, x, Vec4::W),
        // -x
        Mat4::from_cols(z, y, -x, Vec4::W),
        // +y
        Mat4::from_cols(x, -z, y, Vec4::W),
        // -y
        Mat4::from_cols(x, z, -y, Vec4::W),
        // +z
        Mat4::from_cols(x, y, z, Vec4::W),
        // -z
        Mat4::from_cols(-x, y, -z, Vec4::W),
    ]
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FaceUniform {
    pub face_basis: [[f32; 4]; 4],
}

/// One uniform buffer per cube face, filled with `capture_face_basis`
pub(crate) fn create_face_buffers(
    device: &mut dyn RenderDevice,
    label: &str,
) -> Result<Vec<BufferId>, PassError> {
    capture_face_basis()
        .iter()
        .enumerate()
        .map(|(face, basis)| {
            let uniform = FaceUniform {
                face_basis: basis.to_cols_array_2d(),
            };
            let buffer = device.create_buffer(&BufferDesc::uniform(
                &format!("{} face {}", label, face),
                std::mem::size_of::<FaceUniform>() as u64,
            ));
            device.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform))?;
            Ok::<_, PassError>(buffer)
        })
        .collect()
}

pub(crate) fn create_camera_buffer(device: &mut dyn RenderDevice, label: &str) -> BufferId {
    device.create_buffer(&BufferDesc::uniform(
        label,
        std::mem::size_of::<crate::game::camera::CameraUniform>() as u64,
    ))
}

pub(crate) fn write_camera(
    device: &mut dyn RenderDevice,
    buffer: BufferId,
    camera: &Camera,
) -> Result<(), PassError> {
    device.write_buffer(buffer, 0, bytemuck::bytes_of(&camera.to_uniform()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Vec3;

    use super::*;
    use crate::main::{
        gpu::recording::RecordingDevice,
        render_pass::FrameContext,
        resources::ResourceRegistry,
    };

    pub struct Harness {
        pub device: RecordingDevice,
        pub resources: ResourceRegistry,
        pub camera: Camera,
        pub frame_index: u64,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                device: RecordingDevice::new(64, 64),
                resources: ResourceRegistry::new(),
                camera: Camera::new(64, 64),
                frame_index: 0,
            }
        }

        pub fn ctx(&mut self) -> FrameContext<'_> {
            FrameContext {
                device: &mut self.device,
                resources: &mut self.resources,
                camera: &self.camera,
                dt: 0.1,
                frame_index: self.frame_index,
            }
        }
    }

    fn direction(face: usize, ndc_x: f32, ndc_y: f32) -> Vec3 {
        (capture_face_basis()[face] * Vec4::new(ndc_x, ndc_y, 1.0, 0.0)).truncate()
    }

    #[test]
    fn face_centres_point_along_axes() {
        let axes = [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        for (face, axis) in axes.iter().enumerate() {
            assert_eq!(direction(face, 0.0, 0.0), *axis);
        }
    }

    #[test]
    fn face_corners_follow_cube_convention() {
        // top-left texel of +x is (+1, +1, +1), of +y is (-1, +1, -1)
        assert_eq!(direction(0, -1.0, 1.0), Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(direction(2, -1.0, 1.0), Vec3::new(-1.0, 1.0, -1.0));
        assert_eq!(direction(3, -1.0, 1.0), Vec3::new(-1.0, -1.0, 1.0));
        assert_eq!(direction(5, -1.0, 1.0), Vec3::new(1.0, 1.0, -1.0));
    }
}
