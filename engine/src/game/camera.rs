use glam::{Mat3, Mat4, Vec3};

pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub aspect: f32,
    /// degrees
    pub fovy: f32,
    pub znear: f32,
    pub zfar: f32,
}

/// Matches the `Camera` struct in the wgsl programs
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    /// inverse of projection * rotation-only view, maps clip space to sky directions
    pub inverse_view_proj_rot: [[f32; 4]; 4],
    /// w unused
    pub position: [f32; 4],
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 2.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            aspect: width as f32 / height.max(1) as f32,
            fovy: 45.0,
            znear: 0.1,
            zfar: 100.0,
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy.to_radians(), self.aspect, self.znear, self.zfar)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    /// View without translation, so the sky stays centred on the eye
    pub fn view_rotation(&self) -> Mat4 {
        Mat4::from_mat3(Mat3::from_mat4(self.view()))
    }

    pub fn to_uniform(&self) -> CameraUniform {
        let projection = self.projection();
        CameraUniform {
            view_proj: (projection * self.view()).to_cols_array_2d(),
            inverse_view_proj_rot: (projection * self.view_rotation()).inverse().to_cols_array_2d(),
            position: self.eye.extend(1.0).to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky_view_drops_translation() {
        let mut camera = Camera::new(1280, 720);
        camera.eye = Vec3::new(3.0, 1.0, 5.0);
        let sky = camera.view_rotation();
        assert_eq!(sky.w_axis, glam::Vec4::W);
        assert!(sky.x_axis.abs_diff_eq(camera.view().x_axis, 1e-6));
    }

    #[test]
    fn screen_centre_looks_at_target() {
        let mut camera = Camera::new(1280, 720);
        camera.eye = Vec3::new(3.0, 1.0, 5.0);
        let inverse = Mat4::from_cols_array_2d(&camera.to_uniform().inverse_view_proj_rot);
        let far = inverse * glam::Vec4::new(0.0, 0.0, 1.0, 1.0);
        let dir = (far.truncate() / far.w).normalize();
        assert!(dir.abs_diff_eq((camera.target - camera.eye).normalize(), 1e-4));
    }

    #[test]
    fn zero_height_keeps_aspect_finite() {
        let mut camera = Camera::new(1280, 720);
        camera.resize(640, 0);
        assert!(camera.aspect.is_finite());
        assert!(camera.projection().is_finite());
    }
}
