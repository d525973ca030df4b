pub mod animation;
pub mod camera;
