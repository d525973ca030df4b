use thiserror::Error;

use super::{
    gpu::{GpuError, RenderDevice},
    resources::{RegistryError, ResourceRegistry},
};
use crate::game::{animation::AnimationError, camera::Camera};

/// Order of a pass that will never tick again
pub const RETIRED_ORDER: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassType {
    /// ticks every frame
    Default,
    /// ticks once, then retires
    OneShot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassDesc {
    pub name: String,
    /// ascending, ties keep registration order; negative means inactive
    pub order: i32,
    pub kind: PassType,
}

impl PassDesc {
    pub fn new(name: impl Into<String>, order: i32) -> Self {
        Self {
            name: name.into(),
            order,
            kind: PassType::Default,
        }
    }

    pub fn one_shot(name: impl Into<String>, order: i32) -> Self {
        Self {
            kind: PassType::OneShot,
            ..Self::new(name, order)
        }
    }

    pub fn is_active(&self) -> bool {
        self.order >= 0
    }
}

/// Everything a pass can touch during init or tick
pub struct FrameContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub resources: &'a mut ResourceRegistry,
    pub camera: &'a Camera,
    /// seconds since the previous frame
    pub dt: f32,
    pub frame_index: u64,
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Animation(#[from] AnimationError),
    #[error("{0}")]
    Setup(String),
}

impl PassError {
    pub(crate) fn not_initialized(pass: &str) -> Self {
        PassError::Setup(format!("pass '{}' ticked before init", pass))
    }
}

pub trait RenderPass {
    /// Runs once before the pass first ticks. Producers publish their registry keys here.
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError>;
    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError>;
}
