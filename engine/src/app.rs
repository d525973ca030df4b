use log::{info, warn};

use crate::{
    config::EngineConfig,
    game::camera::Camera,
    main::{
        gpu::RenderDevice,
        render_pass::{FrameContext, PassDesc, RenderPass},
        resources::ResourceRegistry,
        scheduler::{FrameStats, PassScheduler},
    },
};

/// Owns the device and everything passes share, and steps the pass chain one frame at a time
pub struct Engine<D: RenderDevice> {
    config: EngineConfig,
    device: D,
    resources: ResourceRegistry,
    scheduler: PassScheduler,
    camera: Camera,
    frame_index: u64,
    initialized: bool,
}

impl<D: RenderDevice> Engine<D> {
    pub fn new(config: EngineConfig, device: D) -> Self {
        let (width, height) = device.frame_size();
        Self {
            config,
            device,
            resources: ResourceRegistry::new(),
            scheduler: PassScheduler::new(),
            camera: Camera::new(width, height),
            frame_index: 0,
            initialized: false,
        }
    }

    pub fn register_pass(&mut self, desc: PassDesc, pass: impl RenderPass + 'static) {
        self.scheduler.register_render_pass(desc, Box::new(pass));
    }

    /// Initialises every registered pass in tick order. Returns the number that failed.
    pub fn init(&mut self) -> usize {
        if self.initialized {
            warn!("engine already initialised, only new passes are initialised");
        }
        let Self {
            device,
            resources,
            scheduler,
            camera,
            frame_index,
            ..
        } = self;
        let mut ctx = FrameContext {
            device,
            resources,
            camera,
            dt: 0.0,
            frame_index: *frame_index,
        };
        let failed = scheduler.init_all(&mut ctx);
        self.initialized = true;
        info!(
            "initialised {} passes ({} failed), tick order {:?}",
            self.scheduler.len(),
            failed,
            self.scheduler.tick_order()
        );
        failed
    }

    pub fn frame(&mut self, dt: f32) -> FrameStats {
        if !self.initialized {
            self.init();
        }
        let Self {
            device,
            resources,
            scheduler,
            camera,
            frame_index,
            ..
        } = self;
        device.begin_frame();
        let stats = scheduler.tick_frame(&mut FrameContext {
            device,
            resources,
            camera,
            dt,
            frame_index: *frame_index,
        });
        self.frame_index += 1;
        stats
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.resize(width, height);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn scheduler(&self) -> &PassScheduler {
        &self.scheduler
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}
