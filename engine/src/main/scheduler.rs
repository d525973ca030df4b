use log::{debug, error, info};

use super::render_pass::{FrameContext, PassDesc, PassType, RenderPass, RETIRED_ORDER};

struct PassSlot {
    desc: PassDesc,
    pass: Box<dyn RenderPass>,
    initialized: bool,
}

impl PassSlot {
    /// false if the pass reported an error, it is still considered initialised
    fn init(&mut self, ctx: &mut FrameContext) -> bool {
        self.initialized = true;
        match self.pass.init(ctx) {
            Ok(()) => {
                debug!("initialised pass '{}'", self.desc.name);
                true
            }
            Err(e) => {
                error!("pass '{}' failed to initialise: {}", self.desc.name, e);
                false
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub ticked: usize,
    /// init or tick errors this frame
    pub failed: usize,
    pub retired: usize,
}

#[derive(Default)]
pub struct PassScheduler {
    passes: Vec<PassSlot>,
}

impl PassScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_render_pass(&mut self, desc: PassDesc, pass: Box<dyn RenderPass>) {
        info!("registered pass '{}' (order {}, {:?})", desc.name, desc.order, desc.kind);
        self.passes.push(PassSlot {
            desc,
            pass,
            initialized: false,
        });
        // stable, equal orders keep registration order
        self.passes.sort_by_key(|slot| slot.desc.order);
    }

    /// Initialises every pass not yet initialised, in order. Returns the number that failed.
    pub fn init_all(&mut self, ctx: &mut FrameContext) -> usize {
        self.passes
            .iter_mut()
            .filter(|slot| !slot.initialized)
            .map(|slot| slot.init(ctx))
            .filter(|ok| !ok)
            .count()
    }

    pub fn tick_frame(&mut self, ctx: &mut FrameContext) -> FrameStats {
        let mut stats = FrameStats::default();
        for slot in &mut self.passes {
            if !slot.desc.is_active() {
                continue;
            }
            if !slot.initialized {
                debug!("pass '{}' registered after init, initialising now", slot.desc.name);
                if !slot.init(ctx) {
                    stats.failed += 1;
                }
            }
            match slot.pass.tick(ctx) {
                Ok(()) => stats.ticked += 1,
                Err(e) => {
                    error!("pass '{}' failed to tick: {}", slot.desc.name, e);
                    stats.failed += 1;
                }
            }
            if slot.desc.kind == PassType::OneShot {
                debug!("retiring one-shot pass '{}'", slot.desc.name);
                slot.desc.order = RETIRED_ORDER;
                stats.retired += 1;
            }
        }
        stats
    }

    pub fn passes(&self) -> impl Iterator<Item = &PassDesc> {
        self.passes.iter().map(|slot| &slot.desc)
    }

    /// Names of the passes the next frame will tick, in order
    pub fn tick_order(&self) -> Vec<&str> {
        self.passes()
            .filter(|desc| desc.is_active())
            .map(|desc| desc.name.as_str())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&PassDesc> {
        self.passes().find(|desc| desc.name == name)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}
