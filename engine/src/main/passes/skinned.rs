use std::{cell::RefCell, rc::Rc};

use glam::Mat4;
use log::{error, trace};

use super::{create_camera_buffer, write_camera, MeshDraw};
use crate::{
    game::animation::{AnimationPlayer, MAX_BONES},
    main::{
        gpu::{Binding, BufferDesc, DrawCall, RenderTarget},
        render_pass::{FrameContext, PassDesc, PassError, RenderPass},
        resources::{keys, BufferId},
    },
};

pub const BONE_BUFFER_SIZE: u64 = (MAX_BONES * std::mem::size_of::<Mat4>()) as u64;

struct Buffers {
    bones: BufferId,
    camera: BufferId,
}

/// Advances the shared player every frame and draws its mesh with the resulting palette.
/// Publishes `bone_matrices`.
pub struct SkinnedMeshPass {
    player: Rc<RefCell<AnimationPlayer>>,
    mesh: MeshDraw,
    buffers: Option<Buffers>,
}

impl SkinnedMeshPass {
    pub const NAME: &'static str = "skinned";
    pub const ORDER: i32 = 11;

    pub fn new(player: Rc<RefCell<AnimationPlayer>>, mesh: MeshDraw) -> Self {
        Self {
            player,
            mesh,
            buffers: None,
        }
    }

    pub fn desc() -> PassDesc {
        PassDesc::new(Self::NAME, Self::ORDER)
    }

    pub fn player(&self) -> &Rc<RefCell<AnimationPlayer>> {
        &self.player
    }
}

impl RenderPass for SkinnedMeshPass {
    fn init(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let bones = ctx
            .device
            .create_buffer(&BufferDesc::storage("bone matrices", BONE_BUFFER_SIZE));
        ctx.device.write_buffer(
            bones,
            0,
            bytemuck::cast_slice(&self.player.borrow().final_bone_matrices()[..]),
        )?;
        ctx.resources.set(keys::BONE_MATRICES, bones);
        self.buffers = Some(Buffers {
            bones,
            camera: create_camera_buffer(ctx.device, "skinned camera"),
        });
        Ok(())
    }

    fn tick(&mut self, ctx: &mut FrameContext) -> Result<(), PassError> {
        let Some(buffers) = &self.buffers else {
            return Err(PassError::not_initialized(Self::NAME));
        };

        let mut player = self.player.borrow_mut();
        // the mesh still draws with last frame's palette
        match player.tick(ctx.dt) {
            Ok(report) => trace!("skinned pose: {:?}", report),
            Err(e) => error!("skinned mesh animation: {}", e),
        }
        let palette = bytemuck::cast_slice(&player.final_bone_matrices()[..]);
        ctx.device.write_buffer(buffers.bones, 0, palette)?;
        drop(player);

        write_camera(ctx.device, buffers.camera, ctx.camera)?;
        ctx.device.draw(
            &DrawCall::new("skinned", RenderTarget::Frame)
                .vertices(self.mesh.vertex_count)
                .bind(Binding::Uniform(buffers.camera))
                .bind(Binding::Storage(self.mesh.vertices))
                .bind(Binding::Storage(buffers.bones)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{
        game::animation::{
            clip::tests::{animation, channel, skeleton},
            AnimationClip, SkinningData,
        },
        main::{gpu::RenderDevice, passes::tests::Harness},
    };

    fn pass(harness: &mut Harness, player: AnimationPlayer) -> SkinnedMeshPass {
        let mesh = MeshDraw {
            vertices: harness.device.create_buffer(&BufferDesc::storage("mesh", 64)),
            vertex_count: 6,
        };
        SkinnedMeshPass::new(Rc::new(RefCell::new(player)), mesh)
    }

    fn walking_player() -> AnimationPlayer {
        let skinning = SkinningData::new().shared();
        let clip = AnimationClip::new(
            &animation(
                "walk",
                vec![channel("hip", vec![(0.0, Vec3::ZERO), (10.0, Vec3::new(10.0, 0.0, 0.0))])],
            ),
            &skeleton(),
            &skinning,
        )
        .unwrap();
        AnimationPlayer::with_clip(Rc::new(clip))
    }

    #[test]
    fn tick_uploads_current_palette() {
        let mut harness = Harness::new();
        let mut pass = pass(&mut harness, walking_player());
        pass.init(&mut harness.ctx()).unwrap();

        pass.tick(&mut harness.ctx()).unwrap();

        let bones = harness.resources.get_buffer(keys::BONE_MATRICES).unwrap();
        let uploaded = harness.device.buffer_contents(bones).unwrap();
        assert_eq!(uploaded.len() as u64, BONE_BUFFER_SIZE);
        assert_eq!(
            uploaded,
            bytemuck::cast_slice::<Mat4, u8>(&pass.player().borrow().final_bone_matrices()[..])
        );
        // dt 0.1s at 10 ticks per second moves the hip one unit
        let hip_translation: [f32; 4] = bytemuck::pod_read_unaligned(&uploaded[48..64]);
        assert!(Vec3::from_slice(&hip_translation[..3])
            .abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-4));
        assert_eq!(harness.device.draw_count("skinned"), 1);
    }

    #[test]
    fn idle_player_still_draws() {
        let mut harness = Harness::new();
        let mut pass = pass(&mut harness, AnimationPlayer::new());
        pass.init(&mut harness.ctx()).unwrap();

        pass.tick(&mut harness.ctx()).unwrap();

        let draw = harness.device.draws().last().unwrap();
        assert_eq!(draw.program, "skinned");
        assert_eq!(draw.bindings.len(), 3);
    }
}
