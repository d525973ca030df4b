use std::{collections::HashSet, rc::Rc};

use glam::Mat4;
use log::{debug, error};

use super::{
    bone::BonePose,
    clip::{AnimationClip, HierarchyNode, SkinningData, MAX_BONES},
    AnimationError,
};

/// Blend length in ticks of the from-clip's clock
pub const DEFAULT_BLEND_DURATION_TICKS: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Blending,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// hierarchy nodes visited
    pub evaluated_nodes: usize,
    pub written_matrices: usize,
    /// skinned nodes whose index falls outside the matrix array
    pub dropped_bones: usize,
}

struct Blend {
    from: Rc<AnimationClip>,
    to: Rc<AnimationClip>,
    /// ticks, local to each clip
    from_time: f32,
    to_time: f32,
    /// ticks since the blend started
    progress: f32,
    factor: f32,
}

enum Playback {
    Idle,
    Playing { clip: Rc<AnimationClip>, time: f32 },
    Blending(Blend),
}

pub struct AnimationPlayer {
    playback: Playback,
    blend_duration: f32,
    final_matrices: Box<[Mat4; MAX_BONES]>,
    /// "clip/bone" pairs already reported as out of range
    reported_drops: HashSet<String>,
    /// nodes reported as keyed by one clip of the current blend only
    reported_one_sided: HashSet<String>,
}

impl Default for AnimationPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationPlayer {
    pub fn new() -> Self {
        Self {
            playback: Playback::Idle,
            blend_duration: DEFAULT_BLEND_DURATION_TICKS,
            final_matrices: Box::new([Mat4::IDENTITY; MAX_BONES]),
            reported_drops: HashSet::new(),
            reported_one_sided: HashSet::new(),
        }
    }

    pub fn with_clip(clip: Rc<AnimationClip>) -> Self {
        let mut player = Self::new();
        player.play_animation(clip);
        player
    }

    pub fn with_blend_duration(mut self, ticks: f32) -> Self {
        self.blend_duration = ticks;
        self
    }

    pub fn play_animation(&mut self, clip: Rc<AnimationClip>) {
        debug!("playing '{}'", clip.name());
        self.playback = Playback::Playing { clip, time: 0.0 };
    }

    /// Starts a cross-fade. Both clips must share a skeleton, otherwise the player is left
    /// as it was.
    pub fn play_blended_animation(
        &mut self,
        from: Rc<AnimationClip>,
        to: Rc<AnimationClip>,
    ) -> Result<(), AnimationError> {
        if let Some(node) = diverging_node(from.root(), to.root()) {
            return Err(AnimationError::HierarchyMismatch {
                from: from.name().to_string(),
                to: to.name().to_string(),
                node: node.to_string(),
            });
        }
        debug!("blending '{}' -> '{}' over {} ticks", from.name(), to.name(), self.blend_duration);
        self.reported_one_sided.clear();
        self.playback = Playback::Blending(Blend {
            from,
            to,
            from_time: 0.0,
            to_time: 0.0,
            progress: 0.0,
            factor: 0.0,
        });
        Ok(())
    }

    /// Advances playback by `dt` seconds and recomputes the skinning matrices
    pub fn tick(&mut self, dt: f32) -> Result<TickReport, AnimationError> {
        let Self {
            playback,
            blend_duration,
            final_matrices,
            reported_drops,
            reported_one_sided,
        } = self;

        let completed = match playback {
            Playback::Idle => {
                error!("animation player ticked with no clip bound");
                return Err(AnimationError::NoClipBound);
            }
            Playback::Playing { clip, time } => {
                *time = wrap_time(*time + clip.ticks_per_second() * dt, clip.duration());
                None
            }
            Playback::Blending(blend) => {
                blend.from_time = wrap_time(
                    blend.from_time + blend.from.ticks_per_second() * dt,
                    blend.from.duration(),
                );
                blend.to_time = wrap_time(
                    blend.to_time + blend.to.ticks_per_second() * dt,
                    blend.to.duration(),
                );
                blend.progress += blend.from.ticks_per_second() * dt;
                blend.factor = if *blend_duration > 0.0 {
                    blend.progress / *blend_duration
                } else {
                    1.0
                };
                if blend.factor >= 1.0 {
                    debug!("blend '{}' -> '{}' complete", blend.from.name(), blend.to.name());
                    Some(Playback::Playing {
                        clip: Rc::clone(&blend.to),
                        time: blend.to_time,
                    })
                } else {
                    None
                }
            }
        };
        if let Some(next) = completed {
            *playback = next;
        }

        let mut writer = PoseWriter {
            matrices: &mut **final_matrices,
            reported: reported_drops,
            report: TickReport::default(),
        };
        match playback {
            Playback::Idle => {}
            Playback::Playing { clip, time } => evaluate_clip(clip, *time, &mut writer),
            Playback::Blending(blend) => evaluate_blend(blend, reported_one_sided, &mut writer),
        }
        Ok(writer.report)
    }

    /// Always `MAX_BONES` long, slots no bone writes to stay identity
    pub fn final_bone_matrices(&self) -> &[Mat4; MAX_BONES] {
        &self.final_matrices
    }

    pub fn state(&self) -> PlayerState {
        match self.playback {
            Playback::Idle => PlayerState::Idle,
            Playback::Playing { .. } => PlayerState::Playing,
            Playback::Blending(_) => PlayerState::Blending,
        }
    }

    /// The clip driving time, the from-clip while blending
    pub fn current_clip(&self) -> Option<&Rc<AnimationClip>> {
        match &self.playback {
            Playback::Idle => None,
            Playback::Playing { clip, .. } => Some(clip),
            Playback::Blending(blend) => Some(&blend.from),
        }
    }

    pub fn current_time(&self) -> f32 {
        match &self.playback {
            Playback::Idle => 0.0,
            Playback::Playing { time, .. } => *time,
            Playback::Blending(blend) => blend.from_time,
        }
    }

    pub fn blend_target(&self) -> Option<&Rc<AnimationClip>> {
        match &self.playback {
            Playback::Blending(blend) => Some(&blend.to),
            _ => None,
        }
    }

    pub fn blend_factor(&self) -> f32 {
        match &self.playback {
            Playback::Blending(blend) => blend.factor,
            _ => 0.0,
        }
    }

    pub fn blend_progress(&self) -> f32 {
        match &self.playback {
            Playback::Blending(blend) => blend.progress,
            _ => 0.0,
        }
    }

    pub fn blend_duration(&self) -> f32 {
        self.blend_duration
    }

    pub fn is_blending(&self) -> bool {
        matches!(self.playback, Playback::Blending(_))
    }
}

/// Looping clip time in `[0, duration)`
fn wrap_time(time: f32, duration: f32) -> f32 {
    if !(duration > 0.0) {
        return 0.0;
    }
    let t = time.rem_euclid(duration);
    // rem_euclid can round up to duration for tiny negative inputs
    if t >= duration {
        0.0
    } else {
        t
    }
}

fn diverging_node<'a>(a: &'a HierarchyNode, b: &HierarchyNode) -> Option<&'a str> {
    if a.name != b.name || a.children.len() != b.children.len() {
        return Some(&a.name);
    }
    a.children
        .iter()
        .zip(&b.children)
        .find_map(|(a, b)| diverging_node(a, b))
}

struct PoseWriter<'a> {
    matrices: &'a mut [Mat4; MAX_BONES],
    reported: &'a mut HashSet<String>,
    report: TickReport,
}

impl PoseWriter<'_> {
    fn visit(&mut self, clip: &str, node: &str, skinning: &SkinningData, global: Mat4) {
        self.report.evaluated_nodes += 1;
        let Some(info) = skinning.get(node) else {
            return;
        };
        match self.matrices.get_mut(info.index) {
            Some(slot) => {
                *slot = global * info.inverse_bind_transform;
                self.report.written_matrices += 1;
            }
            None => {
                self.report.dropped_bones += 1;
                if self.reported.insert(format!("{}/{}", clip, node)) {
                    error!(
                        "clip '{}': bone '{}' has index {}, past the {} skinning slots; \
                         not written",
                        clip, node, info.index, MAX_BONES
                    );
                }
            }
        }
    }
}

fn evaluate_clip(clip: &AnimationClip, time: f32, writer: &mut PoseWriter) {
    let skinning = clip.skinning().borrow();
    let mut stack = vec![(clip.root(), Mat4::IDENTITY)];
    while let Some((node, parent)) = stack.pop() {
        let local = match clip.find_bone(&node.name) {
            Some(bone) => bone.local_transform(time),
            None => node.bind_transform,
        };
        let global = parent * local;
        writer.visit(clip.name(), &node.name, &skinning, global);
        stack.extend(node.children.iter().rev().map(|child| (child, global)));
    }
}

/// Walks both hierarchies in lockstep. Index and inverse bind come from the from-clip.
fn evaluate_blend(
    blend: &Blend,
    reported_one_sided: &mut HashSet<String>,
    writer: &mut PoseWriter,
) {
    let skinning = blend.from.skinning().borrow();
    let mut stack = vec![(blend.from.root(), blend.to.root(), Mat4::IDENTITY)];
    while let Some((from_node, to_node, parent)) = stack.pop() {
        let from_bone = blend.from.find_bone(&from_node.name);
        let to_bone = blend.to.find_bone(&to_node.name);
        let local = match (from_bone, to_bone) {
            (None, None) => from_node.bind_transform,
            (from_bone, to_bone) => {
                let one_sided = from_bone.is_none() || to_bone.is_none();
                if one_sided && reported_one_sided.insert(from_node.name.clone()) {
                    error!(
                        "node '{}' is animated by only one of '{}' and '{}', \
                         using its bind pose for the other",
                        from_node.name,
                        blend.from.name(),
                        blend.to.name()
                    );
                }
                let from_pose = from_bone.map_or_else(
                    || BonePose::from_matrix(&from_node.bind_transform),
                    |bone| bone.pose(blend.from_time),
                );
                let to_pose = to_bone.map_or_else(
                    || BonePose::from_matrix(&to_node.bind_transform),
                    |bone| bone.pose(blend.to_time),
                );
                from_pose.blend(&to_pose, blend.factor).to_matrix()
            }
        };
        let global = parent * local;
        writer.visit(blend.from.name(), &from_node.name, &skinning, global);
        stack.extend(
            from_node
                .children
                .iter()
                .zip(&to_node.children)
                .rev()
                .map(|(a, b)| (a, b, global)),
        );
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;
    use crate::game::animation::clip::{
        tests::{animation, channel, skeleton},
        SharedSkinning, SourceNode,
    };

    fn rig() -> SharedSkinning {
        let mut skinning = SkinningData::new();
        for name in ["root", "hip", "foot"] {
            skinning.insert_bone(name, Mat4::IDENTITY);
        }
        skinning.shared()
    }

    fn clip(name: &str, hip_end: Option<Vec3>, skinning: &SharedSkinning) -> Rc<AnimationClip> {
        let channels = hip_end
            .map(|end| vec![channel("hip", vec![(0.0, Vec3::ZERO), (10.0, end)])])
            .unwrap_or_default();
        Rc::new(AnimationClip::new(&animation(name, channels), &skeleton(), skinning).unwrap())
    }

    fn translation_of(player: &AnimationPlayer, index: usize) -> Vec4 {
        player.final_bone_matrices()[index].w_axis
    }

    #[test]
    fn samples_hip_halfway_after_half_a_second() {
        let skinning = rig();
        let a = clip("a", Some(Vec3::X), &skinning);
        let mut player = AnimationPlayer::with_clip(Rc::clone(&a));

        let report = player.tick(0.5).unwrap();

        assert_eq!(player.current_time(), 5.0);
        let hip = a.find_bone("hip").unwrap();
        assert!(hip
            .interpolate_position(player.current_time())
            .abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
        assert!(translation_of(&player, 1).abs_diff_eq(Vec4::new(0.5, 0.0, 0.0, 1.0), 1e-6));
        // foot keeps its bind offset under the animated hip
        assert!(translation_of(&player, 2).abs_diff_eq(Vec4::new(0.5, -1.0, 0.0, 1.0), 1e-6));
        assert_eq!(
            report,
            TickReport {
                evaluated_nodes: 3,
                written_matrices: 3,
                dropped_bones: 0
            }
        );
    }

    #[test]
    fn time_loops_over_duration() {
        let skinning = rig();
        let mut player = AnimationPlayer::with_clip(clip("a", Some(Vec3::X), &skinning));
        for _ in 0..40 {
            player.tick(0.3).unwrap();
            let t = player.current_time();
            assert!((0.0..10.0).contains(&t), "time {} escaped the clip", t);
        }
        // 40 * 3 ticks = 120, a whole number of loops
        assert!(player.current_time() < 1e-3 || player.current_time() > 10.0 - 1e-3);
    }

    #[test]
    fn untouched_slots_stay_identity() {
        let skinning = rig();
        let mut player = AnimationPlayer::with_clip(clip("a", Some(Vec3::X), &skinning));
        player.tick(0.25).unwrap();
        assert!(player.final_bone_matrices()[3..].iter().all(|m| *m == Mat4::IDENTITY));
    }

    #[test]
    fn idle_tick_reports_missing_clip() {
        let mut player = AnimationPlayer::new();
        assert_eq!(player.tick(0.016), Err(AnimationError::NoClipBound));
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn blend_mixes_both_clips_halfway() {
        let skinning = rig();
        let a = clip("a", Some(Vec3::X), &skinning);
        let b = clip("b", Some(Vec3::new(0.0, 2.0, 0.0)), &skinning);
        let mut player = AnimationPlayer::new();
        player.play_blended_animation(a, b).unwrap();

        player.tick(0.5).unwrap();

        assert_eq!(player.state(), PlayerState::Blending);
        assert!((player.blend_factor() - 0.5).abs() < 1e-6);
        assert!(translation_of(&player, 1).abs_diff_eq(Vec4::new(0.25, 0.5, 0.0, 1.0), 1e-5));
    }

    #[test]
    fn blend_completes_into_target_clip() {
        let skinning = rig();
        let a = clip("a", Some(Vec3::X), &skinning);
        let b = clip("b", Some(Vec3::Y), &skinning);
        let mut player = AnimationPlayer::new();
        player.play_blended_animation(Rc::clone(&a), Rc::clone(&b)).unwrap();

        // 10 ticks of progress at 10 ticks/s
        player.tick(0.5).unwrap();
        player.tick(0.5).unwrap();

        assert_eq!(player.state(), PlayerState::Playing);
        assert!(Rc::ptr_eq(player.current_clip().unwrap(), &b));
        assert_eq!(player.blend_factor(), 0.0);
        assert_eq!(player.blend_progress(), 0.0);
        assert!(player.blend_target().is_none());
        assert!((0.0..10.0).contains(&player.current_time()));
    }

    #[test]
    fn blend_factor_never_decreases() {
        let skinning = rig();
        let mut player = AnimationPlayer::new().with_blend_duration(20.0);
        player
            .play_blended_animation(
                clip("a", Some(Vec3::X), &skinning),
                clip("b", Some(Vec3::Z), &skinning),
            )
            .unwrap();
        let mut last = player.blend_factor();
        while player.is_blending() {
            player.tick(0.07).unwrap();
            if !player.is_blending() {
                break;
            }
            assert!(player.blend_factor() >= last);
            last = player.blend_factor();
        }
        assert!(last > 0.9);
    }

    #[test]
    fn mismatched_skeletons_are_rejected() {
        let skinning = rig();
        let a = clip("a", Some(Vec3::X), &skinning);
        let other = SourceNode::new(
            "root",
            Mat4::IDENTITY,
            vec![SourceNode::new(
                "spine",
                Mat4::IDENTITY,
                vec![SourceNode::new("foot", Mat4::IDENTITY, vec![])],
            )],
        );
        let b = Rc::new(AnimationClip::new(&animation("b", vec![]), &other, &skinning).unwrap());

        let mut player = AnimationPlayer::with_clip(Rc::clone(&a));
        let err = player.play_blended_animation(Rc::clone(&a), b).unwrap_err();

        assert_eq!(
            err,
            AnimationError::HierarchyMismatch {
                from: "a".into(),
                to: "b".into(),
                node: "hip".into()
            }
        );
        assert!(err.is_invariant_violation());
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn one_sided_bone_blends_against_bind_pose() {
        let skinning = rig();
        let a = clip("a", Some(Vec3::X), &skinning);
        let still = clip("still", None, &skinning);
        let mut player = AnimationPlayer::new();
        player.play_blended_animation(a, still).unwrap();

        player.tick(0.5).unwrap();
        player.tick(0.0).unwrap();

        // (0.5, 0, 0) from the clip against the (0, 1, 0) bind offset
        assert!(translation_of(&player, 1).abs_diff_eq(Vec4::new(0.25, 0.5, 0.0, 1.0), 1e-5));
        assert_eq!(player.reported_one_sided.len(), 1);
        assert!(player.reported_one_sided.contains("hip"));
    }

    #[test]
    fn bones_past_matrix_array_are_dropped() {
        let mut skinning = SkinningData::new();
        let names: Vec<String> = (0..MAX_BONES + 5).map(|i| format!("b{}", i)).collect();
        for name in &names {
            skinning.insert_bone(name, Mat4::IDENTITY);
        }
        let skinning = skinning.shared();
        let children = names
            .iter()
            .map(|name| SourceNode::new(name.as_str(), Mat4::from_translation(Vec3::X), vec![]))
            .collect();
        let root = SourceNode::new("root", Mat4::IDENTITY, children);
        let clip =
            Rc::new(AnimationClip::new(&animation("big", vec![]), &root, &skinning).unwrap());

        let mut player = AnimationPlayer::with_clip(clip);
        let report = player.tick(0.1).unwrap();
        player.tick(0.1).unwrap();

        assert_eq!(report.written_matrices, MAX_BONES);
        assert_eq!(report.dropped_bones, 5);
        assert_eq!(report.evaluated_nodes, MAX_BONES + 6);
        assert_eq!(player.final_bone_matrices().len(), MAX_BONES);
        assert_eq!(player.reported_drops.len(), 5);
    }

    #[test]
    fn wrap_handles_degenerate_durations() {
        assert_eq!(wrap_time(12.0, 0.0), 0.0);
        assert_eq!(wrap_time(12.0, -3.0), 0.0);
        assert_eq!(wrap_time(12.0, 10.0), 2.0);
        assert!((0.0..10.0).contains(&wrap_time(-1e-9, 10.0)));
    }
}
