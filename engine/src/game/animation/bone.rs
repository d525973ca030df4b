use glam::{Mat4, Quat, Vec3};

use super::{
    clip::SourceChannel,
    keyframe::{KeyframeTrack, TrackError},
    AnimationError,
};

/// Parent-relative TRS, kept separate so two clips can be blended before composing a matrix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BonePose {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl BonePose {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_matrix(matrix: &Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// translate * rotate * scale
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn blend(&self, other: &BonePose, factor: f32) -> BonePose {
        BonePose {
            translation: self.translation.lerp(other.translation, factor),
            rotation: self.rotation.slerp(other.rotation, factor).normalize(),
            scale: self.scale.lerp(other.scale, factor),
        }
    }
}

impl Default for BonePose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Clone, Debug)]
pub struct Bone {
    name: String,
    index: usize,
    positions: KeyframeTrack<Vec3>,
    rotations: KeyframeTrack<Quat>,
    scales: KeyframeTrack<Vec3>,
}

impl Bone {
    pub fn new(
        name: impl Into<String>,
        index: usize,
        positions: KeyframeTrack<Vec3>,
        rotations: KeyframeTrack<Quat>,
        scales: KeyframeTrack<Vec3>,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            positions,
            rotations: rotations.normalized(),
            scales,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Skinning slot, resolved against the mesh's bone-info map
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn interpolate_position(&self, time: f32) -> Vec3 {
        self.positions.sample(time)
    }

    pub fn interpolate_rotation(&self, time: f32) -> Quat {
        self.rotations.sample(time)
    }

    pub fn interpolate_scaling(&self, time: f32) -> Vec3 {
        self.scales.sample(time)
    }

    pub fn pose(&self, time: f32) -> BonePose {
        BonePose {
            translation: self.interpolate_position(time),
            rotation: self.interpolate_rotation(time),
            scale: self.interpolate_scaling(time),
        }
    }

    pub fn local_transform(&self, time: f32) -> Mat4 {
        self.pose(time).to_matrix()
    }

    pub fn positions(&self) -> &KeyframeTrack<Vec3> {
        &self.positions
    }

    pub fn rotations(&self) -> &KeyframeTrack<Quat> {
        &self.rotations
    }

    pub fn scales(&self) -> &KeyframeTrack<Vec3> {
        &self.scales
    }
}

/// Validated tracks of one imported channel, before a skinning index is assigned
pub(crate) struct ChannelTracks {
    pub name: String,
    pub positions: KeyframeTrack<Vec3>,
    pub rotations: KeyframeTrack<Quat>,
    pub scales: KeyframeTrack<Vec3>,
}

impl ChannelTracks {
    pub fn read(channel: &SourceChannel) -> Result<Self, AnimationError> {
        let violation = |channel_kind: &'static str| {
            let bone = channel.node_name.clone();
            move |source: TrackError| AnimationError::InvariantViolation {
                bone,
                channel: channel_kind,
                source,
            }
        };
        Ok(Self {
            name: channel.node_name.clone(),
            positions: KeyframeTrack::from_pairs(channel.position_keys.iter().copied())
                .map_err(violation("position"))?,
            rotations: KeyframeTrack::from_pairs(channel.rotation_keys.iter().copied())
                .map_err(violation("rotation"))?,
            scales: KeyframeTrack::from_pairs(channel.scale_keys.iter().copied())
                .map_err(violation("scale"))?,
        })
    }

    pub fn into_bone(self, index: usize) -> Bone {
        Bone::new(self.name, index, self.positions, self.rotations, self.scales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone() -> Bone {
        Bone::new(
            "hip",
            3,
            KeyframeTrack::from_pairs([(0.0, Vec3::ZERO), (10.0, Vec3::new(4.0, 0.0, 0.0))])
                .unwrap(),
            KeyframeTrack::from_pairs([
                (0.0, Quat::IDENTITY),
                (10.0, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2)),
            ])
            .unwrap(),
            KeyframeTrack::constant(Vec3::splat(2.0)),
        )
    }

    #[test]
    fn local_transform_is_trs() {
        let bone = bone();
        let m = bone.local_transform(5.0);
        let expected = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0))
            * Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_4))
            * Mat4::from_scale(Vec3::splat(2.0));
        assert!(m.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn separate_queries_match_pose() {
        let bone = bone();
        let pose = bone.pose(2.5);
        assert_eq!(pose.translation, bone.interpolate_position(2.5));
        assert_eq!(pose.rotation, bone.interpolate_rotation(2.5));
        assert_eq!(pose.scale, Vec3::splat(2.0));
    }

    #[test]
    fn pose_blend_interpolates_components() {
        let a = BonePose {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        };
        let b = BonePose {
            translation: Vec3::new(0.0, 2.0, 0.0),
            rotation: Quat::from_rotation_x(1.0),
            scale: Vec3::splat(3.0),
        };
        let mid = a.blend(&b, 0.5);
        assert!(mid.translation.abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-6));
        assert!(mid.rotation.abs_diff_eq(Quat::from_rotation_x(0.5), 1e-5));
        assert!(mid.scale.abs_diff_eq(Vec3::splat(2.0), 1e-6));
    }

    #[test]
    fn bad_channel_reports_bone_and_track() {
        let channel = SourceChannel {
            node_name: "spine".into(),
            position_keys: vec![(0.0, Vec3::ZERO)],
            rotation_keys: vec![],
            scale_keys: vec![(0.0, Vec3::ONE)],
        };
        let err = ChannelTracks::read(&channel).err().unwrap();
        assert_eq!(
            err,
            AnimationError::InvariantViolation {
                bone: "spine".into(),
                channel: "rotation",
                source: TrackError::Empty
            }
        );
        assert!(err.is_invariant_violation());
    }
}
