use thiserror::Error;

pub mod bone;
pub mod clip;
pub mod keyframe;
pub mod player;

pub use bone::{Bone, BonePose};
pub use clip::{
    AnimationClip, BoneInfo, HierarchyNode, SharedSkinning, SkinningData, SourceAnimation,
    SourceChannel, SourceNode, MAX_BONES,
};
pub use keyframe::{Keyframe, KeyframeTrack, Sample, TrackError};
pub use player::{AnimationPlayer, PlayerState, TickReport};

#[derive(Debug, Error, PartialEq)]
pub enum AnimationError {
    #[error("invariant violation in {channel} track of bone '{bone}': {source}")]
    InvariantViolation {
        bone: String,
        channel: &'static str,
        #[source]
        source: TrackError,
    },
    #[error("hierarchies of '{from}' and '{to}' diverge at node '{node}'")]
    HierarchyMismatch { from: String, to: String, node: String },
    #[error("no animation clip bound to the player")]
    NoClipBound,
}

impl AnimationError {
    /// Precondition violations, as opposed to data gaps the caller can ride out
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. } | Self::HierarchyMismatch { .. })
    }
}
