use std::{cell::RefCell, collections::HashMap, rc::Rc};

use glam::{Mat4, Quat, Vec3};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use super::{
    bone::{Bone, ChannelTracks},
    AnimationError,
};

/// Size of the skinning matrix array, fixed by the shader's uniform array
pub const MAX_BONES: usize = 200;

/// Used when an imported clip doesn't specify a tick rate
pub const DEFAULT_TICKS_PER_SECOND: f32 = 25.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneInfo {
    pub index: usize,
    pub inverse_bind_transform: Mat4,
}

/// Bone name -> skinning slot map produced by the mesh loader. Clips loaded against a mesh
/// extend it in place, so every clip sharing the mesh agrees on bone indices.
#[derive(Clone, Debug, Default)]
pub struct SkinningData {
    pub bone_info: HashMap<String, BoneInfo>,
    pub bone_count: usize,
}

pub type SharedSkinning = Rc<RefCell<SkinningData>>;

impl SkinningData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedSkinning {
        Rc::new(RefCell::new(self))
    }

    /// Registers a skinned bone, returning its index. Existing names keep their slot.
    pub fn insert_bone(&mut self, name: &str, inverse_bind_transform: Mat4) -> usize {
        if let Some(info) = self.bone_info.get(name) {
            return info.index;
        }
        let index = self.bone_count;
        self.bone_info.insert(
            name.to_string(),
            BoneInfo {
                index,
                inverse_bind_transform,
            },
        );
        self.bone_count += 1;
        index
    }

    pub fn get(&self, name: &str) -> Option<&BoneInfo> {
        self.bone_info.get(name)
    }
}

/// Imported scene node. `transform` is row-major as it comes out of the importer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceNode {
    pub name: String,
    pub transform: [[f32; 4]; 4],
    #[serde(default)]
    pub children: Vec<SourceNode>,
}

impl SourceNode {
    pub fn new(name: impl Into<String>, transform: Mat4, children: Vec<SourceNode>) -> Self {
        Self {
            name: name.into(),
            // columns of the transpose are the rows
            transform: transform.transpose().to_cols_array_2d(),
            children,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceChannel {
    pub node_name: String,
    pub position_keys: Vec<(f32, Vec3)>,
    pub rotation_keys: Vec<(f32, Quat)>,
    pub scale_keys: Vec<(f32, Vec3)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceAnimation {
    pub name: String,
    /// ticks
    pub duration: f32,
    pub ticks_per_second: f32,
    pub channels: Vec<SourceChannel>,
}

#[derive(Clone, Debug)]
pub struct HierarchyNode {
    pub name: String,
    /// parent-relative, column-major
    pub bind_transform: Mat4,
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    pub fn from_source(src: &SourceNode) -> Self {
        Self {
            name: src.name.clone(),
            bind_transform: Mat4::from_cols_array_2d(&src.transform).transpose(),
            children: src.children.iter().map(HierarchyNode::from_source).collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(HierarchyNode::node_count).sum::<usize>()
    }

    pub fn find(&self, name: &str) -> Option<&HierarchyNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

#[derive(Debug)]
pub struct AnimationClip {
    name: String,
    duration: f32,
    ticks_per_second: f32,
    bones: Vec<Bone>,
    root: HierarchyNode,
    skinning: SharedSkinning,
}

impl AnimationClip {
    pub fn new(
        source: &SourceAnimation,
        scene_root: &SourceNode,
        skinning: &SharedSkinning,
    ) -> Result<Self, AnimationError> {
        let root = HierarchyNode::from_source(scene_root);
        let bones = Self::read_missing_bones(source, skinning)?;

        let bone_count = skinning.borrow().bone_count;
        if bone_count > MAX_BONES {
            error!(
                "clip '{}': {} bones exceed the {} skinning slots, extra bones won't deform",
                source.name, bone_count, MAX_BONES
            );
        }

        let ticks_per_second = if source.ticks_per_second > 0.0 {
            source.ticks_per_second
        } else {
            warn!(
                "clip '{}' has no tick rate, assuming {} ticks/s",
                source.name, DEFAULT_TICKS_PER_SECOND
            );
            DEFAULT_TICKS_PER_SECOND
        };

        debug!(
            "loaded clip '{}': {} bones, {} nodes, {} ticks",
            source.name,
            bones.len(),
            root.node_count(),
            source.duration
        );

        Ok(Self {
            name: source.name.clone(),
            duration: source.duration,
            ticks_per_second,
            bones,
            root,
            skinning: Rc::clone(skinning),
        })
    }

    /// Channels naming bones the mesh doesn't skin get the next free slot and an identity
    /// inverse bind. All tracks are validated before the shared map is touched.
    fn read_missing_bones(
        source: &SourceAnimation,
        skinning: &SharedSkinning,
    ) -> Result<Vec<Bone>, AnimationError> {
        let tracks = source
            .channels
            .iter()
            .map(ChannelTracks::read)
            .collect::<Result<Vec<_>, _>>()?;

        let mut skinning = skinning.borrow_mut();
        Ok(tracks
            .into_iter()
            .map(|channel| {
                let index = skinning.insert_bone(&channel.name, Mat4::IDENTITY);
                channel.into_bone(index)
            })
            .collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn ticks_per_second(&self) -> f32 {
        self.ticks_per_second
    }

    pub fn root(&self) -> &HierarchyNode {
        &self.root
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn skinning(&self) -> &SharedSkinning {
        &self.skinning
    }

    pub fn find_bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.name() == name)
    }

    pub fn bone_info(&self, name: &str) -> Option<BoneInfo> {
        self.skinning.borrow().get(name).copied()
    }
}
