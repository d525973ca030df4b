use std::{collections::HashMap, fmt, marker::PhantomData};

use generational_arena::Index;
use log::{error, info, warn};
use thiserror::Error;

/// Conventional registry keys. Producers and consumers agree on these by name only.
pub mod keys {
    pub const SKYBOX_TEXTURE: &str = "skybox_texture";
    pub const IRRADIANCE_TEXTURE: &str = "irradiance_texture";
    pub const PREFILTERED_TEXTURE: &str = "prefiltered_texture";
    pub const IBL_BRDF_LUT: &str = "ibl_brdf_lut";
    pub const BONE_MATRICES: &str = "bone_matrices";
    pub const ATMOSPHERE_TRANSMITTANCE: &str = "atmosphere_transmittance";
    pub const ATMOSPHERE_SCATTERING: &str = "atmosphere_scattering";
    pub const ATMOSPHERE_IRRADIANCE: &str = "atmosphere_irradiance";
    pub const LTC_1: &str = "ltc_1";
    pub const LTC_2: &str = "ltc_2";
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Texture => f.write_str("texture"),
            ResourceKind::Buffer => f.write_str("buffer"),
        }
    }
}

pub trait ResourceTag {
    const KIND: ResourceKind;
}

/// Non-owning reference to a device resource, the resource is not guaranteed to be alive
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct HandleId<T: ResourceTag> {
    idx: Index,
    _marker: PhantomData<T>,
}

impl<T: ResourceTag> HandleId<T> {
    pub fn from_index(idx: Index) -> Self {
        Self {
            idx,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> Index {
        self.idx
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct _Texture;
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct _Buffer;

impl ResourceTag for _Texture {
    const KIND: ResourceKind = ResourceKind::Texture;
}

impl ResourceTag for _Buffer {
    const KIND: ResourceKind = ResourceKind::Buffer;
}

pub type TextureId = HandleId<_Texture>;
pub type BufferId = HandleId<_Buffer>;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ResourceHandle {
    Texture(TextureId),
    Buffer(BufferId),
}

impl ResourceHandle {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceHandle::Texture(_) => ResourceKind::Texture,
            ResourceHandle::Buffer(_) => ResourceKind::Buffer,
        }
    }
}

impl From<TextureId> for ResourceHandle {
    fn from(id: TextureId) -> Self {
        ResourceHandle::Texture(id)
    }
}

impl From<BufferId> for ResourceHandle {
    fn from(id: BufferId) -> Self {
        ResourceHandle::Buffer(id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' does not exist in resource registry")]
    NotFound(String),
    #[error("'{key}' is a {found}, expected a {expected}")]
    KindMismatch {
        key: String,
        expected: ResourceKind,
        found: ResourceKind,
    },
}

/// String-keyed handles shared between passes. A consumer only finds a key if its producer
/// was initialised first.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: HashMap<String, ResourceHandle>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle previously stored under `key`, if any
    pub fn set(
        &mut self,
        key: impl Into<String>,
        handle: impl Into<ResourceHandle>,
    ) -> Option<ResourceHandle> {
        let key = key.into();
        let handle = handle.into();
        let previous = self.entries.insert(key.clone(), handle);
        match previous {
            Some(old) => warn!(
                "'{}' already exists in resource registry, {:?} replaced by {:?}",
                key, old, handle
            ),
            None => info!("registered {} '{}'", handle.kind(), key),
        }
        previous
    }

    pub fn get(&self, key: &str) -> Result<ResourceHandle, RegistryError> {
        self.entries.get(key).copied().ok_or_else(|| {
            error!("'{}' does not exist in resource registry", key);
            RegistryError::NotFound(key.to_string())
        })
    }

    pub fn get_texture(&self, key: &str) -> Result<TextureId, RegistryError> {
        match self.get(key)? {
            ResourceHandle::Texture(id) => Ok(id),
            other => Err(self.mismatch(key, ResourceKind::Texture, other.kind())),
        }
    }

    pub fn get_buffer(&self, key: &str) -> Result<BufferId, RegistryError> {
        match self.get(key)? {
            ResourceHandle::Buffer(id) => Ok(id),
            other => Err(self.mismatch(key, ResourceKind::Buffer, other.kind())),
        }
    }

    fn mismatch(&self, key: &str, expected: ResourceKind, found: ResourceKind) -> RegistryError {
        error!("'{}' is a {}, expected a {}", key, found, expected);
        RegistryError::KindMismatch {
            key: key.to_string(),
            expected,
            found,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
