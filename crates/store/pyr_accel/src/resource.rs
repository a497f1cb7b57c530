use std::sync::{Arc, Weak};

use pyr_cache::{CacheBuilder, CacheVariant, LruCache, VariantMember};

use crate::{GroupGeometry, SubBvh};

/// The closed set of resources the renderer streams through the cache:
/// per-cluster triangle data, and the sub-BVH built over it.
///
/// They evict independently — a sub-BVH is rebuildable from its (possibly
/// still resident) geometry, and geometry can outlive a discarded sub-BVH
/// when another cluster pins shared shapes.
#[derive(Clone)]
pub enum RenderResource {
    Geometry(Arc<GroupGeometry>),
    SubBvh(Arc<SubBvh>),
}

pub enum RenderResourceWeak {
    Empty,
    Geometry(Weak<GroupGeometry>),
    SubBvh(Weak<SubBvh>),
}

pub type RenderCache = LruCache<RenderResource>;
pub type RenderCacheBuilder = CacheBuilder<RenderResource>;

impl CacheVariant for RenderResource {
    type Weak = RenderResourceWeak;

    fn empty_weak() -> Self::Weak {
        RenderResourceWeak::Empty
    }

    fn downgrade(&self) -> Self::Weak {
        match self {
            Self::Geometry(strong) => RenderResourceWeak::Geometry(Arc::downgrade(strong)),
            Self::SubBvh(strong) => RenderResourceWeak::SubBvh(Arc::downgrade(strong)),
        }
    }

    fn upgrade(weak: &Self::Weak) -> Option<Self> {
        match weak {
            RenderResourceWeak::Empty => None,
            RenderResourceWeak::Geometry(weak) => weak.upgrade().map(Self::Geometry),
            RenderResourceWeak::SubBvh(weak) => weak.upgrade().map(Self::SubBvh),
        }
    }

    fn size_bytes(&self) -> u64 {
        match self {
            Self::Geometry(geometry) => geometry.size_bytes(),
            Self::SubBvh(sub_bvh) => sub_bvh.size_bytes(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Geometry(_) => "GroupGeometry",
            Self::SubBvh(_) => "SubBvh",
        }
    }
}

impl VariantMember<GroupGeometry> for RenderResource {
    fn pack(value: Arc<GroupGeometry>) -> Self {
        Self::Geometry(value)
    }

    fn unpack(self) -> Option<Arc<GroupGeometry>> {
        match self {
            Self::Geometry(geometry) => Some(geometry),
            Self::SubBvh(_) => None,
        }
    }
}

impl VariantMember<SubBvh> for RenderResource {
    fn pack(value: Arc<SubBvh>) -> Self {
        Self::SubBvh(value)
    }

    fn unpack(self) -> Option<Arc<SubBvh>> {
        match self {
            Self::SubBvh(sub_bvh) => Some(sub_bvh),
            Self::Geometry(_) => None,
        }
    }
}
