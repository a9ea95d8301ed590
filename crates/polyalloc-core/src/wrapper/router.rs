//! Size-class router.
//!
//! A [`SizeClassRouter`] sends each request to the fixed-size pool of its
//! size class, or past the table to the fallback policy. The pools form a
//! [`PoolFamily`]: one pool per class the [`SizeClassMap`] uses, built once
//! and indexed by class number.
//!
//! By default a router uses the process-wide family for its pool type and
//! map, so every router of the same configuration (and every thread-cached
//! instance of one) allocates from the same pools and a block may be freed
//! through any of them. [`LocalRouter::with_own_family`] builds a router
//! around a private family instead, for a single owner.
//!
//! `free` reclassifies from the size, so it must see the same size as the
//! matching `alloc`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::debug;

use super::size_class::{CLASSES, SizeClassMap};
use crate::policy::AllocPolicy;
use crate::policy::fixed::FixedSize;
use crate::policy::system::SystemPolicy;

type FamilyKey = (TypeId, SizeClassMap);

/// Process-wide families, one per pool type and map. Never dropped.
static FAMILIES: LazyLock<Mutex<HashMap<FamilyKey, Arc<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// One fixed-size pool per class of a size-class map.
///
/// Share a family through an `Arc`; the members must then be `Sync` (for
/// example `Locked<FixedPool>`).
pub struct PoolFamily<F> {
    map: SizeClassMap,
    pools: Box<[Option<F>]>,
}

impl<F: FixedSize> PoolFamily<F> {
    /// Builds a pool for every class `map` uses.
    pub fn new(map: SizeClassMap) -> Self {
        let mut pools: Vec<Option<F>> = (0..CLASSES).map(|_| None).collect();
        for class in map.classes() {
            if let Some(block_size) = map.class_size(class) {
                pools[class] = Some(F::with_block_size(block_size));
            }
        }
        Self {
            map,
            pools: pools.into_boxed_slice(),
        }
    }
}

impl<F: FixedSize + Send + Sync + 'static> PoolFamily<F> {
    /// The process-wide family for pool type `F` and `map`, created on first
    /// request. Every call with the same `F` and map returns the same family.
    pub fn shared(map: SizeClassMap) -> Arc<Self> {
        let key = (TypeId::of::<F>(), map);
        let mut families = FAMILIES.lock();
        if let Some(existing) = families.get(&key)
            && let Ok(family) = Arc::clone(existing).downcast::<Self>()
        {
            return family;
        }
        let family = Arc::new(Self::new(map));
        families.insert(key, Arc::clone(&family) as Arc<dyn Any + Send + Sync>);
        debug!(
            base_size = map.base_size(),
            pools = family.len(),
            "shared pool family created"
        );
        family
    }
}

impl<F> PoolFamily<F> {
    pub fn map(&self) -> &SizeClassMap {
        &self.map
    }

    /// Pool serving `class`; `None` for the fallback sentinel and unused classes.
    #[inline]
    pub fn pool(&self, class: usize) -> Option<&F> {
        self.pools.get(class)?.as_ref()
    }

    /// Number of pools actually built.
    pub fn len(&self) -> usize {
        self.pools.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(class, pool)` pairs in ascending class order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &F)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(class, pool)| pool.as_ref().map(|pool| (class, pool)))
    }
}

impl<F: AllocPolicy> PoolFamily<F> {
    /// Clears every member pool.
    pub fn clear(&self) {
        for pool in self.pools.iter().flatten() {
            pool.clear();
        }
    }
}

impl<F: FixedSize> Default for PoolFamily<F> {
    fn default() -> Self {
        Self::new(SizeClassMap::DEFAULT)
    }
}

impl<F> AsRef<PoolFamily<F>> for PoolFamily<F> {
    fn as_ref(&self) -> &PoolFamily<F> {
        self
    }
}

impl<F> std::fmt::Debug for PoolFamily<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolFamily")
            .field("map", &self.map)
            .field("pools", &self.len())
            .finish()
    }
}

/// Routes each request to a fixed pool by size class, or to `B`.
///
/// `H` is how the router holds its family: a shared `Arc<PoolFamily<F>>` by
/// default, or an owned `PoolFamily<F>` (see [`LocalRouter`]).
pub struct SizeClassRouter<F, B = SystemPolicy, H = Arc<PoolFamily<F>>> {
    family: H,
    fallback: B,
    _pools: PhantomData<fn() -> F>,
}

/// A router owning a private pool family.
///
/// Blocks it hands out must come back through the same router, so it has no
/// `Default` and cannot be thread-cached.
pub type LocalRouter<F, B = SystemPolicy> = SizeClassRouter<F, B, PoolFamily<F>>;

impl<F: FixedSize + Send + Sync + 'static, B: Default> SizeClassRouter<F, B> {
    /// Router over the process-wide family for `F` and `map`.
    pub fn new(map: SizeClassMap) -> Self {
        Self::with_parts(PoolFamily::shared(map), B::default())
    }
}

impl<F: FixedSize, B: Default> LocalRouter<F, B> {
    /// Router with a private family built from `map`.
    pub fn with_own_family(map: SizeClassMap) -> Self {
        Self::with_parts(PoolFamily::new(map), B::default())
    }
}

impl<F, B, H: AsRef<PoolFamily<F>>> SizeClassRouter<F, B, H> {
    /// Router over an existing family (owned or shared) and fallback.
    pub fn with_parts(family: H, fallback: B) -> Self {
        Self {
            family,
            fallback,
            _pools: PhantomData,
        }
    }

    pub fn family(&self) -> &PoolFamily<F> {
        self.family.as_ref()
    }

    pub fn fallback(&self) -> &B {
        &self.fallback
    }

    pub fn map(&self) -> &SizeClassMap {
        self.family.as_ref().map()
    }
}

impl<F: FixedSize + Send + Sync + 'static, B: Default> Default for SizeClassRouter<F, B> {
    fn default() -> Self {
        Self::new(SizeClassMap::DEFAULT)
    }
}

impl<F, B, H> AllocPolicy for SizeClassRouter<F, B, H>
where
    F: AllocPolicy,
    B: AllocPolicy,
    H: AsRef<PoolFamily<F>>,
{
    const ALIGN: usize = if F::ALIGN < B::ALIGN { F::ALIGN } else { B::ALIGN };

    #[inline]
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let family = self.family.as_ref();
        match family.pool(family.map.classify(size)) {
            Some(pool) => pool.alloc(size),
            None => self.fallback.alloc(size),
        }
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if size == 0 {
            return;
        }
        let family = self.family.as_ref();
        match family.pool(family.map.classify(size)) {
            // SAFETY: same size, so same class as the matching alloc.
            Some(pool) => unsafe { pool.free(ptr, size) },
            // SAFETY: as above, the block came from the fallback.
            None => unsafe { self.fallback.free(ptr, size) },
        }
    }

    /// Clears the fixed pools. The fallback is left alone.
    ///
    /// On a shared family this clears the pools for every router using it;
    /// a pool keeps its chunks while any of its blocks is still live.
    fn clear(&self) {
        self.family.as_ref().clear();
    }
}

impl<F, B: std::fmt::Debug, H: AsRef<PoolFamily<F>>> std::fmt::Debug for SizeClassRouter<F, B, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeClassRouter")
            .field("family", self.family.as_ref())
            .field("fallback", &self.fallback)
            .finish()
    }
}
