//! A small two-member variant for exercising the cache in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use pyr_cache::{
    BoxedError, CacheBuilder, CacheConfig, CacheVariant, CacheableId, LruCache, VariantMember,
};

// ---

/// An opaque byte payload; its size is whatever its buffer holds.
#[derive(Debug)]
pub struct Blob {
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn filled(byte: u8, len: usize) -> Self {
        Self {
            bytes: vec![byte; len],
        }
    }
}

/// A second member so the variant is exercised as an actual sum type.
#[derive(Debug)]
pub struct Label {
    pub text: String,
}

#[derive(Clone)]
pub enum TestResource {
    Blob(Arc<Blob>),
    Label(Arc<Label>),
}

pub enum TestResourceWeak {
    Empty,
    Blob(Weak<Blob>),
    Label(Weak<Label>),
}

impl CacheVariant for TestResource {
    type Weak = TestResourceWeak;

    fn empty_weak() -> Self::Weak {
        TestResourceWeak::Empty
    }

    fn downgrade(&self) -> Self::Weak {
        match self {
            Self::Blob(strong) => TestResourceWeak::Blob(Arc::downgrade(strong)),
            Self::Label(strong) => TestResourceWeak::Label(Arc::downgrade(strong)),
        }
    }

    fn upgrade(weak: &Self::Weak) -> Option<Self> {
        match weak {
            TestResourceWeak::Empty => None,
            TestResourceWeak::Blob(weak) => weak.upgrade().map(Self::Blob),
            TestResourceWeak::Label(weak) => weak.upgrade().map(Self::Label),
        }
    }

    fn size_bytes(&self) -> u64 {
        match self {
            Self::Blob(blob) => blob.bytes.len() as u64,
            Self::Label(label) => label.text.len() as u64,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Blob(_) => "Blob",
            Self::Label(_) => "Label",
        }
    }
}

impl VariantMember<Blob> for TestResource {
    fn pack(value: Arc<Blob>) -> Self {
        Self::Blob(value)
    }

    fn unpack(self) -> Option<Arc<Blob>> {
        match self {
            Self::Blob(blob) => Some(blob),
            Self::Label(_) => None,
        }
    }
}

impl VariantMember<Label> for TestResource {
    fn pack(value: Arc<Label>) -> Self {
        Self::Label(value)
    }

    fn unpack(self) -> Option<Arc<Label>> {
        match self {
            Self::Label(label) => Some(label),
            Self::Blob(_) => None,
        }
    }
}

// ---

pub type TestCache = LruCache<TestResource>;

/// Tracks how often each registered factory has been invoked.
#[derive(Default)]
pub struct FactoryCounters {
    counters: parking_lot::Mutex<Vec<Arc<AtomicUsize>>>,
}

impl FactoryCounters {
    pub fn invocations(&self, id: CacheableId) -> usize {
        self.counters.lock()[id.0 as usize].load(Ordering::Relaxed)
    }

    fn next(&self) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        self.counters.lock().push(counter.clone());
        counter
    }
}

/// Register a blob of `byte` repeated `len` times; returns its id.
pub fn register_blob(
    builder: &CacheBuilder<TestResource>,
    counters: &FactoryCounters,
    byte: u8,
    len: usize,
) -> CacheableId {
    let counter = counters.next();
    builder.register::<Blob>(move |_cache| -> Result<Blob, BoxedError> {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(Blob::filled(byte, len))
    })
}

pub fn builder_with_budget(max_bytes: u64) -> CacheBuilder<TestResource> {
    CacheBuilder::new(CacheConfig {
        max_bytes,
        loader_thread_count: 2,
    })
}
