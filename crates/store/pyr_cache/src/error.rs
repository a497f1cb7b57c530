use crate::CacheableId;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// A `get` against an id that has no slot. Always a caller bug.
    #[error("resource {0} was never registered")]
    NotRegistered(CacheableId),

    /// A `get::<T>` against an id that was registered with a different
    /// variant. Always a caller bug; the tag is fixed at registration.
    #[error("resource {id} is registered as {registered_as}")]
    WrongType {
        id: CacheableId,
        registered_as: &'static str,
    },

    /// The factory failed to materialize the value. Nothing was published.
    #[error("factory for resource {id} failed")]
    FactoryFailed {
        id: CacheableId,
        #[source]
        source: BoxedError,
    },

    /// The serializer handed back something it cannot resolve.
    #[error("serializer error: {0}")]
    SerializerIo(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
