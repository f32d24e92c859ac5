//! CRL issuing-point state: the record, its revocation caches and the
//! repositories that persist them.

pub mod cache;
pub mod errors;
pub mod events;
pub mod reason;
pub mod record;
pub mod repository;
pub mod serial;
pub mod store;

pub use cache::{CacheEntry, CacheKind, CertCache, RevocationCache, cert_cache};
pub use errors::{RepositoryError, RepositoryResult};
pub use events::{CacheRecorder, RevocationEvent};
pub use reason::RevocationReason;
pub use record::{CrlIssuingPointRecord, FirstUnsaved};
pub use repository::{
    CacheDisposition, CrlRepository, CrlUpdate, DatabaseAdmin, DeltaCrlUpdate, Modification,
};
pub use serial::{CrlNumber, SerialNumber};
pub use store::{MemoryCrlRepository, RedisCrlRepository};
