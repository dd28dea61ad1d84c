pub mod backend;
pub mod consistency;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod repository;

pub use backend::{TenantBackend, WriteOp};
pub use consistency::ConsistencyChecker;
pub use error::DatabaseError;
pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use record::{NewRecord, RecordChanges, RecordInput, RecordRef, TenantRecord};
pub use repository::{TenantRepository, UnitOfWork};
