pub mod db;
pub mod error;
pub mod memory;
pub mod persist;
pub mod schema;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use db::Database;
pub use error::StoreError;
pub use memory::MemoryDatabase;
