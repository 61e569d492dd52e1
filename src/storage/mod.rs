//! Persistence backends for serialized feed state.
//!
//! Every backend implements [`StateStore`]: load and store opaque bytes by key.

mod file;
mod memory;
mod redis;
mod registry;
mod sqlite;
mod types;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use self::redis::{RedisStore, DEFAULT_HASH_KEY};
pub use registry::StoreRegistry;
pub use sqlite::{SqliteStore, DEFAULT_TABLE};
pub use types::{StateStore, StoreConfig, StoreError};
