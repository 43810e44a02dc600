pub mod locks;
pub mod sqlite;

pub use sqlite::{CatalogStorage, StorageError};
