pub mod collection;
pub mod error;
pub mod filter;
pub mod schema;
pub mod store;

pub use collection::{Collection, CollectionSpec, QueryHit};
pub use error::{StorageError, StorageResult};
pub use filter::MetadataFilter;
pub use schema::CollectionSchema;
pub use store::{CollectionRole, CollectionStats, IndexStore};
