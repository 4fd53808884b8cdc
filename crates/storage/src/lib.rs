pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use record::{EntityFilter, WatcherFilter, WatcherUpdate};
pub use traits::{
    EntityStore, ProviderStore, Storage, WatchlistEdit, WatchlistStore, WatcherStore,
};
