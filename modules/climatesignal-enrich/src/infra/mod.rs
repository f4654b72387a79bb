pub mod adapters;
pub mod cache_store;
pub mod lru;
pub mod sink;

pub use cache_store::MemoryCacheStore;
pub use sink::JsonLinesSink;
