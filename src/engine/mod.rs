pub mod assets;
pub mod filestore;
pub mod filter;
pub mod persistence;
pub mod schema;

pub use filestore::FileStore;
pub use filter::Filter;
pub use persistence::Persistence;
