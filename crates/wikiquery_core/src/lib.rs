pub mod config;
pub mod continuation;
pub mod continue_manager;
pub mod error;
pub mod executor;
pub mod migrate;
pub mod modules;
pub mod pageset;
pub mod params;
pub mod query;
pub mod range;
pub mod result;
pub mod runtime;
pub mod select;
pub mod store;
pub mod timestamp;
pub mod title;

#[cfg(test)]
pub(crate) mod testing;
