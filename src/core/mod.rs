// Core modules: the local cache, chunked transport, store contract, and errors.
pub mod cache;
pub mod chunk;
pub mod error;
pub mod report;
pub mod store;
