//! Purpose: Library crate behind the `paramstash` CLI and its tests.
//! Exports: `core` (cache, chunk codec, store contract, errors) and `api`.
//! Role: Client layer over size-limited remote parameter stores.
//! Invariants: Cache and error state are owned per client; nothing is global.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
