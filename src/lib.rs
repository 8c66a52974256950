// ABOUTME: Root library module exposing the agent's subsystems
// ABOUTME: Connection lifecycle, bounded cache store, dedup, backoff, and routing

pub mod backoff;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod pairing;
pub mod paths;
pub mod persist;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;

pub(crate) mod util;

pub use connection::ConnectionManager;
pub use store::{CacheStore, StoreHandle, MAX_STORE_ITEMS};
