//! # firebase-rtdb-sync
//!
//! Rate-limited Realtime Database client with streaming and polling
//! transports, shared path observers and nested field projection.
//!
//! - [`database`]: settings, admission (rate window and connection slots),
//!   CRUD, transports and the observer registry behind [`database::Database`]
//! - [`document`]: store-native document values and the nested field resolver
//! - [`logger`]: named, level-filtered loggers used throughout the crate
//! - [`platform`]: task spawning, timers and the credential source seam

pub mod database;
pub mod document;
pub mod logger;
pub mod platform;

#[cfg(test)]
pub mod test_support;
