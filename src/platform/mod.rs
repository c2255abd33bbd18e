//! Platform seams: task spawning, timers and the credential source.

pub mod runtime;
pub mod token;

pub use token::{FnTokenSource, StaticTokenSource, TokenError, TokenSource};
