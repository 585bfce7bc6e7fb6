//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast to tasks → drain connections → exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
