//! Runtime support for the coordinator
//!
//! Coordinated shutdown of the epoch loop and replication driver.

pub mod shutdown;

pub use shutdown::ShutdownSignal;
