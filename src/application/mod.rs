//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain rules and owns the runtime behavior:
//! - Sequence allocator (issuing document numbers)
//! - Archive recorder (retiring deleted numbers)
//! - Window registry and rate limiter (admission control)
//! - Window sweeper (dropping idle rate state)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod allocator;
pub mod archive;
pub mod circuit_breaker;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod sweeper;
