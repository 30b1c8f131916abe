//! The dns module implements the DNS protocol and the resolution engine
//!
//! # Module Structure
//!
//! * `buffer` - Low-level packet buffer operations
//! * `protocol` - DNS protocol definitions and packet handling
//! * `resolve` - Iterative resolution from the root hints
//! * `cache` - Bounded reply cache with TTL expiry
//! * `client` - DNS client for outgoing queries
//! * `server` - UDP server and request handlers
//! * `synth` - Computed answers for the arithmetic zone
//! * `context` - Server configuration and shared state

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// Bounded reply cache with TTL expiry
pub mod cache;

/// DNS client for making outgoing queries
pub mod client;

/// Server configuration and shared context
pub mod context;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// Iterative DNS resolution
pub mod resolve;

/// UDP DNS server implementation
pub mod server;

/// Computed answers for the arithmetic zone
pub mod synth;
