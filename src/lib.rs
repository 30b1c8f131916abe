//! delve - a small iterative DNS resolver
//!
//! The server answers A and NS queries by walking the delegation tree from
//! the root hints down, following referrals and glue records. Replies are
//! kept in a short-lived, bounded cache keyed by question.

/// DNS protocol handling and resolution
pub mod dns;
