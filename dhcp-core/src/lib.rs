//! # dhcp-core
//!
//! The address allocation engine and lease state machine for a DHCPv4
//! server whose pools and leases are declarative objects in an external
//! control plane. See the module docs for the pieces that make up the
//! flow: decoded packet -> [`pool_index`] -> [`allocator`] -> [`lease`] ->
//! [`store`], orchestrated by [`handler`] under the transaction lock, with
//! [`janitor`] reaping expired bindings on its own tick.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::too_many_arguments)]

pub use async_trait::async_trait;
pub use dhcp_types;
pub use dhcproto;
pub use tokio;

pub mod allocator;
pub mod config;
pub mod handler;
pub mod janitor;
pub mod lease;
pub mod mac;
pub mod metrics;
pub mod pool_index;
pub mod prelude;
pub mod store;
