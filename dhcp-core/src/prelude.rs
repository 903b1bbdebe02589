//! dhcp-core prelude

pub use crate::{
    async_trait,
    store::{GatewayError, LeaseStore},
};

pub use anyhow::{Context, Result};
pub use tracing::{debug, error, info, instrument, trace, warn};

pub use std::sync::Arc;
