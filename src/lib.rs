// Copyright 2015-2018 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

#![warn(missing_docs)]

//! Blockchain client core.
//!
//! Binds together transaction ingest, block import, state execution, mining
//! work production and observer notification around an authoritative view of
//! the canonical chain. The heavy collaborators -- the chain store, the state
//! machine, the queues, the mining farm and the p2p host -- are consumed
//! through the traits in [`traits`]; this crate owns the coordination: the
//! worker loop, the `pre_mine`/`working`/`post_mine` snapshot triad,
//! reorganisation handling, the filter/watch registry, the gas price oracle
//! and the on-disk version gate.

pub mod bad_blocks;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod gas_pricer;
pub mod log_entry;
pub mod receipt;
pub mod traits;
pub mod transaction;
pub mod types;
pub mod version;
pub mod watch;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use crate::client::Client;
pub use crate::config::ClientConfig;
pub use crate::error::Error;
pub use crate::version::WithExisting;

/// Name under which the chain capability registers with the network host.
pub const PROTOCOL_NAME: &str = "eth";
