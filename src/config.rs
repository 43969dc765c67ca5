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

//! Client configuration.

use std::path::PathBuf;

use ethereum_types::{Address, U256};

use crate::version::WithExisting;

/// Configuration of the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Directory holding the on-disk version status record.
	pub db_path: PathBuf,
	/// Network id advertised to the host capability.
	pub network_id: U256,
	/// Override combined (by `max`) with the version gate's decision.
	pub with_existing: WithExisting,
	/// Contract whose storage slot 0 acts as the chain's distress canary.
	/// Behaviour is undefined when no such contract exists on the
	/// configured chain.
	pub canary_address: Address,
	/// Keep producing work even when the canary has fired.
	pub mine_on_bad_chain: bool,
}

impl Default for ClientConfig {
	fn default() -> ClientConfig {
		ClientConfig {
			db_path: PathBuf::from("."),
			network_id: U256::zero(),
			with_existing: WithExisting::Trust,
			canary_address: Address::zero(),
			mine_on_bad_chain: false,
		}
	}
}
