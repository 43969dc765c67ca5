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

//! Transaction execution receipts.

use ethereum_types::U256;
use rlp_derive::{RlpDecodable, RlpEncodable};

use crate::log_entry::LogEntry;

/// Receipt of a single transaction's execution: the gas it burned and the
/// logs it emitted. All the filter registry and the gas price oracle need.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TransactionReceipt {
	/// Gas used by this transaction.
	pub gas_used: U256,
	/// Log entries emitted during execution.
	pub logs: Vec<LogEntry>,
}
