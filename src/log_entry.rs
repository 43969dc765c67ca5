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

//! Execution log entries and their localized forms.

use ethereum_types::{Address, H256};
use rlp_derive::{RlpDecodable, RlpEncodable};

use crate::types::{BlockNumber, Bytes};

/// A log entry as emitted by contract execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct LogEntry {
	/// Address of the emitting contract.
	pub address: Address,
	/// Indexed topics.
	pub topics: Vec<H256>,
	/// Opaque payload.
	pub data: Bytes,
}

/// Log entry localized to the block and transaction it was emitted from.
/// Entries matched against pending transactions carry only the transaction
/// hash; the block fields stay at their defaults until the block is sealed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedLogEntry {
	/// The unlocalized entry.
	pub entry: LogEntry,
	/// Hash of the containing block.
	pub block_hash: H256,
	/// Number of the containing block.
	pub block_number: BlockNumber,
	/// Hash of the emitting transaction.
	pub transaction_hash: H256,
	/// Index of the emitting transaction within the block.
	pub transaction_index: usize,
	/// Running index of the entry within the block.
	pub log_index: usize,
}

/// One change collected by a watch: either a localized log entry matched by
/// an installed filter, or a special marker from one of the pseudo-filters
/// carrying the hash that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchChange {
	/// A matched, localized log entry.
	Log(LocalizedLogEntry),
	/// A pseudo-filter marker: the pending transaction hash or new block hash.
	Special(H256),
}
