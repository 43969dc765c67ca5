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

//! Fundamental types shared between the client and its collaborators.

use ethereum_types::{Address, H64, H256, U256};
use keccak_hash::keccak;

/// Type for block numbers.
pub type BlockNumber = u64;

/// Raw byte vector.
pub type Bytes = Vec<u8>;

/// Blocks per proof-of-work seed epoch.
const EPOCH_LENGTH: BlockNumber = 30_000;

/// Summary of a block header, as handed out by the chain store and as
/// reported by a state snapshot for its sealing candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
	/// Header hash.
	pub hash: H256,
	/// Hash of the parent header.
	pub parent_hash: H256,
	/// Height of the block.
	pub number: BlockNumber,
	/// Beneficiary of the block reward.
	pub author: Address,
	/// Seconds since the epoch.
	pub timestamp: u64,
	/// Proof-of-work difficulty.
	pub difficulty: U256,
	/// Gas limit of the block.
	pub gas_limit: U256,
	/// Gas used by all transactions in the block.
	pub gas_used: U256,
}

/// Result of a chain-store sync: the new canonical suffix in order, and the
/// orphaned suffix of the previous head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRoute {
	/// Hashes newly part of the canonical chain, oldest first.
	pub imported: Vec<H256>,
	/// Hashes no longer part of the canonical chain.
	pub dead: Vec<H256>,
}

impl ImportRoute {
	/// True when the route carries no chain movement at all.
	pub fn is_empty(&self) -> bool {
		self.imported.is_empty() && self.dead.is_empty()
	}
}

/// Mining target for one candidate block, handed to an external hasher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPackage {
	/// Hash of the candidate header, sans seal.
	pub header_hash: H256,
	/// Seed hash of the epoch the candidate falls into.
	pub seed_hash: H256,
	/// Upper bound a valid proof-of-work value must stay below.
	pub boundary: U256,
}

impl WorkPackage {
	/// Package the given candidate info up for an external hasher.
	pub fn package(info: &BlockInfo) -> WorkPackage {
		WorkPackage {
			header_hash: info.hash,
			seed_hash: seed_hash(info.number),
			boundary: if info.difficulty.is_zero() {
				U256::max_value()
			} else {
				U256::max_value() / info.difficulty
			},
		}
	}

	/// True for the null package served when no work should be handed out.
	pub fn is_empty(&self) -> bool {
		self.header_hash.is_zero()
	}
}

/// Seed hash of the epoch containing `number`: keccak iterated once per
/// completed epoch.
pub fn seed_hash(number: BlockNumber) -> H256 {
	let epochs = number / EPOCH_LENGTH;
	let mut seed = H256::zero();
	for _ in 0..epochs {
		seed = keccak(&seed);
	}
	seed
}

/// A proof-of-work solution as submitted by a hasher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Solution {
	/// The found nonce.
	pub nonce: H64,
	/// Mix digest witnessing the nonce.
	pub mix_hash: H256,
}

/// Sync state as reported by the p2p host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
	/// Block number at which the sync started.
	pub start_block_number: BlockNumber,
	/// Block number we are currently at.
	pub current_block_number: BlockNumber,
	/// Highest block number seen on the network.
	pub highest_block_number: BlockNumber,
	/// Whether a sync is in progress.
	pub syncing: bool,
}

/// Progress report from the mining farm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningProgress {
	/// Hashes tried so far.
	pub hashes: u64,
	/// Milliseconds spent hashing.
	pub ms: u64,
}

impl MiningProgress {
	/// Hashes per second.
	pub fn rate(&self) -> u64 {
		if self.ms == 0 {
			0
		} else {
			self.hashes * 1000 / self.ms
		}
	}
}

/// Report on the status of a client.
#[derive(Default, Clone, Debug, Eq, PartialEq)]
pub struct ClientReport {
	/// How many blocks have been imported so far.
	pub blocks_imported: usize,
	/// How many transactions have been applied so far.
	pub transactions_applied: usize,
	/// How much gas has been processed so far.
	pub gas_processed: U256,
	/// Maintenance ticks of the worker loop.
	pub ticks: usize,
}

impl ClientReport {
	/// Alter internal reporting to reflect the additional block processed.
	pub fn accrue_block(&mut self, info: &BlockInfo, transactions: usize) {
		self.blocks_imported += 1;
		self.transactions_applied += transactions;
		self.gas_processed = self.gas_processed + info.gas_used;
	}
}

impl<'a> ::std::ops::Sub<&'a ClientReport> for ClientReport {
	type Output = Self;

	fn sub(mut self, other: &'a ClientReport) -> Self {
		self.blocks_imported -= other.blocks_imported;
		self.transactions_applied -= other.transactions_applied;
		self.gas_processed = self.gas_processed - other.gas_processed;
		self.ticks -= other.ticks;

		self
	}
}

/// Best-effort outcome of a transient call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
	/// Bytes returned by the execution.
	pub output: Bytes,
	/// Gas the execution consumed.
	pub gas_used: U256,
	/// Whether the execution ended in an exception.
	pub excepted: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seed_hash_iterates_per_epoch() {
		assert_eq!(seed_hash(0), H256::zero());
		assert_eq!(seed_hash(29_999), H256::zero());
		assert_eq!(seed_hash(30_000), keccak(&H256::zero()));
		assert_eq!(seed_hash(65_000), keccak(&keccak(&H256::zero())));
	}

	#[test]
	fn work_package_boundary() {
		let mut info = BlockInfo::default();
		info.difficulty = U256::from(2u64);
		let package = WorkPackage::package(&info);
		assert_eq!(package.boundary, U256::max_value() / U256::from(2u64));

		info.difficulty = U256::zero();
		assert_eq!(WorkPackage::package(&info).boundary, U256::max_value());
	}

	#[test]
	fn null_work_package_is_empty() {
		assert!(WorkPackage::default().is_empty());
	}

	#[test]
	fn mining_rate() {
		let progress = MiningProgress { hashes: 10_000, ms: 500 };
		assert_eq!(progress.rate(), 20_000);
		assert_eq!(MiningProgress::default().rate(), 0);
	}

	#[test]
	fn report_accrues_blocks() {
		let mut report = ClientReport::default();
		let mut info = BlockInfo::default();
		info.gas_used = U256::from(42_000u64);
		report.accrue_block(&info, 2);
		report.accrue_block(&info, 1);
		assert_eq!(report.blocks_imported, 2);
		assert_eq!(report.transactions_applied, 3);
		assert_eq!(report.gas_processed, U256::from(84_000u64));
	}

	#[test]
	fn report_subtraction_yields_delta() {
		let mut info = BlockInfo::default();
		info.gas_used = U256::from(10_000u64);

		let mut earlier = ClientReport::default();
		earlier.accrue_block(&info, 1);
		earlier.ticks = 3;

		let mut later = earlier.clone();
		later.accrue_block(&info, 4);
		later.accrue_block(&info, 2);
		later.ticks = 8;

		let delta = later - &earlier;
		assert_eq!(delta.blocks_imported, 2);
		assert_eq!(delta.transactions_applied, 6);
		assert_eq!(delta.gas_processed, U256::from(20_000u64));
		assert_eq!(delta.ticks, 5);
	}
}
