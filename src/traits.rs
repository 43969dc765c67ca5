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

//! Interfaces of the client's external collaborators: the chain store, the
//! queues, the state machine, the mining farm and the p2p host capability.
//! The client consumes these; implementations live elsewhere (and in
//! [`crate::test_helpers`] for tests).

use std::sync::Arc;

use ethereum_types::{Address, H256, U256};

use crate::error::Error;
use crate::gas_pricer::GasPricer;
use crate::receipt::TransactionReceipt;
use crate::transaction::Transaction;
use crate::types::{
	BlockInfo, BlockNumber, Bytes, ExecutionResult, ImportRoute, MiningProgress, Solution,
	SyncStatus, WorkPackage,
};
use crate::version::WithExisting;

/// Callback invoked when a queue transitions from empty to ready.
pub type ReadyCallback = Box<dyn Fn() + Send + Sync>;

/// Callback invoked with the error that made a block bad.
pub type BadBlockCallback = Box<dyn Fn(&Error) + Send + Sync>;

/// Policy for importing a transaction that was previously dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfDropped {
	/// Refuse re-entry of dropped transactions.
	Ignore,
	/// Let dropped transactions back in; used when replaying a dead branch.
	Retry,
}

/// Outcome of a transaction queue import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionImportResult {
	/// Accepted into the queue.
	Success,
	/// The queue already holds this transaction.
	AlreadyKnown,
	/// Refused, e.g. a previously dropped transaction without `Retry`.
	Rejected,
}

/// The blockchain store: canonical chain data plus the import machinery
/// that moves verified blocks from the queue into state.
pub trait BlockChain: Send + Sync {
	/// Hash of the genesis block.
	fn genesis_hash(&self) -> H256;

	/// Hash of the canonical head.
	fn best_block_hash(&self) -> H256;

	/// Number of the canonical head.
	fn best_block_number(&self) -> BlockNumber;

	/// Header summary of the given block, if known.
	fn info(&self, hash: &H256) -> Option<BlockInfo>;

	/// Raw bytes of the given block, if known.
	fn block(&self, hash: &H256) -> Option<Bytes>;

	/// Transactions of the given block; empty if unknown.
	fn transactions(&self, hash: &H256) -> Vec<Transaction>;

	/// Transaction hashes of the given block; empty if unknown.
	fn transaction_hashes(&self, hash: &H256) -> Vec<H256>;

	/// Receipts of the given block; empty if unknown.
	fn receipts(&self, hash: &H256) -> Vec<TransactionReceipt>;

	/// Import up to `max` blocks from the queue into state. Returns the
	/// resulting route and whether more blocks are waiting.
	fn sync(&self, queue: &dyn BlockQueue, max: usize) -> (ImportRoute, bool);

	/// Let the store drop whatever caches it can.
	fn collect_garbage(&self);

	/// (Re)open the underlying database, honouring `action`.
	fn reopen(&self, action: WithExisting);

	/// Register the callback invoked when the store rejects a block.
	fn set_on_bad(&self, callback: BadBlockCallback);
}

/// The transaction queue: submitted transactions keyed by hash, ordered
/// per sender by nonce.
pub trait TransactionQueue: Send + Sync {
	/// Offer a transaction to the queue.
	fn import(&self, transaction: Transaction, if_dropped: IfDropped) -> TransactionImportResult;

	/// Remove a transaction; it is remembered as dropped.
	fn drop(&self, hash: &H256);

	/// Remove everything.
	fn clear(&self);

	/// Current content of the queue, ready transactions first.
	fn transactions(&self) -> Vec<Transaction>;

	/// Whether the queue currently holds the given transaction.
	fn contains(&self, hash: &H256) -> bool;

	/// Register the callback invoked on empty-to-ready transitions.
	fn on_ready(&self, callback: ReadyCallback);
}

/// The block queue: candidate blocks awaiting verification and import.
pub trait BlockQueue: Send + Sync {
	/// Offer a block to the queue. `is_ours` marks self-generated blocks.
	fn import(&self, block: Bytes, is_ours: bool) -> Result<H256, Error>;

	/// Remove everything and abort verification.
	fn clear(&self);

	/// Counts of `(unknown, known)` blocks currently queued.
	fn items(&self) -> (usize, usize);

	/// Periodic maintenance, driven by the client tick.
	fn tick(&self, chain: &dyn BlockChain);

	/// Register the callback invoked on empty-to-ready transitions.
	fn on_ready(&self, callback: ReadyCallback);

	/// Register the callback invoked when verification rejects a block.
	fn set_on_bad(&self, callback: BadBlockCallback);
}

/// A world-state snapshot: an owned, copy-on-write view of accounts and
/// storage at some point in history, with the execution machinery behind it.
pub trait WorldState: Clone + Send + Sync + 'static {
	/// Reset onto the canonical head, dropping pending transactions.
	/// Returns whether the head actually moved.
	fn sync_to_chain(&mut self, chain: &dyn BlockChain) -> bool;

	/// Execute ready transactions from the queue on top of this state.
	/// Returns the receipts of newly executed transactions and whether the
	/// queue has more work.
	fn sync_transactions(
		&mut self,
		chain: &dyn BlockChain,
		queue: &dyn TransactionQueue,
		pricer: &dyn GasPricer,
	) -> (Vec<TransactionReceipt>, bool);

	/// Close the pending transactions into a sealing candidate.
	fn commit_to_mine(&mut self, chain: &dyn BlockChain);

	/// Apply a proof-of-work solution to the candidate. False if the
	/// solution does not fit the current candidate.
	fn complete_mine(&mut self, solution: &Solution) -> bool;

	/// Serialized bytes of the completed candidate block.
	fn block_data(&self) -> Bytes;

	/// Transactions pending in this state, in execution order.
	fn pending(&self) -> Vec<Transaction>;

	/// A copy of this state positioned just before pending transaction
	/// `index`.
	fn from_pending(&self, index: usize) -> Self;

	/// Reposition onto an arbitrary historical block.
	fn populate_from_chain(&mut self, chain: &dyn BlockChain, block: &H256) -> Result<(), Error>;

	/// Header summary of the sealing candidate.
	fn info(&self) -> BlockInfo;

	/// The coinbase address rewards accrue to.
	fn author(&self) -> Address;

	/// Balance of an account.
	fn balance(&self, address: &Address) -> U256;

	/// Storage slot of an account.
	fn storage_at(&self, address: &Address, position: &U256) -> U256;

	/// Credit an account; used to fund transient calls.
	fn add_balance(&mut self, address: &Address, value: U256);

	/// Execute a transaction transiently, without touching consensus state.
	fn execute(&mut self, transaction: &Transaction) -> Result<ExecutionResult, Error>;
}

/// Source of world-state snapshots over the underlying state database.
pub trait StateFactory: Send + Sync + 'static {
	/// The snapshot type produced.
	type State: WorldState;

	/// (Re)open the underlying state database, honouring `action`.
	fn reopen(&self, action: WithExisting) -> Result<(), Error>;

	/// A snapshot seeded with the canonical genesis.
	fn canon_state(&self) -> Self::State;

	/// An empty snapshot, to be populated from the chain.
	fn pristine_state(&self) -> Self::State;
}

impl<T: StateFactory> StateFactory for Arc<T> {
	type State = T::State;

	fn reopen(&self, action: WithExisting) -> Result<(), Error> {
		(**self).reopen(action)
	}

	fn canon_state(&self) -> Self::State {
		(**self).canon_state()
	}

	fn pristine_state(&self) -> Self::State {
		(**self).pristine_state()
	}
}

/// The mining farm: external hashers working on a candidate.
pub trait MiningFarm: Send + Sync {
	/// Replace the current work package.
	fn set_work(&self, work: WorkPackage);

	/// Start the hashers.
	fn start(&self);

	/// Stop the hashers; in-flight solutions may still arrive and will be
	/// rejected by the client when stale.
	fn stop(&self);

	/// Whether the hashers are running.
	fn is_mining(&self) -> bool;

	/// Progress of the current run.
	fn progress(&self) -> MiningProgress;

	/// Make sure proof-of-work auxiliary data for the given height exists.
	fn ensure_precomputed(&self, number: BlockNumber);

	/// Register the callback invoked with found solutions; it returns
	/// whether the solution was accepted.
	fn on_solution_found(&self, callback: Box<dyn Fn(Solution) -> bool + Send + Sync>);
}

/// The p2p host capability. The client holds it weakly: a failed upgrade
/// means the host is gone and notifications are silently skipped.
pub trait ChainHost: Send + Sync {
	/// New pending transactions are available for relay.
	fn note_new_transactions(&self);

	/// New canonical blocks are available for relay.
	fn note_new_blocks(&self);

	/// Current sync status.
	fn status(&self) -> SyncStatus;

	/// Whether a chain sync is in progress.
	fn is_syncing(&self) -> bool;

	/// Drop all sync state and start over.
	fn reset(&self);

	/// Advertise a different network id.
	fn set_network_id(&self, id: U256);
}
