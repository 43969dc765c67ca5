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

//! Test doubles for the client's external collaborators. Deterministic and
//! single-process: the chain applies scripted reorg routes or drains blocks
//! fed through the test block queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use parking_lot::Mutex;
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde_json::Value;

use crate::bad_blocks::BadBlockSink;
use crate::error::Error;
use crate::gas_pricer::GasPricer;
use crate::receipt::TransactionReceipt;
use crate::traits::{
	BadBlockCallback, BlockChain, BlockQueue, ChainHost, IfDropped, MiningFarm, ReadyCallback,
	StateFactory, TransactionImportResult, TransactionQueue, WorldState,
};
use crate::transaction::Transaction;
use crate::types::{
	BlockInfo, BlockNumber, Bytes, ExecutionResult, ImportRoute, MiningProgress, Solution,
	SyncStatus, WorkPackage,
};
use crate::version::WithExisting;

/// In-memory test block: enough header to derive a [`BlockInfo`], plus the
/// transactions it contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TestBlock {
	/// Hash of the parent block.
	pub parent_hash: H256,
	/// Height of the block.
	pub number: BlockNumber,
	/// Beneficiary of the block reward.
	pub author: Address,
	/// Seconds since the epoch.
	pub timestamp: u64,
	/// Proof-of-work difficulty.
	pub difficulty: U256,
	/// Transactions contained in the block.
	pub transactions: Vec<Transaction>,
}

impl TestBlock {
	/// Hash of the RLP encoding.
	pub fn hash(&self) -> H256 {
		keccak(rlp::encode(self))
	}

	/// Header summary of this block.
	pub fn info(&self) -> BlockInfo {
		BlockInfo {
			hash: self.hash(),
			parent_hash: self.parent_hash,
			number: self.number,
			author: self.author,
			timestamp: self.timestamp,
			difficulty: self.difficulty,
			gas_limit: U256::from(8_000_000u64),
			gas_used: U256::from(21_000u64) * U256::from(self.transactions.len() as u64),
		}
	}
}

#[derive(Default)]
struct ChainInner {
	blocks: HashMap<H256, TestBlock>,
	receipts: HashMap<H256, Vec<TransactionReceipt>>,
	canon: Vec<H256>,
	routes: VecDeque<(ImportRoute, bool)>,
	queued: Vec<TestBlock>,
	reopened_with: Vec<WithExisting>,
	on_bad: Option<BadBlockCallback>,
}

/// Chain store double. Reorgs are scripted via [`TestBlockChain::queue_route`];
/// otherwise `sync` drains blocks fed in through the [`TestBlockQueue`] and
/// appends them to the canonical chain.
pub struct TestBlockChain {
	inner: Mutex<ChainInner>,
	genesis: TestBlock,
}

impl TestBlockChain {
	/// A chain holding only its genesis block.
	pub fn new() -> TestBlockChain {
		let genesis = TestBlock::default();
		let mut inner = ChainInner::default();
		inner.canon.push(genesis.hash());
		inner.receipts.insert(genesis.hash(), Vec::new());
		inner.blocks.insert(genesis.hash(), genesis.clone());
		TestBlockChain { inner: Mutex::new(inner), genesis }
	}

	/// Extend the canonical chain with `block`, deriving one flat receipt
	/// per transaction.
	pub fn insert_canonical(&self, block: TestBlock) {
		let receipts = flat_receipts(&block);
		self.insert_canonical_with_receipts(block, receipts);
	}

	/// Extend the canonical chain with `block` and the given receipts.
	pub fn insert_canonical_with_receipts(
		&self,
		block: TestBlock,
		receipts: Vec<TransactionReceipt>,
	) {
		let hash = block.hash();
		let mut inner = self.inner.lock();
		inner.blocks.insert(hash, block);
		inner.receipts.insert(hash, receipts);
		inner.canon.push(hash);
	}

	/// Register a block without making it canonical; material for scripted
	/// reorg routes.
	pub fn insert_branch(&self, block: TestBlock) {
		let hash = block.hash();
		let receipts = flat_receipts(&block);
		let mut inner = self.inner.lock();
		inner.blocks.insert(hash, block);
		inner.receipts.insert(hash, receipts);
	}

	/// Script the result of the next `sync` call.
	pub fn queue_route(&self, route: ImportRoute, more: bool) {
		self.inner.lock().routes.push_back((route, more));
	}

	/// Actions the store was reopened with, in order.
	pub fn reopen_history(&self) -> Vec<WithExisting> {
		self.inner.lock().reopened_with.clone()
	}

	/// Report a bad block through the registered callback, as the import
	/// machinery would.
	pub fn trigger_bad(&self, error: &Error) {
		let inner = self.inner.lock();
		if let Some(callback) = inner.on_bad.as_ref() {
			callback(error);
		}
	}

	fn push_queued(&self, block: TestBlock) {
		self.inner.lock().queued.push(block);
	}

	fn queued_len(&self) -> usize {
		self.inner.lock().queued.len()
	}

	fn clear_queued(&self) {
		self.inner.lock().queued.clear();
	}
}

fn flat_receipts(block: &TestBlock) -> Vec<TransactionReceipt> {
	block
		.transactions
		.iter()
		.map(|_| TransactionReceipt { gas_used: U256::from(21_000u64), logs: Vec::new() })
		.collect()
}

impl BlockChain for TestBlockChain {
	fn genesis_hash(&self) -> H256 {
		self.genesis.hash()
	}

	fn best_block_hash(&self) -> H256 {
		*self.inner.lock().canon.last().expect("genesis is always present; qed")
	}

	fn best_block_number(&self) -> BlockNumber {
		let inner = self.inner.lock();
		let head = inner.canon.last().expect("genesis is always present; qed");
		inner.blocks.get(head).map_or(0, |b| b.number)
	}

	fn info(&self, hash: &H256) -> Option<BlockInfo> {
		self.inner.lock().blocks.get(hash).map(TestBlock::info)
	}

	fn block(&self, hash: &H256) -> Option<Bytes> {
		self.inner.lock().blocks.get(hash).map(|b| rlp::encode(b))
	}

	fn transactions(&self, hash: &H256) -> Vec<Transaction> {
		self.inner.lock().blocks.get(hash).map_or_else(Vec::new, |b| b.transactions.clone())
	}

	fn transaction_hashes(&self, hash: &H256) -> Vec<H256> {
		self.inner
			.lock()
			.blocks
			.get(hash)
			.map_or_else(Vec::new, |b| b.transactions.iter().map(Transaction::hash).collect())
	}

	fn receipts(&self, hash: &H256) -> Vec<TransactionReceipt> {
		self.inner.lock().receipts.get(hash).cloned().unwrap_or_default()
	}

	fn sync(&self, _queue: &dyn BlockQueue, max: usize) -> (ImportRoute, bool) {
		let mut inner = self.inner.lock();
		if let Some((route, more)) = inner.routes.pop_front() {
			inner.canon.retain(|h| !route.dead.contains(h));
			for hash in &route.imported {
				if !inner.canon.contains(hash) {
					inner.canon.push(*hash);
				}
			}
			return (route, more);
		}

		let take = ::std::cmp::min(max, inner.queued.len());
		let blocks: Vec<TestBlock> = inner.queued.drain(..take).collect();
		let mut imported = Vec::new();
		for block in blocks {
			let hash = block.hash();
			let receipts = flat_receipts(&block);
			inner.blocks.insert(hash, block);
			inner.receipts.insert(hash, receipts);
			inner.canon.push(hash);
			imported.push(hash);
		}
		let more = !inner.queued.is_empty();
		(ImportRoute { imported, dead: Vec::new() }, more)
	}

	fn collect_garbage(&self) {}

	fn reopen(&self, action: WithExisting) {
		self.inner.lock().reopened_with.push(action);
	}

	fn set_on_bad(&self, callback: BadBlockCallback) {
		self.inner.lock().on_bad = Some(callback);
	}
}

/// Block queue double; decodes [`TestBlock`] bytes and hands them to the
/// shared [`TestBlockChain`] for the next `sync` to pick up.
pub struct TestBlockQueue {
	chain: Arc<TestBlockChain>,
	on_ready: Mutex<Option<ReadyCallback>>,
	on_bad: Mutex<Option<BadBlockCallback>>,
	ticks: AtomicUsize,
}

impl TestBlockQueue {
	/// A queue feeding the given chain.
	pub fn new(chain: Arc<TestBlockChain>) -> TestBlockQueue {
		TestBlockQueue {
			chain,
			on_ready: Mutex::new(None),
			on_bad: Mutex::new(None),
			ticks: AtomicUsize::new(0),
		}
	}

	/// Fire the registered ready callback, as the verifiers would.
	pub fn trigger_ready(&self) {
		if let Some(callback) = self.on_ready.lock().as_ref() {
			callback();
		}
	}

	/// Report a bad block through the registered callback.
	pub fn trigger_bad(&self, error: &Error) {
		if let Some(callback) = self.on_bad.lock().as_ref() {
			callback(error);
		}
	}

	/// Number of maintenance ticks received.
	pub fn ticks(&self) -> usize {
		self.ticks.load(AtomicOrdering::SeqCst)
	}
}

impl BlockQueue for TestBlockQueue {
	fn import(&self, block: Bytes, _is_ours: bool) -> Result<H256, Error> {
		let block: TestBlock = rlp::decode(&block)?;
		let hash = block.hash();
		self.chain.push_queued(block);
		self.trigger_ready();
		Ok(hash)
	}

	fn clear(&self) {
		self.chain.clear_queued();
	}

	fn items(&self) -> (usize, usize) {
		(self.chain.queued_len(), 0)
	}

	fn tick(&self, _chain: &dyn BlockChain) {
		self.ticks.fetch_add(1, AtomicOrdering::SeqCst);
	}

	fn on_ready(&self, callback: ReadyCallback) {
		*self.on_ready.lock() = Some(callback);
	}

	fn set_on_bad(&self, callback: BadBlockCallback) {
		*self.on_bad.lock() = Some(callback);
	}
}

#[derive(Default)]
struct QueueInner {
	transactions: Vec<Transaction>,
	dropped: HashSet<H256>,
}

/// Transaction queue double with dropped-transaction bookkeeping.
#[derive(Default)]
pub struct TestTransactionQueue {
	inner: Mutex<QueueInner>,
	on_ready: Mutex<Option<ReadyCallback>>,
}

impl TransactionQueue for TestTransactionQueue {
	fn import(&self, transaction: Transaction, if_dropped: IfDropped) -> TransactionImportResult {
		let hash = transaction.hash();
		let was_empty;
		{
			let mut inner = self.inner.lock();
			if inner.transactions.iter().any(|t| t.hash() == hash) {
				return TransactionImportResult::AlreadyKnown;
			}
			if inner.dropped.contains(&hash) {
				match if_dropped {
					IfDropped::Ignore => return TransactionImportResult::Rejected,
					IfDropped::Retry => {
						inner.dropped.remove(&hash);
					}
				}
			}
			was_empty = inner.transactions.is_empty();
			inner.transactions.push(transaction);
		}
		if was_empty {
			if let Some(callback) = self.on_ready.lock().as_ref() {
				callback();
			}
		}
		TransactionImportResult::Success
	}

	fn drop(&self, hash: &H256) {
		let mut inner = self.inner.lock();
		inner.transactions.retain(|t| t.hash() != *hash);
		inner.dropped.insert(*hash);
	}

	fn clear(&self) {
		let mut inner = self.inner.lock();
		inner.transactions.clear();
		inner.dropped.clear();
	}

	fn transactions(&self) -> Vec<Transaction> {
		self.inner.lock().transactions.clone()
	}

	fn contains(&self, hash: &H256) -> bool {
		self.inner.lock().transactions.iter().any(|t| t.hash() == *hash)
	}

	fn on_ready(&self, callback: ReadyCallback) {
		*self.on_ready.lock() = Some(callback);
	}
}

/// World-state double: tracks the synced head, pending transactions and a
/// tiny account model sufficient for observer queries.
#[derive(Debug, Clone, PartialEq)]
pub struct TestState {
	/// Head block this state is synced to.
	pub head: H256,
	/// Height of the head.
	pub head_number: BlockNumber,
	/// Pending transactions in execution order.
	pub pending: Vec<Transaction>,
	/// Receipts of the pending transactions.
	pub receipts: Vec<TransactionReceipt>,
	/// Coinbase rewards accrue to.
	pub coinbase: Address,
	/// Account balances.
	pub balances: HashMap<Address, U256>,
	/// Account storage.
	pub storage: HashMap<(Address, U256), U256>,
	/// The sealing candidate, if committed.
	pub committed: Option<TestBlock>,
}

impl TestState {
	fn new(coinbase: Address, storage: HashMap<(Address, U256), U256>) -> TestState {
		TestState {
			head: H256::zero(),
			head_number: 0,
			pending: Vec::new(),
			receipts: Vec::new(),
			coinbase,
			balances: HashMap::new(),
			storage,
			committed: None,
		}
	}
}

// Next expected nonce per sender, from the canonical chain.
fn confirmed_nonces(chain: &dyn BlockChain) -> HashMap<Address, U256> {
	let mut next: HashMap<Address, U256> = HashMap::new();
	let mut hash = chain.best_block_hash();
	while !hash.is_zero() {
		for transaction in chain.transactions(&hash) {
			let entry = next.entry(transaction.sender).or_insert_with(U256::zero);
			let after = transaction.nonce + U256::from(1u64);
			if after > *entry {
				*entry = after;
			}
		}
		hash = match chain.info(&hash) {
			Some(info) => info.parent_hash,
			None => break,
		};
	}
	next
}

impl WorldState for TestState {
	fn sync_to_chain(&mut self, chain: &dyn BlockChain) -> bool {
		let head = chain.best_block_hash();
		if head == self.head {
			return false;
		}
		self.head = head;
		self.head_number = chain.best_block_number();
		self.pending.clear();
		self.receipts.clear();
		self.committed = None;
		true
	}

	fn sync_transactions(
		&mut self,
		chain: &dyn BlockChain,
		queue: &dyn TransactionQueue,
		_pricer: &dyn GasPricer,
	) -> (Vec<TransactionReceipt>, bool) {
		let confirmed = confirmed_nonces(chain);
		let mut new_receipts = Vec::new();
		for transaction in queue.transactions() {
			let hash = transaction.hash();
			if self.pending.iter().any(|t| t.hash() == hash) {
				continue;
			}
			// the nonce check: anything already confirmed on chain is stale.
			if confirmed
				.get(&transaction.sender)
				.map_or(false, |next| transaction.nonce < *next)
			{
				queue.drop(&hash);
				continue;
			}
			let receipt = TransactionReceipt {
				gas_used: U256::from(21_000u64),
				logs: Vec::new(),
			};
			self.pending.push(transaction);
			self.receipts.push(receipt.clone());
			new_receipts.push(receipt);
		}
		(new_receipts, false)
	}

	fn commit_to_mine(&mut self, chain: &dyn BlockChain) {
		let number = chain.best_block_number() + 1;
		self.committed = Some(TestBlock {
			parent_hash: chain.best_block_hash(),
			number,
			author: self.coinbase,
			timestamp: number,
			difficulty: U256::from(0x20000u64),
			transactions: self.pending.clone(),
		});
	}

	fn complete_mine(&mut self, _solution: &Solution) -> bool {
		self.committed.is_some()
	}

	fn block_data(&self) -> Bytes {
		self.committed.as_ref().map_or_else(Vec::new, |b| rlp::encode(b))
	}

	fn pending(&self) -> Vec<Transaction> {
		self.pending.clone()
	}

	fn from_pending(&self, index: usize) -> TestState {
		let mut state = self.clone();
		state.pending.truncate(index);
		state.receipts.truncate(index);
		state
	}

	fn populate_from_chain(&mut self, chain: &dyn BlockChain, block: &H256) -> Result<(), Error> {
		match chain.info(block) {
			Some(info) => {
				self.head = *block;
				self.head_number = info.number;
				self.pending.clear();
				self.receipts.clear();
				self.committed = None;
				Ok(())
			}
			None => Err(Error::StateUnavailable(*block)),
		}
	}

	fn info(&self) -> BlockInfo {
		self.committed.as_ref().map_or_else(BlockInfo::default, TestBlock::info)
	}

	fn author(&self) -> Address {
		self.coinbase
	}

	fn balance(&self, address: &Address) -> U256 {
		self.balances.get(address).cloned().unwrap_or_default()
	}

	fn storage_at(&self, address: &Address, position: &U256) -> U256 {
		self.storage.get(&(*address, *position)).cloned().unwrap_or_default()
	}

	fn add_balance(&mut self, address: &Address, value: U256) {
		*self.balances.entry(*address).or_insert_with(U256::zero) += value;
	}

	fn execute(&mut self, transaction: &Transaction) -> Result<ExecutionResult, Error> {
		let cost = transaction.value + transaction.gas_price * transaction.gas;
		if self.balance(&transaction.sender) < cost {
			return Err(Error::Execution("insufficient balance".into()));
		}
		// echo the calldata back; enough to observe the execution happened.
		Ok(ExecutionResult {
			output: transaction.data.clone(),
			gas_used: U256::from(21_000u64),
			excepted: false,
		})
	}
}

/// State factory double.
pub struct TestStateFactory {
	coinbase: Address,
	seed_storage: Mutex<HashMap<(Address, U256), U256>>,
	reopened: Mutex<Vec<WithExisting>>,
}

impl TestStateFactory {
	/// A factory whose snapshots reward the given coinbase.
	pub fn new(coinbase: Address) -> TestStateFactory {
		TestStateFactory {
			coinbase,
			seed_storage: Mutex::new(HashMap::new()),
			reopened: Mutex::new(Vec::new()),
		}
	}

	/// Pre-set a storage slot in every snapshot the factory produces.
	pub fn set_storage(&self, address: Address, position: U256, value: U256) {
		self.seed_storage.lock().insert((address, position), value);
	}

	/// Actions the state database was reopened with, in order.
	pub fn reopen_history(&self) -> Vec<WithExisting> {
		self.reopened.lock().clone()
	}
}

impl StateFactory for TestStateFactory {
	type State = TestState;

	fn reopen(&self, action: WithExisting) -> Result<(), Error> {
		self.reopened.lock().push(action);
		Ok(())
	}

	fn canon_state(&self) -> TestState {
		TestState::new(self.coinbase, self.seed_storage.lock().clone())
	}

	fn pristine_state(&self) -> TestState {
		TestState::new(self.coinbase, self.seed_storage.lock().clone())
	}
}

/// Mining farm double recording work packages and solutions.
#[derive(Default)]
pub struct TestFarm {
	work: Mutex<Vec<WorkPackage>>,
	running: AtomicBool,
	precomputed: Mutex<Vec<BlockNumber>>,
	solution_callback: Mutex<Option<Box<dyn Fn(Solution) -> bool + Send + Sync>>>,
}

impl TestFarm {
	/// Most recent work package handed to the farm.
	pub fn last_work(&self) -> Option<WorkPackage> {
		self.work.lock().last().cloned()
	}

	/// All work packages received, in order.
	pub fn work_history(&self) -> Vec<WorkPackage> {
		self.work.lock().clone()
	}

	/// Whether the hashers were started and not stopped since.
	pub fn running(&self) -> bool {
		self.running.load(AtomicOrdering::SeqCst)
	}

	/// Heights precomputation was requested for.
	pub fn precomputed(&self) -> Vec<BlockNumber> {
		self.precomputed.lock().clone()
	}

	/// Submit a solution through the registered callback, as a hasher
	/// thread would.
	pub fn solve(&self, solution: Solution) -> bool {
		let callback = self.solution_callback.lock();
		callback.as_ref().map_or(false, |callback| callback(solution))
	}
}

impl MiningFarm for TestFarm {
	fn set_work(&self, work: WorkPackage) {
		self.work.lock().push(work);
	}

	fn start(&self) {
		self.running.store(true, AtomicOrdering::SeqCst);
	}

	fn stop(&self) {
		self.running.store(false, AtomicOrdering::SeqCst);
	}

	fn is_mining(&self) -> bool {
		self.running()
	}

	fn progress(&self) -> MiningProgress {
		MiningProgress { hashes: 10_000, ms: 1_000 }
	}

	fn ensure_precomputed(&self, number: BlockNumber) {
		self.precomputed.lock().push(number);
	}

	fn on_solution_found(&self, callback: Box<dyn Fn(Solution) -> bool + Send + Sync>) {
		*self.solution_callback.lock() = Some(callback);
	}
}

/// Host capability double counting notifications.
#[derive(Default)]
pub struct TestChainHost {
	new_transactions: AtomicUsize,
	new_blocks: AtomicUsize,
	resets: AtomicUsize,
	syncing: AtomicBool,
	network_id: Mutex<U256>,
}

impl TestChainHost {
	/// Number of new-transaction notifications received.
	pub fn new_transaction_notes(&self) -> usize {
		self.new_transactions.load(AtomicOrdering::SeqCst)
	}

	/// Number of new-block notifications received.
	pub fn new_block_notes(&self) -> usize {
		self.new_blocks.load(AtomicOrdering::SeqCst)
	}

	/// Number of resets received.
	pub fn resets(&self) -> usize {
		self.resets.load(AtomicOrdering::SeqCst)
	}

	/// Pretend a sync is (or is not) in progress.
	pub fn set_syncing(&self, syncing: bool) {
		self.syncing.store(syncing, AtomicOrdering::SeqCst);
	}

	/// Network id most recently advertised.
	pub fn network_id(&self) -> U256 {
		*self.network_id.lock()
	}
}

impl ChainHost for TestChainHost {
	fn note_new_transactions(&self) {
		self.new_transactions.fetch_add(1, AtomicOrdering::SeqCst);
	}

	fn note_new_blocks(&self) {
		self.new_blocks.fetch_add(1, AtomicOrdering::SeqCst);
	}

	fn status(&self) -> SyncStatus {
		SyncStatus { syncing: self.syncing.load(AtomicOrdering::SeqCst), ..Default::default() }
	}

	fn is_syncing(&self) -> bool {
		self.syncing.load(AtomicOrdering::SeqCst)
	}

	fn reset(&self) {
		self.resets.fetch_add(1, AtomicOrdering::SeqCst);
	}

	fn set_network_id(&self, id: U256) {
		*self.network_id.lock() = id;
	}
}

/// Bad-block sink double collecting reports.
#[derive(Default)]
pub struct TestSink {
	reports: Mutex<Vec<Value>>,
}

impl TestSink {
	/// Reports delivered so far.
	pub fn reports(&self) -> Vec<Value> {
		self.reports.lock().clone()
	}
}

impl BadBlockSink for TestSink {
	fn bad_block(&self, report: Value) {
		self.reports.lock().push(report);
	}
}

impl BadBlockSink for Arc<TestSink> {
	fn bad_block(&self, report: Value) {
		(**self).bad_block(report);
	}
}
