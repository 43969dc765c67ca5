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

//! The client core: owns the canonical view of the chain, drains the block
//! and transaction queues from a dedicated worker thread, orchestrates
//! mining and keeps observers notified.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ansi_term::Colour;
use ethereum_types::{Address, H256, U256};
use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::bad_blocks::{self, BadBlockSink, BadBlocks};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::filter::Filter;
use crate::gas_pricer::GasPricer;
use crate::log_entry::WatchChange;
use crate::traits::{
	BlockChain, BlockQueue, ChainHost, IfDropped, MiningFarm, StateFactory,
	TransactionImportResult, TransactionQueue, WorldState,
};
use crate::transaction::{Action, Transaction};
use crate::types::{
	BlockInfo, Bytes, ClientReport, ExecutionResult, ImportRoute, MiningProgress, Solution,
	SyncStatus, WorkPackage,
};
use crate::version::{VersionChecker, WithExisting};
use crate::watch::{FilterRegistry, Reaping, WatchId, PENDING_CHANGED_FILTER};

/// Smallest batch of blocks imported per queue drain.
const SYNC_MIN: usize = 1;
/// Largest batch of blocks imported per queue drain.
const SYNC_MAX: usize = 100;
/// Starting batch size.
const SYNC_START: usize = 50;
/// Target wall time for one import batch.
const TARGET_BATCH: Duration = Duration::from_secs(1);
/// Sliding window during which a remote `get_work` poll keeps work served.
const REMOTE_WORK_WINDOW: Duration = Duration::from_secs(30);
/// Idle wait between worker iterations.
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// Cadence of the maintenance tick.
const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Cadence of the watch garbage collector.
const GARBAGE_INTERVAL: Duration = Duration::from_secs(5);

/// Readiness flags and the wakeup channel shared with the queue callbacks.
/// Ready callbacks only flip a flag and notify; they never take the
/// snapshot locks.
struct WorkSignal {
	sync_block_queue: AtomicBool,
	sync_transaction_queue: AtomicBool,
	run: AtomicBool,
	lock: Mutex<()>,
	signalled: Condvar,
}

impl WorkSignal {
	fn new() -> WorkSignal {
		WorkSignal {
			sync_block_queue: AtomicBool::new(false),
			sync_transaction_queue: AtomicBool::new(false),
			run: AtomicBool::new(false),
			lock: Mutex::new(()),
			signalled: Condvar::new(),
		}
	}

	fn note_block_queue(&self) {
		self.sync_block_queue.store(true, AtomicOrdering::SeqCst);
		self.signal();
	}

	fn note_transaction_queue(&self) {
		self.sync_transaction_queue.store(true, AtomicOrdering::SeqCst);
		self.signal();
	}

	fn signal(&self) {
		let _guard = self.lock.lock();
		self.signalled.notify_all();
	}

	fn wait(&self, timeout: Duration) {
		let mut guard = self.lock.lock();
		let _ = self.signalled.wait_for(&mut guard, timeout);
	}
}

/// Blockchain client. Owns the authoritative view of the canonical chain
/// and binds together transaction ingest, block import, state execution,
/// mining work production and observer notification. The store, queues,
/// farm and host are external collaborators consumed through their traits.
pub struct Client<F: StateFactory> {
	config: ClientConfig,

	chain: Arc<dyn BlockChain>,
	transaction_queue: Arc<dyn TransactionQueue>,
	block_queue: Arc<dyn BlockQueue>,
	farm: Arc<dyn MiningFarm>,
	factory: F,
	gas_pricer: Mutex<Box<dyn GasPricer>>,

	// NOTE When taking more than one snapshot lock, always acquire in the
	// order `pre_mine` -> `working` -> `post_mine`.
	/// Mirror of the canonical head; no pending transactions.
	pre_mine: RwLock<F::State>,
	/// Head plus pending transactions being sealed into a candidate.
	working: RwLock<F::State>,
	/// The most recently sealed `working`; what user queries see.
	post_mine: RwLock<F::State>,

	filters: Mutex<FilterRegistry>,

	signal: Arc<WorkSignal>,
	worker: Mutex<Option<JoinHandle<()>>>,
	weak_self: Mutex<Weak<Client<F>>>,

	would_mine: AtomicBool,
	remote_working: AtomicBool,
	last_get_work: Mutex<Option<Instant>>,
	mining_info: Mutex<BlockInfo>,

	host: RwLock<Option<Weak<dyn ChainHost>>>,
	sentinel: Mutex<Option<Box<dyn BadBlockSink>>>,
	bad_blocks: BadBlocks,

	report: RwLock<ClientReport>,
	last_tick: Mutex<Instant>,
	last_garbage_collection: Mutex<Instant>,
}

impl<F: StateFactory> Client<F> {
	/// Create a new client over the given collaborators. Runs the version
	/// gate against the configured database directory, wires the queue and
	/// farm callbacks, and synchronises the snapshot triad with the head.
	/// The worker thread is not started; call `start_working`.
	pub fn new(
		config: ClientConfig,
		chain: Arc<dyn BlockChain>,
		transaction_queue: Arc<dyn TransactionQueue>,
		block_queue: Arc<dyn BlockQueue>,
		farm: Arc<dyn MiningFarm>,
		factory: F,
		gas_pricer: Box<dyn GasPricer>,
	) -> Result<Arc<Client<F>>, Error> {
		let checker = VersionChecker::new(config.db_path.clone(), chain.genesis_hash());
		let action = ::std::cmp::max(checker.action(), config.with_existing);
		if action != WithExisting::Trust {
			info!(target: "client", "Existing database is not usable as-is ({:?}); reinitialising", action);
		}
		chain.reopen(action);
		factory.reopen(action)?;

		let pre_mine = factory.canon_state();
		let working = pre_mine.clone();
		let post_mine = pre_mine.clone();

		let client = Arc::new(Client {
			config,
			chain: chain.clone(),
			transaction_queue: transaction_queue.clone(),
			block_queue: block_queue.clone(),
			farm: farm.clone(),
			factory,
			gas_pricer: Mutex::new(gas_pricer),
			pre_mine: RwLock::new(pre_mine),
			working: RwLock::new(working),
			post_mine: RwLock::new(post_mine),
			filters: Mutex::new(FilterRegistry::default()),
			signal: Arc::new(WorkSignal::new()),
			worker: Mutex::new(None),
			weak_self: Mutex::new(Weak::new()),
			would_mine: AtomicBool::new(false),
			remote_working: AtomicBool::new(false),
			last_get_work: Mutex::new(None),
			mining_info: Mutex::new(BlockInfo::default()),
			host: RwLock::new(None),
			sentinel: Mutex::new(None),
			bad_blocks: BadBlocks::default(),
			report: RwLock::new(ClientReport::default()),
			last_tick: Mutex::new(Instant::now()),
			last_garbage_collection: Mutex::new(Instant::now()),
		});
		*client.weak_self.lock() = Arc::downgrade(&client);

		let signal = client.signal.clone();
		transaction_queue.on_ready(Box::new(move || signal.note_transaction_queue()));
		let signal = client.signal.clone();
		block_queue.on_ready(Box::new(move || signal.note_block_queue()));

		let weak = Arc::downgrade(&client);
		block_queue.set_on_bad(Box::new(move |error| {
			if let Some(client) = weak.upgrade() {
				client.on_bad_block(error);
			}
		}));
		let weak = Arc::downgrade(&client);
		chain.set_on_bad(Box::new(move |error| {
			if let Some(client) = weak.upgrade() {
				client.on_bad_block(error);
			}
		}));
		let weak = Arc::downgrade(&client);
		farm.on_solution_found(Box::new(move |solution| {
			weak.upgrade().map_or(false, |client| client.submit_work(&solution))
		}));

		client.gas_pricer.lock().update(&*client.chain);
		client.resync_state();
		checker.set_ok()?;
		Ok(client)
	}

	/// Attach the p2p host capability. Held weakly; a dead host simply
	/// disables network notifications. The capability is expected to be
	/// registered with the network under [`crate::PROTOCOL_NAME`] and
	/// [`crate::version::PROTOCOL_VERSION`].
	pub fn register_host(&self, host: &Arc<dyn ChainHost>) {
		host.set_network_id(self.config.network_id);
		*self.host.write() = Some(Arc::downgrade(host));
	}

	/// Point the attached host at a different network.
	pub fn set_network_id(&self, id: U256) {
		if let Some(host) = self.host() {
			host.set_network_id(id);
		}
	}

	fn host(&self) -> Option<Arc<dyn ChainHost>> {
		self.host.read().as_ref().and_then(Weak::upgrade)
	}

	// Worker loop ---------------------------------------------------------

	/// Start the dedicated worker thread. No-op if already running.
	pub fn start_working(&self) {
		let mut worker = self.worker.lock();
		if worker.is_some() {
			return;
		}
		self.signal.run.store(true, AtomicOrdering::SeqCst);
		let weak = self.weak_self.lock().clone();
		let handle = thread::Builder::new()
			.name("client".into())
			.spawn(move || {
				if let Some(client) = weak.upgrade() {
					client.resync_state();
				}
				let mut sync_amount = SYNC_START;
				while let Some(client) = weak.upgrade() {
					if !client.signal.run.load(AtomicOrdering::SeqCst) {
						client.resync_state();
						break;
					}
					client.do_work(&mut sync_amount, true);
				}
			})
			.expect("failed to spawn the client worker thread");
		*worker = Some(handle);
	}

	/// Stop the worker thread and wait for it to finish.
	pub fn stop_working(&self) {
		let handle = self.worker.lock().take();
		if let Some(handle) = handle {
			self.signal.run.store(false, AtomicOrdering::SeqCst);
			self.signal.signal();
			let _ = handle.join();
		}
	}

	/// Synchronise the snapshot triad with the current chain head.
	fn resync_state(&self) {
		{
			let mut pre_mine = self.pre_mine.write();
			pre_mine.sync_to_chain(&*self.chain);
		}
		let pre_mine = self.pre_mine.read();
		*self.working.write() = pre_mine.clone();
		*self.post_mine.write() = pre_mine.clone();
	}

	/// One iteration of the worker: block-queue drain first, then the
	/// transaction drain, then the maintenance tick, then an idle wait if
	/// nothing further is pending.
	fn do_work(&self, sync_amount: &mut usize, idle_wait: bool) {
		if self
			.signal
			.sync_block_queue
			.compare_exchange(true, false, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
			.is_ok()
		{
			self.sync_block_queue(sync_amount);
		}

		if self
			.signal
			.sync_transaction_queue
			.compare_exchange(true, false, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
			.is_ok()
			&& !self.remote_working.load(AtomicOrdering::SeqCst)
			&& !self.is_syncing()
		{
			self.sync_transaction_queue();
		}

		self.tick();

		if idle_wait
			&& !self.signal.sync_block_queue.load(AtomicOrdering::SeqCst)
			&& !self.signal.sync_transaction_queue.load(AtomicOrdering::SeqCst)
		{
			self.signal.wait(IDLE_WAIT);
		}
	}

	/// Import a batch of verified blocks from the queue into the chain,
	/// adapting the batch size towards the target wall time.
	fn sync_block_queue(&self, sync_amount: &mut usize) {
		let start = Instant::now();
		let (route, more) = self.chain.sync(&*self.block_queue, *sync_amount);
		let elapsed = start.elapsed();

		if more {
			self.signal.sync_block_queue.store(true, AtomicOrdering::SeqCst);
		}

		debug!(
			target: "client",
			"{} blocks imported in {} ms",
			route.imported.len(),
			elapsed.as_millis()
		);
		*sync_amount = adapt_sync_amount(*sync_amount, elapsed);

		if route.imported.is_empty() {
			return;
		}

		{
			let mut report = self.report.write();
			for hash in &route.imported {
				if let Some(info) = self.chain.info(hash) {
					let transactions = self.chain.transaction_hashes(hash).len();
					report.accrue_block(&info, transactions);
				}
			}
		}

		self.on_chain_changed(&route);
	}

	/// Drain the transaction queue into `working`, promoting the result to
	/// `post_mine` when anything was executed.
	fn sync_transaction_queue(&self) {
		let mut dirty = HashSet::new();

		let (receipts, more) = {
			let mut working = self.working.write();
			let gas_pricer = self.gas_pricer.lock();
			working.sync_transactions(&*self.chain, &*self.transaction_queue, &**gas_pricer)
		};
		if more {
			self.signal.sync_transaction_queue.store(true, AtomicOrdering::SeqCst);
		}
		if receipts.is_empty() {
			return;
		}

		{
			let working = self.working.read();
			*self.post_mine.write() = working.clone();
		}

		{
			let post_mine = self.post_mine.read();
			let pending = post_mine.pending();
			// receipts correspond to the newly executed suffix of pending.
			let first = pending.len().saturating_sub(receipts.len());
			let mut filters = self.filters.lock();
			for (i, receipt) in receipts.iter().enumerate() {
				let hash = pending.get(first + i).map(Transaction::hash).unwrap_or_default();
				filters.append_from_new_pending(receipt, hash, &mut dirty);
			}
		}

		// new pending state: restart any mining on top of it.
		self.on_post_state_changed();
		self.note_changed(&dirty);

		if let Some(host) = self.host() {
			host.note_new_transactions();
		}
	}

	/// React to canonical-chain movement: resubmit transactions from the
	/// dead branch, drop the freshly confirmed ones, then roll the snapshot
	/// triad forward onto the new head.
	fn on_chain_changed(&self, route: &ImportRoute) {
		for hash in &route.dead {
			debug!(target: "client", "Dead block: {}", hash);
			for transaction in self.chain.transactions(hash) {
				trace!(target: "client", "Resubmitting dead-block transaction {}", transaction.hash());
				// a refused re-entry is fine; the nonce check sorts it out.
				let _ = self.transaction_queue.import(transaction, IfDropped::Retry);
			}
		}

		for hash in &route.imported {
			debug!(target: "client", "Live block: {}", hash);
			for transaction_hash in self.chain.transaction_hashes(hash) {
				trace!(target: "client", "Safely dropping transaction {}", transaction_hash);
				TransactionQueue::drop(&*self.transaction_queue, &transaction_hash);
			}
		}

		if let Some(host) = self.host() {
			host.note_new_blocks();
		}

		let mut dirty = HashSet::new();
		{
			let mut filters = self.filters.lock();
			for hash in &route.imported {
				if let Some(info) = self.chain.info(hash) {
					let entries: Vec<_> = self
						.chain
						.transaction_hashes(hash)
						.into_iter()
						.zip(self.chain.receipts(hash).into_iter())
						.collect();
					filters.append_from_new_block(&info, &entries, &mut dirty);
				}
			}
		}

		if self.block_queue.items().0 == 0 {
			let mut new_pre_mine = self.pre_mine.read().clone();
			let pre_changed = new_pre_mine.sync_to_chain(&*self.chain);
			let author_changed = {
				let pre_author = self.pre_mine.read().author();
				let post_author = self.post_mine.read().author();
				pre_author != post_author
			};

			if pre_changed || author_changed {
				if self.would_mine.load(AtomicOrdering::SeqCst) {
					debug!(target: "client", "New block on chain; restarting mining.");
				}

				*self.pre_mine.write() = new_pre_mine.clone();
				*self.working.write() = new_pre_mine;
				{
					let post_mine = self.post_mine.read();
					for transaction in post_mine.pending() {
						trace!(
							target: "client",
							"Resubmitting post-mine transaction {}",
							transaction.hash()
						);
						let result = self.transaction_queue.import(transaction, IfDropped::Retry);
						if result != TransactionImportResult::Success {
							self.signal.note_transaction_queue();
						}
					}
				}
				{
					let working = self.working.read();
					*self.post_mine.write() = working.clone();
				}

				dirty.insert(PENDING_CHANGED_FILTER);
				self.on_post_state_changed();
			}

			// the queue already holds the prior pending transactions; make
			// sure the worker picks them up again.
			self.signal.note_transaction_queue();

			if pre_changed {
				self.gas_pricer.lock().update(&*self.chain);
			}
		}

		self.note_changed(&dirty);
	}

	// Mining --------------------------------------------------------------

	/// Enable mining and prepare a candidate.
	pub fn start_mining(&self) {
		self.would_mine.store(true, AtomicOrdering::SeqCst);
		self.rejig_mining();
	}

	/// Disable mining and stop the farm.
	pub fn stop_mining(&self) {
		self.would_mine.store(false, AtomicOrdering::SeqCst);
		self.rejig_mining();
	}

	/// Whether local mining is wanted.
	pub fn is_mining(&self) -> bool {
		self.would_mine.load(AtomicOrdering::SeqCst)
	}

	/// Whether a remote worker asked for work within the sliding window.
	pub fn remote_active(&self) -> bool {
		(*self.last_get_work.lock())
			.map_or(false, |last| Instant::now().duration_since(last) < REMOTE_WORK_WINDOW)
	}

	fn should_serve_work(&self) -> bool {
		self.would_mine.load(AtomicOrdering::SeqCst) || self.remote_active()
	}

	/// Called whenever `post_mine` changed: restart mining on the new state.
	fn on_post_state_changed(&self) {
		trace!(target: "miner", "Post state changed.");
		self.rejig_mining();
		self.remote_working.store(false, AtomicOrdering::SeqCst);
	}

	/// Recommit `working` into a fresh candidate and hand it to the farm.
	/// A no-op unless mining is wanted (locally or remotely), the block
	/// queue is drained of unknowns, and the chain is healthy or the
	/// operator opted in regardless.
	fn rejig_mining(&self) {
		let would_mine = self.would_mine.load(AtomicOrdering::SeqCst);
		if (would_mine || self.remote_active())
			&& self.block_queue.items().0 == 0
			&& (!self.is_chain_bad() || self.config.mine_on_bad_chain)
		{
			debug!(target: "miner", "Rejigging mining...");
			{
				let mut working = self.working.write();
				working.commit_to_mine(&*self.chain);
			}
			let info = {
				let working = self.working.read();
				let mut post_mine = self.post_mine.write();
				*post_mine = working.clone();
				post_mine.info()
			};
			*self.mining_info.lock() = info.clone();

			if would_mine {
				self.farm.set_work(WorkPackage::package(&info));
				self.farm.start();
				self.farm.ensure_precomputed(self.chain.best_block_number());
			}
		}
		if !would_mine {
			self.farm.stop();
		}
	}

	/// Current mining target for remote workers. Serves the empty package
	/// when the chain is flagged bad and the operator has not opted in to
	/// mining regardless.
	pub fn get_work(&self) -> WorkPackage {
		// lock the work in so a later submission isn't invalidated by a
		// transaction processed elsewhere; reset on the next chain change.
		let old_should = self.should_serve_work();
		*self.last_get_work.lock() = Some(Instant::now());

		if !self.config.mine_on_bad_chain && self.is_chain_bad() {
			return WorkPackage::default();
		}

		if !old_should && self.should_serve_work() {
			// this request alone made us serve work; prepare it now.
			self.on_post_state_changed();
		} else {
			// have the next post-state change prepare it.
			self.remote_working.store(true, AtomicOrdering::SeqCst);
		}
		WorkPackage::package(&*self.mining_info.lock())
	}

	/// Submit a proof-of-work solution. On success the sealed block is
	/// promoted to `post_mine` and re-enters through the normal import
	/// path, marked as our own. On failure nothing changes.
	pub fn submit_work(&self, solution: &Solution) -> bool {
		{
			let mut working = self.working.write();
			if !working.complete_mine(solution) {
				debug!(target: "miner", "Mined solution rejected.");
				return false;
			}
		}

		let block = {
			let working = self.working.read();
			*self.post_mine.write() = working.clone();
			working.block_data()
		};

		if let Err(error) = self.block_queue.import(block, true) {
			warn!(target: "miner", "Sealed block rejected by the queue: {}", error);
		} else {
			let number = self.mining_info.lock().number;
			info!(
				target: "miner",
				"Mined block {} submitted for import.",
				Colour::White.bold().paint(format!("#{}", number))
			);
		}
		true
	}

	// Filters and watches -------------------------------------------------

	/// Install a log filter; returns its id.
	pub fn install_filter(&self, filter: Filter) -> H256 {
		self.filters.lock().install_filter(filter)
	}

	/// Install a watch over a filter or pseudo-filter id.
	pub fn install_watch(&self, filter_id: H256, reaping: Reaping) -> WatchId {
		self.filters.lock().install_watch(filter_id, reaping, Instant::now())
	}

	/// Remove a watch; unknown ids are a no-op.
	pub fn uninstall_watch(&self, id: WatchId) -> bool {
		self.filters.lock().uninstall_watch(id)
	}

	/// Drain the changes accumulated for a watch. Unknown watches yield
	/// nothing; never an error.
	pub fn poll(&self, id: WatchId) -> Vec<WatchChange> {
		self.filters.lock().poll(id, Instant::now())
	}

	/// Flush accumulated filter changes into subscribed watches.
	fn note_changed(&self, dirty: &HashSet<H256>) {
		if !dirty.is_empty() {
			trace!(target: "filters", "note_changed: {} filters touched", dirty.len());
		}
		self.filters.lock().note_changed(dirty);
	}

	// Maintenance ---------------------------------------------------------

	/// Once a second: advance the activity report, run the watch garbage
	/// collector on its own cadence, and give the block queue its tick.
	fn tick(&self) {
		let now = Instant::now();
		{
			let mut last_tick = self.last_tick.lock();
			if now.duration_since(*last_tick) < TICK_INTERVAL {
				return;
			}
			*last_tick = now;
		}
		self.report.write().ticks += 1;
		self.check_watch_garbage(now);
		self.block_queue.tick(&*self.chain);
	}

	fn check_watch_garbage(&self, now: Instant) {
		{
			let mut last = self.last_garbage_collection.lock();
			if now.duration_since(*last) < GARBAGE_INTERVAL {
				return;
			}
			*last = now;
		}
		let collected = self.filters.lock().collect_garbage(now);
		if !collected.is_empty() {
			debug!(target: "filters", "GC: uninstalled {} idle watches", collected.len());
		}
		self.chain.collect_garbage();
	}

	/// Drop every pending transaction and restart mining from the head.
	pub fn clear_pending(&self) {
		{
			let pre_mine = self.pre_mine.read();
			let mut working = self.working.write();
			let mut post_mine = self.post_mine.write();
			if post_mine.pending().is_empty() {
				return;
			}
			self.transaction_queue.clear();
			// reset the whole sealing side; a later commit re-derives the
			// candidate from `working`.
			*working = pre_mine.clone();
			*post_mine = pre_mine.clone();
		}
		self.start_mining();
		self.note_changed(&HashSet::new());
	}

	/// Nuke the chain and start over from genesis. Requires a full stop;
	/// the worker is restarted afterwards.
	pub fn kill_chain(&self) {
		let was_mining = self.is_mining();
		if was_mining {
			self.stop_mining();
		}
		self.stop_working();

		self.transaction_queue.clear();
		self.block_queue.clear();
		self.farm.stop();

		{
			let mut pre_mine = self.pre_mine.write();
			let mut working = self.working.write();
			let mut post_mine = self.post_mine.write();

			self.chain.reopen(WithExisting::Kill);
			if let Err(error) = self.factory.reopen(WithExisting::Kill) {
				warn!(target: "client", "Reinitialising the state database failed: {}", error);
			}
			*pre_mine = self.factory.canon_state();
			*working = pre_mine.clone();
			*post_mine = pre_mine.clone();
		}

		if let Some(host) = self.host() {
			host.reset();
		}

		self.resync_state();
		self.start_working();
		if was_mining {
			self.start_mining();
		}
	}

	/// Synchronously run one worker iteration on the caller's thread.
	pub fn flush_transactions(&self) {
		let mut sync_amount = SYNC_START;
		self.do_work(&mut sync_amount, false);
	}

	// Observer dispatch ---------------------------------------------------

	/// Run a call transiently over a copy of `post_mine`, topping the
	/// sender's balance up to cover the full cost. Best-effort: failures
	/// are swallowed into an empty result.
	pub fn call(
		&self,
		dest: Address,
		data: Bytes,
		gas: U256,
		value: U256,
		gas_price: U256,
		from: Address,
	) -> ExecutionResult {
		let transaction = Transaction {
			nonce: U256::zero(),
			gas_price,
			gas,
			action: Action::Call(dest),
			value,
			data,
			sender: from,
		};
		let mut state = self.post_mine.read().clone();
		state.add_balance(&from, value + gas_price * gas);
		match state.execute(&transaction) {
			Ok(result) => result,
			Err(error) => {
				trace!(target: "client", "Transient call failed: {}", error);
				ExecutionResult::default()
			}
		}
	}

	/// Snapshot as of the given block. Population failures are routed
	/// through the bad-block handler and yield a pristine snapshot.
	pub fn as_of(&self, block: &H256) -> F::State {
		let mut state = self.factory.pristine_state();
		if let Err(error) = state.populate_from_chain(&*self.chain, block) {
			let annotated = self.annotate_bad_block(error, block);
			self.on_bad_block(&annotated);
			return self.factory.pristine_state();
		}
		state
	}

	/// Snapshot positioned just before pending transaction `index` of the
	/// given historical block.
	pub fn state_at(&self, block: &H256, index: usize) -> F::State {
		self.as_of(block).from_pending(index)
	}

	/// Snapshot positioned just before pending transaction `index` of the
	/// current pending block.
	pub fn pending_state(&self, index: usize) -> F::State {
		self.post_mine.read().from_pending(index)
	}

	/// Storage slot of an account as user queries see it.
	pub fn storage_at(&self, address: &Address, position: &U256) -> U256 {
		self.post_mine.read().storage_at(address, position)
	}

	/// Storage slot of an account as of a historical block.
	pub fn storage_at_block(&self, address: &Address, position: &U256, block: &H256) -> U256 {
		self.as_of(block).storage_at(address, position)
	}

	/// Balance of an account as user queries see it.
	pub fn balance(&self, address: &Address) -> U256 {
		self.post_mine.read().balance(address)
	}

	/// Transactions pending in the current candidate.
	pub fn pending_transactions(&self) -> Vec<Transaction> {
		self.post_mine.read().pending()
	}

	/// True when the canary contract signals distress.
	pub fn is_chain_bad(&self) -> bool {
		!self.storage_at(&self.config.canary_address, &U256::zero()).is_zero()
	}

	/// True when the canary asks for a client upgrade.
	pub fn is_upgrade_needed(&self) -> bool {
		self.storage_at(&self.config.canary_address, &U256::zero()) == U256::from(2u64)
	}

	/// Host sync status; default when no host is attached.
	pub fn sync_status(&self) -> SyncStatus {
		self.host().map(|host| host.status()).unwrap_or_default()
	}

	/// Whether the host is currently syncing the chain.
	pub fn is_syncing(&self) -> bool {
		self.host().map_or(false, |host| host.is_syncing())
	}

	/// Current hashrate of the farm, zero when idle.
	pub fn hashrate(&self) -> u64 {
		if self.farm.is_mining() {
			self.farm.progress().rate()
		} else {
			0
		}
	}

	/// Progress of the current mining run, default when idle.
	pub fn mining_progress(&self) -> MiningProgress {
		if self.farm.is_mining() {
			self.farm.progress()
		} else {
			MiningProgress::default()
		}
	}

	/// Report on client activity.
	pub fn report(&self) -> ClientReport {
		self.report.read().clone()
	}

	// Bad blocks ----------------------------------------------------------

	/// Set the external sink for bad-block reports.
	pub fn set_sentinel(&self, sink: Box<dyn BadBlockSink>) {
		*self.sentinel.lock() = Some(sink);
	}

	/// Recently rejected blocks with their error strings, newest first.
	pub fn bad_blocks(&self) -> Vec<(Bytes, String)> {
		self.bad_blocks.bad_blocks()
	}

	fn annotate_bad_block(&self, error: Error, block: &H256) -> Error {
		match error {
			annotated @ Error::BadBlock { .. } => annotated,
			other => Error::BadBlock {
				message: other.to_string(),
				block: self.chain.block(block).unwrap_or_default(),
				hints: Vec::new(),
			},
		}
	}

	/// Handle a bad block raised by the queues or the store: build the
	/// diagnostic report, remember the block, forward to the sentinel.
	/// Never propagated to callers.
	fn on_bad_block(&self, error: &Error) {
		let (block, hints) = match error {
			Error::BadBlock { block, hints, .. } => (block.as_slice(), hints.as_slice()),
			other => {
				warn!(target: "client", "Bad-block handler invoked without a block: {}", other);
				return;
			}
		};
		let message = error.to_string();
		self.bad_blocks.report(block.to_vec(), message.clone());
		let report = bad_blocks::report(block, &message, hints);
		warn!(target: "client", "Bad block report: {}", report);
		if let Some(sink) = self.sentinel.lock().as_ref() {
			sink.bad_block(report);
		}
	}
}

impl<F: StateFactory> Drop for Client<F> {
	fn drop(&mut self) {
		self.stop_working();
		self.farm.stop();
	}
}

/// Scale the import batch size so a batch lands near the target duration,
/// clamped to `[SYNC_MIN, SYNC_MAX]`.
fn adapt_sync_amount(amount: usize, elapsed: Duration) -> usize {
	let elapsed = elapsed.as_secs_f64();
	let target = TARGET_BATCH.as_secs_f64();
	if elapsed > target * 1.1 && amount > SYNC_MIN {
		::std::cmp::max(SYNC_MIN, amount * 9 / 10)
	} else if elapsed < target * 0.9 && amount < SYNC_MAX {
		::std::cmp::min(SYNC_MAX, amount * 11 / 10 + 1)
	} else {
		amount
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread;

	use tempdir::TempDir;

	use crate::bad_blocks::BadBlockHint;
	use crate::gas_pricer::TrivialGasPricer;
	use crate::test_helpers::{
		TestBlock, TestBlockChain, TestBlockQueue, TestChainHost, TestFarm, TestSink,
		TestStateFactory, TestTransactionQueue,
	};
	use crate::watch::CHAIN_CHANGED_FILTER;

	struct TestSetup {
		client: Arc<Client<Arc<TestStateFactory>>>,
		chain: Arc<TestBlockChain>,
		transaction_queue: Arc<TestTransactionQueue>,
		block_queue: Arc<TestBlockQueue>,
		farm: Arc<TestFarm>,
		factory: Arc<TestStateFactory>,
		host: Arc<TestChainHost>,
		_dir: TempDir,
	}

	fn coinbase() -> Address {
		Address::from_low_u64_be(0xaa)
	}

	fn transaction(sender: u64, nonce: u64) -> Transaction {
		Transaction {
			nonce: nonce.into(),
			gas_price: U256::from(1_000_000_000u64),
			gas: U256::from(21_000u64),
			action: Action::Call(Address::from_low_u64_be(0xdd)),
			value: U256::zero(),
			data: vec![],
			sender: Address::from_low_u64_be(sender),
		}
	}

	fn setup() -> TestSetup {
		setup_with(|_, _| {})
	}

	fn setup_with(configure: impl FnOnce(&mut ClientConfig, &TestStateFactory)) -> TestSetup {
		let _ = env_logger::builder().is_test(true).try_init();
		let dir = TempDir::new("client").unwrap();
		let chain = Arc::new(TestBlockChain::new());
		let transaction_queue = Arc::new(TestTransactionQueue::default());
		let block_queue = Arc::new(TestBlockQueue::new(chain.clone()));
		let farm = Arc::new(TestFarm::default());
		let factory = Arc::new(TestStateFactory::new(coinbase()));
		let mut config = ClientConfig::default();
		config.db_path = dir.path().to_path_buf();
		configure(&mut config, &*factory);

		let client = Client::new(
			config,
			chain.clone() as Arc<dyn BlockChain>,
			transaction_queue.clone() as Arc<dyn TransactionQueue>,
			block_queue.clone() as Arc<dyn BlockQueue>,
			farm.clone() as Arc<dyn MiningFarm>,
			factory.clone(),
			Box::new(TrivialGasPricer::default()),
		)
		.unwrap();

		let host = Arc::new(TestChainHost::default());
		let shared: Arc<dyn ChainHost> = host.clone();
		client.register_host(&shared);

		TestSetup {
			client,
			chain,
			transaction_queue,
			block_queue,
			farm,
			factory,
			host,
			_dir: dir,
		}
	}

	#[test]
	fn fresh_directory_is_killed_then_acknowledged() {
		// given a fresh database directory
		let t = setup();

		// then the store and state db were told to wipe...
		assert_eq!(t.chain.reopen_history(), vec![WithExisting::Kill]);
		assert_eq!(t.factory.reopen_history(), vec![WithExisting::Kill]);

		// ...and a fresh status record exists afterwards.
		assert!(t._dir.path().join("status").exists());
	}

	#[test]
	fn host_registration_advertises_network_id() {
		let t = setup_with(|config, _| config.network_id = U256::from(5u64));
		assert_eq!(t.host.network_id(), U256::from(5u64));
		t.client.set_network_id(U256::from(7u64));
		assert_eq!(t.host.network_id(), U256::from(7u64));
	}

	#[test]
	fn pending_transaction_confirmed_by_block() {
		let t = setup();
		let chain_watch = t.client.install_watch(CHAIN_CHANGED_FILTER, Reaping::Automatic);

		// a transaction is accepted into the pending state.
		let tx = transaction(0xb0b, 0);
		let tx_hash = tx.hash();
		assert_eq!(
			t.transaction_queue.import(tx.clone(), IfDropped::Ignore),
			TransactionImportResult::Success
		);
		t.client.sync_transaction_queue();
		assert!(t.client.pending_transactions().iter().any(|p| p.hash() == tx_hash));
		assert!(t.host.new_transaction_notes() >= 1);

		// the host delivers a block containing it.
		let block = TestBlock {
			parent_hash: t.chain.best_block_hash(),
			number: 1,
			transactions: vec![tx],
			..Default::default()
		};
		let block_hash = block.hash();
		t.block_queue.import(rlp::encode(&block), false).unwrap();
		let mut amount = 10;
		t.client.sync_block_queue(&mut amount);

		// the reorg handler asked for one more transaction drain; run it.
		assert!(t.client.signal.sync_transaction_queue.load(AtomicOrdering::SeqCst));
		t.client.sync_transaction_queue();

		assert!(!t.client.pending_transactions().iter().any(|p| p.hash() == tx_hash));
		assert!(!t.transaction_queue.contains(&tx_hash));
		let changes = t.client.poll(chain_watch);
		assert!(changes.contains(&WatchChange::Special(block_hash)));
		assert!(t.host.new_block_notes() >= 1);
	}

	#[test]
	fn one_block_reorg_resubmits_dead_transactions() {
		let t = setup();
		let t1 = transaction(0xa11ce, 0);
		let t2 = transaction(0xb0b, 0);

		// canonical [genesis, a] with t1 confirmed.
		let a = TestBlock {
			parent_hash: t.chain.genesis_hash(),
			number: 1,
			transactions: vec![t1.clone()],
			..Default::default()
		};
		t.chain.insert_canonical(a.clone());
		t.client.resync_state();

		// t2 was gossiped and sits in the queue.
		t.transaction_queue.import(t2.clone(), IfDropped::Ignore);

		// a sibling block b carrying t2 wins the fork.
		let b = TestBlock {
			parent_hash: t.chain.genesis_hash(),
			number: 1,
			timestamp: 1,
			transactions: vec![t2.clone()],
			..Default::default()
		};
		t.chain.insert_branch(b.clone());
		t.chain.queue_route(
			ImportRoute { imported: vec![b.hash()], dead: vec![a.hash()] },
			false,
		);

		let mut amount = 10;
		t.client.sync_block_queue(&mut amount);

		// the dead branch's transaction is back; the confirmed one is gone.
		assert!(t.transaction_queue.contains(&t1.hash()));
		assert!(!t.transaction_queue.contains(&t2.hash()));
		assert_eq!(t.chain.best_block_hash(), b.hash());
	}

	#[test]
	fn mining_cycle_produces_and_accepts_work() {
		let t = setup();
		t.client.start_mining();

		// within one rejig the farm holds work for the candidate.
		let work = t.farm.last_work().expect("mining started; work was dispatched");
		assert_eq!(work.header_hash, t.client.post_mine.read().info().hash);
		assert!(t.farm.running());
		assert!(!t.farm.precomputed().is_empty());

		// a valid solution is accepted and the sealed block re-enters
		// through the import path, advancing the chain by one.
		assert!(t.farm.solve(Solution::default()));
		assert_eq!(t.block_queue.items().0, 1);
		let mut amount = 10;
		t.client.sync_block_queue(&mut amount);
		assert_eq!(t.chain.best_block_number(), 1);
		assert_eq!(t.client.post_mine.read().head, t.chain.best_block_hash());
	}

	#[test]
	fn stale_solution_is_rejected_without_side_effects() {
		let t = setup();
		// no candidate was ever committed; the solve must fail cleanly.
		assert!(!t.client.submit_work(&Solution::default()));
		assert_eq!(t.block_queue.items().0, 0);
	}

	#[test]
	fn getwork_only_client_is_served() {
		let t = setup();
		assert!(!t.client.remote_active());

		// the first poll alone flips us into serving work.
		let work = t.client.get_work();
		assert!(t.client.remote_active());
		assert!(!work.is_empty());

		// the farm is left alone; this is remote-only work.
		assert!(t.farm.last_work().is_none());
		assert!(!t.farm.running());

		// silence for longer than the window clears the remote flag.
		if let Some(past) = Instant::now().checked_sub(REMOTE_WORK_WINDOW + Duration::from_secs(1)) {
			*t.client.last_get_work.lock() = Some(past);
			assert!(!t.client.remote_active());
		}
	}

	#[test]
	fn post_mine_follows_working_after_drain() {
		let t = setup();
		t.transaction_queue.import(transaction(0x1, 0), IfDropped::Ignore);
		t.client.sync_transaction_queue();
		assert_eq!(*t.client.post_mine.read(), *t.client.working.read());
	}

	#[test]
	fn transient_call_is_funded_and_isolated() {
		let t = setup();
		let from = Address::from_low_u64_be(0xf00);

		// the sender has no balance; the call is funded transparently.
		let result = t.client.call(
			Address::from_low_u64_be(0xdead),
			vec![1, 2, 3],
			U256::from(21_000u64),
			U256::from(5u64),
			U256::from(1u64),
			from,
		);
		assert_eq!(result.output, vec![1, 2, 3]);
		assert!(!result.excepted);

		// the real post-mine state was never touched.
		assert!(t.client.balance(&from).is_zero());
	}

	#[test]
	fn bad_blocks_are_reported_to_the_sink() {
		let t = setup();
		let sink = Arc::new(TestSink::default());
		t.client.set_sentinel(Box::new(sink.clone()));

		let error = Error::BadBlock {
			message: "InvalidSeal".into(),
			block: vec![0xde, 0xad],
			hints: vec![BadBlockHint::TransactionIndex(0)],
		};
		t.block_queue.trigger_bad(&error);

		let reports = sink.reports();
		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0]["errortype"], "bad block: InvalidSeal");
		assert_eq!(reports[0]["hints"]["transactionIndex"], 0);
		assert_eq!(t.client.bad_blocks().len(), 1);
	}

	#[test]
	fn unknown_block_state_is_reported_and_empty() {
		let t = setup();
		let sink = Arc::new(TestSink::default());
		t.client.set_sentinel(Box::new(sink.clone()));

		let state = t.client.as_of(&H256::from_low_u64_be(0xfff));
		assert!(state.pending.is_empty());
		assert_eq!(sink.reports().len(), 1);
	}

	#[test]
	fn canary_blocks_work_production() {
		let canary = Address::from_low_u64_be(0xca);
		let t = setup_with(|config, factory| {
			config.canary_address = canary;
			factory.set_storage(canary, U256::zero(), U256::from(1u64));
		});
		assert!(t.client.is_chain_bad());
		assert!(!t.client.is_upgrade_needed());
		assert!(t.client.get_work().is_empty());

		// local mining is likewise refused.
		t.client.start_mining();
		assert!(t.farm.last_work().is_none());
	}

	#[test]
	fn canary_value_two_asks_for_upgrade() {
		let canary = Address::from_low_u64_be(0xca);
		let t = setup_with(|config, factory| {
			config.canary_address = canary;
			factory.set_storage(canary, U256::zero(), U256::from(2u64));
		});
		assert!(t.client.is_chain_bad());
		assert!(t.client.is_upgrade_needed());
	}

	#[test]
	fn mining_on_bad_chain_can_be_opted_into() {
		let canary = Address::from_low_u64_be(0xca);
		let t = setup_with(|config, factory| {
			config.canary_address = canary;
			config.mine_on_bad_chain = true;
			factory.set_storage(canary, U256::zero(), U256::from(1u64));
		});
		t.client.start_mining();
		assert!(t.farm.last_work().is_some());
	}

	#[test]
	fn clear_pending_drops_queue_and_pending() {
		// mining is already on, so the rejig after the clear recommits a
		// candidate; it must not resurrect the cleared transactions.
		let t = setup();
		t.client.start_mining();
		t.transaction_queue.import(transaction(0x9, 0), IfDropped::Ignore);
		t.client.sync_transaction_queue();
		assert!(!t.client.pending_transactions().is_empty());

		t.client.clear_pending();
		assert!(t.client.pending_transactions().is_empty());
		assert!(t.transaction_queue.transactions().is_empty());
		assert!(t.client.working.read().pending.is_empty());
		let recommitted = t.farm.last_work().expect("mining is on; work was dispatched");
		assert_eq!(recommitted.header_hash, t.client.post_mine.read().info().hash);
	}

	#[test]
	fn clear_pending_restarts_mining_when_off() {
		let t = setup();
		assert!(!t.client.is_mining());
		t.transaction_queue.import(transaction(0x9, 0), IfDropped::Ignore);
		t.client.sync_transaction_queue();

		t.client.clear_pending();
		assert!(t.client.is_mining());
		assert!(t.farm.last_work().is_some());
	}

	#[test]
	fn kill_chain_resets_everything() {
		let t = setup();
		t.transaction_queue.import(transaction(0x1, 0), IfDropped::Ignore);
		t.client.sync_transaction_queue();
		assert!(!t.client.pending_transactions().is_empty());

		t.client.kill_chain();

		assert!(t.client.pending_transactions().is_empty());
		assert!(t.transaction_queue.transactions().is_empty());
		assert_eq!(t.host.resets(), 1);
		assert!(t.factory.reopen_history().contains(&WithExisting::Kill));
		assert_eq!(t.chain.reopen_history().last(), Some(&WithExisting::Kill));
		t.client.stop_working();
	}

	#[test]
	fn worker_drains_queues_signalled_ready() {
		let t = setup();
		t.client.start_working();

		let tx = transaction(0x77, 0);
		let tx_hash = tx.hash();
		t.transaction_queue.import(tx, IfDropped::Ignore);

		let deadline = Instant::now() + Duration::from_secs(5);
		while Instant::now() < deadline {
			if t.client.pending_transactions().iter().any(|p| p.hash() == tx_hash) {
				break;
			}
			thread::sleep(Duration::from_millis(10));
		}
		assert!(t.client.pending_transactions().iter().any(|p| p.hash() == tx_hash));

		t.client.stop_working();
		// stopped and joined; restarting works.
		t.client.start_working();
		t.client.stop_working();
	}

	#[test]
	fn transaction_drain_is_skipped_while_syncing() {
		let t = setup();
		t.host.set_syncing(true);
		t.transaction_queue.import(transaction(0x5, 0), IfDropped::Ignore);
		t.client.flush_transactions();
		assert!(t.client.pending_transactions().is_empty());

		// once the sync is over the drain goes through.
		t.host.set_syncing(false);
		t.client.signal.note_transaction_queue();
		t.client.flush_transactions();
		assert!(!t.client.pending_transactions().is_empty());
	}

	#[test]
	fn sync_amount_adapts_towards_target() {
		// batches costing 15 ms per block converge into the window around
		// the 1 s target and stay clamped within bounds.
		let per_block = 0.015;
		let mut amount = 1;
		for _ in 0..100 {
			let elapsed = Duration::from_secs_f64(amount as f64 * per_block);
			amount = adapt_sync_amount(amount, elapsed);
			assert!(amount >= SYNC_MIN && amount <= SYNC_MAX);
		}
		let elapsed = Duration::from_secs_f64(amount as f64 * per_block);
		assert!(
			elapsed >= Duration::from_millis(900) && elapsed <= Duration::from_millis(1100),
			"converged to {} blocks taking {:?}",
			amount,
			elapsed
		);
	}

	#[test]
	fn sync_amount_clamps_and_steps() {
		assert_eq!(adapt_sync_amount(50, Duration::from_secs(2)), 45);
		assert_eq!(adapt_sync_amount(50, Duration::from_millis(100)), 56);
		assert_eq!(adapt_sync_amount(SYNC_MIN, Duration::from_secs(10)), SYNC_MIN);
		assert_eq!(adapt_sync_amount(SYNC_MAX, Duration::from_millis(1)), SYNC_MAX);
		// inside the window nothing changes.
		assert_eq!(adapt_sync_amount(50, Duration::from_millis(1000)), 50);
	}
}
