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

//! Installed log filters, the watches draining them, and the two reserved
//! pseudo-filters. The registry is pure: time is passed in, and the client
//! guards it with a single mutex held only for quick append/flush work.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::time::{Duration, Instant};

use ethereum_types::H256;
use log::trace;

use crate::filter::Filter;
use crate::log_entry::{LocalizedLogEntry, WatchChange};
use crate::receipt::TransactionReceipt;
use crate::types::BlockInfo;

/// Reserved id of the pseudo-filter accumulating pending transaction hashes.
pub const PENDING_CHANGED_FILTER: H256 = H256([0u8; 32]);

/// Reserved id of the pseudo-filter accumulating new canonical block hashes.
pub const CHAIN_CHANGED_FILTER: H256 = H256([
	0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
]);

/// Identifier of an installed watch.
pub type WatchId = usize;

/// How a watch should be reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaping {
	/// Uninstalled automatically when left unpolled for too long.
	Automatic,
	/// Kept until explicitly uninstalled; an observer subscription.
	Manual,
}

/// Idle time after which an automatic watch is collected.
const WATCH_IDLE_LIMIT: Duration = Duration::from_secs(20);

struct InstalledFilter {
	filter: Filter,
	changes: Vec<LocalizedLogEntry>,
}

struct ClientWatch {
	filter_id: H256,
	changes: Vec<WatchChange>,
	// `None` means never polled; such watches are exempt from collection.
	last_poll: Option<Instant>,
}

/// Registry of installed filters, the pseudo-filters, and watches.
pub struct FilterRegistry {
	filters: HashMap<H256, InstalledFilter>,
	special: HashMap<H256, Vec<H256>>,
	watches: HashMap<WatchId, ClientWatch>,
	next_filter_id: u64,
	next_watch_id: WatchId,
}

impl Default for FilterRegistry {
	fn default() -> FilterRegistry {
		let mut special = HashMap::new();
		special.insert(PENDING_CHANGED_FILTER, Vec::new());
		special.insert(CHAIN_CHANGED_FILTER, Vec::new());
		FilterRegistry {
			filters: HashMap::new(),
			special,
			watches: HashMap::new(),
			// ids 0 and 1 are the reserved pseudo-filters.
			next_filter_id: 2,
			next_watch_id: 0,
		}
	}
}

impl FilterRegistry {
	/// Install a filter, returning its fresh id.
	pub fn install_filter(&mut self, filter: Filter) -> H256 {
		let id = H256::from_low_u64_be(self.next_filter_id);
		self.next_filter_id += 1;
		self.filters.insert(id, InstalledFilter { filter, changes: Vec::new() });
		id
	}

	/// Install a watch over `filter_id`, which may also name one of the
	/// pseudo-filters.
	pub fn install_watch(&mut self, filter_id: H256, reaping: Reaping, now: Instant) -> WatchId {
		let id = self.next_watch_id;
		self.next_watch_id += 1;
		let last_poll = match reaping {
			Reaping::Automatic => Some(now),
			Reaping::Manual => None,
		};
		self.watches.insert(id, ClientWatch { filter_id, changes: Vec::new(), last_poll });
		id
	}

	/// Remove a watch; unknown ids are a no-op.
	pub fn uninstall_watch(&mut self, id: WatchId) -> bool {
		self.watches.remove(&id).is_some()
	}

	/// Whether the given watch is currently installed.
	pub fn is_watch_installed(&self, id: WatchId) -> bool {
		self.watches.contains_key(&id)
	}

	/// Drain the changes accumulated for `id` and restart its poll clock.
	/// Unknown watches yield nothing.
	pub fn poll(&mut self, id: WatchId, now: Instant) -> Vec<WatchChange> {
		match self.watches.get_mut(&id) {
			Some(watch) => {
				watch.last_poll = Some(now);
				mem::replace(&mut watch.changes, Vec::new())
			}
			None => Vec::new(),
		}
	}

	/// Record a freshly executed pending transaction: its hash always lands
	/// in the pending pseudo-filter, and any matching log entries land in
	/// the installed filters.
	pub fn append_from_new_pending(
		&mut self,
		receipt: &TransactionReceipt,
		transaction_hash: H256,
		dirty: &mut HashSet<H256>,
	) {
		dirty.insert(PENDING_CHANGED_FILTER);
		self.special
			.get_mut(&PENDING_CHANGED_FILTER)
			.expect("pseudo-filters are installed at construction; qed")
			.push(transaction_hash);

		for (id, installed) in self.filters.iter_mut() {
			let matches = installed.filter.matches_receipt(receipt);
			if !matches.is_empty() {
				for entry in matches {
					installed.changes.push(LocalizedLogEntry {
						entry,
						transaction_hash,
						..Default::default()
					});
				}
				dirty.insert(*id);
			}
		}
	}

	/// Record a newly canonical block: its hash always lands in the chain
	/// pseudo-filter, and matching receipt logs are localized with block
	/// info, transaction hash, transaction index and a running log index.
	pub fn append_from_new_block(
		&mut self,
		info: &BlockInfo,
		receipts: &[(H256, TransactionReceipt)],
		dirty: &mut HashSet<H256>,
	) {
		dirty.insert(CHAIN_CHANGED_FILTER);
		self.special
			.get_mut(&CHAIN_CHANGED_FILTER)
			.expect("pseudo-filters are installed at construction; qed")
			.push(info.hash);

		for (id, installed) in self.filters.iter_mut() {
			let mut log_index = 0;
			for (transaction_index, (transaction_hash, receipt)) in receipts.iter().enumerate() {
				let matches = installed.filter.matches_receipt(receipt);
				if !matches.is_empty() {
					for entry in matches {
						installed.changes.push(LocalizedLogEntry {
							entry,
							block_hash: info.hash,
							block_number: info.number,
							transaction_hash: *transaction_hash,
							transaction_index,
							log_index,
						});
						log_index += 1;
					}
					dirty.insert(*id);
				}
			}
		}
	}

	/// Flush the accumulated changes of every touched filter into the
	/// watches subscribed to it, then clear the per-filter buffers.
	pub fn note_changed(&mut self, dirty: &HashSet<H256>) {
		for watch in self.watches.values_mut() {
			if !dirty.contains(&watch.filter_id) {
				continue;
			}
			if let Some(installed) = self.filters.get(&watch.filter_id) {
				watch
					.changes
					.extend(installed.changes.iter().cloned().map(WatchChange::Log));
			} else if let Some(hashes) = self.special.get(&watch.filter_id) {
				watch
					.changes
					.extend(hashes.iter().cloned().map(WatchChange::Special));
			}
		}
		for installed in self.filters.values_mut() {
			installed.changes.clear();
		}
		for hashes in self.special.values_mut() {
			hashes.clear();
		}
	}

	/// Uninstall every automatic watch idle for longer than the limit;
	/// returns the collected ids.
	pub fn collect_garbage(&mut self, now: Instant) -> Vec<WatchId> {
		let stale: Vec<WatchId> = self
			.watches
			.iter()
			.filter(|(_, watch)| {
				watch
					.last_poll
					.map_or(false, |last| now.duration_since(last) > WATCH_IDLE_LIMIT)
			})
			.map(|(id, _)| *id)
			.collect();
		for id in &stale {
			trace!(target: "filters", "GC: uninstalling idle watch {}", id);
			self.watches.remove(id);
		}
		stale
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ethereum_types::Address;
	use crate::log_entry::LogEntry;

	fn receipt_logging_at(address: u64) -> TransactionReceipt {
		TransactionReceipt {
			gas_used: 21_000u64.into(),
			logs: vec![LogEntry {
				address: Address::from_low_u64_be(address),
				topics: vec![],
				data: vec![],
			}],
		}
	}

	fn filter_for(address: u64) -> Filter {
		Filter {
			address: Some(vec![Address::from_low_u64_be(address)]),
			..Default::default()
		}
	}

	#[test]
	fn filter_ids_avoid_the_reserved_range() {
		let mut registry = FilterRegistry::default();
		let id = registry.install_filter(Filter::default());
		assert_ne!(id, PENDING_CHANGED_FILTER);
		assert_ne!(id, CHAIN_CHANGED_FILTER);
		assert_ne!(registry.install_filter(Filter::default()), id);
	}

	#[test]
	fn pending_append_flows_into_watch() {
		let now = Instant::now();
		let mut registry = FilterRegistry::default();
		let filter_id = registry.install_filter(filter_for(1));
		let watch = registry.install_watch(filter_id, Reaping::Automatic, now);
		let pending_watch = registry.install_watch(PENDING_CHANGED_FILTER, Reaping::Automatic, now);

		let transaction_hash = H256::from_low_u64_be(0x77);
		let mut dirty = HashSet::new();
		registry.append_from_new_pending(&receipt_logging_at(1), transaction_hash, &mut dirty);
		registry.note_changed(&dirty);

		let changes = registry.poll(watch, now);
		assert_eq!(changes.len(), 1);
		match &changes[0] {
			WatchChange::Log(entry) => assert_eq!(entry.transaction_hash, transaction_hash),
			other => panic!("unexpected change: {:?}", other),
		}
		assert_eq!(
			registry.poll(pending_watch, now),
			vec![WatchChange::Special(transaction_hash)]
		);

		// buffers were cleared; nothing more to collect.
		registry.note_changed(&dirty);
		assert!(registry.poll(watch, now).is_empty());
	}

	#[test]
	fn block_append_localizes_entries() {
		let now = Instant::now();
		let mut registry = FilterRegistry::default();
		let filter_id = registry.install_filter(filter_for(1));
		let watch = registry.install_watch(filter_id, Reaping::Automatic, now);
		let chain_watch = registry.install_watch(CHAIN_CHANGED_FILTER, Reaping::Automatic, now);

		let mut info = BlockInfo::default();
		info.hash = H256::from_low_u64_be(0xb10c);
		info.number = 9;
		let receipts = vec![
			(H256::from_low_u64_be(1), receipt_logging_at(2)),
			(H256::from_low_u64_be(2), receipt_logging_at(1)),
		];

		let mut dirty = HashSet::new();
		registry.append_from_new_block(&info, &receipts, &mut dirty);
		registry.note_changed(&dirty);

		let changes = registry.poll(watch, now);
		assert_eq!(changes.len(), 1);
		match &changes[0] {
			WatchChange::Log(entry) => {
				assert_eq!(entry.block_hash, info.hash);
				assert_eq!(entry.block_number, 9);
				assert_eq!(entry.transaction_hash, H256::from_low_u64_be(2));
				assert_eq!(entry.transaction_index, 1);
				assert_eq!(entry.log_index, 0);
			}
			other => panic!("unexpected change: {:?}", other),
		}
		assert_eq!(registry.poll(chain_watch, now), vec![WatchChange::Special(info.hash)]);
	}

	#[test]
	fn unsubscribed_watch_sees_nothing() {
		let now = Instant::now();
		let mut registry = FilterRegistry::default();
		let filter_id = registry.install_filter(filter_for(1));
		let other_filter = registry.install_filter(filter_for(2));
		let watch = registry.install_watch(other_filter, Reaping::Automatic, now);

		let mut dirty = HashSet::new();
		registry.append_from_new_pending(&receipt_logging_at(1), H256::from_low_u64_be(1), &mut dirty);
		assert!(dirty.contains(&filter_id));
		registry.note_changed(&dirty);

		assert!(registry.poll(watch, now).is_empty());
	}

	#[test]
	fn unknown_watch_polls_empty() {
		let mut registry = FilterRegistry::default();
		assert!(registry.poll(42, Instant::now()).is_empty());
		assert!(!registry.uninstall_watch(42));
	}

	#[test]
	fn garbage_collection_respects_poll_times() {
		// given two automatic watches and a manual one, installed at t0
		let t0 = Instant::now();
		let mut registry = FilterRegistry::default();
		let polled = registry.install_watch(PENDING_CHANGED_FILTER, Reaping::Automatic, t0);
		let idle = registry.install_watch(PENDING_CHANGED_FILTER, Reaping::Automatic, t0);
		let manual = registry.install_watch(PENDING_CHANGED_FILTER, Reaping::Manual, t0);

		// when one is polled ten seconds in
		registry.poll(polled, t0 + Duration::from_secs(10));

		// then at t0+25 only the idle one is collected
		let collected = registry.collect_garbage(t0 + Duration::from_secs(25));
		assert_eq!(collected, vec![idle]);
		assert!(registry.is_watch_installed(polled));
		assert!(registry.is_watch_installed(manual));

		// and at t0+50 the polled one goes too; the manual one never does
		registry.collect_garbage(t0 + Duration::from_secs(50));
		assert!(!registry.is_watch_installed(polled));
		assert!(registry.is_watch_installed(manual));
	}

	#[test]
	fn watch_survives_until_poll_plus_limit() {
		let t0 = Instant::now();
		let mut registry = FilterRegistry::default();
		let watch = registry.install_watch(CHAIN_CHANGED_FILTER, Reaping::Automatic, t0);
		registry.poll(watch, t0);

		// exactly at the limit the watch is still within its lease.
		assert!(registry.collect_garbage(t0 + WATCH_IDLE_LIMIT).is_empty());
		assert!(registry.is_watch_installed(watch));

		assert_eq!(
			registry.collect_garbage(t0 + WATCH_IDLE_LIMIT + Duration::from_secs(1)),
			vec![watch]
		);
	}
}
