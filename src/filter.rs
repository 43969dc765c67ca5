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

//! Log filter predicates.

use ethereum_types::{Address, H256};

use crate::log_entry::LogEntry;
use crate::receipt::TransactionReceipt;

/// A predicate over log entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
	/// Emitting contract restriction; `None` matches any address.
	pub address: Option<Vec<Address>>,
	/// Per-position topic restrictions over the four topic slots a log
	/// entry can carry; `None` at a position matches any topic there.
	pub topics: [Option<Vec<H256>>; 4],
}

impl Default for Filter {
	fn default() -> Filter {
		Filter {
			address: None,
			topics: [None, None, None, None],
		}
	}
}

impl Filter {
	/// Whether the given log entry satisfies this filter.
	pub fn matches(&self, log: &LogEntry) -> bool {
		let address_ok = self
			.address
			.as_ref()
			.map_or(true, |addresses| addresses.iter().any(|a| a == &log.address));

		address_ok
			&& self.topics.iter().enumerate().all(|(i, topic)| {
				topic.as_ref().map_or(true, |candidates| {
					log.topics.get(i).map_or(false, |t| candidates.contains(t))
				})
			})
	}

	/// Log entries of `receipt` that this filter catches, in order.
	pub fn matches_receipt(&self, receipt: &TransactionReceipt) -> Vec<LogEntry> {
		receipt.logs.iter().filter(|log| self.matches(log)).cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn log(address: u64, topics: Vec<H256>) -> LogEntry {
		LogEntry {
			address: Address::from_low_u64_be(address),
			topics,
			data: vec![],
		}
	}

	#[test]
	fn default_filter_matches_everything() {
		assert!(Filter::default().matches(&log(1, vec![])));
		assert!(Filter::default().matches(&log(2, vec![H256::from_low_u64_be(9)])));
	}

	#[test]
	fn address_restriction() {
		let filter = Filter {
			address: Some(vec![Address::from_low_u64_be(1), Address::from_low_u64_be(2)]),
			..Default::default()
		};
		assert!(filter.matches(&log(1, vec![])));
		assert!(filter.matches(&log(2, vec![])));
		assert!(!filter.matches(&log(3, vec![])));
	}

	#[test]
	fn topic_restriction() {
		let topic = H256::from_low_u64_be(0xaa);
		let filter = Filter {
			address: None,
			topics: [Some(vec![topic]), None, None, None],
		};
		assert!(filter.matches(&log(1, vec![topic])));
		assert!(filter.matches(&log(1, vec![topic, H256::from_low_u64_be(0xbb)])));
		assert!(!filter.matches(&log(1, vec![H256::from_low_u64_be(0xbb)])));
		// a required topic position missing from the entry is a mismatch.
		assert!(!filter.matches(&log(1, vec![])));
	}

	#[test]
	fn receipt_matching_keeps_order() {
		let topic = H256::from_low_u64_be(0xaa);
		let filter = Filter {
			address: None,
			topics: [Some(vec![topic]), None, None, None],
		};
		let receipt = TransactionReceipt {
			gas_used: Default::default(),
			logs: vec![log(1, vec![topic]), log(2, vec![]), log(3, vec![topic])],
		};
		let matches = filter.matches_receipt(&receipt);
		assert_eq!(matches.len(), 2);
		assert_eq!(matches[0].address, Address::from_low_u64_be(1));
		assert_eq!(matches[1].address, Address::from_low_u64_be(3));
	}
}
