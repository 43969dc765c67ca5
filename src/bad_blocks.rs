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

//! Bad block diagnostics: structured reports for an external sentinel and a
//! small cache of recently rejected blocks.

use std::collections::VecDeque;

use ethereum_types::{Address, Bloom, H256, U256};
use parking_lot::Mutex;
use rustc_hex::ToHex;
use serde_json::{json, Value};

use crate::types::{BlockNumber, Bytes};
use crate::version::{DATABASE_VERSION, PROTOCOL_VERSION};

/// How many rejected blocks to keep around for inspection.
const MAX_RECENT: usize = 8;

/// Diagnostic hint attached to a bad-block error. Whoever rejects a block
/// attaches whichever of these it can; the reporter emits only what is
/// present.
#[derive(Debug, Clone, PartialEq)]
pub enum BadBlockHint {
	/// Index of the uncle that failed.
	UncleIndex(usize),
	/// Index of the transaction that failed.
	TransactionIndex(usize),
	/// Nested VM trace of the failing execution.
	VmTrace(Value),
	/// Raw receipts of the block.
	Receipts(Vec<Bytes>),
	/// Uncle hashes excluded from consideration.
	UnclesExcluded(Vec<H256>),
	/// A hash relevant to the failure.
	Hash256(H256),
	/// Number of the failing uncle.
	UncleNumber(BlockNumber),
	/// Current chain height at rejection time.
	CurrentNumber(BlockNumber),
	/// Wall time at rejection.
	Now(u64),
	/// Symbol that failed to parse.
	InvalidSymbol(String),
	/// Address that was not the expected one.
	WrongAddress(Address),
	/// Free-form comment.
	Comment(String),
	/// Lower bound that was violated.
	Min(String),
	/// Upper bound that was violated.
	Max(String),
	/// Name of the offending entity.
	Name(String),
	/// Field that failed validation.
	Field(String),
	/// Raw data relevant to the failure.
	Data(Bytes),
	/// Seal nonce of the block.
	Nonce(H256),
	/// Difficulty of the block.
	Difficulty(U256),
	/// Proof-of-work target.
	Target(U256),
	/// Seed hash the proof was checked against.
	SeedHash(H256),
	/// Mix digest of the seal.
	MixHash(H256),
	/// Full ethash evaluation of the seal.
	EthashResult {
		/// Proof-of-work value.
		value: H256,
		/// Mix digest.
		mix_hash: H256,
	},
	/// What validation required.
	Required(String),
	/// What the block provided.
	Got(String),
	/// Log bloom validation required.
	RequiredLogBloom(Bloom),
	/// Log bloom the block provided.
	GotLogBloom(Bloom),
	/// Hash validation required.
	RequiredH256(H256),
	/// Hash the block provided.
	GotH256(H256),
}

impl BadBlockHint {
	fn key(&self) -> &'static str {
		match *self {
			BadBlockHint::UncleIndex(_) => "uncleIndex",
			BadBlockHint::TransactionIndex(_) => "transactionIndex",
			BadBlockHint::VmTrace(_) => "vmtrace",
			BadBlockHint::Receipts(_) => "receipts",
			BadBlockHint::UnclesExcluded(_) => "unclesExcluded",
			BadBlockHint::Hash256(_) => "hash256",
			BadBlockHint::UncleNumber(_) => "uncleNumber",
			BadBlockHint::CurrentNumber(_) => "currentNumber",
			BadBlockHint::Now(_) => "now",
			BadBlockHint::InvalidSymbol(_) => "invalidSymbol",
			BadBlockHint::WrongAddress(_) => "wrongAddress",
			BadBlockHint::Comment(_) => "comment",
			BadBlockHint::Min(_) => "min",
			BadBlockHint::Max(_) => "max",
			BadBlockHint::Name(_) => "name",
			BadBlockHint::Field(_) => "field",
			BadBlockHint::Data(_) => "data",
			BadBlockHint::Nonce(_) => "nonce",
			BadBlockHint::Difficulty(_) => "difficulty",
			BadBlockHint::Target(_) => "target",
			BadBlockHint::SeedHash(_) => "seedHash",
			BadBlockHint::MixHash(_) => "mixHash",
			BadBlockHint::EthashResult { .. } => "ethashResult",
			BadBlockHint::Required(_) => "required",
			BadBlockHint::Got(_) => "got",
			BadBlockHint::RequiredLogBloom(_) => "required_LogBloom",
			BadBlockHint::GotLogBloom(_) => "got_LogBloom",
			BadBlockHint::RequiredH256(_) => "required_h256",
			BadBlockHint::GotH256(_) => "got_h256",
		}
	}

	fn value(&self) -> Value {
		match *self {
			BadBlockHint::UncleIndex(i) | BadBlockHint::TransactionIndex(i) => json!(i),
			BadBlockHint::VmTrace(ref trace) => trace.clone(),
			BadBlockHint::Receipts(ref receipts) => {
				json!(receipts.iter().map(|r| r.to_hex::<String>()).collect::<Vec<_>>())
			}
			BadBlockHint::UnclesExcluded(ref hashes) => {
				json!(hashes.iter().map(|h| format!("{:x}", h)).collect::<Vec<_>>())
			}
			BadBlockHint::Hash256(h)
			| BadBlockHint::Nonce(h)
			| BadBlockHint::SeedHash(h)
			| BadBlockHint::MixHash(h)
			| BadBlockHint::RequiredH256(h)
			| BadBlockHint::GotH256(h) => json!(format!("{:x}", h)),
			BadBlockHint::UncleNumber(n) | BadBlockHint::CurrentNumber(n) => json!(n),
			BadBlockHint::Now(t) => json!(t),
			BadBlockHint::InvalidSymbol(ref s)
			| BadBlockHint::Comment(ref s)
			| BadBlockHint::Min(ref s)
			| BadBlockHint::Max(ref s)
			| BadBlockHint::Name(ref s)
			| BadBlockHint::Field(ref s)
			| BadBlockHint::Required(ref s)
			| BadBlockHint::Got(ref s) => json!(s),
			BadBlockHint::WrongAddress(a) => json!(format!("{:x}", a)),
			BadBlockHint::Data(ref data) => json!(data.to_hex::<String>()),
			BadBlockHint::Difficulty(v) | BadBlockHint::Target(v) => json!(format!("{}", v)),
			BadBlockHint::EthashResult { value, mix_hash } => json!({
				"value": format!("{:x}", value),
				"mixHash": format!("{:x}", mix_hash),
			}),
			BadBlockHint::RequiredLogBloom(b) | BadBlockHint::GotLogBloom(b) => {
				json!(format!("{:x}", b))
			}
		}
	}
}

/// External sink for bad-block reports (a remote diagnostic endpoint).
pub trait BadBlockSink: Send + Sync {
	/// Deliver a structured report.
	fn bad_block(&self, report: Value);
}

/// Build the structured report for a rejected block. Only hints actually
/// present are emitted.
pub fn report(block: &[u8], errortype: &str, hints: &[BadBlockHint]) -> Value {
	let mut hint_map = serde_json::Map::new();
	for hint in hints {
		hint_map.insert(hint.key().to_owned(), hint.value());
	}
	json!({
		"client": "parity",
		"version": env!("CARGO_PKG_VERSION"),
		"protocolVersion": PROTOCOL_VERSION,
		"databaseVersion": DATABASE_VERSION,
		"errortype": errortype,
		"block": block.to_hex::<String>(),
		"hints": hint_map,
	})
}

/// Bounded cache of recently detected bad blocks.
#[derive(Default)]
pub struct BadBlocks {
	recent: Mutex<VecDeque<(Bytes, String)>>,
}

impl BadBlocks {
	/// Remember a rejected block together with its error string.
	pub fn report(&self, block: Bytes, message: String) {
		let mut recent = self.recent.lock();
		recent.push_front((block, message));
		recent.truncate(MAX_RECENT);
	}

	/// Recently rejected blocks, newest first.
	pub fn bad_blocks(&self) -> Vec<(Bytes, String)> {
		self.recent.lock().iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn report_carries_only_present_hints() {
		let hints = vec![
			BadBlockHint::TransactionIndex(3),
			BadBlockHint::Difficulty(U256::from(1000u64)),
		];
		let report = report(&[0xde, 0xad], "InvalidSeal", &hints);

		assert_eq!(report["errortype"], "InvalidSeal");
		assert_eq!(report["block"], "dead");
		let hint_map = report["hints"].as_object().unwrap();
		assert_eq!(hint_map.len(), 2);
		assert_eq!(hint_map["transactionIndex"], 3);
		assert_eq!(hint_map["difficulty"], "1000");
		assert!(hint_map.get("uncleIndex").is_none());
	}

	#[test]
	fn report_identity_fields() {
		let report = report(&[], "x", &[]);
		assert_eq!(report["client"], "parity");
		assert_eq!(report["protocolVersion"], PROTOCOL_VERSION);
		assert_eq!(report["databaseVersion"], DATABASE_VERSION);
	}

	#[test]
	fn ethash_result_hint_nests() {
		let hint = BadBlockHint::EthashResult {
			value: H256::from_low_u64_be(1),
			mix_hash: H256::from_low_u64_be(2),
		};
		let value = hint.value();
		assert!(value["value"].as_str().unwrap().ends_with('1'));
		assert!(value["mixHash"].as_str().unwrap().ends_with('2'));
	}

	#[test]
	fn cache_is_bounded() {
		let cache = BadBlocks::default();
		for i in 0..20u8 {
			cache.report(vec![i], format!("bad {}", i));
		}
		let recent = cache.bad_blocks();
		assert_eq!(recent.len(), MAX_RECENT);
		assert_eq!(recent[0].0, vec![19]);
	}
}
