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

//! Transactions as the client sees them.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use rlp::{self, Decodable, DecoderError, Encodable, Rlp, RlpStream};
use rlp_derive::{RlpDecodable, RlpEncodable};

use crate::types::Bytes;

/// Transaction action: either a message call, or a contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	/// Create a contract.
	Create,
	/// Call a contract at the given address.
	Call(Address),
}

impl Default for Action {
	fn default() -> Action {
		Action::Create
	}
}

impl Decodable for Action {
	fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
		if rlp.is_empty() {
			if rlp.is_data() {
				Ok(Action::Create)
			} else {
				Err(DecoderError::RlpExpectedToBeData)
			}
		} else {
			Ok(Action::Call(rlp.as_val()?))
		}
	}
}

impl Encodable for Action {
	fn rlp_append(&self, s: &mut RlpStream) {
		match *self {
			Action::Create => s.append_internal(&""),
			Action::Call(ref address) => s.append_internal(address),
		};
	}
}

/// A transaction. Signature verification and sender recovery happen upstream
/// in the queue and the execution engine, so the sender is carried as a
/// plain field.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Transaction {
	/// Nonce.
	pub nonce: U256,
	/// Gas price paid per unit of gas.
	pub gas_price: U256,
	/// Gas limit for the execution.
	pub gas: U256,
	/// Message call or contract creation.
	pub action: Action,
	/// Transferred value.
	pub value: U256,
	/// Call data / init code.
	pub data: Bytes,
	/// Recovered sender of the transaction.
	pub sender: Address,
}

impl Transaction {
	/// Hash of the RLP encoding, used as the transaction's identity.
	pub fn hash(&self) -> H256 {
		keccak(rlp::encode(self))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn transaction() -> Transaction {
		Transaction {
			nonce: U256::from(7u64),
			gas_price: U256::from(20_000_000_000u64),
			gas: U256::from(21_000u64),
			action: Action::Call(Address::from_low_u64_be(0xbeef)),
			value: U256::from(1u64),
			data: vec![0x60, 0x00],
			sender: Address::from_low_u64_be(0xcafe),
		}
	}

	#[test]
	fn rlp_round_trip() {
		let tx = transaction();
		let encoded = rlp::encode(&tx);
		let decoded: Transaction = rlp::decode(&encoded).unwrap();
		assert_eq!(decoded, tx);
	}

	#[test]
	fn create_round_trips_too() {
		let mut tx = transaction();
		tx.action = Action::Create;
		let decoded: Transaction = rlp::decode(&rlp::encode(&tx)).unwrap();
		assert_eq!(decoded.action, Action::Create);
	}

	#[test]
	fn hash_identifies_content() {
		let tx = transaction();
		assert_eq!(tx.hash(), tx.hash());
		let mut other = transaction();
		other.nonce = U256::from(8u64);
		assert_ne!(tx.hash(), other.hash());
	}
}
