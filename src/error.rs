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

//! Client error types.
//!
//! Expected branches (version mismatch, failed solve, unknown watch) are
//! values, not errors; this type covers the genuinely exceptional paths.
//! Bad blocks carry their raw bytes and a set of diagnostic hints which the
//! reporter in [`crate::bad_blocks`] walks.

use ethereum_types::H256;
use thiserror::Error;

use crate::bad_blocks::BadBlockHint;
use crate::types::Bytes;

/// Client error.
#[derive(Debug, Error)]
pub enum Error {
	/// A block failed validation in the queue or the store.
	#[error("bad block: {message}")]
	BadBlock {
		/// Human-readable reason.
		message: String,
		/// Raw bytes of the offending block.
		block: Bytes,
		/// Diagnostic hints attached by whoever rejected the block.
		hints: Vec<BadBlockHint>,
	},

	/// State for the given block could not be populated.
	#[error("state for block {0} unavailable")]
	StateUnavailable(H256),

	/// A transient execution failed.
	#[error("transaction execution failed: {0}")]
	Execution(String),

	/// An underlying I/O operation failed.
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	/// A stored record failed to decode.
	#[error("invalid rlp: {0:?}")]
	Rlp(rlp::DecoderError),
}

impl From<rlp::DecoderError> for Error {
	fn from(e: rlp::DecoderError) -> Error {
		Error::Rlp(e)
	}
}
