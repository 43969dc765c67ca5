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

//! Startup version gate: decides whether existing on-disk state can be
//! trusted, needs revalidation, or must be wiped.

use std::fs;
use std::path::PathBuf;

use ethereum_types::H256;
use rlp::{Rlp, RlpStream};

use crate::error::Error;

/// Version of the wire protocol we speak.
pub const PROTOCOL_VERSION: u32 = 63;
/// Minor protocol version; bumping it forces revalidation of stored blocks.
pub const MINOR_PROTOCOL_VERSION: u32 = 2;
/// Version of the on-disk database layout.
pub const DATABASE_VERSION: u32 = 13;

/// What to do with existing on-disk state, ordered by destructiveness so
/// that `max` combines two decisions correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WithExisting {
	/// Use the database as-is.
	Trust,
	/// Use the database, but revalidate its contents.
	Verify,
	/// Wipe the database and start over.
	Kill,
}

impl Default for WithExisting {
	fn default() -> WithExisting {
		WithExisting::Trust
	}
}

/// Reads the status record of a database directory and compares it against
/// compiled-in expectations and the genesis hash of the configured chain.
pub struct VersionChecker {
	path: PathBuf,
	genesis: H256,
	action: WithExisting,
}

impl VersionChecker {
	/// Examine the status record under `path` and decide what to do with
	/// the database. Anything unreadable or malformed means `Kill`.
	pub fn new<P: Into<PathBuf>>(path: P, genesis: H256) -> VersionChecker {
		let path = path.into();
		let action = read_action(&path, genesis);
		VersionChecker { path, genesis, action }
	}

	/// The decided action.
	pub fn action(&self) -> WithExisting {
		self.action
	}

	/// Acknowledge that the database was (re)opened successfully; writes a
	/// fresh status record unless the existing one was already trusted.
	pub fn set_ok(&self) -> Result<(), Error> {
		if self.action != WithExisting::Trust {
			fs::create_dir_all(&self.path)?;
			let mut stream = RlpStream::new_list(4);
			stream
				.append(&PROTOCOL_VERSION)
				.append(&MINOR_PROTOCOL_VERSION)
				.append(&DATABASE_VERSION)
				.append(&self.genesis);
			fs::write(self.path.join("status"), stream.out())?;
		}
		Ok(())
	}
}

fn read_action(path: &PathBuf, our_genesis: H256) -> WithExisting {
	let bytes = match fs::read(path.join("status")) {
		Ok(bytes) => bytes,
		Err(_) => return WithExisting::Kill,
	};
	let rlp = Rlp::new(&bytes);
	let status = (|| -> Result<(u32, u32, H256), rlp::DecoderError> {
		let _protocol: u32 = rlp.val_at(0)?;
		let minor: u32 = rlp.val_at(1)?;
		let database: u32 = rlp.val_at(2)?;
		// older records predate the genesis item; treat it as matching.
		let genesis = if rlp.item_count()? > 3 { rlp.val_at(3)? } else { our_genesis };
		Ok((minor, database, genesis))
	})();

	match status {
		Ok((minor, database, genesis)) => {
			if database != DATABASE_VERSION || genesis != our_genesis {
				WithExisting::Kill
			} else if minor != MINOR_PROTOCOL_VERSION {
				WithExisting::Verify
			} else {
				WithExisting::Trust
			}
		}
		Err(_) => WithExisting::Kill,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempdir::TempDir;

	fn genesis() -> H256 {
		H256::from_low_u64_be(0x1234)
	}

	fn write_status(dir: &TempDir, minor: u32, database: u32, genesis_hash: H256) {
		let mut stream = RlpStream::new_list(4);
		stream
			.append(&PROTOCOL_VERSION)
			.append(&minor)
			.append(&database)
			.append(&genesis_hash);
		fs::write(dir.path().join("status"), stream.out()).unwrap();
	}

	#[test]
	fn missing_status_kills() {
		let dir = TempDir::new("version").unwrap();
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Kill);
	}

	#[test]
	fn matching_status_is_trusted() {
		let dir = TempDir::new("version").unwrap();
		write_status(&dir, MINOR_PROTOCOL_VERSION, DATABASE_VERSION, genesis());
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Trust);
	}

	#[test]
	fn minor_mismatch_verifies() {
		let dir = TempDir::new("version").unwrap();
		write_status(&dir, MINOR_PROTOCOL_VERSION + 1, DATABASE_VERSION, genesis());
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Verify);
	}

	#[test]
	fn database_mismatch_kills() {
		let dir = TempDir::new("version").unwrap();
		write_status(&dir, MINOR_PROTOCOL_VERSION, DATABASE_VERSION + 1, genesis());
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Kill);
	}

	#[test]
	fn genesis_mismatch_kills() {
		let dir = TempDir::new("version").unwrap();
		write_status(&dir, MINOR_PROTOCOL_VERSION, DATABASE_VERSION, H256::from_low_u64_be(0x9999));
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Kill);
	}

	#[test]
	fn garbage_kills() {
		let dir = TempDir::new("version").unwrap();
		fs::write(dir.path().join("status"), &[0xff, 0x00, 0x01]).unwrap();
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Kill);
	}

	#[test]
	fn set_ok_writes_fresh_record() {
		// given a fresh directory, the decision is Kill
		let dir = TempDir::new("version").unwrap();
		let checker = VersionChecker::new(dir.path(), genesis());
		assert_eq!(checker.action(), WithExisting::Kill);

		// when the open is acknowledged
		checker.set_ok().unwrap();

		// then a matching record exists and is trusted next time around
		let reread = VersionChecker::new(dir.path(), genesis());
		assert_eq!(reread.action(), WithExisting::Trust);
	}

	#[test]
	fn trusted_record_is_left_alone() {
		let dir = TempDir::new("version").unwrap();
		write_status(&dir, MINOR_PROTOCOL_VERSION, DATABASE_VERSION, genesis());
		let before = fs::read(dir.path().join("status")).unwrap();
		let checker = VersionChecker::new(dir.path(), genesis());
		checker.set_ok().unwrap();
		assert_eq!(fs::read(dir.path().join("status")).unwrap(), before);
	}

	#[test]
	fn actions_combine_by_max() {
		assert_eq!(
			::std::cmp::max(WithExisting::Trust, WithExisting::Verify),
			WithExisting::Verify
		);
		assert_eq!(
			::std::cmp::max(WithExisting::Kill, WithExisting::Verify),
			WithExisting::Kill
		);
	}
}
