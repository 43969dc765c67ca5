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

//! Advisory gas pricing: a fixed pricer and a statistical oracle derived
//! from the gas-weighted price distribution of recent blocks. Advisory
//! only, never consensus-critical.

use std::collections::BTreeMap;

use ethereum_types::U256;
use log::debug;

use crate::traits::BlockChain;

/// How many blocks back from the head the oracle samples.
const SAMPLE_SIZE: usize = 1000;

/// Number of quantile points kept by the oracle.
const OCTILE_COUNT: usize = 9;

/// Default price for the fixed pricer and the oracle's starting table.
const DEFAULT_PRICE: u64 = 10_000_000_000;

/// Coarse priority bands, mapped onto the octile table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPriority {
	/// Cheapest observed.
	Lowest,
	/// Below average.
	Low,
	/// The median.
	Medium,
	/// Above average.
	High,
	/// Most expensive observed.
	Highest,
}

impl TransactionPriority {
	fn octile(self) -> usize {
		match self {
			TransactionPriority::Lowest => 0,
			TransactionPriority::Low => 2,
			TransactionPriority::Medium => 4,
			TransactionPriority::High => 6,
			TransactionPriority::Highest => 8,
		}
	}
}

/// Source of advisory gas prices.
pub trait GasPricer: Send + Sync {
	/// Refresh from recent chain history.
	fn update(&mut self, chain: &dyn BlockChain);

	/// Price worth bidding for the given priority.
	fn bid(&self, priority: TransactionPriority) -> U256;

	/// Lowest price worth accepting into a candidate block.
	fn ask(&self) -> U256;
}

/// A pricer that always quotes the same price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrivialGasPricer {
	price: U256,
}

impl Default for TrivialGasPricer {
	fn default() -> TrivialGasPricer {
		TrivialGasPricer { price: U256::from(DEFAULT_PRICE) }
	}
}

impl TrivialGasPricer {
	/// A pricer fixed at the given price.
	pub fn new(price: U256) -> TrivialGasPricer {
		TrivialGasPricer { price }
	}
}

impl GasPricer for TrivialGasPricer {
	fn update(&mut self, _chain: &dyn BlockChain) {}

	fn bid(&self, _priority: TransactionPriority) -> U256 {
		self.price
	}

	fn ask(&self) -> U256 {
		self.price
	}
}

/// Statistical pricer: nine quantile points (octiles) over the gas-weighted
/// price distribution of the last [`SAMPLE_SIZE`] blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicGasPricer {
	octiles: [U256; OCTILE_COUNT],
}

impl Default for BasicGasPricer {
	fn default() -> BasicGasPricer {
		BasicGasPricer { octiles: [U256::from(DEFAULT_PRICE); OCTILE_COUNT] }
	}
}

impl BasicGasPricer {
	/// The current octile table, cheapest first.
	pub fn octiles(&self) -> &[U256; OCTILE_COUNT] {
		&self.octiles
	}
}

impl GasPricer for BasicGasPricer {
	fn update(&mut self, chain: &dyn BlockChain) {
		// gas price versus gas used, over the recent canonical history.
		let mut dist: BTreeMap<U256, U256> = BTreeMap::new();
		let mut total = U256::zero();

		let mut hash = chain.best_block_hash();
		let mut walked = 0;
		while walked < SAMPLE_SIZE && !hash.is_zero() {
			let info = match chain.info(&hash) {
				Some(info) => info,
				None => break,
			};
			let transactions = chain.transactions(&hash);
			if !transactions.is_empty() {
				let receipts = chain.receipts(&hash);
				for (transaction, receipt) in transactions.iter().zip(receipts.iter()) {
					let weight = receipt.gas_used;
					*dist.entry(transaction.gas_price).or_insert_with(U256::zero) += weight;
					total = total + weight;
				}
			}
			hash = info.parent_hash;
			walked += 1;
		}

		if total.is_zero() {
			return;
		}

		let cheapest = *dist.keys().next().expect("total is non-zero so dist is non-empty; qed");
		let dearest = *dist.keys().next_back().expect("total is non-zero so dist is non-empty; qed");
		self.octiles[0] = cheapest;

		let mut mean = U256::zero();
		for (price, weight) in &dist {
			mean = mean + *price * *weight;
		}
		let mean = mean / total;

		let mut sd_squared = U256::zero();
		for (price, weight) in &dist {
			let delta = if *price > mean { *price - mean } else { mean - *price };
			sd_squared = sd_squared + *weight * delta * delta;
		}
		let sd_squared = sd_squared / total;

		if !sd_squared.is_zero() {
			let sd = to_f64(sd_squared).sqrt();
			let normalized_sd = sd / to_f64(mean);
			let spread = if normalized_sd > 0.01 { normalized_sd } else { 0.01 };
			for i in 1..OCTILE_COUNT - 1 {
				let quantile = 1.0 + spread * inv_norm_cdf(i as f64 / 8.0);
				self.octiles[i] = from_f64(to_f64(mean) * quantile);
			}
			self.octiles[8] = dearest;
		} else {
			for i in 0..OCTILE_COUNT {
				self.octiles[i] = mean * U256::from(i as u64 + 1) / U256::from(5u64);
			}
		}
		debug!(target: "client", "Gas price octiles: {:?}", self.octiles);
	}

	fn bid(&self, priority: TransactionPriority) -> U256 {
		self.octiles[priority.octile()]
	}

	fn ask(&self) -> U256 {
		self.octiles[TransactionPriority::Medium.octile()]
	}
}

fn to_f64(value: U256) -> f64 {
	value.0.iter().rev().fold(0.0, |acc, &limb| acc * 18_446_744_073_709_551_616.0 + limb as f64)
}

fn from_f64(value: f64) -> U256 {
	if value <= 0.0 {
		return U256::zero();
	}
	// saturating cast; prices nowhere near this range in practice.
	U256::from(value as u128)
}

// Rational approximation of the inverse normal CDF (Acklam). Absolute error
// below 1.2e-9 over the open unit interval, far beyond what an advisory
// price needs.
fn inv_norm_cdf(p: f64) -> f64 {
	const A: [f64; 6] = [
		-3.969683028665376e+01,
		2.209460984245205e+02,
		-2.759285104469687e+02,
		1.383577518672690e+02,
		-3.066479806614716e+01,
		2.506628277459239e+00,
	];
	const B: [f64; 5] = [
		-5.447609879822406e+01,
		1.615858368580409e+02,
		-1.556989798598866e+02,
		6.680131188771972e+01,
		-1.328068155288572e+01,
	];
	const C: [f64; 6] = [
		-7.784894002430293e-03,
		-3.223964580411365e-01,
		-2.400758277161838e+00,
		-2.549732539343734e+00,
		4.374664141464968e+00,
		2.938163982698783e+00,
	];
	const D: [f64; 4] = [
		7.784695709041462e-03,
		3.224671290700398e-01,
		2.445134137142996e+00,
		3.754408661907416e+00,
	];
	const P_LOW: f64 = 0.02425;

	if p <= 0.0 {
		return ::std::f64::NEG_INFINITY;
	}
	if p >= 1.0 {
		return ::std::f64::INFINITY;
	}
	if p < P_LOW {
		let q = (-2.0 * p.ln()).sqrt();
		(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
			/ ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
	} else if p <= 1.0 - P_LOW {
		let q = p - 0.5;
		let r = q * q;
		(((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
			/ (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
	} else {
		let q = (-2.0 * (1.0 - p).ln()).sqrt();
		-(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
			/ ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ethereum_types::Address;
	use crate::test_helpers::{TestBlock, TestBlockChain};
	use crate::transaction::Transaction;
	use crate::receipt::TransactionReceipt;

	fn priced_transaction(price: u64, nonce: u64) -> Transaction {
		Transaction {
			nonce: nonce.into(),
			gas_price: price.into(),
			gas: 21_000u64.into(),
			sender: Address::from_low_u64_be(0xfee),
			..Default::default()
		}
	}

	fn chain_with_prices(prices: &[u64]) -> TestBlockChain {
		let chain = TestBlockChain::new();
		let mut parent = chain.genesis_hash();
		for (i, price) in prices.iter().enumerate() {
			let block = TestBlock {
				parent_hash: parent,
				number: i as u64 + 1,
				transactions: vec![priced_transaction(*price, i as u64)],
				..Default::default()
			};
			parent = block.hash();
			let receipts = vec![TransactionReceipt { gas_used: 21_000u64.into(), logs: vec![] }];
			chain.insert_canonical_with_receipts(block, receipts);
		}
		chain
	}

	#[test]
	fn trivial_pricer_is_fixed() {
		let pricer = TrivialGasPricer::new(U256::from(5u64));
		assert_eq!(pricer.ask(), U256::from(5u64));
		assert_eq!(pricer.bid(TransactionPriority::Highest), U256::from(5u64));
	}

	#[test]
	fn empty_chain_leaves_table_unchanged() {
		let chain = TestBlockChain::new();
		let mut pricer = BasicGasPricer::default();
		let before = pricer.octiles().clone();
		pricer.update(&chain);
		assert_eq!(pricer.octiles(), &before);
	}

	#[test]
	fn uniform_prices_fill_linear_octiles() {
		// all weight at one price: zero variance path.
		let chain = chain_with_prices(&[100, 100, 100]);
		let mut pricer = BasicGasPricer::default();
		pricer.update(&chain);
		for i in 0..9 {
			assert_eq!(pricer.octiles()[i], U256::from(100 * (i as u64 + 1) / 5));
		}
	}

	#[test]
	fn spread_prices_bracket_the_distribution() {
		let chain = chain_with_prices(&[100, 200, 300, 400, 500]);
		let mut pricer = BasicGasPricer::default();
		pricer.update(&chain);

		let octiles = pricer.octiles();
		assert_eq!(octiles[0], U256::from(100u64));
		assert_eq!(octiles[8], U256::from(500u64));
		// inner octiles are monotonic around the mean of 300.
		for i in 0..8 {
			assert!(octiles[i] <= octiles[i + 1], "octiles not monotonic: {:?}", octiles);
		}
		assert!(octiles[4] >= U256::from(250u64) && octiles[4] <= U256::from(350u64));
	}

	#[test]
	fn update_is_idempotent() {
		let chain = chain_with_prices(&[100, 250, 300, 800]);
		let mut once = BasicGasPricer::default();
		once.update(&chain);
		let mut twice = once.clone();
		twice.update(&chain);
		assert_eq!(once.octiles(), twice.octiles());
	}

	#[test]
	fn priorities_map_to_octiles() {
		let mut pricer = BasicGasPricer::default();
		pricer.octiles = [
			U256::from(0u64),
			U256::from(1u64),
			U256::from(2u64),
			U256::from(3u64),
			U256::from(4u64),
			U256::from(5u64),
			U256::from(6u64),
			U256::from(7u64),
			U256::from(8u64),
		];
		assert_eq!(pricer.bid(TransactionPriority::Lowest), U256::from(0u64));
		assert_eq!(pricer.bid(TransactionPriority::Medium), U256::from(4u64));
		assert_eq!(pricer.bid(TransactionPriority::Highest), U256::from(8u64));
		assert_eq!(pricer.ask(), U256::from(4u64));
	}

	#[test]
	fn inverse_normal_cdf_sanity() {
		assert!(inv_norm_cdf(0.5).abs() < 1e-9);
		assert!((inv_norm_cdf(0.975) - 1.959964).abs() < 1e-5);
		assert!((inv_norm_cdf(0.025) + 1.959964).abs() < 1e-5);
		assert!((inv_norm_cdf(0.125) + inv_norm_cdf(0.875)).abs() < 1e-9);
		// tail region exercises the other branch of the approximation.
		assert!((inv_norm_cdf(0.01) + 2.326348).abs() < 1e-5);
	}

	#[test]
	fn f64_round_trips_for_small_values() {
		assert_eq!(from_f64(to_f64(U256::from(123_456u64))), U256::from(123_456u64));
		assert_eq!(from_f64(-1.0), U256::zero());
	}
}
