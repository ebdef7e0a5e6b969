// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::BTreeMap;

use privacy_data::denomination::Denomination;
use privacy_data::ledger::{Amount, Coin};

/// Round distribution of the wallet's denominated coins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoundStats {
    /// Value held per round
    by_round: BTreeMap<u32, Amount>,
    /// Coin count per (denomination, round)
    coins: BTreeMap<(Denomination, u32), usize>,
}

impl RoundStats {
    pub fn from_coins<'a>(coins: impl IntoIterator<Item = &'a Coin>) -> Self {
        let mut stats = Self::default();
        for coin in coins {
            let (Some(round), Some(denom)) =
                (coin.rounds, Denomination::from_amount(coin.value()))
            else {
                continue;
            };
            *stats.by_round.entry(round).or_default() += coin.value();
            *stats.coins.entry((denom, round)).or_default() += 1;
        }
        stats
    }

    pub fn denominated_value(&self) -> Amount {
        self.by_round.values().sum()
    }

    /// Value of coins mixed at least `rounds` times.
    pub fn anonymized_value(&self, rounds: u32) -> Amount {
        self.by_round.range(rounds..).map(|(_, v)| v).sum()
    }

    pub fn value_at(&self, round: u32) -> Amount {
        self.by_round.get(&round).copied().unwrap_or_default()
    }

    /// Coins of `denom` still below `rounds`.
    pub fn pending(&self, denom: Denomination, rounds: u32) -> usize {
        self.coins
            .range((denom, 0)..(denom, rounds))
            .map(|(_, n)| n)
            .sum()
    }

    /// Whether `keep_amount` is held in coins mixed `rounds` times.
    pub fn target_met(&self, rounds: u32, keep_amount: Amount) -> bool {
        self.anonymized_value(rounds) >= keep_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privacy_data::ledger::{OutPoint, TxOut, COIN};

    fn coin(n: u8, value: Amount, rounds: Option<u32>) -> Coin {
        Coin {
            outpoint: OutPoint::new([n; 32], 0),
            output: TxOut::new(value, vec![]),
            confirmations: 1,
            rounds,
        }
    }

    #[test]
    fn test_round_histogram() {
        let coins = vec![
            coin(1, COIN, Some(0)),
            coin(2, COIN, Some(2)),
            coin(3, 10 * COIN, Some(3)),
            coin(4, COIN / 10, Some(1)),
            coin(5, 7 * COIN, None),
        ];
        let stats = RoundStats::from_coins(&coins);

        assert_eq!(stats.denominated_value(), 12 * COIN + COIN / 10);
        assert_eq!(stats.anonymized_value(2), 11 * COIN);
        assert_eq!(stats.value_at(1), COIN / 10);

        assert_eq!(stats.pending(Denomination::One, 2), 1);
        assert_eq!(stats.pending(Denomination::Ten, 2), 0);
        assert_eq!(stats.pending(Denomination::Tenth, 2), 1);

        assert!(stats.target_met(2, 11 * COIN));
        assert!(!stats.target_met(2, 12 * COIN));
        assert!(!stats.target_met(4, COIN));
    }
}
