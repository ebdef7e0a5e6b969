// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Conversion of wallet funds into the denomination ladder, and selection of
//! denominated coins for a mixing entry.

use std::collections::BTreeMap;

use privacy_data::denomination::Denomination;
use privacy_data::ledger::{
    format_amount, Amount, Coin, OutPoint, Transaction, TxIn, TxOut,
};
use privacy_data::message::ENTRY_MAX_INPUTS;
use tracing::{debug, info};

use crate::config::PrivateSendParams;
use crate::errors::MixingError;
use crate::operations::{Broadcaster, Keychain, TxKind, UtxoStore};
use crate::privatesend::collateral::{CollateralBuilder, COLLATERAL_INPUTS};

/// Coins to spend and denominated outputs to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenominationPlan {
    pub inputs: Vec<Coin>,
    /// Denominations to create, largest first, with their output count.
    pub outputs: Vec<(Denomination, usize)>,
    pub change: Amount,
    pub fee: Amount,
}

impl DenominationPlan {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn denominated_value(&self) -> Amount {
        self.outputs
            .iter()
            .map(|(d, n)| d.amount() * *n as Amount)
            .sum()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.iter().map(|(_, n)| n).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DenominationEngine {
    dust_floor: Amount,
    max_outputs: usize,
    fee: Amount,
    collateral: CollateralBuilder,
}

impl DenominationEngine {
    pub fn new(params: &PrivateSendParams) -> Self {
        Self {
            dust_floor: params.dust_floor,
            max_outputs: params.max_denomination_outputs,
            fee: params.denomination_fee,
            collateral: CollateralBuilder::new(&params.collateral),
        }
    }

    /// Plans the conversion of up to `target` of raw funds into denominated
    /// outputs, stopping once `keep_floor` of denominated value is held.
    ///
    /// Only confirmed, non-denominated coins not below the dust floor are
    /// spent, largest first. Coins of a collateral amount are never spent,
    /// and while the wallet holds none of them enough raw value to fund the
    /// collateral inputs is left over as change.
    pub fn plan_denominations(
        &self,
        coins: &[Coin],
        target: Amount,
        keep_floor: Amount,
    ) -> Result<DenominationPlan, MixingError> {
        let denominated: Amount = coins
            .iter()
            .filter(|c| c.is_denominated())
            .map(Coin::value)
            .sum();

        let to_create = target.min(keep_floor.saturating_sub(denominated));
        if to_create == 0 {
            debug!(
                event = "denominate skipped",
                denominated = format_amount(denominated),
                keep_floor = format_amount(keep_floor),
            );
            return Ok(DenominationPlan::default());
        }

        let mut candidates: Vec<&Coin> = coins
            .iter()
            .filter(|c| {
                !c.is_denominated()
                    && c.is_confirmed()
                    && c.value() >= self.dust_floor
                    && !self.collateral.is_collateral_amount(c.value())
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.value().cmp(&a.value()).then(a.outpoint.cmp(&b.outpoint))
        });

        let reserve = match self.collateral.select_input(coins) {
            Some(_) => 0,
            None => self.collateral.funding_amount(COLLATERAL_INPUTS),
        };

        let available: Amount = candidates.iter().map(|c| c.value()).sum();
        let budget =
            to_create.min(available.saturating_sub(self.fee + reserve));

        let outputs = self.split(budget);
        if outputs.is_empty() {
            return Err(MixingError::InsufficientFunds);
        }

        let value: Amount =
            outputs.iter().map(|(d, n)| d.amount() * *n as Amount).sum();
        let needed = value + self.fee;

        let mut inputs = vec![];
        let mut sum = 0;
        for coin in candidates {
            if sum >= needed {
                break;
            }
            sum += coin.value();
            inputs.push(coin.clone());
        }

        let mut fee = self.fee;
        let mut change = sum - needed;
        if change < self.dust_floor {
            fee += change;
            change = 0;
        }

        Ok(DenominationPlan {
            inputs,
            outputs,
            change,
            fee,
        })
    }

    /// Greedy split of `budget`, largest denomination first.
    fn split(&self, budget: Amount) -> Vec<(Denomination, usize)> {
        let mut left = budget;
        let mut outputs = vec![];

        for denom in Denomination::LADDER {
            let count = ((left / denom.amount()) as usize).min(self.max_outputs);
            if count > 0 {
                left -= denom.amount() * count as Amount;
                outputs.push((denom, count));
            }
        }

        outputs
    }

    /// Builds, signs and submits the transaction described by `plan`.
    ///
    /// The created coins are persisted as round zero denominated coins.
    pub async fn create_denominations<K, B, S>(
        &self,
        plan: &DenominationPlan,
        keychain: &K,
        broadcaster: &B,
        store: &S,
    ) -> Result<Transaction, MixingError>
    where
        K: Keychain + ?Sized,
        B: Broadcaster + ?Sized,
        S: UtxoStore + ?Sized,
    {
        if plan.is_empty() {
            return Err(MixingError::InsufficientFunds);
        }

        let inputs = plan
            .inputs
            .iter()
            .map(|c| TxIn::unsigned(c.outpoint))
            .collect();

        let mut outputs = Vec::with_capacity(plan.output_count() + 1);
        for (denom, count) in &plan.outputs {
            for _ in 0..*count {
                let script = keychain.fresh_script().await?;
                outputs.push(TxOut::new(denom.amount(), script));
            }
        }
        if plan.change > 0 {
            let script = keychain.fresh_script().await?;
            outputs.push(TxOut::new(plan.change, script));
        }

        let mut tx = Transaction::new(inputs, outputs);
        for (index, coin) in plan.inputs.iter().enumerate() {
            let script_sig = keychain.sign_input(&tx, index, coin).await?;
            tx.inputs[index].script_sig = script_sig;
        }

        let txid = tx.hash();
        let created = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| Coin {
                outpoint: OutPoint::new(txid, index as u32),
                output: output.clone(),
                confirmations: 0,
                rounds: Denomination::from_amount(output.value)
                    .filter(|_| index < plan.output_count())
                    .map(|_| 0),
            })
            .collect();

        broadcaster.submit(tx.clone(), TxKind::Denominate).await?;

        let spent: Vec<_> = plan.inputs.iter().map(|c| c.outpoint).collect();
        store.persist(&spent, created).await?;

        info!(
            event = "denominations created",
            txid = hex::encode(txid),
            outputs = plan.output_count(),
            value = format_amount(plan.denominated_value()),
            fee = format_amount(plan.fee),
        );

        Ok(tx)
    }
}

/// Picks the inputs of a mixing entry for `denom`.
///
/// Only confirmed coins of exactly `denom` that went through fewer than
/// `max_rounds` rounds qualify. The lowest round is preferred and an entry
/// never mixes coins of different rounds.
pub fn select_mixing_inputs(
    coins: &[Coin],
    denom: Denomination,
    max_rounds: u32,
) -> Vec<Coin> {
    let mut by_round: BTreeMap<u32, Vec<&Coin>> = BTreeMap::new();
    for coin in coins {
        match coin.rounds {
            Some(r)
                if r < max_rounds
                    && coin.is_confirmed()
                    && coin.value() == denom.amount() =>
            {
                by_round.entry(r).or_default().push(coin)
            }
            _ => {}
        }
    }

    let Some((_, mut lowest)) = by_round.into_iter().next() else {
        return vec![];
    };

    lowest.sort_by_key(|c| c.outpoint);
    lowest
        .into_iter()
        .take(ENTRY_MAX_INPUTS)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollateralParams;
    use privacy_data::ledger::COIN;

    fn coin(n: u8, value: Amount, rounds: Option<u32>) -> Coin {
        Coin {
            outpoint: OutPoint::new([n; 32], 0),
            output: TxOut::new(value, vec![n]),
            confirmations: 6,
            rounds,
        }
    }

    fn engine() -> DenominationEngine {
        DenominationEngine {
            dust_floor: 5460,
            max_outputs: 11,
            fee: 0,
            collateral: CollateralBuilder::new(&CollateralParams::default()),
        }
    }

    /// A collateral-sized coin, so that no funding is held back.
    fn collateral() -> Coin {
        coin(0xcc, COIN / 1000, None)
    }

    #[test]
    fn test_plan_exact_units() {
        let coins = vec![
            coin(1, COIN, None),
            coin(2, COIN, None),
            coin(3, COIN, None),
        ];

        let plan = engine()
            .plan_denominations(&coins, 2 * COIN, 1000 * COIN)
            .expect("plan");

        assert_eq!(plan.outputs, vec![(Denomination::One, 2)]);
        assert_eq!(plan.inputs.len(), 2);
        assert_eq!(plan.change, 0);
        assert_eq!(plan.fee, 0);
    }

    #[test]
    fn test_plan_greedy_ladder() {
        let coins = vec![coin(1, 12 * COIN + COIN / 2 + 3, None), collateral()];

        let plan = engine()
            .plan_denominations(&coins, 100 * COIN, 100 * COIN)
            .expect("plan");

        assert_eq!(
            plan.outputs,
            vec![
                (Denomination::Ten, 1),
                (Denomination::One, 2),
                (Denomination::Tenth, 5)
            ]
        );
        // 3 units left over are dust and end up in the fee
        assert_eq!(plan.change, 0);
        assert_eq!(plan.fee, 3);
    }

    #[test]
    fn test_plan_respects_keep_floor() {
        let coins = vec![
            coin(1, 5 * COIN, None),
            coin(2, COIN, Some(0)),
            coin(3, COIN, Some(1)),
        ];

        let plan = engine()
            .plan_denominations(&coins, 10 * COIN, 3 * COIN)
            .expect("plan");
        assert_eq!(plan.outputs, vec![(Denomination::One, 1)]);
        assert_eq!(plan.change, 4 * COIN);

        let plan = engine()
            .plan_denominations(&coins, 10 * COIN, 2 * COIN)
            .expect("plan");
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_caps_outputs_per_denomination() {
        let coins = vec![coin(1, 15 * COIN, None), collateral()];

        let plan = engine()
            .plan_denominations(&coins, 15 * COIN, 1000 * COIN)
            .expect("plan");

        assert_eq!(
            plan.outputs,
            vec![
                (Denomination::Ten, 1),
                (Denomination::One, 5),
            ]
        );

        let coins = vec![coin(1, 20 * COIN, None)];
        let plan = engine()
            .plan_denominations(&coins, 2 * COIN, 1000 * COIN)
            .expect("plan");
        assert_eq!(plan.outputs, vec![(Denomination::One, 2)]);
        assert_eq!(plan.change, 18 * COIN);

        let coins = vec![coin(1, 13 * COIN, None)];
        let plan = DenominationEngine {
            max_outputs: 2,
            ..engine()
        }
        .plan_denominations(&coins, 13 * COIN, 1000 * COIN)
        .expect("plan");
        assert_eq!(
            plan.outputs,
            vec![
                (Denomination::Ten, 1),
                (Denomination::One, 2),
                (Denomination::Tenth, 2),
                (Denomination::Hundredth, 2)
            ]
        );
    }

    #[test]
    fn test_plan_skips_unconfirmed_and_dust() {
        let mut unconfirmed = coin(1, 10 * COIN, None);
        unconfirmed.confirmations = 0;
        let coins = vec![unconfirmed, coin(2, 5000, None)];

        let res = engine().plan_denominations(&coins, COIN, 1000 * COIN);
        assert!(matches!(res, Err(MixingError::InsufficientFunds)));
    }

    #[test]
    fn test_plan_fee_is_reserved() {
        let coins = vec![coin(1, COIN, None), collateral()];
        let engine = DenominationEngine {
            fee: 1000,
            ..engine()
        };

        let plan = engine
            .plan_denominations(&coins, COIN, 1000 * COIN)
            .expect("plan");
        assert_eq!(
            plan.outputs,
            vec![(Denomination::Tenth, 9), (Denomination::Hundredth, 9)]
        );
        assert_eq!(plan.change, COIN / 100 - 1000);
        assert_eq!(plan.fee, 1000);
    }

    #[test]
    fn test_plan_keeps_collateral_funding() {
        let coins = vec![
            coin(1, COIN, None),
            coin(2, COIN, None),
            coin(3, COIN, None),
        ];

        // Nothing to build collateral from yet: the funding stays as change
        let plan = engine()
            .plan_denominations(&coins, 1000 * COIN, 1000 * COIN)
            .expect("plan");
        assert_eq!(
            plan.outputs,
            vec![
                (Denomination::One, 2),
                (Denomination::Tenth, 9),
                (Denomination::Hundredth, 8)
            ]
        );
        assert_eq!(plan.inputs.len(), 3);
        assert_eq!(plan.change, 2 * COIN / 100);
        assert!(
            plan.change
                >= engine().collateral.funding_amount(COLLATERAL_INPUTS)
        );

        // Collateral-sized coins are never denominated
        let coins = vec![coin(1, 3 * COIN / 1000, None), collateral()];
        let res = engine().plan_denominations(&coins, COIN, 1000 * COIN);
        assert!(matches!(res, Err(MixingError::InsufficientFunds)));
    }

    #[test]
    fn test_select_lowest_round_first() {
        let coins = vec![
            coin(1, COIN, Some(2)),
            coin(2, COIN, Some(1)),
            coin(3, COIN, Some(1)),
            coin(4, COIN / 10, Some(0)),
            coin(5, COIN, None),
            coin(6, COIN, Some(4)),
        ];

        let picked = select_mixing_inputs(&coins, Denomination::One, 4);
        let picked: Vec<_> = picked.iter().map(|c| c.outpoint).collect();
        assert_eq!(
            picked,
            vec![OutPoint::new([2; 32], 0), OutPoint::new([3; 32], 0)]
        );

        assert!(select_mixing_inputs(&coins, Denomination::Ten, 4).is_empty());
    }

    #[test]
    fn test_select_caps_entry_size() {
        let coins: Vec<_> =
            (0..20).map(|n| coin(n, COIN / 100, Some(0))).collect();

        let picked =
            select_mixing_inputs(&coins, Denomination::Hundredth, 2);
        assert_eq!(picked.len(), ENTRY_MAX_INPUTS);
    }
}
