// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::HashMap;
use std::time::Duration;

use privacy_data::denomination::Denomination;
use privacy_data::ledger::{
    format_amount, Amount, Coin, OutPoint, Transaction, TxIn, TxOut,
};
use privacy_data::message::SessionId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CollateralParams;
use crate::errors::MixingError;
use crate::operations::{Broadcaster, Keychain, TxKind, UtxoStore};

/// Expected serialized size of a one-input one-output collateral tx.
pub const COLLATERAL_TX_SIZE: usize = 250;

/// Collateral-sized outputs created when the wallet runs out of them.
pub const COLLATERAL_INPUTS: usize = Denomination::LADDER.len();

/// Provably unspendable output script used when nothing is paid back.
const OP_RETURN: u8 = 0x6a;

/// Fee rate in units per 1000 bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeRate(pub Amount);

impl FeeRate {
    pub fn fee_for(&self, size: usize) -> Amount {
        self.0 * size as Amount / 1000
    }
}

/// A signed collateral transaction, kept by the participant for the whole
/// session attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collateral {
    pub tx: Transaction,
    pub input: OutPoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralInputsPlan {
    pub input: Coin,
    pub outputs: usize,
    pub output_value: Amount,
    pub change: Amount,
}

#[derive(Debug, Clone, Copy)]
pub struct CollateralBuilder {
    fee: Amount,
    max_multiplier: u64,
}

impl CollateralBuilder {
    pub fn new(params: &CollateralParams) -> Self {
        Self {
            fee: params.fee,
            max_multiplier: params.max_multiplier,
        }
    }

    pub fn max_amount(&self) -> Amount {
        self.fee * self.max_multiplier
    }

    pub fn is_collateral_amount(&self, amount: Amount) -> bool {
        (self.fee..=self.max_amount()).contains(&amount)
    }

    /// Raw value needed to fund `count` collateral inputs, fee included.
    pub fn funding_amount(&self, count: usize) -> Amount {
        self.max_amount() * count as Amount + self.fee
    }

    /// Smallest confirmed, non-denominated coin of a collateral amount.
    pub fn select_input<'a>(&self, coins: &'a [Coin]) -> Option<&'a Coin> {
        coins
            .iter()
            .filter(|c| {
                c.is_confirmed()
                    && !c.is_denominated()
                    && self.is_collateral_amount(c.value())
            })
            .min_by(|a, b| {
                a.value().cmp(&b.value()).then(a.outpoint.cmp(&b.outpoint))
            })
    }

    /// Builds and signs a collateral transaction spending the best eligible
    /// coin of `coins` back to a fresh wallet script.
    pub async fn build_collateral<K: Keychain + ?Sized>(
        &self,
        fee_rate: FeeRate,
        coins: &[Coin],
        keychain: &K,
    ) -> Result<Collateral, MixingError> {
        let coin = self
            .select_input(coins)
            .ok_or(MixingError::NoCollateralAvailable)?;

        let fee = self.fee.max(fee_rate.fee_for(COLLATERAL_TX_SIZE));
        let payback = coin.value().saturating_sub(fee);

        let output = if payback > 0 {
            TxOut::new(payback, keychain.fresh_script().await?)
        } else {
            TxOut::new(0, vec![OP_RETURN])
        };

        let mut tx =
            Transaction::new(vec![TxIn::unsigned(coin.outpoint)], vec![output]);
        tx.inputs[0].script_sig = keychain.sign_input(&tx, 0, coin).await?;

        debug!(
            event = "collateral built",
            input = %coin.outpoint,
            value = format_amount(coin.value()),
            fee = format_amount(fee),
        );

        Ok(Collateral {
            tx,
            input: coin.outpoint,
        })
    }

    /// Plans splitting one raw coin into `count` collateral-sized outputs.
    pub fn plan_collateral_inputs(
        &self,
        coins: &[Coin],
        count: usize,
        dust_floor: Amount,
    ) -> Result<CollateralInputsPlan, MixingError> {
        let output_value = self.max_amount();
        let needed = output_value * count as Amount;
        let funding = self.funding_amount(count);

        // Smallest raw coin that covers all outputs plus the fee
        let input = coins
            .iter()
            .filter(|c| {
                c.is_confirmed()
                    && !c.is_denominated()
                    && !self.is_collateral_amount(c.value())
                    && c.value() >= funding
            })
            .min_by(|a, b| {
                a.value().cmp(&b.value()).then(a.outpoint.cmp(&b.outpoint))
            })
            .ok_or(MixingError::InsufficientFunds)?;

        let mut change = input.value() - needed - self.fee;
        if change < dust_floor {
            change = 0;
        }

        Ok(CollateralInputsPlan {
            input: input.clone(),
            outputs: count,
            output_value,
            change,
        })
    }

    pub async fn make_collateral_inputs<K, B, S>(
        &self,
        plan: &CollateralInputsPlan,
        keychain: &K,
        broadcaster: &B,
        store: &S,
    ) -> Result<Transaction, MixingError>
    where
        K: Keychain + ?Sized,
        B: Broadcaster + ?Sized,
        S: UtxoStore + ?Sized,
    {
        let mut outputs = Vec::with_capacity(plan.outputs + 1);
        for _ in 0..plan.outputs {
            outputs.push(TxOut::new(
                plan.output_value,
                keychain.fresh_script().await?,
            ));
        }
        if plan.change > 0 {
            outputs
                .push(TxOut::new(plan.change, keychain.fresh_script().await?));
        }

        let mut tx = Transaction::new(
            vec![TxIn::unsigned(plan.input.outpoint)],
            outputs,
        );
        tx.inputs[0].script_sig =
            keychain.sign_input(&tx, 0, &plan.input).await?;

        let txid = tx.hash();
        let created = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(i, output)| Coin {
                outpoint: OutPoint::new(txid, i as u32),
                output: output.clone(),
                confirmations: 0,
                rounds: None,
            })
            .collect();

        broadcaster.submit(tx.clone(), TxKind::MakeCollateral).await?;
        store.persist(&[plan.input.outpoint], created).await?;

        info!(
            event = "collateral inputs created",
            txid = hex::encode(txid),
            outputs = plan.outputs,
        );

        Ok(tx)
    }
}

/// Short-lived set of collateral inputs attached to a running attempt.
#[derive(Debug, Default)]
pub struct CollateralRegistry {
    used: HashMap<OutPoint, (SessionId, Instant)>,
}

impl CollateralRegistry {
    /// Marks `input` as used by `session`.
    ///
    /// A collateral already attached to another attempt is rejected.
    pub fn mark_used(
        &mut self,
        input: OutPoint,
        session: SessionId,
        now: Instant,
    ) -> Result<(), MixingError> {
        match self.used.get(&input) {
            Some((holder, _)) if *holder != session => {
                warn!(
                    event = "collateral reuse rejected",
                    %input,
                    holder = %holder,
                    session = %session,
                );
                Err(MixingError::CollateralReused(input))
            }
            _ => {
                self.used.insert(input, (session, now));
                Ok(())
            }
        }
    }

    pub fn release(&mut self, input: &OutPoint) -> bool {
        self.used.remove(input).is_some()
    }

    pub fn is_used(&self, input: &OutPoint) -> bool {
        self.used.contains_key(input)
    }

    /// Drops markers older than `ttl`, returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.used.len();
        self.used
            .retain(|_, (_, since)| now.saturating_duration_since(*since) < ttl);
        before - self.used.len()
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privacy_data::ledger::COIN;

    fn coin(n: u8, value: Amount, rounds: Option<u32>) -> Coin {
        Coin {
            outpoint: OutPoint::new([n; 32], 0),
            output: TxOut::new(value, vec![n]),
            confirmations: 1,
            rounds,
        }
    }

    fn builder() -> CollateralBuilder {
        CollateralBuilder::new(&CollateralParams::default())
    }

    #[test]
    fn test_select_smallest_eligible() {
        let fee = COIN / 1000;
        let coins = vec![
            coin(1, 3 * fee, None),
            coin(2, 2 * fee, None),
            coin(3, 5 * fee, None),
            coin(4, fee, Some(0)),
            coin(5, fee / 2, None),
        ];

        let picked = builder().select_input(&coins).expect("collateral");
        assert_eq!(picked.outpoint, OutPoint::new([2; 32], 0));
    }

    #[test]
    fn test_no_collateral_available() {
        let coins = vec![coin(1, COIN, None), coin(2, COIN / 1000, Some(0))];
        assert!(builder().select_input(&coins).is_none());
    }

    #[test]
    fn test_plan_collateral_inputs() {
        let coins = vec![coin(1, COIN, None), coin(2, 10 * COIN, None)];

        let plan = builder()
            .plan_collateral_inputs(&coins, 4, 5460)
            .expect("plan");
        assert_eq!(plan.input.outpoint, OutPoint::new([1; 32], 0));
        assert_eq!(plan.output_value, 4 * COIN / 1000);
        assert_eq!(plan.change, COIN - 16 * COIN / 1000 - COIN / 1000);

        let res = builder().plan_collateral_inputs(&coins[..1], 1000, 5460);
        assert!(matches!(res, Err(MixingError::InsufficientFunds)));
    }

    #[test]
    fn test_registry_rejects_reuse() {
        let now = Instant::now();
        let input = OutPoint::new([1; 32], 0);
        let mut registry = CollateralRegistry::default();

        registry.mark_used(input, SessionId(1), now).expect("first use");
        // Same session may attach it again, e.g. after requeue
        registry.mark_used(input, SessionId(1), now).expect("same session");

        let res = registry.mark_used(input, SessionId(2), now);
        assert!(matches!(res, Err(MixingError::CollateralReused(i)) if i == input));

        assert!(registry.release(&input));
        registry.mark_used(input, SessionId(2), now).expect("after release");
    }

    #[test]
    fn test_registry_purge() {
        let now = Instant::now();
        let mut registry = CollateralRegistry::default();
        registry
            .mark_used(OutPoint::new([1; 32], 0), SessionId(1), now)
            .unwrap();
        registry
            .mark_used(
                OutPoint::new([2; 32], 0),
                SessionId(2),
                now + Duration::from_secs(300),
            )
            .unwrap();

        let purged =
            registry.purge_expired(now + Duration::from_secs(600), Duration::from_secs(600));
        assert_eq!(purged, 1);
        assert!(registry.is_used(&OutPoint::new([2; 32], 0)));
    }
}
