// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use privacy_data::denomination::Denomination;
use privacy_data::ledger::{Coin, OutPoint, Script, Transaction, TxIn, TxOut};
use privacy_data::message::payload::EntrySubmit;
use privacy_data::message::{SessionId, ENTRY_MAX_INPUTS};

use crate::errors::EntryError;

/// The local participant's contribution to a mixing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixingEntry {
    pub denom: Denomination,
    pub inputs: Vec<Coin>,
    pub outputs: Vec<TxOut>,
}

impl MixingEntry {
    /// Pairs every input coin with an output of the same denomination paying
    /// to one of `scripts`.
    pub fn new(
        denom: Denomination,
        inputs: Vec<Coin>,
        scripts: Vec<Script>,
    ) -> Result<Self, EntryError> {
        if inputs.is_empty() {
            return Err(EntryError::Empty);
        }

        if inputs.len() > ENTRY_MAX_INPUTS {
            return Err(EntryError::TooManyInputs(
                inputs.len(),
                ENTRY_MAX_INPUTS,
            ));
        }

        if inputs.len() != scripts.len() {
            return Err(EntryError::CountMismatch {
                inputs: inputs.len(),
                outputs: scripts.len(),
            });
        }

        for coin in &inputs {
            if !coin.is_denominated() {
                return Err(EntryError::NotDenominated(coin.outpoint));
            }
            if coin.value() != denom.amount() {
                return Err(EntryError::ForeignInput(coin.outpoint));
            }
        }

        let outputs = scripts
            .into_iter()
            .map(|script| TxOut::new(denom.amount(), script))
            .collect();

        Ok(Self {
            denom,
            inputs,
            outputs,
        })
    }

    pub fn prevouts(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(|c| c.outpoint).collect()
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.inputs.iter().find(|c| &c.outpoint == outpoint)
    }

    /// Highest round among the inputs.
    pub fn round(&self) -> u32 {
        self.inputs
            .iter()
            .filter_map(|c| c.rounds)
            .max()
            .unwrap_or_default()
    }

    pub fn to_submit(
        &self,
        session_id: SessionId,
        collateral: Transaction,
    ) -> EntrySubmit {
        EntrySubmit {
            session_id,
            inputs: self
                .inputs
                .iter()
                .map(|c| TxIn::unsigned(c.outpoint))
                .collect(),
            outputs: self.outputs.clone(),
            collateral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privacy_data::ledger::COIN;

    fn coin(n: u8, value: u64, rounds: Option<u32>) -> Coin {
        Coin {
            outpoint: OutPoint::new([n; 32], 1),
            output: TxOut::new(value, vec![]),
            confirmations: 3,
            rounds,
        }
    }

    #[test]
    fn test_entry_is_balanced() {
        let entry = MixingEntry::new(
            Denomination::One,
            vec![coin(1, COIN, Some(0)), coin(2, COIN, Some(0))],
            vec![vec![0xa], vec![0xb]],
        )
        .expect("valid entry");

        let inputs: u64 = entry.inputs.iter().map(Coin::value).sum();
        let outputs: u64 = entry.outputs.iter().map(|o| o.value).sum();
        assert_eq!(inputs, outputs);
        assert_eq!(entry.round(), 0);
    }

    #[test]
    fn test_entry_validation() {
        let res = MixingEntry::new(Denomination::One, vec![], vec![]);
        assert_eq!(res, Err(EntryError::Empty));

        let res = MixingEntry::new(
            Denomination::One,
            vec![coin(1, COIN / 10, Some(0))],
            vec![vec![1]],
        );
        assert!(matches!(res, Err(EntryError::ForeignInput(_))));

        let res = MixingEntry::new(
            Denomination::One,
            vec![coin(1, COIN, None)],
            vec![vec![1]],
        );
        assert!(matches!(res, Err(EntryError::NotDenominated(_))));

        let res = MixingEntry::new(
            Denomination::One,
            vec![coin(1, COIN, Some(1))],
            vec![vec![1], vec![2]],
        );
        assert!(matches!(res, Err(EntryError::CountMismatch { .. })));

        let inputs: Vec<_> = (0..10).map(|n| coin(n, COIN, Some(0))).collect();
        let scripts = (0..10).map(|n| vec![n]).collect();
        let res = MixingEntry::new(Denomination::One, inputs, scripts);
        assert_eq!(res, Err(EntryError::TooManyInputs(10, ENTRY_MAX_INPUTS)));
    }
}
