// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Local re-verification of the relay's combined transaction.
//!
//! The relay's shuffle is untrusted: before signing, a participant checks
//! that its own inputs and outputs are present and unmodified, that every
//! output is of the session denomination and that value is conserved.
//! A proposal must also mix with other participants: it carries at least
//! `min_size` times the own input count, so a relay cannot get a lone
//! participant to sign a transaction with itself.

use std::collections::HashSet;

use privacy_data::denomination::Denomination;
use privacy_data::ledger::{Hash, OutPoint, Script, Transaction, TxOut};

use crate::errors::Violation;

/// Positions of the local participant's inputs and outputs in a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnSlots {
    /// Index in the proposal of each own input, in entry order.
    pub inputs: Vec<usize>,
    /// Index in the proposal of each own output, in entry order.
    pub outputs: Vec<usize>,
}

pub fn verify_proposal(
    tx: &Transaction,
    denom: Denomination,
    own_inputs: &[OutPoint],
    own_outputs: &[TxOut],
    min_size: usize,
) -> Result<OwnSlots, Violation> {
    if tx.inputs.len() != tx.outputs.len() {
        return Err(Violation::Unbalanced {
            inputs: tx.inputs.len(),
            outputs: tx.outputs.len(),
        });
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for prevout in tx.prevouts() {
        if !seen.insert(prevout) {
            return Err(Violation::DuplicateInput(*prevout));
        }
    }

    let inputs = own_inputs
        .iter()
        .map(|op| tx.input_index(op).ok_or(Violation::MissingInput(*op)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut outputs = Vec::with_capacity(own_outputs.len());
    for (i, own) in own_outputs.iter().enumerate() {
        let mut slots = tx
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.script_pubkey == own.script_pubkey);

        let (index, found) =
            slots.next().ok_or(Violation::MissingOutput(i))?;
        if slots.next().is_some() {
            return Err(Violation::DuplicateOutputSlot(i));
        }
        if found.value != own.value {
            return Err(Violation::ModifiedOutput(i));
        }
        outputs.push(index);
    }

    let required = (min_size * own_inputs.len()).max(own_inputs.len() + 1);
    if tx.inputs.len() < required {
        return Err(Violation::TooFewInputs {
            inputs: tx.inputs.len(),
            required,
        });
    }

    if let Some(o) = tx.outputs.iter().find(|o| o.value != denom.amount()) {
        return Err(Violation::ForeignDenomination(o.value));
    }

    Ok(OwnSlots { inputs, outputs })
}

/// Checks that the relay's final transaction is the proposal this
/// participant signed, carrying the signatures it produced, and that every
/// input is signed.
pub fn verify_final(
    final_tx: &Transaction,
    proposal_txid: &Hash,
    own_signatures: &[(usize, Script)],
) -> Result<(), Violation> {
    if final_tx.hash() != *proposal_txid || !final_tx.is_fully_signed() {
        return Err(Violation::FinalTransactionMismatch);
    }

    let carried = own_signatures.iter().all(|(index, script_sig)| {
        final_tx
            .inputs
            .get(*index)
            .is_some_and(|i| &i.script_sig == script_sig)
    });

    if carried {
        Ok(())
    } else {
        Err(Violation::FinalTransactionMismatch)
    }
}
