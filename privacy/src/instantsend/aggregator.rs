// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::BTreeMap;

use privacy_data::ledger::{to_str, Hash};
use privacy_data::message::payload::LockSignature;
use privacy_data::message::{SignerId, LOCK_SIGNATURE_SIZE};
use tracing::{debug, info, warn};

use super::quorum::Quorum;
use crate::errors::SignatureError;

/// A reached lock: the signed input digest and the signatures of every
/// distinct quorum member that contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantLock {
    pub txid: Hash,
    pub input_digest: Hash,
    pub signatures: Vec<(SignerId, [u8; LOCK_SIGNATURE_SIZE])>,
}

impl InstantLock {
    pub fn signers(&self) -> impl Iterator<Item = &SignerId> {
        self.signatures.iter().map(|(signer, _)| signer)
    }
}

/// Aggregator collects the signatures of one lock request, keeping a
/// single signature per quorum member.
#[derive(Debug)]
pub struct Aggregator {
    txid: Hash,
    input_digest: Hash,
    signatures: BTreeMap<SignerId, [u8; LOCK_SIGNATURE_SIZE]>,
}

impl Aggregator {
    pub fn new(txid: Hash, input_digest: Hash) -> Self {
        Self {
            txid,
            input_digest,
            signatures: BTreeMap::new(),
        }
    }

    pub fn input_digest(&self) -> &Hash {
        &self.input_digest
    }

    /// Number of distinct valid signatures collected so far.
    pub fn total(&self) -> u16 {
        u16::try_from(self.signatures.len()).unwrap_or(u16::MAX)
    }

    /// Verifies and stores `sig`.
    ///
    /// Returns the updated total and whether the quorum threshold is
    /// reached, or `None` if the signer already contributed.
    pub fn collect_signature(
        &mut self,
        quorum: &Quorum,
        sig: &LockSignature,
    ) -> Result<Option<(u16, bool)>, SignatureError> {
        let signer = &sig.signer;

        quorum.verify(signer, &self.input_digest, &sig.signature)?;

        if self.signatures.contains_key(signer) {
            warn!(
                event = "discarded duplicated signature",
                from = %signer,
                txid = to_str(&self.txid),
            );
            return Ok(None);
        }

        self.signatures.insert(*signer, sig.signature);

        let total = self.total();
        let target = quorum.required();

        debug!(
            event = "signature aggregated",
            from = %signer,
            total,
            target,
            txid = to_str(&self.txid),
        );

        let quorum_reached = total >= target;
        if quorum_reached {
            info!(
                event = "quorum reached",
                total,
                target,
                txid = to_str(&self.txid),
            );
        }

        Ok(Some((total, quorum_reached)))
    }

    /// Drops the signatures of signers no longer in `quorum`, returns how
    /// many were dropped.
    pub fn retain_members(&mut self, quorum: &Quorum) -> usize {
        let before = self.signatures.len();
        self.signatures.retain(|signer, _| quorum.is_member(signer));
        before - self.signatures.len()
    }

    pub fn to_lock(&self) -> InstantLock {
        InstantLock {
            txid: self.txid,
            input_digest: self.input_digest,
            signatures: self
                .signatures
                .iter()
                .map(|(signer, sig)| (*signer, *sig))
                .collect(),
        }
    }
}
