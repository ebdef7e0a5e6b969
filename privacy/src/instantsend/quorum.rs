// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::BTreeMap;
use std::fmt;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use privacy_data::ledger::{Hash, OutPoint};
use privacy_data::message::{SignerId, LOCK_SIGNATURE_SIZE};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::errors::SignatureError;

const DIGEST_DOMAIN: &[u8] = b"instantsend";

/// Number of distinct signatures a lock request needs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// A fixed count of signers.
    Fixed(u16),
    /// A percentage of the current quorum membership, rounded up.
    Percentage(u8),
}

impl Threshold {
    pub fn is_zero(&self) -> bool {
        matches!(self, Threshold::Fixed(0) | Threshold::Percentage(0))
    }

    pub fn required(&self, members: usize) -> u16 {
        match *self {
            Threshold::Fixed(n) => n,
            Threshold::Percentage(p) => {
                let p = usize::from(p.min(100));
                let n = (members * p).div_ceil(100);
                u16::try_from(n).unwrap_or(u16::MAX)
            }
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Fixed(n) => write!(f, "{n} signers"),
            Threshold::Percentage(p) => write!(f, "{p}% of quorum"),
        }
    }
}

/// Digest the quorum signs for a lock request: the transaction id followed
/// by its input outpoints in ascending order.
pub fn input_digest<'a>(
    txid: &Hash,
    inputs: impl IntoIterator<Item = &'a OutPoint>,
) -> Hash {
    let mut inputs: Vec<_> = inputs.into_iter().collect();
    inputs.sort();

    let mut hasher = Sha3_256::new();
    hasher.update(DIGEST_DOMAIN);
    hasher.update(txid);
    for outpoint in inputs {
        hasher.update(outpoint.txid);
        hasher.update(outpoint.index.to_le_bytes());
    }
    hasher.finalize().into()
}

/// The current lock quorum: its members and signing threshold.
#[derive(Debug, Clone)]
pub struct Quorum {
    members: BTreeMap<SignerId, VerifyingKey>,
    threshold: Threshold,
}

impl Quorum {
    pub fn new(
        members: impl IntoIterator<Item = VerifyingKey>,
        threshold: Threshold,
    ) -> Self {
        let members = members
            .into_iter()
            .map(|key| (SignerId(key.to_bytes()), key))
            .collect();
        Self { members, threshold }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_member(&self, signer: &SignerId) -> bool {
        self.members.contains_key(signer)
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Distinct valid signatures needed for a lock.
    pub fn required(&self) -> u16 {
        self.threshold.required(self.members.len())
    }

    pub fn verify(
        &self,
        signer: &SignerId,
        digest: &Hash,
        signature: &[u8; LOCK_SIGNATURE_SIZE],
    ) -> Result<(), SignatureError> {
        let key = self
            .members
            .get(signer)
            .ok_or(SignatureError::UnknownSigner(*signer))?;

        let signature = Signature::from_bytes(signature);
        // Scalar must be reduced
        if signature.s_bytes()[31] & 0xe0 != 0 {
            return Err(SignatureError::Malformed(*signer));
        }

        key.verify(digest, &signature)
            .map_err(|_| SignatureError::VerificationFailed(*signer))
    }
}
