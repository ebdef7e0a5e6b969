// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use super::*;
use crate::ledger::Hash;
use serde_json::json;

/// Lock status changes published to UI and RPC consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockEvent {
    Requested { txid: Hash, inputs: usize },
    Progress { txid: Hash, count: u16, required: u16 },
    Locked { txid: Hash, signers: u16 },
    Expired { txid: Hash, count: u16, required: u16 },
}

impl LockEvent {
    pub fn txid(&self) -> &Hash {
        match self {
            Self::Requested { txid, .. }
            | Self::Progress { txid, .. }
            | Self::Locked { txid, .. }
            | Self::Expired { txid, .. } => txid,
        }
    }
}

impl EventSource for LockEvent {
    const COMPONENT: &'static str = "instantsend";

    fn topic(&self) -> &'static str {
        match self {
            Self::Requested { .. } => "requested",
            Self::Progress { .. } => "progress",
            Self::Locked { .. } => "locked",
            Self::Expired { .. } => "expired",
        }
    }

    fn entity(&self) -> String {
        hex::encode(self.txid())
    }

    fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::Requested { inputs, .. } => Some(json!({ "inputs": inputs })),
            Self::Progress {
                count, required, ..
            }
            | Self::Expired {
                count, required, ..
            } => Some(json!({ "count": count, "required": required })),
            Self::Locked { signers, .. } => {
                Some(json!({ "signers": signers }))
            }
        }
    }
}
