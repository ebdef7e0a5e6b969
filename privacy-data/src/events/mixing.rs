// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use super::*;
use crate::denomination::Denomination;
use crate::ledger::Amount;
use crate::message::{RelayId, SessionId};
use serde_json::json;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MixingEvent {
    /// A session moved to a new stage.
    StateChanged {
        id: SessionId,
        denom: Denomination,
        state: &'static str,
    },
    Completed {
        id: SessionId,
        denom: Denomination,
        relay: RelayId,
        round: u32,
        outputs: usize,
    },
    Failed {
        id: SessionId,
        denom: Denomination,
        relay: Option<RelayId>,
        reason: String,
        retryable: bool,
    },
    /// Denominated coins were created from non-denominated funds.
    Denominated { txid: String, value: Amount },
}

impl EventSource for MixingEvent {
    const COMPONENT: &'static str = "privatesend";

    fn topic(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Denominated { .. } => "denominated",
        }
    }

    fn entity(&self) -> String {
        match self {
            Self::StateChanged { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. } => id.to_string(),
            Self::Denominated { txid, .. } => txid.clone(),
        }
    }

    fn data(&self) -> Option<serde_json::Value> {
        let data = match self {
            Self::StateChanged { denom, state, .. } => {
                json!({ "denom": denom, "state": state })
            }
            Self::Completed {
                denom,
                relay,
                round,
                outputs,
                ..
            } => json!({
                "denom": denom,
                "relay": relay.to_string(),
                "round": round,
                "outputs": outputs,
            }),
            Self::Failed {
                denom,
                relay,
                reason,
                retryable,
                ..
            } => json!({
                "denom": denom,
                "relay": relay.map(|r| r.to_string()),
                "reason": reason,
                "retryable": retryable,
            }),
            Self::Denominated { value, .. } => json!({ "value": value }),
        };
        Some(data)
    }
}
