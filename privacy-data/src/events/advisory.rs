// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use super::*;
use crate::denomination::Denomination;
use serde_json::json;

/// User-facing conditions that stop mixing until the wallet owner acts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advisory {
    InsufficientFunds,
    /// Retries for a denomination are exhausted.
    InsufficientCompatibleInputs { denom: Denomination },
    /// No collateral could be built.
    NoMixingAvailable,
    BackupRequired { keys_left: u32 },
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFunds => f.write_str("insufficient funds"),
            Self::InsufficientCompatibleInputs { denom } => {
                write!(f, "insufficient compatible inputs for {denom}")
            }
            Self::NoMixingAvailable => f.write_str("no mixing available"),
            Self::BackupRequired { keys_left } => write!(
                f,
                "very low number of keys left ({keys_left}), automatic backup required"
            ),
        }
    }
}

impl EventSource for Advisory {
    const COMPONENT: &'static str = "advisory";

    fn topic(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::InsufficientCompatibleInputs { .. } => {
                "insufficient_compatible_inputs"
            }
            Self::NoMixingAvailable => "no_mixing_available",
            Self::BackupRequired { .. } => "backup_required",
        }
    }

    fn entity(&self) -> String {
        String::new()
    }

    fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientCompatibleInputs { denom } => {
                Some(json!({ "denom": denom }))
            }
            Self::BackupRequired { keys_left } => {
                Some(json!({ "keys_left": keys_left }))
            }
            _ => None,
        }
    }
}
