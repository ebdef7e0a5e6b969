// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet, VecDeque};

use privacy_data::denomination::Denomination;
use privacy_data::message::RelayId;
use tracing::debug;

use crate::config::RelayParams;
use crate::errors::MixingError;
use crate::operations::RelayPeer;

/// Picks and rotates the relay peer used by mixing sessions.
#[derive(Debug)]
pub struct RelaySelector {
    params: RelayParams,
    /// Most recently used relays, oldest first.
    recently_used: VecDeque<RelayId>,
    last_success: HashMap<RelayId, u64>,
}

impl RelaySelector {
    pub fn new(params: RelayParams) -> Self {
        Self {
            params,
            recently_used: VecDeque::new(),
            last_success: HashMap::new(),
        }
    }

    fn is_eligible(&self, peer: &RelayPeer, now: u64) -> bool {
        let max_age = self.params.max_last_seen.as_secs();
        peer.protocol_version >= self.params.min_protocol_version
            && now.saturating_sub(peer.last_seen) <= max_age
            && peer.queue_occupancy < self.params.max_queue_occupancy
    }

    fn rank(&self, a: &RelayPeer, b: &RelayPeer, denom: Denomination) -> Ordering {
        let success = |p: &RelayPeer| self.last_success.get(&p.id).copied();

        // Higher version, then latest success (never succeeded ranks last),
        // then lower occupancy, then an open queue of the same denomination.
        Reverse(a.protocol_version)
            .cmp(&Reverse(b.protocol_version))
            .then_with(|| Reverse(success(a)).cmp(&Reverse(success(b))))
            .then_with(|| a.queue_occupancy.cmp(&b.queue_occupancy))
            .then_with(|| {
                let open = |p: &RelayPeer| p.open_queue != Some(denom);
                open(a).cmp(&open(b))
            })
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Returns the best eligible relay not in `excluded`.
    ///
    /// Recently used relays are skipped while any other relay is eligible,
    /// otherwise the least recently used one is returned.
    pub fn select_relay(
        &self,
        peers: &[RelayPeer],
        denom: Denomination,
        excluded: &HashSet<RelayId>,
        now: u64,
    ) -> Result<RelayPeer, MixingError> {
        let mut eligible: Vec<&RelayPeer> = peers
            .iter()
            .filter(|p| !excluded.contains(&p.id) && self.is_eligible(p, now))
            .collect();

        if eligible.is_empty() {
            debug!(
                event = "no compatible relay",
                %denom,
                known = peers.len(),
                excluded = excluded.len(),
            );
            return Err(MixingError::NoCompatibleRelay);
        }

        let fresh: Vec<&RelayPeer> = eligible
            .iter()
            .copied()
            .filter(|p| !self.recently_used.contains(&p.id))
            .collect();

        let selected = if fresh.is_empty() {
            eligible.sort_by_key(|p| {
                self.recently_used.iter().position(|id| *id == p.id)
            });
            eligible[0]
        } else {
            fresh
                .into_iter()
                .min_by(|a, b| self.rank(a, b, denom))
                .ok_or(MixingError::NoCompatibleRelay)?
        };

        debug!(
            event = "relay selected",
            relay = %selected.id,
            endpoint = selected.endpoint,
            version = selected.protocol_version,
            occupancy = selected.queue_occupancy,
            %denom,
        );

        Ok(selected.clone())
    }

    pub fn mark_used(&mut self, relay: RelayId) {
        self.recently_used.retain(|id| *id != relay);
        self.recently_used.push_back(relay);
        while self.recently_used.len() > self.params.recently_used_cap {
            self.recently_used.pop_front();
        }
    }

    pub fn record_success(&mut self, relay: RelayId, at: u64) {
        self.last_success.insert(relay, at);
    }
}
