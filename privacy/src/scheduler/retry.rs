// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use privacy_data::denomination::Denomination;
use privacy_data::message::RelayId;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryParams;
use crate::errors::MixingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once `after` has elapsed.
    Retry { after: Duration, attempt: u32 },
    /// Transient failures exhausted the retry budget.
    GiveUp,
    /// The failure is not retried automatically.
    Terminal,
}

#[derive(Debug, Default)]
struct Attempts {
    failures: u32,
    excluded: HashSet<RelayId>,
    not_before: Option<Instant>,
    exhausted: bool,
}

/// Exponential backoff with relay exclusion, tracked per denomination.
#[derive(Debug)]
pub struct RetryPolicy {
    params: RetryParams,
    state: HashMap<Denomination, Attempts>,
    no_exclusions: HashSet<RelayId>,
}

impl RetryPolicy {
    pub fn new(params: RetryParams) -> Self {
        Self {
            params,
            state: HashMap::new(),
            no_exclusions: HashSet::new(),
        }
    }

    /// Backoff before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.params
            .base_backoff
            .checked_mul(factor)
            .unwrap_or(self.params.max_backoff)
            .min(self.params.max_backoff)
    }

    /// Records a failed attempt of `denom` served by `relay`.
    pub fn on_failure(
        &mut self,
        denom: Denomination,
        err: &MixingError,
        relay: Option<RelayId>,
        now: Instant,
    ) -> RetryDecision {
        if !err.is_transient() {
            self.state.remove(&denom);
            debug!(event = "terminal failure", %denom, %err);
            return RetryDecision::Terminal;
        }

        let max_retries = self.params.max_retries;
        let attempts = self.state.entry(denom).or_default();
        attempts.failures += 1;
        attempts.excluded.extend(relay);

        if attempts.failures > max_retries {
            attempts.exhausted = true;
            attempts.not_before = None;
            warn!(
                event = "retries exhausted",
                %denom,
                failures = attempts.failures,
                %err,
            );
            return RetryDecision::GiveUp;
        }

        let attempt = attempts.failures;
        let after = self.delay(attempt - 1);
        if let Some(attempts) = self.state.get_mut(&denom) {
            attempts.not_before = Some(now + after);
        }

        debug!(
            event = "retry scheduled",
            %denom,
            attempt,
            after = ?after,
            %err,
        );
        RetryDecision::Retry { after, attempt }
    }

    pub fn on_success(&mut self, denom: Denomination) {
        self.state.remove(&denom);
    }

    /// Lifts the halt on denominations whose retries were exhausted.
    pub fn resume(&mut self) {
        self.state.retain(|_, attempts| !attempts.exhausted);
    }

    /// Whether a new attempt of `denom` may start at `now`.
    pub fn ready(&self, denom: Denomination, now: Instant) -> bool {
        match self.state.get(&denom) {
            None => true,
            Some(attempts) if attempts.exhausted => false,
            Some(attempts) => attempts.not_before.is_none_or(|t| now >= t),
        }
    }

    /// Relays that failed the current attempts of `denom`.
    pub fn excluded(&self, denom: Denomination) -> &HashSet<RelayId> {
        self.state
            .get(&denom)
            .map(|attempts| &attempts.excluded)
            .unwrap_or(&self.no_exclusions)
    }

    pub fn failures(&self, denom: Denomination) -> u32 {
        self.state.get(&denom).map_or(0, |attempts| attempts.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Stage, Violation};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryParams {
            max_retries: 2,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(12),
        })
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = policy();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(12));
        assert_eq!(policy.delay(40), Duration::from_secs(12));
    }

    #[test]
    fn test_transient_failures_until_give_up() {
        let mut policy = policy();
        let denom = Denomination::One;
        let now = Instant::now();
        let timeout = MixingError::TimedOut(Stage::EntryCollection);

        let decision =
            policy.on_failure(denom, &timeout, Some(RelayId([1; 32])), now);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                after: Duration::from_secs(5),
                attempt: 1
            }
        );
        assert!(policy.excluded(denom).contains(&RelayId([1; 32])));
        assert!(!policy.ready(denom, now));
        assert!(policy.ready(denom, now + Duration::from_secs(5)));

        // Other denominations are unaffected
        assert!(policy.ready(Denomination::Ten, now));
        assert!(policy.excluded(Denomination::Ten).is_empty());

        let decision = policy.on_failure(
            denom,
            &MixingError::NoCompatibleRelay,
            None,
            now,
        );
        assert!(matches!(decision, RetryDecision::Retry { attempt: 2, .. }));

        let decision =
            policy.on_failure(denom, &timeout, Some(RelayId([2; 32])), now);
        assert_eq!(decision, RetryDecision::GiveUp);
        assert!(!policy.ready(denom, now + Duration::from_secs(3600)));

        policy.resume();
        assert!(policy.ready(denom, now));
        assert_eq!(policy.failures(denom), 0);
    }

    #[test]
    fn test_terminal_failure_resets() {
        let mut policy = policy();
        let denom = Denomination::Tenth;
        let now = Instant::now();

        policy.on_failure(
            denom,
            &MixingError::NoCompatibleRelay,
            Some(RelayId([1; 32])),
            now,
        );
        let violation = MixingError::from(Violation::MissingOutput(0));
        let decision =
            policy.on_failure(denom, &violation, Some(RelayId([2; 32])), now);

        assert_eq!(decision, RetryDecision::Terminal);
        assert_eq!(policy.failures(denom), 0);
        assert!(policy.ready(denom, now));
        assert!(policy.excluded(denom).is_empty());
    }

    #[test]
    fn test_success_clears_exclusions() {
        let mut policy = policy();
        let denom = Denomination::Hundredth;
        let now = Instant::now();

        policy.on_failure(
            denom,
            &MixingError::TimedOut(Stage::Sign),
            Some(RelayId([1; 32])),
            now,
        );
        policy.on_success(denom);

        assert!(policy.excluded(denom).is_empty());
        assert!(policy.ready(denom, now));
    }
}
