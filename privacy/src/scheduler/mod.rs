// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Mixing orchestration.
//!
//! Each scheduling pass keeps the wallet supplied with denominated coins
//! and collateral, then starts a session for every denomination that has
//! coins below the rounds target, no running session and no pending
//! backoff. Finished sessions come back as [`SessionOutcome`]s.

pub mod retry;
pub mod rounds;

use std::collections::HashMap;
use std::sync::Arc;

use privacy_data::denomination::Denomination;
use privacy_data::events::{Advisory, Event, MixingEvent};
use privacy_data::get_current_timestamp;
use privacy_data::ledger::{Coin, OutPoint};
use privacy_data::message::{AsyncQueue, RelayId, RelayMessage, SessionId};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{PrivateSendParams, EVENTS_CAP, SESSION_QUEUE_CAP};
use crate::errors::{AbortReason, MixingError};
use crate::operations::{TxKind, Wallet};
use crate::privatesend::collateral::{
    Collateral, CollateralBuilder, CollateralRegistry, FeeRate,
    COLLATERAL_INPUTS,
};
use crate::privatesend::denominate::{
    select_mixing_inputs, DenominationEngine,
};
use crate::privatesend::relay::RelaySelector;
use crate::privatesend::session::{
    MixingEntry, MixingSession, SessionOutcome, SessionParams, SessionState,
    SessionTask,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use rounds::RoundStats;

/// Bookkeeping of a running session.
pub struct SessionHandle {
    pub id: SessionId,
    pub denom: Denomination,
    pub relay: RelayId,
    /// Input of the collateral the session handed to its relay
    pub collateral: OutPoint,
    pub inputs: Vec<OutPoint>,
    pub started: Instant,
    inbound: AsyncQueue<RelayMessage>,
    cancel: Option<oneshot::Sender<AbortReason>>,
}

/// Arena of running sessions, keyed by session id and indexed by
/// denomination.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionHandle>,
    by_denom: HashMap<Denomination, SessionId>,
    multi_session: bool,
}

impl SessionRegistry {
    pub fn new(multi_session: bool) -> Self {
        Self {
            sessions: HashMap::new(),
            by_denom: HashMap::new(),
            multi_session,
        }
    }

    /// At most one session per denomination, and only one overall unless
    /// multi-session mixing is enabled.
    pub fn can_start(&self, denom: Denomination) -> bool {
        !self.by_denom.contains_key(&denom)
            && (self.multi_session || self.sessions.is_empty())
    }

    /// Registers `handle`, handing it back if its denomination is busy.
    pub fn insert(
        &mut self,
        handle: SessionHandle,
    ) -> Result<(), SessionHandle> {
        if !self.can_start(handle.denom) {
            return Err(handle);
        }
        self.by_denom.insert(handle.denom, handle.id);
        self.sessions.insert(handle.id, handle);
        Ok(())
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionHandle> {
        let handle = self.sessions.remove(id)?;
        if self.by_denom.get(&handle.denom) == Some(id) {
            self.by_denom.remove(&handle.denom);
        }
        Some(handle)
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionHandle> {
        self.sessions.get(id)
    }

    pub fn active(&self, denom: Denomination) -> Option<&SessionHandle> {
        self.by_denom.get(&denom).and_then(|id| self.sessions.get(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    /// Forwards a relay message to the session it belongs to.
    pub fn route(&self, msg: RelayMessage) -> bool {
        match self.sessions.get(&msg.session_id()) {
            Some(handle) => {
                handle.inbound.try_send(msg);
                true
            }
            None => {
                debug!(
                    event = "unroutable message",
                    topic = ?msg.topic(),
                    id = %msg.session_id(),
                );
                false
            }
        }
    }

    /// Requests cooperative cancellation of session `id`.
    pub fn cancel(&mut self, id: &SessionId, reason: AbortReason) -> bool {
        self.sessions
            .get_mut(id)
            .and_then(|handle| handle.cancel.take())
            .is_some_and(|cancel| cancel.send(reason).is_ok())
    }

    pub fn cancel_all(&mut self, reason: AbortReason) -> usize {
        self.sessions
            .values_mut()
            .filter_map(|handle| handle.cancel.take())
            .filter_map(|cancel| cancel.send(reason).ok())
            .count()
    }
}

/// Drives PrivateSend mixing for a wallet.
pub struct Scheduler {
    params: PrivateSendParams,
    wallet: Wallet,
    fee_rate: FeeRate,

    engine: DenominationEngine,
    collateral: CollateralBuilder,
    used_collateral: CollateralRegistry,
    selector: RelaySelector,
    retry: RetryPolicy,
    registry: SessionRegistry,
    tasks: JoinSet<SessionOutcome>,

    events: broadcast::Sender<Event>,
    last_advisory: Option<Advisory>,
}

impl Scheduler {
    pub fn new(
        params: PrivateSendParams,
        wallet: Wallet,
        fee_rate: FeeRate,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAP);
        Self {
            engine: DenominationEngine::new(&params),
            collateral: CollateralBuilder::new(&params.collateral),
            used_collateral: CollateralRegistry::default(),
            selector: RelaySelector::new(params.relay),
            retry: RetryPolicy::new(params.retry),
            registry: SessionRegistry::new(params.multi_session),
            tasks: JoinSet::new(),
            params,
            wallet,
            fee_rate,
            events,
            last_advisory: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn set_fee_rate(&mut self, fee_rate: FeeRate) {
        self.fee_rate = fee_rate;
    }

    /// Lifts advisories and exhausted retries, e.g. after the wallet owner
    /// topped up funds or made a backup.
    pub fn resume(&mut self) {
        self.retry.resume();
        self.last_advisory = None;
    }

    /// Runs one scheduling pass at unix time `now` and returns how many
    /// sessions were started.
    pub async fn tick(&mut self, now: u64) -> Result<usize, MixingError> {
        if !self.params.enabled {
            return Ok(0);
        }

        let purged = self
            .used_collateral
            .purge_expired(Instant::now(), self.params.collateral.used_ttl);
        if purged > 0 {
            debug!(event = "collateral markers purged", count = purged);
        }

        let keys_left = self.wallet.keychain.keys_left().await?;
        if keys_left < self.params.min_keys_left {
            self.advise(Advisory::BackupRequired { keys_left });
            return Ok(0);
        }

        let coins = self.wallet.store.spendable().await?;
        let stats = RoundStats::from_coins(&coins);
        let (rounds, keep_amount) =
            (self.params.rounds, self.params.keep_amount);

        if stats.target_met(rounds, keep_amount) {
            debug!(
                event = "anonymization target met",
                rounds,
                value = stats.anonymized_value(rounds),
            );
            return Ok(0);
        }

        if stats.denominated_value() < keep_amount
            && self.denominate(&coins, &stats).await?
        {
            // Wait for the new denominations to confirm
            return Ok(0);
        }

        let available: Vec<Coin> = coins
            .iter()
            .filter(|c| !self.used_collateral.is_used(&c.outpoint))
            .cloned()
            .collect();

        if self.collateral.select_input(&available).is_none() {
            self.make_collateral_inputs(&available).await?;
            return Ok(0);
        }

        let mut started = 0;
        for denom in Denomination::LADDER {
            if stats.pending(denom, rounds) == 0
                || !self.registry.can_start(denom)
                || !self.retry.ready(denom, Instant::now())
            {
                continue;
            }

            let inputs = select_mixing_inputs(&available, denom, rounds);
            if inputs.is_empty() {
                continue;
            }

            match self.start_session(denom, inputs, &available, now).await {
                Ok(id) => {
                    started += 1;
                    self.last_advisory = None;
                    self.publish(MixingEvent::StateChanged {
                        id,
                        denom,
                        state: SessionState::Queued.name(),
                    });
                }
                Err(err) => self.on_start_failure(denom, err),
            }
        }

        Ok(started)
    }

    /// Creates denominated coins when enough raw funds are available.
    /// Returns whether a denomination transaction was submitted.
    async fn denominate(
        &mut self,
        coins: &[Coin],
        stats: &RoundStats,
    ) -> Result<bool, MixingError> {
        let keep_amount = self.params.keep_amount;

        let plan = match self.engine.plan_denominations(
            coins,
            keep_amount,
            keep_amount,
        ) {
            Ok(plan) if plan.is_empty() => return Ok(false),
            Ok(plan) => plan,
            Err(MixingError::InsufficientFunds) => {
                if stats.denominated_value() == 0 {
                    self.advise(Advisory::InsufficientFunds);
                }
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let tx = self
            .engine
            .create_denominations(
                &plan,
                &*self.wallet.keychain,
                &*self.wallet.broadcaster,
                &*self.wallet.store,
            )
            .await?;

        self.publish(MixingEvent::Denominated {
            txid: hex::encode(tx.hash()),
            value: plan.denominated_value(),
        });
        Ok(true)
    }

    async fn make_collateral_inputs(
        &mut self,
        coins: &[Coin],
    ) -> Result<(), MixingError> {
        let plan = match self.collateral.plan_collateral_inputs(
            coins,
            COLLATERAL_INPUTS,
            self.params.dust_floor,
        ) {
            Ok(plan) => plan,
            Err(MixingError::InsufficientFunds) => {
                self.advise(Advisory::NoMixingAvailable);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        self.collateral
            .make_collateral_inputs(
                &plan,
                &*self.wallet.keychain,
                &*self.wallet.broadcaster,
                &*self.wallet.store,
            )
            .await?;
        Ok(())
    }

    async fn start_session(
        &mut self,
        denom: Denomination,
        inputs: Vec<Coin>,
        coins: &[Coin],
        now: u64,
    ) -> Result<SessionId, MixingError> {
        let peers = self.wallet.peers.relays().await?;
        let relay = self.selector.select_relay(
            &peers,
            denom,
            self.retry.excluded(denom),
            now,
        )?;

        // Collateral marked by a session started earlier in this pass
        let free: Vec<Coin> = coins
            .iter()
            .filter(|c| !self.used_collateral.is_used(&c.outpoint))
            .cloned()
            .collect();
        let collateral = self
            .collateral
            .build_collateral(self.fee_rate, &free, &*self.wallet.keychain)
            .await?;

        let id = SessionId::random();
        self.used_collateral
            .mark_used(collateral.input, id, Instant::now())?;

        match self.prepare_entry(denom, inputs, &collateral).await {
            Ok(entry) => {
                self.spawn(id, relay.id, entry, collateral);
                self.selector.mark_used(relay.id);
                Ok(id)
            }
            Err(err) => {
                self.used_collateral.release(&collateral.input);
                Err(err)
            }
        }
    }

    async fn prepare_entry(
        &self,
        denom: Denomination,
        inputs: Vec<Coin>,
        collateral: &Collateral,
    ) -> Result<MixingEntry, MixingError> {
        let mut scripts = Vec::with_capacity(inputs.len());
        for _ in 0..inputs.len() {
            scripts.push(self.wallet.keychain.fresh_script().await?);
        }

        let entry = MixingEntry::new(denom, inputs, scripts)?;

        let mut reserved = entry.prevouts();
        reserved.push(collateral.input);
        self.wallet.store.reserve(&reserved).await?;

        Ok(entry)
    }

    fn spawn(
        &mut self,
        id: SessionId,
        relay: RelayId,
        entry: MixingEntry,
        collateral: Collateral,
    ) {
        let denom = entry.denom;
        let inputs = entry.prevouts();
        let collateral_input = collateral.input;
        let session = MixingSession::new(
            id,
            relay,
            entry,
            collateral,
            SessionParams::from(&self.params),
        );

        let inbound = AsyncQueue::bounded(SESSION_QUEUE_CAP, "session");
        let (cancel, cancel_rx) = oneshot::channel();

        let task = SessionTask::new(
            session,
            inbound.clone(),
            Arc::clone(&self.wallet.keychain),
            Arc::clone(&self.wallet.link),
            self.params.timeouts,
        );
        self.tasks.spawn(task.run(cancel_rx));

        info!(
            event = "session started",
            %id,
            %denom,
            %relay,
            inputs = inputs.len(),
        );

        let handle = SessionHandle {
            id,
            denom,
            relay,
            collateral: collateral_input,
            inputs,
            started: Instant::now(),
            inbound,
            cancel: Some(cancel),
        };

        if let Err(handle) = self.registry.insert(handle) {
            // can_start was checked by the caller
            error!(event = "session registry conflict", id = %handle.id);
        }
    }

    fn on_start_failure(&mut self, denom: Denomination, err: MixingError) {
        match &err {
            MixingError::NoCollateralAvailable => {
                self.advise(Advisory::NoMixingAvailable);
            }
            MixingError::InsufficientFunds => {
                self.advise(Advisory::InsufficientFunds);
            }
            _ => {}
        }

        let decision =
            self.retry.on_failure(denom, &err, None, Instant::now());
        if decision == RetryDecision::GiveUp {
            self.advise(Advisory::InsufficientCompatibleInputs { denom });
        }

        warn!(event = "session not started", %denom, %err);
    }

    pub fn route(&self, msg: RelayMessage) -> bool {
        self.registry.route(msg)
    }

    pub fn cancel_all(&mut self, reason: AbortReason) -> usize {
        self.registry.cancel_all(reason)
    }

    /// Waits for the next session to finish. Returns `None` when no session
    /// is running.
    pub async fn next_outcome(&mut self) -> Option<SessionOutcome> {
        loop {
            match self.tasks.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(err) => error!(event = "session task failed", %err),
            }
        }
    }

    /// Settles a finished session: persists and submits a completed mix,
    /// updates the retry state, then releases the session's reservations
    /// and collateral marker.
    ///
    /// Inputs of a completed mix stay reserved if persisting it fails.
    pub async fn on_outcome(
        &mut self,
        outcome: SessionOutcome,
        now: u64,
    ) -> Result<(), MixingError> {
        let handle = self.registry.remove(&outcome.id);
        self.used_collateral.release(&outcome.collateral);

        let mut reserved = outcome.inputs.clone();
        reserved.push(outcome.collateral);

        if outcome.is_completed() {
            self.complete(&outcome, now).await?;
        } else {
            self.fail(outcome);
        }
        let released = self.wallet.store.release(&reserved).await;

        if let Some(handle) = handle {
            debug!(
                event = "session settled",
                id = %handle.id,
                elapsed = ?handle.started.elapsed(),
            );
        }

        released.map_err(MixingError::from)
    }

    async fn complete(
        &mut self,
        outcome: &SessionOutcome,
        now: u64,
    ) -> Result<(), MixingError> {
        let SessionOutcome {
            id,
            denom,
            relay,
            round,
            ..
        } = *outcome;

        self.wallet
            .store
            .persist(&outcome.inputs, outcome.new_coins.clone())
            .await?;

        if let Some(tx) = &outcome.final_tx {
            self.wallet.broadcaster.submit(tx.clone(), TxKind::Mixed).await?;
        }

        self.selector.record_success(relay, now);
        self.retry.on_success(denom);

        info!(
            event = "session completed",
            %id,
            %denom,
            %relay,
            round = round + 1,
            outputs = outcome.new_coins.len(),
        );
        self.publish(MixingEvent::Completed {
            id,
            denom,
            relay,
            round: round + 1,
            outputs: outcome.new_coins.len(),
        });
        Ok(())
    }

    fn fail(&mut self, outcome: SessionOutcome) {
        let err = outcome
            .error
            .unwrap_or(MixingError::Aborted(AbortReason::Shutdown));

        if outcome.state == SessionState::TimedOut
            || outcome.state == SessionState::Aborted
        {
            warn!(
                event = "collateral presumed forfeited",
                id = %outcome.id,
                collateral = %outcome.collateral,
            );
        }

        let decision = self.retry.on_failure(
            outcome.denom,
            &err,
            Some(outcome.relay),
            Instant::now(),
        );

        self.publish(MixingEvent::Failed {
            id: outcome.id,
            denom: outcome.denom,
            relay: Some(outcome.relay),
            reason: err.to_string(),
            retryable: matches!(decision, RetryDecision::Retry { .. }),
        });

        if decision == RetryDecision::GiveUp {
            self.advise(Advisory::InsufficientCompatibleInputs {
                denom: outcome.denom,
            });
        }
    }

    fn advise(&mut self, advisory: Advisory) {
        if self.last_advisory.as_ref() == Some(&advisory) {
            return;
        }
        warn!(event = "advisory", %advisory);
        self.last_advisory = Some(advisory.clone());
        self.publish(advisory);
    }

    fn publish(&self, event: impl Into<Event>) {
        // No subscribers is fine
        let _ = self.events.send(event.into());
    }

    /// Schedules sessions every `tick_interval`, routes relay messages and
    /// settles outcomes until `shutdown` fires or `inbound` is closed.
    ///
    /// Running sessions are cancelled and settled before returning.
    pub async fn run(
        mut self,
        inbound: AsyncQueue<RelayMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        async {
            let mut ticker = time::interval(self.params.tick_interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    Some(outcome) = self.next_outcome(),
                        if !self.tasks.is_empty() =>
                    {
                        let now = get_current_timestamp();
                        if let Err(err) = self.on_outcome(outcome, now).await {
                            error!(event = "failed to settle session", %err);
                        }
                    }
                    msg = inbound.recv() => match msg {
                        Ok(msg) => {
                            self.route(msg);
                        }
                        Err(_) => break,
                    },
                    _ = ticker.tick() => {
                        if let Err(err) = self.tick(get_current_timestamp()).await {
                            error!(event = "scheduling pass failed", %err);
                        }
                    }
                }
            }

            let cancelled = self.cancel_all(AbortReason::Shutdown);
            info!(event = "scheduler stopping", cancelled);

            while let Some(outcome) = self.next_outcome().await {
                if let Err(err) =
                    self.on_outcome(outcome, get_current_timestamp()).await
                {
                    error!(event = "failed to settle session", %err);
                }
            }
        }
        .instrument(info_span!("privatesend"))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64, denom: Denomination) -> SessionHandle {
        SessionHandle {
            id: SessionId(id),
            denom,
            relay: RelayId([1; 32]),
            collateral: OutPoint::new([id as u8; 32], 9),
            inputs: vec![OutPoint::new([id as u8; 32], 0)],
            started: Instant::now(),
            inbound: AsyncQueue::bounded(4, "test"),
            cancel: None,
        }
    }

    #[test]
    fn test_one_session_per_denomination() {
        let mut registry = SessionRegistry::new(true);

        assert!(registry.insert(handle(1, Denomination::One)).is_ok());
        assert!(registry.insert(handle(2, Denomination::One)).is_err());
        assert!(registry.insert(handle(3, Denomination::Ten)).is_ok());
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.active(Denomination::One).map(|h| h.id),
            Some(SessionId(1))
        );

        registry.remove(&SessionId(1));
        assert!(registry.can_start(Denomination::One));
        assert!(registry.active(Denomination::One).is_none());
        assert!(registry.get(&SessionId(3)).is_some());
    }

    #[test]
    fn test_single_session_overall() {
        let mut registry = SessionRegistry::new(false);

        assert!(registry.insert(handle(1, Denomination::One)).is_ok());
        assert!(!registry.can_start(Denomination::Ten));
        assert!(registry.insert(handle(2, Denomination::Ten)).is_err());
    }

    #[tokio::test]
    async fn test_route_and_cancel() {
        let mut registry = SessionRegistry::new(true);
        let mut h = handle(7, Denomination::Tenth);
        let inbound = h.inbound.clone();
        let (cancel, mut cancel_rx) = oneshot::channel();
        h.cancel = Some(cancel);
        assert!(registry.insert(h).is_ok());

        let msg = RelayMessage::SessionAbort(
            privacy_data::message::payload::SessionAbort {
                session_id: SessionId(7),
                reason: privacy_data::message::AbortCode::Timeout,
            },
        );
        assert!(registry.route(msg.clone()));
        assert_eq!(inbound.try_recv().ok(), Some(msg));

        let foreign = RelayMessage::SessionAbort(
            privacy_data::message::payload::SessionAbort {
                session_id: SessionId(8),
                reason: privacy_data::message::AbortCode::Timeout,
            },
        );
        assert!(!registry.route(foreign));

        assert!(registry.cancel(&SessionId(7), AbortReason::User));
        assert_eq!(cancel_rx.try_recv().ok(), Some(AbortReason::User));
        // A session is cancelled once
        assert!(!registry.cancel(&SessionId(7), AbortReason::User));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let mut registry = SessionRegistry::new(true);
        let mut receivers = vec![];
        for (id, denom) in [(1, Denomination::One), (2, Denomination::Ten)] {
            let mut h = handle(id, denom);
            let (cancel, cancel_rx) = oneshot::channel();
            h.cancel = Some(cancel);
            receivers.push(cancel_rx);
            assert!(registry.insert(h).is_ok());
        }

        // Already finished, its receiver is gone
        let mut h = handle(3, Denomination::Tenth);
        let (cancel, cancel_rx) = oneshot::channel();
        h.cancel = Some(cancel);
        drop(cancel_rx);
        assert!(registry.insert(h).is_ok());

        assert_eq!(registry.cancel_all(AbortReason::Shutdown), 2);
        for mut cancel_rx in receivers {
            assert_eq!(cancel_rx.try_recv().ok(), Some(AbortReason::Shutdown));
        }
        assert_eq!(registry.cancel_all(AbortReason::Shutdown), 0);
    }
}
