// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! A single mixing session, from queueing with a relay peer up to the
//! finalized transaction.
//!
//! [`MixingSession`] is a pure state machine: it consumes relay messages,
//! deadline expiries and signatures, and returns the [`Action`]s to perform.
//! [`SessionTask`] owns the I/O and drives it.

pub mod entry;
pub mod task;
pub mod verify;

use std::fmt;

use privacy_data::denomination::Denomination;
use privacy_data::ledger::{Coin, Hash, OutPoint, Script, Transaction};
use privacy_data::message::payload::{PoolStatus, QueueAnnounce, SignedInput};
use privacy_data::message::{
    PoolStage, RelayId, RelayMessage, SessionId, Topics,
};
use tracing::{debug, info, warn};

use crate::config::PrivateSendParams;
use crate::errors::{AbortReason, MixingError, Stage, Violation};
use crate::privatesend::collateral::Collateral;

pub use entry::MixingEntry;
pub use task::SessionTask;
use verify::{verify_final, verify_proposal, OwnSlots};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Queued,
    EntriesOpen,
    Finalizing,
    Signing,
    Completed,
    Aborted,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Aborted
                | SessionState::TimedOut
        )
    }

    /// Neither idle nor terminal.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle) && !self.is_terminal()
    }

    /// The deadline stage running in this state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SessionState::Queued => Some(Stage::QueueAck),
            SessionState::EntriesOpen => Some(Stage::EntryCollection),
            SessionState::Finalizing => Some(Stage::Finalize),
            SessionState::Signing => Some(Stage::Sign),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Queued => "queued",
            SessionState::EntriesOpen => "entries_open",
            SessionState::Finalizing => "finalizing",
            SessionState::Signing => "signing",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub target_size: usize,
    pub min_size: usize,
    pub max_requeues: u32,
}

impl From<&PrivateSendParams> for SessionParams {
    fn from(params: &PrivateSendParams) -> Self {
        Self {
            target_size: params.pool.target_size,
            min_size: params.pool.min_size,
            max_requeues: params.timeouts.max_requeues,
        }
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(RelayMessage),
    /// Sign the listed own inputs of `tx`, by proposal index.
    Sign {
        tx: Transaction,
        inputs: Vec<(usize, Coin)>,
    },
}

#[derive(Debug, Clone)]
struct Proposal {
    txid: Hash,
    slots: OwnSlots,
}

/// Result of a finished session, handed back to the scheduler.
#[derive(Debug)]
pub struct SessionOutcome {
    pub id: SessionId,
    pub denom: Denomination,
    pub relay: RelayId,
    pub round: u32,
    pub state: SessionState,
    pub inputs: Vec<OutPoint>,
    pub collateral: OutPoint,
    /// Own outputs of the finalized transaction, at round + 1.
    pub new_coins: Vec<Coin>,
    pub final_tx: Option<Transaction>,
    pub error: Option<MixingError>,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Collateral of a timed out or aborted attempt is presumed forfeited.
    pub fn collateral_forfeited(&self) -> bool {
        matches!(self.state, SessionState::Aborted | SessionState::TimedOut)
    }
}

#[derive(Debug)]
pub struct MixingSession {
    id: SessionId,
    relay: RelayId,
    round: u32,
    entry: MixingEntry,
    collateral: Collateral,
    params: SessionParams,

    state: SessionState,
    entry_count: usize,
    requeues_left: u32,
    proposal: Option<Proposal>,
    signatures: Vec<(usize, Script)>,
    final_tx: Option<Transaction>,
    new_coins: Vec<Coin>,
    error: Option<MixingError>,
}

impl MixingSession {
    pub fn new(
        id: SessionId,
        relay: RelayId,
        entry: MixingEntry,
        collateral: Collateral,
        params: SessionParams,
    ) -> Self {
        Self {
            id,
            relay,
            round: entry.round(),
            entry,
            collateral,
            params,
            state: SessionState::Idle,
            entry_count: 0,
            requeues_left: params.max_requeues,
            proposal: None,
            signatures: vec![],
            final_tx: None,
            new_coins: vec![],
            error: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn denom(&self) -> Denomination {
        self.entry.denom
    }

    pub fn relay(&self) -> &RelayId {
        &self.relay
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn error(&self) -> Option<&MixingError> {
        self.error.as_ref()
    }

    fn announce(&self) -> Action {
        Action::Send(RelayMessage::QueueAnnounce(QueueAnnounce {
            denom: self.entry.denom,
            session_id: self.id,
            collateral: self.collateral.tx.clone(),
        }))
    }

    fn transition(&mut self, to: SessionState) {
        debug!(
            event = "session transition",
            id = %self.id,
            from = %self.state,
            to = %to,
            entries = self.entry_count,
        );
        self.state = to;
    }

    /// Moves the session to its terminal failure state.
    fn fail(&mut self, err: MixingError) {
        if self.state.is_terminal() {
            return;
        }

        let to = match err {
            MixingError::TimedOut(_) => SessionState::TimedOut,
            _ => SessionState::Aborted,
        };

        warn!(
            event = "session failed",
            id = %self.id,
            relay = %self.relay,
            state = %self.state,
            err = %err,
        );

        self.transition(to);
        self.error = Some(err);
    }

    /// Announces the session to the relay peer.
    pub fn start(&mut self) -> Vec<Action> {
        if self.state != SessionState::Idle {
            return vec![];
        }

        self.transition(SessionState::Queued);
        vec![self.announce()]
    }

    pub fn on_message(&mut self, msg: RelayMessage) -> Vec<Action> {
        if self.state.is_terminal() || msg.session_id() != self.id {
            return vec![];
        }

        match self.handle(msg) {
            Ok(actions) => actions,
            Err(err) => {
                self.fail(err);
                vec![]
            }
        }
    }

    fn handle(
        &mut self,
        msg: RelayMessage,
    ) -> Result<Vec<Action>, MixingError> {
        match msg {
            RelayMessage::SessionAbort(p) => {
                Err(MixingError::Aborted(AbortReason::Relay(p.reason)))
            }
            RelayMessage::PoolStatus(p) => self.on_pool_status(p),
            RelayMessage::FinalTransactionProposal(p)
                if matches!(
                    self.state,
                    SessionState::EntriesOpen | SessionState::Finalizing
                ) =>
            {
                self.on_proposal(p.candidate_tx)
            }
            RelayMessage::SessionComplete(p)
                if self.state == SessionState::Signing
                    && !self.signatures.is_empty() =>
            {
                self.on_complete(p.final_tx)
            }
            // Queue advertisements of other participants
            RelayMessage::QueueAnnounce(_) => Ok(vec![]),
            msg => Err(Violation::UnexpectedMessage {
                topic: msg.topic(),
                state: self.state.name(),
            }
            .into()),
        }
    }

    fn on_pool_status(
        &mut self,
        status: PoolStatus,
    ) -> Result<Vec<Action>, MixingError> {
        let count = status.entry_count as usize;
        if count > self.params.target_size {
            return Err(Violation::PoolOverflow {
                count,
                max: self.params.target_size,
            }
            .into());
        }

        match (self.state, status.stage) {
            (SessionState::Queued, PoolStage::Queue) => Ok(vec![]),
            (SessionState::Queued, PoolStage::AcceptingEntries) => {
                self.entry_count = count;
                self.transition(SessionState::EntriesOpen);

                let entry =
                    self.entry.to_submit(self.id, self.collateral.tx.clone());
                Ok(vec![Action::Send(RelayMessage::EntrySubmit(entry))])
            }
            (SessionState::Queued, PoolStage::Finalizing) => {
                Err(Violation::UnexpectedMessage {
                    topic: Topics::PoolStatus,
                    state: self.state.name(),
                }
                .into())
            }
            (SessionState::EntriesOpen, stage) => {
                self.entry_count = count;

                let full = count >= self.params.target_size;
                let partial = stage == PoolStage::Finalizing
                    && count >= self.params.min_size;
                if full || partial {
                    self.transition(SessionState::Finalizing);
                }
                Ok(vec![])
            }
            _ => Ok(vec![]),
        }
    }

    fn on_proposal(
        &mut self,
        tx: Transaction,
    ) -> Result<Vec<Action>, MixingError> {
        // A proposal may only follow a pool of at least min_size entries
        if self.entry_count < self.params.min_size {
            return Err(Violation::UnderfilledPool {
                count: self.entry_count,
                min: self.params.min_size,
            }
            .into());
        }

        let slots = verify_proposal(
            &tx,
            self.entry.denom,
            &self.entry.prevouts(),
            &self.entry.outputs,
            self.params.min_size,
        )?;

        if self.state == SessionState::EntriesOpen {
            self.transition(SessionState::Finalizing);
        }

        let inputs = slots
            .inputs
            .iter()
            .copied()
            .zip(self.entry.inputs.iter().cloned())
            .collect();

        let txid = tx.hash();
        debug!(
            event = "proposal verified",
            id = %self.id,
            txid = hex::encode(txid),
            size = tx.inputs.len(),
        );

        self.proposal = Some(Proposal { txid, slots });
        self.transition(SessionState::Signing);

        Ok(vec![Action::Sign {
            tx: tx.unsigned_copy(),
            inputs,
        }])
    }

    /// Hands the signatures of the own inputs to the session.
    ///
    /// Returns the messages delivering them, or nothing at all if the
    /// session is no longer signing.
    pub fn on_signed(
        &mut self,
        signatures: Vec<(usize, Script)>,
    ) -> Vec<Action> {
        if self.state != SessionState::Signing || !self.signatures.is_empty()
        {
            return vec![];
        }

        self.signatures = signatures;
        self.signatures
            .iter()
            .map(|(index, script)| {
                Action::Send(RelayMessage::SignedInput(SignedInput {
                    session_id: self.id,
                    input_index: *index as u32,
                    signature: script.clone(),
                }))
            })
            .collect()
    }

    fn on_complete(
        &mut self,
        final_tx: Transaction,
    ) -> Result<Vec<Action>, MixingError> {
        let proposal = self
            .proposal
            .as_ref()
            .ok_or(Violation::FinalTransactionMismatch)?;

        verify_final(&final_tx, &proposal.txid, &self.signatures)?;

        let txid = proposal.txid;
        let new_coins = proposal
            .slots
            .outputs
            .iter()
            .map(|&index| Coin {
                outpoint: OutPoint::new(txid, index as u32),
                output: final_tx.outputs[index].clone(),
                confirmations: 0,
                rounds: Some(self.round + 1),
            })
            .collect();

        self.new_coins = new_coins;
        self.final_tx = Some(final_tx);
        self.transition(SessionState::Completed);

        info!(
            event = "session completed",
            id = %self.id,
            relay = %self.relay,
            denom = %self.entry.denom,
            txid = hex::encode(txid),
            round = self.round + 1,
        );

        Ok(vec![])
    }

    /// Handles expiry of the deadline of the current stage.
    pub fn on_timeout(&mut self) -> Vec<Action> {
        match self.state {
            SessionState::EntriesOpen
                if self.entry_count >= self.params.min_size =>
            {
                self.transition(SessionState::Finalizing);
                vec![]
            }
            SessionState::EntriesOpen if self.requeues_left > 0 => {
                self.requeues_left -= 1;
                self.entry_count = 0;
                self.transition(SessionState::Queued);
                vec![self.announce()]
            }
            state => {
                if let Some(stage) = state.stage() {
                    self.fail(MixingError::TimedOut(stage));
                }
                vec![]
            }
        }
    }

    pub fn cancel(&mut self, reason: AbortReason) {
        self.fail(MixingError::Aborted(reason));
    }

    pub fn into_outcome(self) -> SessionOutcome {
        SessionOutcome {
            id: self.id,
            denom: self.entry.denom,
            relay: self.relay,
            round: self.round,
            state: self.state,
            inputs: self.entry.prevouts(),
            collateral: self.collateral.input,
            new_coins: self.new_coins,
            final_tx: self.final_tx,
            error: self.error,
        }
    }
}
