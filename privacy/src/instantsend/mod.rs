// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! InstantSend lock coordination.
//!
//! A lock request claims the inputs of a transaction and asks the quorum to
//! sign their digest. The request is `Locked` once distinct valid
//! signatures reach the quorum threshold, or `Expired` if the wait runs
//! out first. An expired request only means the transaction confirms the
//! ordinary way.

pub mod aggregator;
pub mod quorum;
pub mod service;

use std::collections::HashMap;

use privacy_data::events::LockEvent;
use privacy_data::ledger::{to_str, Hash, OutPoint, Transaction};
use privacy_data::message::payload::{
    LockRequest, LockSignature, LockState, LockStatus,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::InstantSendParams;
use crate::errors::{LockError, TxId};
pub use aggregator::{Aggregator, InstantLock};
pub use quorum::{input_digest, Quorum, Threshold};
pub use service::LockService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Awaiting,
    Locked,
    Expired,
}

#[derive(Debug)]
struct Request {
    inputs: Vec<OutPoint>,
    deadline: Instant,
    status: Status,
    aggregator: Aggregator,
    /// Chain tip at which the request was locked or expired
    settled_at: Option<u64>,
}

/// Tracks every outstanding lock request and the inputs it claims.
pub struct LockCoordinator {
    params: InstantSendParams,
    quorum: Quorum,
    requests: HashMap<Hash, Request>,
    claims: HashMap<OutPoint, Hash>,
    tip: u64,
}

impl LockCoordinator {
    pub fn new(params: InstantSendParams, quorum: Quorum) -> Self {
        Self {
            params,
            quorum,
            requests: HashMap::new(),
            claims: HashMap::new(),
            tip: 0,
        }
    }

    pub fn params(&self) -> &InstantSendParams {
        &self.params
    }

    /// Replaces the quorum.
    ///
    /// Pending requests keep only the signatures of members of the new
    /// quorum. A pending request whose remaining signatures already meet
    /// the new threshold is locked. Returns the locks reached this way.
    pub fn set_quorum(&mut self, quorum: Quorum) -> Vec<Hash> {
        self.quorum = quorum;
        let required = self.quorum.required();
        let mut locked = vec![];

        for (txid, req) in self.requests.iter_mut() {
            if req.status != Status::Awaiting {
                continue;
            }

            let dropped = req.aggregator.retain_members(&self.quorum);
            if dropped > 0 {
                debug!(
                    event = "signatures dropped",
                    txid = to_str(txid),
                    dropped,
                    left = req.aggregator.total(),
                );
            }

            if req.aggregator.total() >= required {
                req.status = Status::Locked;
                req.settled_at = Some(self.tip);
                info!(event = "quorum reached", txid = to_str(txid), required);
                locked.push(*txid);
            }
        }

        locked
    }

    /// Claims the inputs of `tx` and returns the request to dispatch to the
    /// quorum.
    ///
    /// Returns `None` if `tx` already has a pending or reached lock.
    pub fn request_lock(
        &mut self,
        tx: &Transaction,
        now: Instant,
    ) -> Result<Option<LockRequest>, LockError> {
        if !self.params.enabled {
            return Err(LockError::Disabled);
        }

        if tx.inputs.is_empty() {
            return Err(LockError::NoInputs);
        }

        if tx.inputs.len() > self.params.max_inputs {
            return Err(LockError::TooManyInputs {
                count: tx.inputs.len(),
                max: self.params.max_inputs,
            });
        }

        let value = tx.total_output().unwrap_or(u64::MAX);
        if value > self.params.max_value {
            return Err(LockError::ValueTooHigh {
                value,
                max: self.params.max_value,
            });
        }

        let txid = tx.hash();
        if let Some(req) = self.requests.get(&txid) {
            if req.status != Status::Expired {
                debug!(event = "lock already requested", txid = to_str(&txid));
                return Ok(None);
            }
        }

        for input in tx.prevouts() {
            match self.claims.get(input) {
                Some(holder) if *holder != txid => {
                    warn!(
                        event = "double lock attempt",
                        %input,
                        txid = to_str(&txid),
                        holder = to_str(holder),
                    );
                    return Err(LockError::DoubleLockAttempt {
                        input: *input,
                        holder: TxId(*holder),
                    });
                }
                _ => {}
            }
        }

        let inputs: Vec<_> = tx.prevouts().copied().collect();
        let digest = input_digest(&txid, &inputs);

        for input in &inputs {
            self.claims.insert(*input, txid);
        }

        self.requests.insert(
            txid,
            Request {
                inputs,
                deadline: now + self.params.expiry,
                status: Status::Awaiting,
                aggregator: Aggregator::new(txid, digest),
                settled_at: None,
            },
        );

        info!(
            event = "lock requested",
            txid = to_str(&txid),
            inputs = tx.inputs.len(),
            required = self.quorum.required(),
        );

        Ok(Some(LockRequest {
            txid,
            input_digest: digest,
        }))
    }

    /// Drops a pending request and its claims, e.g. when it could not be
    /// dispatched.
    pub fn withdraw(&mut self, txid: &Hash) -> bool {
        match self.requests.get(txid) {
            Some(req) if req.status == Status::Awaiting => {
                self.remove(txid);
                true
            }
            _ => false,
        }
    }

    /// Adds a quorum signature to its request.
    ///
    /// Invalid signatures are reported as [`LockError::BadSignature`] and
    /// leave the request untouched. Signatures arriving after the request
    /// settled are ignored.
    pub fn on_signature_received(
        &mut self,
        sig: &LockSignature,
    ) -> Result<LockState, LockError> {
        let required = self.quorum.required();
        let tip = self.tip;

        let req = self
            .requests
            .get_mut(&sig.txid)
            .ok_or(LockError::UnknownRequest(TxId(sig.txid)))?;

        if req.status != Status::Awaiting {
            debug!(
                event = "late signature",
                txid = to_str(&sig.txid),
                from = %sig.signer,
            );
            return Ok(Self::state_of(req, required));
        }

        match req.aggregator.collect_signature(&self.quorum, sig) {
            Ok(Some((_, true))) => {
                req.status = Status::Locked;
                req.settled_at = Some(tip);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    event = "bad signature",
                    txid = to_str(&sig.txid),
                    %err,
                );
                return Err(err.into());
            }
        }

        Ok(Self::state_of(req, required))
    }

    pub fn current_lock_state(&self, txid: &Hash) -> LockState {
        self.requests
            .get(txid)
            .map(|req| Self::state_of(req, self.quorum.required()))
            .unwrap_or(LockState::NotRequested)
    }

    pub fn lock_status(&self, txid: &Hash) -> LockStatus {
        LockStatus {
            txid: *txid,
            state: self.current_lock_state(txid),
        }
    }

    /// The lock of `txid`, if reached.
    pub fn instant_lock(&self, txid: &Hash) -> Option<InstantLock> {
        self.requests
            .get(txid)
            .filter(|req| req.status == Status::Locked)
            .map(|req| req.aggregator.to_lock())
    }

    /// Holder of the claim on `input`, if any.
    pub fn claim(&self, input: &OutPoint) -> Option<&Hash> {
        self.claims.get(input)
    }

    /// Earliest expiry among pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.requests
            .values()
            .filter(|req| req.status == Status::Awaiting)
            .map(|req| req.deadline)
            .min()
    }

    /// Expires every pending request whose wait ran out by `now`, releasing
    /// its input claims.
    pub fn expire(&mut self, now: Instant) -> Vec<LockEvent> {
        let required = self.quorum.required();
        let mut events = vec![];

        for (txid, req) in self.requests.iter_mut() {
            if req.status != Status::Awaiting || req.deadline > now {
                continue;
            }

            req.status = Status::Expired;
            req.settled_at = Some(self.tip);
            for input in &req.inputs {
                self.claims.remove(input);
            }

            let count = req.aggregator.total();
            info!(
                event = "lock expired",
                txid = to_str(txid),
                count,
                required,
            );
            events.push(LockEvent::Expired {
                txid: *txid,
                count,
                required,
            });
        }

        events
    }

    /// Advances the chain tip, pruning settled requests older than
    /// `keep_lock_blocks`. Pruning a lock releases its claims.
    pub fn on_block_tip(&mut self, height: u64) -> usize {
        self.tip = height;
        let keep = self.params.keep_lock_blocks;

        let stale: Vec<_> = self
            .requests
            .iter()
            .filter(|(_, req)| {
                req.settled_at
                    .is_some_and(|at| height >= at.saturating_add(keep))
            })
            .map(|(txid, _)| *txid)
            .collect();

        for txid in &stale {
            self.remove(txid);
        }

        if !stale.is_empty() {
            debug!(event = "pruned lock requests", count = stale.len(), height);
        }
        stale.len()
    }

    fn remove(&mut self, txid: &Hash) {
        if let Some(req) = self.requests.remove(txid) {
            for input in &req.inputs {
                if self.claims.get(input) == Some(txid) {
                    self.claims.remove(input);
                }
            }
        }
    }

    fn state_of(req: &Request, required: u16) -> LockState {
        match req.status {
            Status::Awaiting => LockState::AwaitingSignatures {
                count: req.aggregator.total(),
                required,
            },
            Status::Locked => LockState::Locked,
            Status::Expired => LockState::Expired,
        }
    }
}
