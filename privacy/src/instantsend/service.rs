// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::future;
use std::sync::Arc;

use privacy_data::events::LockEvent;
use privacy_data::ledger::{Hash, Transaction};
use privacy_data::message::payload::{LockSignature, LockState, LockStatus};
use privacy_data::message::AsyncQueue;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, info_span, Instrument};

use super::{InstantLock, LockCoordinator};
use crate::config::EVENTS_CAP;
use crate::errors::LockError;
use crate::operations::{QuorumLink, UtxoStore};

/// Async front of the [`LockCoordinator`].
///
/// Dispatches lock requests to the quorum, feeds it the incoming
/// signatures, expires requests on time and publishes [`LockEvent`]s.
#[derive(Clone)]
pub struct LockService {
    coordinator: Arc<Mutex<LockCoordinator>>,
    quorum: Arc<dyn QuorumLink>,
    store: Arc<dyn UtxoStore>,
    events: broadcast::Sender<LockEvent>,
    wakeup: Arc<Notify>,
}

impl LockService {
    pub fn new(
        coordinator: LockCoordinator,
        quorum: Arc<dyn QuorumLink>,
        store: Arc<dyn UtxoStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAP);
        Self {
            coordinator: Arc::new(Mutex::new(coordinator)),
            quorum,
            store,
            events,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    /// Requests a lock over the inputs of `tx`.
    ///
    /// Every input must be known to the wallet store with enough
    /// confirmations. A request that cannot be dispatched is withdrawn.
    pub async fn request_lock(
        &self,
        tx: &Transaction,
    ) -> Result<LockState, LockError> {
        let params = *self.coordinator.lock().await.params();
        if !params.enabled {
            return Err(LockError::Disabled);
        }

        for input in tx.prevouts() {
            let confirmations = self
                .store
                .coin(input)
                .await?
                .map(|c| c.confirmations)
                .unwrap_or_default();

            if confirmations < params.min_confirmations {
                return Err(LockError::ImmatureInput {
                    input: *input,
                    confirmations,
                    required: params.min_confirmations,
                });
            }
        }

        let txid = tx.hash();
        let request = self
            .coordinator
            .lock()
            .await
            .request_lock(tx, Instant::now())?;

        if let Some(request) = request {
            if let Err(err) = self.quorum.dispatch(request).await {
                error!(event = "lock dispatch failed", %err);
                self.coordinator.lock().await.withdraw(&txid);
                return Err(LockError::Collaborator(err));
            }

            self.publish(LockEvent::Requested {
                txid,
                inputs: tx.inputs.len(),
            });
            self.wakeup.notify_one();
        }

        Ok(self.current_lock_state(&txid).await)
    }

    pub async fn on_signature_received(
        &self,
        sig: LockSignature,
    ) -> Result<LockState, LockError> {
        let txid = sig.txid;
        let (before, after, signers) = {
            let mut coordinator = self.coordinator.lock().await;
            let before = coordinator.current_lock_state(&txid);
            let after = coordinator.on_signature_received(&sig)?;
            let signers = coordinator
                .instant_lock(&txid)
                .map(|lock| lock.signatures.len());
            (before, after, signers)
        };

        if before != after {
            match after {
                LockState::AwaitingSignatures { count, required } => {
                    self.publish(LockEvent::Progress {
                        txid,
                        count,
                        required,
                    })
                }
                LockState::Locked => self.publish(LockEvent::Locked {
                    txid,
                    signers: signers
                        .and_then(|n| u16::try_from(n).ok())
                        .unwrap_or(u16::MAX),
                }),
                _ => {}
            }
        }

        Ok(after)
    }

    pub async fn current_lock_state(&self, txid: &Hash) -> LockState {
        self.coordinator.lock().await.current_lock_state(txid)
    }

    pub async fn lock_status(&self, txid: &Hash) -> LockStatus {
        self.coordinator.lock().await.lock_status(txid)
    }

    pub async fn instant_lock(&self, txid: &Hash) -> Option<InstantLock> {
        self.coordinator.lock().await.instant_lock(txid)
    }

    pub async fn on_block_tip(&self, height: u64) {
        self.coordinator.lock().await.on_block_tip(height);
    }

    /// Expires every request whose wait ran out.
    pub async fn expire(&self) {
        let events = self.coordinator.lock().await.expire(Instant::now());
        for event in events {
            self.publish(event);
        }
    }

    /// Processes quorum signatures until `inbound` is closed.
    pub async fn run(&self, inbound: AsyncQueue<LockSignature>) {
        async {
            loop {
                let deadline = self.coordinator.lock().await.next_deadline();

                tokio::select! {
                    biased;
                    msg = inbound.recv() => match msg {
                        Ok(sig) => {
                            if let Err(err) =
                                self.on_signature_received(sig).await
                            {
                                debug!(event = "signature dropped", %err);
                            }
                        }
                        Err(_) => {
                            info!(event = "signature queue closed");
                            break;
                        }
                    },
                    _ = sleep_until(deadline) => self.expire().await,
                    // A new request may expire before the current deadline
                    _ = self.wakeup.notified() => {}
                }
            }
        }
        .instrument(info_span!("instantsend"))
        .await
    }

    fn publish(&self, event: LockEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
