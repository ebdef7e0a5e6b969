// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use privacy_data::message::{AsyncQueue, RelayMessage};
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::{debug, error, info_span, Instrument};

use super::{Action, MixingSession, SessionOutcome, SessionState};
use crate::config::TimeoutParams;
use crate::errors::{AbortReason, MixingError, Stage};
use crate::operations::{Keychain, RelayLink};

enum Event {
    Cancelled(Option<AbortReason>),
    Inbound(Result<RelayMessage, async_channel::RecvError>),
    Deadline,
}

/// Drives a [`MixingSession`] over the network until it terminates.
///
/// Every stage runs under its own deadline, restarted only when the
/// session enters that stage.
pub struct SessionTask<K: ?Sized, L: ?Sized> {
    session: MixingSession,
    inbound: AsyncQueue<RelayMessage>,
    keychain: Arc<K>,
    link: Arc<L>,
    timeouts: TimeoutParams,
    cancel: Option<oneshot::Receiver<AbortReason>>,
}

impl<K, L> SessionTask<K, L>
where
    K: Keychain + ?Sized,
    L: RelayLink + ?Sized,
{
    pub fn new(
        session: MixingSession,
        inbound: AsyncQueue<RelayMessage>,
        keychain: Arc<K>,
        link: Arc<L>,
        timeouts: TimeoutParams,
    ) -> Self {
        Self {
            session,
            inbound,
            keychain,
            link,
            timeouts,
            cancel: None,
        }
    }

    /// Runs the session to completion.
    ///
    /// A reason sent over `cancel` aborts the session. Dropping the sender
    /// has no effect.
    pub async fn run(
        mut self,
        cancel: oneshot::Receiver<AbortReason>,
    ) -> SessionOutcome {
        self.cancel = Some(cancel);

        let span = info_span!(
            "session",
            id = %self.session.id(),
            denom = %self.session.denom(),
            relay = %self.session.relay(),
        );

        self.event_loop().instrument(span).await
    }

    fn timeout(&self, stage: Stage) -> Duration {
        match stage {
            Stage::QueueAck => self.timeouts.queue_ack,
            Stage::EntryCollection => self.timeouts.entry_collection,
            Stage::Finalize => self.timeouts.finalize,
            Stage::Sign => self.timeouts.sign,
        }
    }

    fn deadline(&self, state: SessionState) -> Instant {
        let timeout = state
            .stage()
            .map(|stage| self.timeout(stage))
            .unwrap_or_default();
        Instant::now() + timeout
    }

    async fn event_loop(mut self) -> SessionOutcome {
        let actions = self.session.start();
        self.perform(actions).await;

        let mut state = self.session.state();
        let mut deadline = self.deadline(state);

        while !self.session.state().is_terminal() {
            let event = tokio::select! {
                reason = cancelled(&mut self.cancel) => Event::Cancelled(reason),
                res = time::timeout_at(deadline, self.inbound.recv()) => {
                    match res {
                        Ok(msg) => Event::Inbound(msg),
                        Err(_) => Event::Deadline,
                    }
                }
            };

            let actions = match event {
                Event::Cancelled(Some(reason)) => {
                    self.session.cancel(reason);
                    vec![]
                }
                Event::Cancelled(None) => vec![],
                Event::Inbound(Ok(msg)) => self.session.on_message(msg),
                Event::Inbound(Err(_)) => {
                    // Inbound queue closed, nothing will ever arrive
                    self.session.cancel(AbortReason::Shutdown);
                    vec![]
                }
                Event::Deadline => {
                    debug!(event = "stage deadline", state = %state);
                    self.session.on_timeout()
                }
            };

            self.perform(actions).await;

            if self.session.state() != state {
                state = self.session.state();
                deadline = self.deadline(state);
            }
        }

        self.session.into_outcome()
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            if self.session.state().is_terminal() {
                break;
            }

            match action {
                Action::Send(msg) => {
                    let topic = msg.topic();
                    let relay = *self.session.relay();
                    let res = self.link.send(&relay, msg).await;
                    if let Err(err) = res {
                        error!(event = "relay send failed", ?topic, %err);
                        self.session.fail(MixingError::Collaborator(err));
                    }
                }
                Action::Sign { tx, inputs } => {
                    let mut signatures = Vec::with_capacity(inputs.len());
                    for (index, coin) in inputs {
                        let res =
                            self.keychain.sign_input(&tx, index, &coin).await;
                        match res {
                            Ok(script) => signatures.push((index, script)),
                            Err(err) => {
                                error!(event = "signing failed", index, %err);
                                self.session
                                    .fail(MixingError::Collaborator(err));
                                return;
                            }
                        }
                    }

                    // A cancellation that arrived while signing wins over
                    // delivering the signatures.
                    if let Some(reason) = self.take_cancel() {
                        self.session.cancel(reason);
                        return;
                    }

                    queue.extend(self.session.on_signed(signatures));
                }
            }
        }
    }

    fn take_cancel(&mut self) -> Option<AbortReason> {
        let reason = self.cancel.as_mut()?.try_recv().ok();
        if reason.is_some() {
            self.cancel = None;
        }
        reason
    }
}

/// Resolves once a cancellation is received or its sender is dropped, then
/// never again.
async fn cancelled(
    cancel: &mut Option<oneshot::Receiver<AbortReason>>,
) -> Option<AbortReason> {
    match cancel.as_mut() {
        Some(rx) => {
            let reason = rx.await.ok();
            *cancel = None;
            reason
        }
        None => future::pending().await,
    }
}
