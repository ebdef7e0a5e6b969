// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use fake::{Fake, Faker};
use privacy_data::denomination::Denomination;
use privacy_data::ledger::{OutPoint, Transaction, TxIn, TxOut};
use privacy_data::message::payload::{
    EntrySubmit, FinalTransactionProposal, PoolStatus, SessionAbort, SessionComplete,
};
use privacy_data::message::{
    AbortCode, AsyncQueue, PoolStage, RelayId, RelayMessage, SessionId,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use quantis_privacy::operations::RelayLink;

/// Behaviour of a [`ScriptedRelay`].
#[derive(Debug, Clone)]
pub struct RelayScript {
    /// Entries needed before the pool finalizes.
    pub target: usize,
    /// Entries of simulated remote participants added to every pool.
    pub phantoms: usize,
    /// Never answer anything.
    pub silent: bool,
    /// Replace the first output of this participant in the proposal.
    pub tamper: Option<SessionId>,
    pub seed: u64,
}

impl Default for RelayScript {
    fn default() -> Self {
        Self {
            target: 3,
            phantoms: 0,
            silent: false,
            tamper: None,
            seed: 7,
        }
    }
}

#[derive(Default)]
struct Pool {
    members: Vec<SessionId>,
    entries: Vec<(SessionId, EntrySubmit)>,
    proposal: Option<Transaction>,
    /// Proposal input index of every session, to accept its signatures
    owners: HashMap<usize, SessionId>,
    completed: bool,
}

#[derive(Default)]
struct State {
    pools: HashMap<Denomination, Pool>,
    session_denom: HashMap<SessionId, Denomination>,
    routes: HashMap<SessionId, AsyncQueue<RelayMessage>>,
    received: Vec<(RelayId, RelayMessage)>,
}

/// A relay peer that combines the entries of one pool per denomination into
/// a shuffled transaction and completes it once every input is signed.
/// Sessions announcing an unsigned collateral are refused.
pub struct ScriptedRelay {
    script: RelayScript,
    state: Mutex<State>,
    rng: Mutex<StdRng>,
    /// Destination of messages for sessions without an explicit route
    network: Option<AsyncQueue<RelayMessage>>,
}

impl ScriptedRelay {
    pub fn new(script: RelayScript) -> Self {
        let rng = StdRng::seed_from_u64(script.seed);
        Self {
            script,
            state: Mutex::new(State::default()),
            rng: Mutex::new(rng),
            network: None,
        }
    }

    /// A relay delivering every message through `network`.
    pub fn with_network(script: RelayScript, network: AsyncQueue<RelayMessage>) -> Self {
        Self {
            network: Some(network),
            ..Self::new(script)
        }
    }

    pub fn route(&self, session: SessionId, inbound: AsyncQueue<RelayMessage>) {
        self.state.lock().unwrap().routes.insert(session, inbound);
    }

    pub fn received(&self) -> Vec<(RelayId, RelayMessage)> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn proposal(&self, denom: Denomination) -> Option<Transaction> {
        self.state
            .lock()
            .unwrap()
            .pools
            .get(&denom)
            .and_then(|p| p.proposal.clone())
    }

    fn deliver(&self, state: &State, to: SessionId, msg: RelayMessage) {
        match (state.routes.get(&to), &self.network) {
            (Some(queue), _) | (None, Some(queue)) => queue.try_send(msg),
            (None, None) => panic!("no route to session {to}"),
        }
    }

    fn status(&self, state: &State, denom: Denomination, stage: PoolStage) {
        let pool = &state.pools[&denom];
        let entry_count = (pool.entries.len() + self.script.phantoms) as u8;
        for member in &pool.members {
            let msg = RelayMessage::PoolStatus(PoolStatus {
                session_id: *member,
                entry_count,
                stage,
                deadline: 0,
            });
            self.deliver(state, *member, msg);
        }
    }

    fn phantom_entries(&self, denom: Denomination) -> (Vec<TxIn>, Vec<TxOut>) {
        let mut rng = self.rng.lock().unwrap();
        let mut inputs = vec![];
        let mut outputs = vec![];
        for n in 0..self.script.phantoms {
            let prevout: OutPoint = Faker.fake_with_rng(&mut *rng);
            inputs.push(TxIn {
                prevout,
                script_sig: vec![0xee, n as u8],
            });
            outputs.push(TxOut::new(denom.amount(), vec![0xfa, n as u8]));
        }
        (inputs, outputs)
    }

    fn finalize(&self, state: &mut State, denom: Denomination) {
        let (mut inputs, mut outputs) = self.phantom_entries(denom);
        let pool = state.pools.get_mut(&denom).expect("pool to exist");

        let mut owners = vec![];
        for (session, entry) in &pool.entries {
            let mut entry_outputs = entry.outputs.clone();
            if self.script.tamper == Some(*session) {
                entry_outputs[0].script_pubkey = vec![0xde, 0xad];
            }
            for input in &entry.inputs {
                owners.push((input.prevout, *session));
            }
            inputs.extend(entry.inputs.iter().cloned());
            outputs.extend(entry_outputs);
        }

        {
            let mut rng = self.rng.lock().unwrap();
            inputs.shuffle(&mut *rng);
            outputs.shuffle(&mut *rng);
        }

        let tx = Transaction::new(inputs, outputs);
        pool.owners = owners
            .into_iter()
            .filter_map(|(prevout, session)| {
                tx.input_index(&prevout).map(|index| (index, session))
            })
            .collect();
        // Entries arrive unsigned, simulated participants are signed
        pool.proposal = Some(tx.clone());

        self.status(state, denom, PoolStage::Finalizing);

        let members = state.pools[&denom].members.clone();
        for member in members {
            let msg = RelayMessage::FinalTransactionProposal(FinalTransactionProposal {
                session_id: member,
                candidate_tx: tx.clone(),
            });
            self.deliver(state, member, msg);
        }
    }

    fn handle(&self, state: &mut State, msg: RelayMessage) {
        match msg {
            RelayMessage::QueueAnnounce(p) if !p.collateral.is_fully_signed() => {
                let msg = RelayMessage::SessionAbort(SessionAbort {
                    session_id: p.session_id,
                    reason: AbortCode::InvalidCollateral,
                });
                self.deliver(state, p.session_id, msg);
            }
            RelayMessage::QueueAnnounce(p) => {
                state.session_denom.insert(p.session_id, p.denom);
                let pool = state.pools.entry(p.denom).or_default();
                if !pool.members.contains(&p.session_id) {
                    pool.members.push(p.session_id);
                }
                let entry_count = (pool.entries.len() + self.script.phantoms) as u8;
                let msg = RelayMessage::PoolStatus(PoolStatus {
                    session_id: p.session_id,
                    entry_count,
                    stage: PoolStage::AcceptingEntries,
                    deadline: 0,
                });
                self.deliver(state, p.session_id, msg);
            }
            RelayMessage::EntrySubmit(p) => {
                let Some(denom) = state.session_denom.get(&p.session_id).copied() else {
                    return;
                };
                let pool = state.pools.entry(denom).or_default();
                pool.entries.push((p.session_id, p));

                if pool.entries.len() + self.script.phantoms >= self.script.target {
                    self.finalize(state, denom);
                } else {
                    self.status(state, denom, PoolStage::AcceptingEntries);
                }
            }
            RelayMessage::SignedInput(p) => {
                let Some(denom) = state.session_denom.get(&p.session_id).copied() else {
                    return;
                };
                let pool = state.pools.get_mut(&denom).expect("pool to exist");
                let index = p.input_index as usize;
                if pool.owners.get(&index) != Some(&p.session_id) || pool.completed {
                    return;
                }
                let Some(tx) = pool.proposal.as_mut() else {
                    return;
                };
                tx.inputs[index].script_sig = p.signature;

                if tx.is_fully_signed() {
                    pool.completed = true;
                    let final_tx = tx.clone();
                    let members = pool.members.clone();
                    for member in members {
                        let msg = RelayMessage::SessionComplete(SessionComplete {
                            session_id: member,
                            final_tx: final_tx.clone(),
                        });
                        self.deliver(state, member, msg);
                    }
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl RelayLink for ScriptedRelay {
    async fn send(&self, relay: &RelayId, msg: RelayMessage) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.received.push((*relay, msg.clone()));

        if !self.script.silent {
            self.handle(&mut state, msg);
        }
        Ok(())
    }
}
