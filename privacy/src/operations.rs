// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Interfaces of the wallet and network services this crate drives.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use privacy_data::denomination::Denomination;
use privacy_data::ledger::{Coin, Hash, OutPoint, Script, Transaction};
use privacy_data::message::payload::LockRequest;
use privacy_data::message::{RelayId, RelayMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Denominate,
    MakeCollateral,
    Mixed,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxKind::Denominate => "denominate",
            TxKind::MakeCollateral => "make_collateral",
            TxKind::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

/// A relay candidate as known by the peer directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPeer {
    pub id: RelayId,
    pub endpoint: String,
    pub protocol_version: u32,
    /// Unix seconds of the last announcement from this peer.
    pub last_seen: u64,
    pub queue_occupancy: u32,
    /// Denomination of the queue this peer currently advertises, if any.
    pub open_queue: Option<Denomination>,
}

/// Wallet view of unspent outputs.
#[async_trait]
pub trait UtxoStore: Send + Sync {
    /// Unspent, unreserved coins.
    async fn spendable(&self) -> anyhow::Result<Vec<Coin>>;

    async fn coin(&self, outpoint: &OutPoint) -> anyhow::Result<Option<Coin>>;

    /// Provisionally locks coins so ordinary spending cannot select them.
    async fn reserve(&self, outpoints: &[OutPoint]) -> anyhow::Result<()>;

    async fn release(&self, outpoints: &[OutPoint]) -> anyhow::Result<()>;

    /// Marks `spent` as consumed and stores the newly `created` coins.
    async fn persist(
        &self,
        spent: &[OutPoint],
        created: Vec<Coin>,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn submit(
        &self,
        tx: Transaction,
        kind: TxKind,
    ) -> anyhow::Result<Hash>;
}

#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn relays(&self) -> anyhow::Result<Vec<RelayPeer>>;
}

#[async_trait]
pub trait Keychain: Send + Sync {
    /// Returns a locking script bound to a fresh, unused key.
    async fn fresh_script(&self) -> anyhow::Result<Script>;

    async fn keys_left(&self) -> anyhow::Result<u32>;

    /// Produces the unlocking script of input `index` of `tx`.
    async fn sign_input(
        &self,
        tx: &Transaction,
        index: usize,
        coin: &Coin,
    ) -> anyhow::Result<Script>;
}

#[async_trait]
pub trait RelayLink: Send + Sync {
    async fn send(
        &self,
        relay: &RelayId,
        msg: RelayMessage,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait QuorumLink: Send + Sync {
    async fn dispatch(&self, request: LockRequest) -> anyhow::Result<()>;
}

/// Collaborators required by the mixing scheduler.
#[derive(Clone)]
pub struct Wallet {
    pub store: Arc<dyn UtxoStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub peers: Arc<dyn PeerDirectory>,
    pub keychain: Arc<dyn Keychain>,
    pub link: Arc<dyn RelayLink>,
}
