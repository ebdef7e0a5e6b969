// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

#![allow(dead_code)]

mod relay;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use privacy_data::denomination::Denomination;
use privacy_data::ledger::{Amount, Coin, Hash, OutPoint, Script, Transaction, TxOut};
use privacy_data::message::payload::{LockRequest, LockSignature};
use privacy_data::message::{RelayId, SignerId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha3::{Digest, Sha3_256};

use quantis_privacy::operations::{
    Broadcaster, Keychain, PeerDirectory, QuorumLink, RelayPeer, TxKind, UtxoStore, Wallet,
};

pub use relay::{RelayScript, ScriptedRelay};

pub const PROTOCOL_VERSION: u32 = 70213;

/// Unix time the tests run at.
pub const NOW: u64 = 1_700_000_000;

pub fn outpoint(n: u8, index: u32) -> OutPoint {
    OutPoint::new([n; 32], index)
}

pub fn coin(n: u8, value: Amount, rounds: Option<u32>) -> Coin {
    Coin {
        outpoint: outpoint(n, 0),
        output: TxOut::new(value, vec![0x51, n]),
        confirmations: 10,
        rounds,
    }
}

pub fn denominated(n: u8, denom: Denomination, rounds: u32) -> Coin {
    coin(n, denom.amount(), Some(rounds))
}

pub fn relay_peer(n: u8) -> RelayPeer {
    RelayPeer {
        id: RelayId([n; 32]),
        endpoint: format!("10.0.0.{n}:9999"),
        protocol_version: PROTOCOL_VERSION,
        last_seen: NOW,
        queue_occupancy: 0,
        open_queue: None,
    }
}

/// In-memory wallet store.
#[derive(Default)]
pub struct MemoryStore {
    coins: Mutex<HashMap<OutPoint, Coin>>,
    reserved: Mutex<HashSet<OutPoint>>,
    fail_persist: AtomicBool,
}

impl MemoryStore {
    pub fn with_coins(coins: impl IntoIterator<Item = Coin>) -> Self {
        let store = Self::default();
        store
            .coins
            .lock()
            .unwrap()
            .extend(coins.into_iter().map(|c| (c.outpoint, c)));
        store
    }

    pub fn all(&self) -> Vec<Coin> {
        let mut coins: Vec<_> = self.coins.lock().unwrap().values().cloned().collect();
        coins.sort_by_key(|c| c.outpoint);
        coins
    }

    pub fn reserved(&self) -> HashSet<OutPoint> {
        self.reserved.lock().unwrap().clone()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.coins.lock().unwrap().contains_key(outpoint)
    }

    /// Mines a block over every coin.
    pub fn confirm_all(&self) {
        for coin in self.coins.lock().unwrap().values_mut() {
            coin.confirmations += 1;
        }
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UtxoStore for MemoryStore {
    async fn spendable(&self) -> anyhow::Result<Vec<Coin>> {
        let reserved = self.reserved.lock().unwrap().clone();
        Ok(self
            .all()
            .into_iter()
            .filter(|c| !reserved.contains(&c.outpoint))
            .collect())
    }

    async fn coin(&self, outpoint: &OutPoint) -> anyhow::Result<Option<Coin>> {
        Ok(self.coins.lock().unwrap().get(outpoint).cloned())
    }

    async fn reserve(&self, outpoints: &[OutPoint]) -> anyhow::Result<()> {
        let mut reserved = self.reserved.lock().unwrap();
        for outpoint in outpoints {
            anyhow::ensure!(reserved.insert(*outpoint), "{outpoint} already reserved");
        }
        Ok(())
    }

    async fn release(&self, outpoints: &[OutPoint]) -> anyhow::Result<()> {
        let mut reserved = self.reserved.lock().unwrap();
        for outpoint in outpoints {
            reserved.remove(outpoint);
        }
        Ok(())
    }

    async fn persist(&self, spent: &[OutPoint], created: Vec<Coin>) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail_persist.load(Ordering::SeqCst), "disk full");
        let mut coins = self.coins.lock().unwrap();
        for outpoint in spent {
            coins.remove(outpoint);
        }
        coins.extend(created.into_iter().map(|c| (c.outpoint, c)));
        Ok(())
    }
}

/// Deterministic keychain: scripts carry the keychain tag and a counter,
/// signatures commit to the transaction id and the input index.
pub struct TestKeychain {
    tag: u8,
    counter: AtomicU64,
    keys_left: AtomicU32,
}

impl TestKeychain {
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            counter: AtomicU64::new(0),
            keys_left: AtomicU32::new(1000),
        }
    }

    pub fn set_keys_left(&self, keys_left: u32) {
        self.keys_left.store(keys_left, Ordering::SeqCst);
    }

    pub fn owns(&self, script: &Script) -> bool {
        script.first() == Some(&0x76) && script.get(1) == Some(&self.tag)
    }
}

#[async_trait]
impl Keychain for TestKeychain {
    async fn fresh_script(&self) -> anyhow::Result<Script> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut script = vec![0x76, self.tag];
        script.extend_from_slice(&n.to_le_bytes());
        Ok(script)
    }

    async fn keys_left(&self) -> anyhow::Result<u32> {
        Ok(self.keys_left.load(Ordering::SeqCst))
    }

    async fn sign_input(&self, tx: &Transaction, index: usize, _coin: &Coin) -> anyhow::Result<Script> {
        let mut hasher = Sha3_256::new();
        hasher.update([self.tag]);
        hasher.update(tx.hash());
        hasher.update((index as u32).to_le_bytes());
        Ok(hasher.finalize().to_vec())
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    submitted: Mutex<Vec<(Transaction, TxKind)>>,
}

impl RecordingBroadcaster {
    pub fn submitted(&self, kind: TxKind) -> Vec<Transaction> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(tx, _)| tx.clone())
            .collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn submit(&self, tx: Transaction, kind: TxKind) -> anyhow::Result<Hash> {
        let txid = tx.hash();
        self.submitted.lock().unwrap().push((tx, kind));
        Ok(txid)
    }
}

#[derive(Default)]
pub struct StaticPeers(pub Mutex<Vec<RelayPeer>>);

impl StaticPeers {
    pub fn new(peers: Vec<RelayPeer>) -> Self {
        Self(Mutex::new(peers))
    }
}

#[async_trait]
impl PeerDirectory for StaticPeers {
    async fn relays(&self) -> anyhow::Result<Vec<RelayPeer>> {
        Ok(self.0.lock().unwrap().clone())
    }
}

/// All collaborators of a test wallet, kept typed for assertions.
pub struct TestWallet {
    pub store: Arc<MemoryStore>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub peers: Arc<StaticPeers>,
    pub keychain: Arc<TestKeychain>,
    pub relay: Arc<ScriptedRelay>,
}

impl TestWallet {
    pub fn new(coins: Vec<Coin>, peers: Vec<RelayPeer>, relay: Arc<ScriptedRelay>) -> Self {
        Self {
            store: Arc::new(MemoryStore::with_coins(coins)),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
            peers: Arc::new(StaticPeers::new(peers)),
            keychain: Arc::new(TestKeychain::new(0xaa)),
            relay,
        }
    }

    pub fn wallet(&self) -> Wallet {
        Wallet {
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            peers: self.peers.clone(),
            keychain: self.keychain.clone(),
            link: self.relay.clone(),
        }
    }
}

/// Quorum members with their signing keys.
pub struct QuorumKeys {
    pub keys: Vec<SigningKey>,
}

impl QuorumKeys {
    pub fn generate(size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let keys = (0..size).map(|_| SigningKey::generate(&mut rng)).collect();
        Self { keys }
    }

    pub fn verifying_keys(&self) -> impl Iterator<Item = ed25519_dalek::VerifyingKey> + '_ {
        self.keys.iter().map(SigningKey::verifying_key)
    }

    pub fn sign(&self, member: usize, request: &LockRequest) -> LockSignature {
        let key = &self.keys[member];
        LockSignature {
            txid: request.txid,
            signer: SignerId(key.verifying_key().to_bytes()),
            signature: key.sign(&request.input_digest).to_bytes(),
        }
    }
}

/// Quorum link recording dispatched lock requests.
#[derive(Default)]
pub struct RecordingQuorum {
    requests: Mutex<Vec<LockRequest>>,
    fail: AtomicBool,
}

impl RecordingQuorum {
    pub fn requests(&self) -> Vec<LockRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_dispatch(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuorumLink for RecordingQuorum {
    async fn dispatch(&self, request: LockRequest) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail.load(Ordering::SeqCst), "quorum unreachable");
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}
