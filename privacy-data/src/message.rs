// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use crate::denomination::Denomination;
use crate::ledger::{to_str, Hash, Transaction, TxIn, TxOut};
use crate::Serializable;

use async_channel::TrySendError;
use std::fmt;
use std::io::{self, Read, Write};
use tracing::error;

/// Upper bound of inputs (and outputs) a single participant may submit.
pub const ENTRY_MAX_INPUTS: usize = 9;

/// Size of an ed25519 signature.
pub const LOCK_SIGNATURE_SIZE: usize = 64;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Identifies a mixing session on both sides of a relay connection.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies a relay peer (masternode).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayId(pub Hash);

impl fmt::Debug for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_str(&self.0))
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies a quorum member by its public key bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignerId(pub [u8; 32]);

impl fmt::Debug for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_str(&self.0))
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pool stage as reported by the relay peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStage {
    Queue = 1,
    AcceptingEntries = 2,
    Finalizing = 3,
}

impl TryFrom<u8> for PoolStage {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PoolStage::Queue),
            2 => Ok(PoolStage::AcceptingEntries),
            3 => Ok(PoolStage::Finalizing),
            v => Err(invalid_data(format!("unknown pool stage {v}"))),
        }
    }
}

/// Reason attached by the relay peer to an aborted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCode {
    QueueFull = 1,
    EntriesFull = 2,
    InvalidCollateral = 3,
    InvalidEntry = 4,
    MissingSignatures = 5,
    Timeout = 6,
    Unknown = 255,
}

impl From<u8> for AbortCode {
    fn from(value: u8) -> Self {
        match value {
            1 => AbortCode::QueueFull,
            2 => AbortCode::EntriesFull,
            3 => AbortCode::InvalidCollateral,
            4 => AbortCode::InvalidEntry,
            5 => AbortCode::MissingSignatures,
            6 => AbortCode::Timeout,
            _ => AbortCode::Unknown,
        }
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortCode::QueueFull => "relay queue is full",
            AbortCode::EntriesFull => "entries are full",
            AbortCode::InvalidCollateral => "collateral not valid",
            AbortCode::InvalidEntry => "entry not valid",
            AbortCode::MissingSignatures => "signatures missing",
            AbortCode::Timeout => "relay timed out",
            AbortCode::Unknown => "unknown reason",
        };
        f.write_str(s)
    }
}

pub mod payload {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct QueueAnnounce {
        pub denom: Denomination,
        pub session_id: SessionId,
        /// Signed collateral transaction the relay may submit if the
        /// participant misbehaves.
        pub collateral: Transaction,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EntrySubmit {
        pub session_id: SessionId,
        pub inputs: Vec<TxIn>,
        pub outputs: Vec<TxOut>,
        pub collateral: Transaction,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PoolStatus {
        pub session_id: SessionId,
        pub entry_count: u8,
        pub stage: PoolStage,
        /// Relay-side deadline of the current stage, unix seconds.
        pub deadline: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FinalTransactionProposal {
        pub session_id: SessionId,
        pub candidate_tx: Transaction,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SignedInput {
        pub session_id: SessionId,
        pub input_index: u32,
        pub signature: Vec<u8>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SessionComplete {
        pub session_id: SessionId,
        pub final_tx: Transaction,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SessionAbort {
        pub session_id: SessionId,
        pub reason: AbortCode,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LockRequest {
        pub txid: Hash,
        pub input_digest: Hash,
    }

    #[derive(Clone, PartialEq, Eq)]
    pub struct LockSignature {
        pub txid: Hash,
        pub signer: SignerId,
        pub signature: [u8; LOCK_SIGNATURE_SIZE],
    }

    impl fmt::Debug for LockSignature {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("LockSignature")
                .field("txid", &to_str(&self.txid))
                .field("signer", &self.signer)
                .field("signature", &to_str(&self.signature))
                .finish()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LockStatus {
        pub txid: Hash,
        pub state: LockState,
    }

    /// Lock progress of a transaction as seen by the local node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LockState {
        NotRequested,
        AwaitingSignatures { count: u16, required: u16 },
        Locked,
        Expired,
    }

    impl fmt::Display for LockState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                LockState::NotRequested => f.write_str("not requested"),
                LockState::AwaitingSignatures { count, required } => {
                    write!(f, "verification in progress - {count} of {required} signatures")
                }
                LockState::Locked => f.write_str("locked"),
                LockState::Expired => f.write_str("expired"),
            }
        }
    }

    impl Serializable for QueueAnnounce {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            self.denom.write(w)?;
            w.write_all(&self.session_id.0.to_le_bytes())?;
            self.collateral.write(w)
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let denom = Denomination::read(r)?;
            let session_id = SessionId(Self::read_u64_le(r)?);
            let collateral = Transaction::read(r)?;
            Ok(Self {
                denom,
                session_id,
                collateral,
            })
        }
    }

    impl Serializable for EntrySubmit {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.session_id.0.to_le_bytes())?;
            Self::write_vec(w, &self.inputs)?;
            Self::write_vec(w, &self.outputs)?;
            self.collateral.write(w)
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let session_id = SessionId(Self::read_u64_le(r)?);
            let inputs = Self::read_vec(r, ENTRY_MAX_INPUTS)?;
            let outputs = Self::read_vec(r, ENTRY_MAX_INPUTS)?;
            let collateral = Transaction::read(r)?;
            Ok(Self {
                session_id,
                inputs,
                outputs,
                collateral,
            })
        }
    }

    impl Serializable for PoolStatus {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.session_id.0.to_le_bytes())?;
            w.write_all(&[self.entry_count, self.stage as u8])?;
            w.write_all(&self.deadline.to_le_bytes())
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let session_id = SessionId(Self::read_u64_le(r)?);
            let entry_count = Self::read_u8(r)?;
            let stage = PoolStage::try_from(Self::read_u8(r)?)?;
            let deadline = Self::read_u64_le(r)?;
            Ok(Self {
                session_id,
                entry_count,
                stage,
                deadline,
            })
        }
    }

    impl Serializable for FinalTransactionProposal {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.session_id.0.to_le_bytes())?;
            self.candidate_tx.write(w)
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let session_id = SessionId(Self::read_u64_le(r)?);
            let candidate_tx = Transaction::read(r)?;
            Ok(Self {
                session_id,
                candidate_tx,
            })
        }
    }

    impl Serializable for SignedInput {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.session_id.0.to_le_bytes())?;
            w.write_all(&self.input_index.to_le_bytes())?;
            Self::write_var_le_bytes32(w, &self.signature)
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let session_id = SessionId(Self::read_u64_le(r)?);
            let input_index = Self::read_u32_le(r)?;
            let signature = Self::read_var_le_bytes32(r)?;
            Ok(Self {
                session_id,
                input_index,
                signature,
            })
        }
    }

    impl Serializable for SessionComplete {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.session_id.0.to_le_bytes())?;
            self.final_tx.write(w)
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let session_id = SessionId(Self::read_u64_le(r)?);
            let final_tx = Transaction::read(r)?;
            Ok(Self {
                session_id,
                final_tx,
            })
        }
    }

    impl Serializable for SessionAbort {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.session_id.0.to_le_bytes())?;
            w.write_all(&[self.reason as u8])
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let session_id = SessionId(Self::read_u64_le(r)?);
            let reason = AbortCode::from(Self::read_u8(r)?);
            Ok(Self { session_id, reason })
        }
    }

    impl Serializable for LockRequest {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.txid[..])?;
            w.write_all(&self.input_digest[..])
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let txid = Self::read_bytes(r)?;
            let input_digest = Self::read_bytes(r)?;
            Ok(Self { txid, input_digest })
        }
    }

    impl Serializable for LockSignature {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.txid[..])?;
            w.write_all(&self.signer.0[..])?;
            w.write_all(&self.signature[..])
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let txid = Self::read_bytes(r)?;
            let signer = SignerId(Self::read_bytes(r)?);
            let signature = Self::read_bytes(r)?;
            Ok(Self {
                txid,
                signer,
                signature,
            })
        }
    }

    impl Serializable for LockStatus {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.txid[..])?;
            match self.state {
                LockState::NotRequested => w.write_all(&[0]),
                LockState::AwaitingSignatures { count, required } => {
                    w.write_all(&[1])?;
                    w.write_all(&count.to_le_bytes())?;
                    w.write_all(&required.to_le_bytes())
                }
                LockState::Locked => w.write_all(&[2]),
                LockState::Expired => w.write_all(&[3]),
            }
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let txid = Self::read_bytes(r)?;
            let state = match Self::read_u8(r)? {
                0 => LockState::NotRequested,
                1 => {
                    let count = Self::read_u16_le(r)?;
                    let required = Self::read_u16_le(r)?;
                    LockState::AwaitingSignatures { count, required }
                }
                2 => LockState::Locked,
                3 => LockState::Expired,
                v => return Err(invalid_data(format!("unknown lock state {v}"))),
            };
            Ok(Self { txid, state })
        }
    }
}

use payload::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topics {
    // Relay peer topics
    QueueAnnounce = 30,
    EntrySubmit = 31,
    PoolStatus = 32,
    FinalTransactionProposal = 33,
    SignedInput = 34,
    SessionComplete = 35,
    SessionAbort = 36,

    // Quorum topics
    LockRequest = 40,
    LockSignature = 41,
    LockStatus = 42,

    #[default]
    Unknown = 255,
}

impl From<u8> for Topics {
    fn from(v: u8) -> Self {
        match v {
            30 => Topics::QueueAnnounce,
            31 => Topics::EntrySubmit,
            32 => Topics::PoolStatus,
            33 => Topics::FinalTransactionProposal,
            34 => Topics::SignedInput,
            35 => Topics::SessionComplete,
            36 => Topics::SessionAbort,
            40 => Topics::LockRequest,
            41 => Topics::LockSignature,
            42 => Topics::LockStatus,
            _ => Topics::Unknown,
        }
    }
}

impl From<Topics> for u8 {
    fn from(t: Topics) -> Self {
        t as u8
    }
}

/// Messages exchanged with a relay peer during a mixing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    QueueAnnounce(QueueAnnounce),
    EntrySubmit(EntrySubmit),
    PoolStatus(PoolStatus),
    FinalTransactionProposal(FinalTransactionProposal),
    SignedInput(SignedInput),
    SessionComplete(SessionComplete),
    SessionAbort(SessionAbort),
}

impl RelayMessage {
    pub fn topic(&self) -> Topics {
        match self {
            RelayMessage::QueueAnnounce(_) => Topics::QueueAnnounce,
            RelayMessage::EntrySubmit(_) => Topics::EntrySubmit,
            RelayMessage::PoolStatus(_) => Topics::PoolStatus,
            RelayMessage::FinalTransactionProposal(_) => {
                Topics::FinalTransactionProposal
            }
            RelayMessage::SignedInput(_) => Topics::SignedInput,
            RelayMessage::SessionComplete(_) => Topics::SessionComplete,
            RelayMessage::SessionAbort(_) => Topics::SessionAbort,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            RelayMessage::QueueAnnounce(p) => p.session_id,
            RelayMessage::EntrySubmit(p) => p.session_id,
            RelayMessage::PoolStatus(p) => p.session_id,
            RelayMessage::FinalTransactionProposal(p) => p.session_id,
            RelayMessage::SignedInput(p) => p.session_id,
            RelayMessage::SessionComplete(p) => p.session_id,
            RelayMessage::SessionAbort(p) => p.session_id,
        }
    }
}

impl Serializable for RelayMessage {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.topic() as u8])?;

        match self {
            RelayMessage::QueueAnnounce(p) => p.write(w),
            RelayMessage::EntrySubmit(p) => p.write(w),
            RelayMessage::PoolStatus(p) => p.write(w),
            RelayMessage::FinalTransactionProposal(p) => p.write(w),
            RelayMessage::SignedInput(p) => p.write(w),
            RelayMessage::SessionComplete(p) => p.write(w),
            RelayMessage::SessionAbort(p) => p.write(w),
        }
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let topic = Topics::from(Self::read_u8(r)?);

        let msg = match topic {
            Topics::QueueAnnounce => {
                RelayMessage::QueueAnnounce(QueueAnnounce::read(r)?)
            }
            Topics::EntrySubmit => {
                RelayMessage::EntrySubmit(EntrySubmit::read(r)?)
            }
            Topics::PoolStatus => {
                RelayMessage::PoolStatus(PoolStatus::read(r)?)
            }
            Topics::FinalTransactionProposal => {
                RelayMessage::FinalTransactionProposal(
                    FinalTransactionProposal::read(r)?,
                )
            }
            Topics::SignedInput => {
                RelayMessage::SignedInput(SignedInput::read(r)?)
            }
            Topics::SessionComplete => {
                RelayMessage::SessionComplete(SessionComplete::read(r)?)
            }
            Topics::SessionAbort => {
                RelayMessage::SessionAbort(SessionAbort::read(r)?)
            }
            t => {
                return Err(invalid_data(format!(
                    "topic {t:?} is not a relay topic"
                )))
            }
        };

        Ok(msg)
    }
}

/// Messages exchanged with the signing quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumMessage {
    LockRequest(LockRequest),
    LockSignature(LockSignature),
    LockStatus(LockStatus),
}

impl QuorumMessage {
    pub fn topic(&self) -> Topics {
        match self {
            QuorumMessage::LockRequest(_) => Topics::LockRequest,
            QuorumMessage::LockSignature(_) => Topics::LockSignature,
            QuorumMessage::LockStatus(_) => Topics::LockStatus,
        }
    }
}

impl Serializable for QuorumMessage {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.topic() as u8])?;

        match self {
            QuorumMessage::LockRequest(p) => p.write(w),
            QuorumMessage::LockSignature(p) => p.write(w),
            QuorumMessage::LockStatus(p) => p.write(w),
        }
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let msg = match Topics::from(Self::read_u8(r)?) {
            Topics::LockRequest => {
                QuorumMessage::LockRequest(LockRequest::read(r)?)
            }
            Topics::LockSignature => {
                QuorumMessage::LockSignature(LockSignature::read(r)?)
            }
            Topics::LockStatus => {
                QuorumMessage::LockStatus(LockStatus::read(r)?)
            }
            t => {
                return Err(invalid_data(format!(
                    "topic {t:?} is not a quorum topic"
                )))
            }
        };

        Ok(msg)
    }
}

/// AsyncQueue is a thin wrapper of async_channel.
#[derive(Clone)]
pub struct AsyncQueue<M: Clone> {
    receiver: async_channel::Receiver<M>,
    sender: async_channel::Sender<M>,

    cap: usize,
    label: &'static str,
}

impl<M: Clone> AsyncQueue<M> {
    /// Creates a bounded async queue with fixed capacity
    ///
    /// `Label` sets a queue label for logging
    ///
    /// Panics if `cap` is zero (Capacity must be a positive number).
    pub fn bounded(cap: usize, label: &'static str) -> Self {
        let (sender, receiver) = async_channel::bounded(cap);
        Self {
            receiver,
            sender,
            cap,
            label,
        }
    }
}

impl<M: Clone> AsyncQueue<M> {
    pub fn try_send(&self, msg: M) {
        let label = self.label;
        let _ = self.sender.try_send(msg).map_err(|err| match err {
            TrySendError::Full(_) => {
                error!("queue ({label}) is full, cap: {}", self.cap);
            }
            TrySendError::Closed(_) => {
                error!("queue ({label}) is closed");
            }
        });
    }

    pub async fn send(
        &self,
        msg: M,
    ) -> Result<(), async_channel::SendError<M>> {
        self.sender.send(msg).await
    }

    pub fn recv(&self) -> async_channel::Recv<'_, M> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, async_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn close(&self) -> bool {
        self.sender.close()
    }
}
