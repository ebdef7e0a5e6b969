// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::fmt;
use std::io;

use privacy_data::ledger::{to_str, Amount, Hash, OutPoint};
use privacy_data::message::{AbortCode, SignerId, Topics};
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;

/// Per-stage deadline identifiers of a mixing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    QueueAck,
    EntryCollection,
    Finalize,
    Sign,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::QueueAck => "queue ack",
            Stage::EntryCollection => "entry collection",
            Stage::Finalize => "finalize",
            Stage::Sign => "sign",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Cancelled by the wallet owner.
    User,
    WalletLocked,
    Shutdown,
    /// The relay peer aborted the session.
    Relay(AbortCode),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::User => f.write_str("cancelled by user"),
            AbortReason::WalletLocked => f.write_str("wallet is locked"),
            AbortReason::Shutdown => f.write_str("shutting down"),
            AbortReason::Relay(code) => write!(f, "relay abort: {code}"),
        }
    }
}

/// Defects of a relay proposal or of the relay's behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("own input {0} is missing")]
    MissingInput(OutPoint),
    #[error("own output {0} is missing")]
    MissingOutput(usize),
    #[error("own output {0} was modified")]
    ModifiedOutput(usize),
    #[error("output value {0} is not the session denomination")]
    ForeignDenomination(Amount),
    #[error("input {0} appears more than once")]
    DuplicateInput(OutPoint),
    #[error("own output {0} targets more than one slot")]
    DuplicateOutputSlot(usize),
    #[error("inputs ({inputs}) and outputs ({outputs}) are unbalanced")]
    Unbalanced { inputs: usize, outputs: usize },
    #[error("pool reports {count} entries, max {max}")]
    PoolOverflow { count: usize, max: usize },
    #[error("proposal received with {count} entries, {min} required")]
    UnderfilledPool { count: usize, min: usize },
    #[error("proposal has {inputs} inputs, at least {required} required")]
    TooFewInputs { inputs: usize, required: usize },
    #[error("unexpected {topic:?} in state {state}")]
    UnexpectedMessage { topic: Topics, state: &'static str },
    #[error("final transaction does not match the signed proposal")]
    FinalTransactionMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry has no inputs")]
    Empty,
    #[error("entry has {0} inputs, cap is {1}")]
    TooManyInputs(usize, usize),
    #[error("entry has {inputs} inputs and {outputs} outputs")]
    CountMismatch { inputs: usize, outputs: usize },
    #[error("input {0} is not of the session denomination")]
    ForeignInput(OutPoint),
    #[error("input {0} is not a denominated coin")]
    NotDenominated(OutPoint),
}

#[derive(Debug, Error)]
pub enum MixingError {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("no collateral available")]
    NoCollateralAvailable,
    #[error("collateral {0} is already in use")]
    CollateralReused(OutPoint),
    #[error("no compatible relay")]
    NoCompatibleRelay,
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),
    #[error("timed out in {0} stage")]
    TimedOut(Stage),
    #[error("aborted: {0}")]
    Aborted(AbortReason),
    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] EntryError),
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl MixingError {
    /// Transient failures are retried with backoff and relay exclusion.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MixingError::TimedOut(_) | MixingError::NoCompatibleRelay
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signer {0} is not a quorum member")]
    UnknownSigner(SignerId),
    #[error("malformed signature from {0}")]
    Malformed(SignerId),
    #[error("verification failed for {0}")]
    VerificationFailed(SignerId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TxId(pub Hash);

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_str(&self.0))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("input {input} is already claimed by {holder}")]
    DoubleLockAttempt { input: OutPoint, holder: TxId },
    #[error("bad signature: {0}")]
    BadSignature(#[from] SignatureError),
    #[error("transaction value {value} exceeds {max}")]
    ValueTooHigh { value: Amount, max: Amount },
    #[error("transaction has {count} inputs, max {max}")]
    TooManyInputs { count: usize, max: usize },
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("input {input} has {confirmations} confirmations, {required} required")]
    ImmatureInput {
        input: OutPoint,
        confirmations: u32,
        required: u32,
    },
    #[error("instantsend is disabled")]
    Disabled,
    #[error("no lock request for {0}")]
    UnknownRequest(TxId),
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("rounds {0} out of range {1}..={2}")]
    InvalidRounds(u32, u32, u32),
    #[error("invalid pool size min {min} target {target}")]
    InvalidPoolSize { min: usize, target: usize },
    #[error("lock threshold must be positive")]
    ZeroThreshold,
    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),
    #[error("invalid log type '{0}'")]
    InvalidLogType(String),
    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}
