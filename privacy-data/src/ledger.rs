// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use crate::Serializable;
use sha3::Digest;
use std::fmt;
use std::io::{self, Read, Write};

#[cfg(any(feature = "faker", test))]
use fake::Dummy;

pub type Hash = [u8; 32];

/// Value expressed in the smallest indivisible unit.
pub type Amount = u64;

/// Locking/unlocking script bytes. Opaque to this crate.
pub type Script = Vec<u8>;

pub const COIN: Amount = 100_000_000;

/// Maximum number of inputs or outputs accepted when decoding a transaction.
pub const MAX_TX_IO: usize = 1024;

/// Hex encodes a byte slice, eliding the middle part of long values.
pub fn to_str(bytes: &[u8]) -> String {
    const OFFSET: usize = 8;
    let hex = hex::encode(bytes);
    if bytes.len() <= OFFSET * 2 {
        return hex;
    }

    let len = hex.len();
    format!("{}...{}", &hex[0..OFFSET], &hex[len - OFFSET..])
}

/// Formats an amount as a decimal coin value, e.g. `1.00000000`.
pub fn format_amount(amount: Amount) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}

#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(any(feature = "faker", test), derive(Dummy))]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", to_str(&self.txid), self.index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Serializable for OutPoint {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.txid[..])?;
        w.write_all(&self.index.to_le_bytes())?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let txid = Self::read_bytes(r)?;
        let index = Self::read_u32_le(r)?;
        Ok(Self { txid, index })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "faker", test), derive(Dummy))]
pub struct TxIn {
    pub prevout: OutPoint,
    /// Unlocking data. Empty until the owner signs the input.
    pub script_sig: Script,
}

impl TxIn {
    pub fn unsigned(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: vec![],
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty()
    }
}

impl Serializable for TxIn {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.prevout.write(w)?;
        Self::write_var_le_bytes32(w, &self.script_sig)
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let prevout = OutPoint::read(r)?;
        let script_sig = Self::read_var_le_bytes32(r)?;
        Ok(Self {
            prevout,
            script_sig,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(any(feature = "faker", test), derive(Dummy))]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl Serializable for TxOut {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.value.to_le_bytes())?;
        Self::write_var_le_bytes32(w, &self.script_pubkey)
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let value = Self::read_u64_le(r)?;
        let script_pubkey = Self::read_var_le_bytes32(r)?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "faker", test), derive(Dummy))]
pub struct Transaction {
    pub version: u16,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: TX_VERSION,
            inputs: vec![],
            outputs: vec![],
            lock_time: 0,
        }
    }
}

pub const TX_VERSION: u16 = 2;

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            inputs,
            outputs,
            ..Default::default()
        }
    }

    /// Marshal the fields covered by the transaction id.
    ///
    /// Unlocking scripts are left out so that signing an input never changes
    /// the id of the transaction being signed.
    fn marshal_unsigned<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.version.to_le_bytes())?;

        w.write_all(&(self.inputs.len() as u32).to_le_bytes())?;
        for input in &self.inputs {
            input.prevout.write(w)?;
        }

        Self::write_vec(w, &self.outputs)?;
        w.write_all(&self.lock_time.to_le_bytes())?;

        Ok(())
    }

    pub fn hash(&self) -> Hash {
        let mut hasher = sha3::Sha3_256::new();
        self.marshal_unsigned(&mut hasher)
            .expect("Writing to a hasher never fails");
        hasher.finalize().into()
    }

    /// Sum of all output values, `None` on overflow.
    pub fn total_output(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    pub fn input_index(&self, prevout: &OutPoint) -> Option<usize> {
        self.inputs.iter().position(|i| &i.prevout == prevout)
    }

    pub fn prevouts(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|i| &i.prevout)
    }

    pub fn is_fully_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(TxIn::is_signed)
    }

    /// Returns the same transaction with all unlocking scripts removed.
    pub fn unsigned_copy(&self) -> Self {
        let mut tx = self.clone();
        tx.inputs.iter_mut().for_each(|i| i.script_sig.clear());
        tx
    }
}

impl Serializable for Transaction {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.version.to_le_bytes())?;
        Self::write_vec(w, &self.inputs)?;
        Self::write_vec(w, &self.outputs)?;
        w.write_all(&self.lock_time.to_le_bytes())?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let version = Self::read_u16_le(r)?;
        let inputs = Self::read_vec(r, MAX_TX_IO)?;
        let outputs = Self::read_vec(r, MAX_TX_IO)?;
        let lock_time = Self::read_u32_le(r)?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

/// An unspent output owned by the local wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "faker", test), derive(Dummy))]
pub struct Coin {
    pub outpoint: OutPoint,
    pub output: TxOut,
    pub confirmations: u32,

    /// Number of completed mixing rounds. `None` for coins that are not of a
    /// denominated value.
    pub rounds: Option<u32>,
}

impl Coin {
    pub fn value(&self) -> Amount {
        self.output.value
    }

    pub fn is_denominated(&self) -> bool {
        self.rounds.is_some()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}
