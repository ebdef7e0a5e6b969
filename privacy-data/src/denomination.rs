// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! The public ladder of mixing denominations.

use crate::ledger::{format_amount, Amount, COIN};
use crate::Serializable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};

/// A standard coin value that mixing inputs and outputs must match exactly.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Denomination {
    Ten,
    One,
    Tenth,
    Hundredth,
}

impl Denomination {
    /// The full ladder, largest value first.
    pub const LADDER: [Denomination; 4] = [
        Denomination::Ten,
        Denomination::One,
        Denomination::Tenth,
        Denomination::Hundredth,
    ];

    pub const fn amount(self) -> Amount {
        match self {
            Denomination::Ten => 10 * COIN,
            Denomination::One => COIN,
            Denomination::Tenth => COIN / 10,
            Denomination::Hundredth => COIN / 100,
        }
    }

    /// Maps an amount back to its denomination, if it is one.
    pub fn from_amount(amount: Amount) -> Option<Self> {
        Self::LADDER.into_iter().find(|d| d.amount() == amount)
    }

    pub fn is_denominated(amount: Amount) -> bool {
        Self::from_amount(amount).is_some()
    }

    /// The smallest value of the ladder.
    pub const fn smallest() -> Self {
        Denomination::Hundredth
    }

    /// Wire identifier, a single bit per ladder step.
    pub const fn bit(self) -> u8 {
        match self {
            Denomination::Ten => 1 << 0,
            Denomination::One => 1 << 1,
            Denomination::Tenth => 1 << 2,
            Denomination::Hundredth => 1 << 3,
        }
    }

    pub fn from_bit(bit: u8) -> Option<Self> {
        Self::LADDER.into_iter().find(|d| d.bit() == bit)
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_amount(self.amount()))
    }
}

impl Serializable for Denomination {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.bit()])
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let bit = Self::read_u8(r)?;
        Self::from_bit(bit).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown denomination {bit:#04x}"),
            )
        })
    }
}
