// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! PrivateSend coin mixing and InstantSend lock coordination.
//!
//! The [`scheduler`] drives mixing: it prepares denominated coins and
//! collateral, picks a relay peer and runs one [`privatesend::session`] per
//! denomination. The [`instantsend`] coordinator collects quorum signatures
//! over the inputs of a transaction until it is locked or the request
//! expires.

pub mod config;
pub mod errors;
pub mod instantsend;
pub mod log;
pub mod operations;
pub mod privatesend;
pub mod scheduler;
