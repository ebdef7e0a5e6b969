// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

pub mod collateral;
pub mod denominate;
pub mod relay;
pub mod session;

pub use collateral::{
    Collateral, CollateralBuilder, CollateralRegistry, FeeRate,
};
pub use denominate::{
    select_mixing_inputs, DenominationEngine, DenominationPlan,
};
pub use relay::RelaySelector;
pub use session::{
    MixingEntry, MixingSession, SessionOutcome, SessionState, SessionTask,
};
