// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use tracing::subscriber::SetGlobalDefaultError;

use crate::config::Params;
use crate::errors::ConfigError;

/// Installs the global tracing subscriber.
///
/// `log_type` is one of `coloured`, `plain` (no ANSI colours) or `json`.
pub fn enable_log(
    level: tracing::Level,
    log_type: &str,
) -> Result<(), SetGlobalDefaultError> {
    // Generate a subscriber with the desired log level.
    let subscriber =
        tracing_subscriber::fmt::Subscriber::builder().with_max_level(level);

    match log_type {
        "json" => {
            let subscriber = subscriber.json().flatten_event(true).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        "plain" => {
            let subscriber = subscriber.with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        _ => {
            let subscriber = subscriber.finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    }
}

/// Installs the subscriber described by `params`.
///
/// Fails if the host process already installed a global subscriber.
pub fn enable_log_from(params: &Params) -> Result<(), ConfigError> {
    let level = params.log_level()?;
    enable_log(level, &params.log_type)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_log_from_params() {
        let params = Params {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            enable_log_from(&params),
            Err(ConfigError::InvalidLogLevel(level)) if level == "loud"
        ));

        let params: Params = "log_level = \"debug\"\nlog_type = \"json\""
            .parse()
            .expect("config to parse");
        assert_eq!(params.log_level().unwrap(), tracing::Level::DEBUG);
        enable_log_from(&params).expect("subscriber to install");

        // One global subscriber per process
        assert!(matches!(
            enable_log_from(&params),
            Err(ConfigError::Subscriber(_))
        ));
    }
}
