// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Log output: console unless quiet, plus the systemd journal when present.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = (!quiet).then(|| tracing_subscriber::fmt::layer().with_target(false));

    let registry = tracing_subscriber::registry().with(filter).with(console);

    #[cfg(unix)]
    let (registry, journal_error) = match tracing_journald::layer() {
        Ok(journal) => (registry.with(Some(journal)), None),
        Err(e) => (registry.with(None::<tracing_journald::Layer>), Some(e)),
    };

    if let Err(e) = registry.try_init() {
        eprintln!("failed to install logger: {e}");
        return;
    }

    #[cfg(unix)]
    if let Some(e) = journal_error {
        tracing::debug!(error = %e, "System journal unavailable");
    }
}
