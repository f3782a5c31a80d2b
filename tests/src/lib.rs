/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
pub mod scheduling;

#[cfg(test)]
pub fn enable_logging() {
    use tracing_subscriber::EnvFilter;

    if let Ok(level) = std::env::var("LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(level))
            .with_test_writer()
            .try_init();
    }
}
