// dkim-modifier – DKIM signing modifier for outbound mail
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! The DKIM signing modifier.
//!
//! One [`Modifier`] is created per signing policy at startup and shared among
//! all message flows. Each message gets its own [`MessageState`], which runs
//! through the sender and body hooks of the mail pipeline:
//!
//! ```no_run
//! # async fn f(header: &mut dkim_modifier::header::HeaderFields, body: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! use dkim_modifier::modifier::{Modifier, ModifierConfig};
//!
//! let modifier = Modifier::new(ModifierConfig::default())?;
//! modifier.init().await?;
//!
//! let mut state = modifier.state_for_message();
//! state.rewrite_sender("me@example.com").await?;
//! let outcome = state.rewrite_body(header, body)?;
//! state.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod state;

pub use self::{
    config::{
        ConfigError, FailurePolicy, ModifierConfig, DEFAULT_KEY_PATH_TEMPLATE, DEFAULT_SELECTOR,
    },
    state::{MessageState, SigningOutcome, SkipReason},
};

use crate::{
    key_store::{KeyStore, KeyStoreError},
    signature::{DomainName, Selector},
    signer::SigningError,
};
use config::SigningPolicy;
use tracing::debug;

/// The cause of a message remaining unsigned under [`FailurePolicy::Closed`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum UnsignedCause {
    #[error(transparent)]
    KeyUnavailable(KeyStoreError),
    #[error(transparent)]
    Signing(SigningError),
}

/// An error that occurs when using a [`MessageState`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ModifierError {
    /// A hook was called out of order or more than once.
    #[error("modifier hook called out of order")]
    OutOfOrder,
    /// A hook was called after the state was closed.
    #[error("message state already closed")]
    Closed,
    /// A message eligible for signing could not be signed.
    #[error("message from {domain} could not be signed: {cause}")]
    Unsigned { domain: DomainName, cause: UnsignedCause },
}

/// A DKIM signing modifier.
pub struct Modifier {
    policy: SigningPolicy,
    key_store: KeyStore,
}

impl Modifier {
    /// Creates a modifier from the given configuration.
    pub fn new(config: ModifierConfig) -> Result<Self, ConfigError> {
        let (policy, template, key_source) = config::validate(config)?;

        debug!(
            selector = %policy.selector,
            key_path_template = %template,
            "DKIM signing modifier configured"
        );

        Ok(Self {
            policy,
            key_store: KeyStore::new(template, key_source),
        })
    }

    /// Initializes the modifier.
    ///
    /// When pre-warming is configured, the keys for all domains of the domain
    /// table are loaded. Keys that cannot be loaded are logged and skipped.
    pub async fn init(&self) -> Result<(), ConfigError> {
        if !self.policy.prewarm {
            return Ok(());
        }

        let domains = self.policy.domains.domains().ok_or(ConfigError::PrewarmUnsupported)?;
        let total = domains.len();

        let pairs = domains.into_iter().map(|(domain, selector)| {
            let selector = selector.unwrap_or_else(|| self.policy.selector.clone());
            (domain, selector)
        });

        let loaded = self.key_store.prewarm(pairs).await;

        debug!(loaded, total, "pre-warmed signing keys");

        Ok(())
    }

    /// Creates the signing state for a new message.
    pub fn state_for_message(&self) -> MessageState<'_> {
        MessageState::new(self)
    }

    /// Returns the default selector.
    pub fn selector(&self) -> &Selector {
        &self.policy.selector
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }
}
