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

use crate::{
    header::FieldName,
    key_store::{FileKeySource, KeyPathTemplate, KeySource, TemplateError},
    policy::{AllDomains, DomainLookup},
    signature::{Canonicalization, Selector},
    signer::{self, Timestamp, DEFAULT_VALID_DURATION},
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};

/// The default selector.
pub const DEFAULT_SELECTOR: &str = "default";

/// The default key path template.
pub const DEFAULT_KEY_PATH_TEMPLATE: &str = "dkim_keys/{domain}_{selector}.key";

/// What to do when a message eligible for signing cannot be signed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FailurePolicy {
    /// Deliver the message unsigned.
    #[default]
    Open,
    /// Report an error, so that the message can be rejected.
    Closed,
}

/// Configuration of a [`Modifier`][crate::modifier::Modifier].
#[derive(Clone)]
pub struct ModifierConfig {
    /// The selector used for domains without a selector override.
    pub selector: String,

    /// Location of the key files, with placeholders `{domain}` and
    /// `{selector}`. The `{domain}` placeholder is required.
    pub key_path_template: String,

    /// The table of domains to sign. When absent, every domain for which a
    /// key can be found is signed.
    pub domains: Option<Arc<dyn DomainLookup>>,

    pub canonicalization: Canonicalization,

    /// Header fields to sign once per occurrence.
    pub signed_headers: Vec<String>,

    /// Header fields to sign once per occurrence plus one more time.
    pub oversigned_headers: Vec<String>,

    /// How long signatures are valid (*x=* tag). `None` means no expiration.
    pub signature_validity: Option<Duration>,

    /// The *t=* tag. `None` means no timestamp.
    pub timestamp: Option<Timestamp>,

    /// When this flag is set, messages are only signed when the domain in the
    /// header `From` is the signing domain or a subdomain of it.
    pub require_header_match: bool,

    pub failure_policy: FailurePolicy,

    /// When this flag is set, keys for all domains of the domain table are
    /// loaded during initialization.
    pub prewarm: bool,

    /// The source of key material.
    pub key_source: Arc<dyn KeySource>,
}

impl Default for ModifierConfig {
    fn default() -> Self {
        Self {
            selector: DEFAULT_SELECTOR.into(),
            key_path_template: DEFAULT_KEY_PATH_TEMPLATE.into(),
            domains: None,
            canonicalization: Default::default(),
            signed_headers: to_strings(signer::default_signed_headers()),
            oversigned_headers: to_strings(signer::default_oversigned_headers()),
            signature_validity: Some(DEFAULT_VALID_DURATION),
            timestamp: Some(Timestamp::Now),
            require_header_match: false,
            failure_policy: Default::default(),
            prewarm: false,
            key_source: Arc::new(FileKeySource),
        }
    }
}

impl Debug for ModifierConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierConfig")
            .field("selector", &self.selector)
            .field("key_path_template", &self.key_path_template)
            .field("domains", &self.domains.as_ref().map(|_| ".."))
            .field("canonicalization", &self.canonicalization)
            .field("signed_headers", &self.signed_headers)
            .field("oversigned_headers", &self.oversigned_headers)
            .field("signature_validity", &self.signature_validity)
            .field("timestamp", &self.timestamp)
            .field("require_header_match", &self.require_header_match)
            .field("failure_policy", &self.failure_policy)
            .field("prewarm", &self.prewarm)
            .finish_non_exhaustive()
    }
}

fn to_strings(names: Vec<FieldName>) -> Vec<String> {
    names.into_iter().map(|name| name.as_ref().into()).collect()
}

/// An error in the modifier configuration.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid selector \"{0}\"")]
    InvalidSelector(String),
    #[error(transparent)]
    KeyPathTemplate(#[from] TemplateError),
    #[error("invalid header field name \"{0}\"")]
    InvalidHeaderName(String),
    #[error("From header field must be signed")]
    FromNotSigned,
    #[error("signature validity must not be zero")]
    ZeroValidity,
    #[error("pre-warming requires a domain table that can list its domains")]
    PrewarmUnsupported,
}

/// The validated signing policy.
pub(crate) struct SigningPolicy {
    pub selector: Selector,
    pub domains: Arc<dyn DomainLookup>,
    pub canonicalization: Canonicalization,
    pub signed_headers: Vec<FieldName>,
    pub oversigned_headers: Vec<FieldName>,
    pub valid_duration: Option<Duration>,
    pub timestamp: Option<Timestamp>,
    pub require_header_match: bool,
    pub failure_policy: FailurePolicy,
    pub prewarm: bool,
}

pub(crate) fn validate(
    config: ModifierConfig,
) -> Result<(SigningPolicy, KeyPathTemplate, Arc<dyn KeySource>), ConfigError> {
    let selector = Selector::new(config.selector.trim())
        .map_err(|_| ConfigError::InvalidSelector(config.selector.clone()))?;

    let template = config.key_path_template.parse()?;

    let signed_headers = to_field_names(&config.signed_headers)?;
    let oversigned_headers = to_field_names(&config.oversigned_headers)?;

    if !signed_headers.iter().chain(&oversigned_headers).any(|name| *name == "From") {
        return Err(ConfigError::FromNotSigned);
    }

    if config.signature_validity == Some(Duration::ZERO) {
        return Err(ConfigError::ZeroValidity);
    }

    let domains: Arc<dyn DomainLookup> = match config.domains {
        Some(domains) => domains,
        None => Arc::new(AllDomains),
    };

    if config.prewarm && domains.domains().is_none() {
        return Err(ConfigError::PrewarmUnsupported);
    }

    let policy = SigningPolicy {
        selector,
        domains,
        canonicalization: config.canonicalization,
        signed_headers,
        oversigned_headers,
        valid_duration: config.signature_validity,
        timestamp: config.timestamp,
        require_header_match: config.require_header_match,
        failure_policy: config.failure_policy,
        prewarm: config.prewarm,
    };

    Ok((policy, template, config.key_source))
}

fn to_field_names(names: &[String]) -> Result<Vec<FieldName>, ConfigError> {
    names
        .iter()
        .map(|name| {
            let name = name.trim();
            // ';' cannot appear in the h= tag
            if name.contains(';') {
                return Err(ConfigError::InvalidHeaderName(name.into()));
            }
            FieldName::new(name).map_err(|_| ConfigError::InvalidHeaderName(name.into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticTable;

    #[test]
    fn validate_default_ok() {
        let (policy, template, _) = validate(Default::default()).unwrap();

        assert_eq!(policy.selector, Selector::new("default").unwrap());
        assert_eq!(template.to_string(), DEFAULT_KEY_PATH_TEMPLATE);
        assert_eq!(policy.oversigned_headers.len(), 15);
        assert_eq!(policy.signed_headers.len(), 12);
        assert_eq!(policy.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn validate_rejects_bad_config() {
        let config = ModifierConfig {
            selector: "".into(),
            ..Default::default()
        };
        assert_eq!(validate(config).err(), Some(ConfigError::InvalidSelector("".into())));

        let config = ModifierConfig {
            key_path_template: "keys/{selector}.key".into(),
            ..Default::default()
        };
        assert_eq!(
            validate(config).err(),
            Some(ConfigError::KeyPathTemplate(TemplateError::MissingDomain))
        );

        let config = ModifierConfig {
            signed_headers: vec!["List;Id".into()],
            ..Default::default()
        };
        assert_eq!(validate(config).err(), Some(ConfigError::InvalidHeaderName("List;Id".into())));

        let config = ModifierConfig {
            signed_headers: vec!["Subject".into()],
            oversigned_headers: vec![],
            ..Default::default()
        };
        assert_eq!(validate(config).err(), Some(ConfigError::FromNotSigned));

        let config = ModifierConfig {
            signature_validity: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(validate(config).err(), Some(ConfigError::ZeroValidity));
    }

    #[test]
    fn validate_prewarm_needs_enumerable_table() {
        let config = ModifierConfig {
            prewarm: true,
            ..Default::default()
        };
        assert_eq!(validate(config).err(), Some(ConfigError::PrewarmUnsupported));

        let table = StaticTable::from_entries([("example.com", "")]).unwrap();
        let config = ModifierConfig {
            prewarm: true,
            domains: Some(Arc::new(table)),
            ..Default::default()
        };
        assert!(validate(config).is_ok());
    }
}
