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
    header::HeaderFields,
    key_store::{KeyRecord, KeyStoreError},
    modifier::{FailurePolicy, Modifier, ModifierError, UnsignedCause},
    policy::DomainPolicy,
    signature::{DomainName, Selector},
    signer::{self, SignRequest, SigningError},
};
use bstr::ByteSlice;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The outcome of the body rewrite step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SigningOutcome {
    /// A signature was added to the header.
    Signed { domain: DomainName, selector: Selector },
    /// The message was deliberately left unsigned.
    Skipped(SkipReason),
    /// Signing was attempted but failed; the message was left unsigned.
    Failed(SigningError),
}

/// The reason why a message is not signed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SkipReason {
    /// The envelope sender is null or has no domain.
    NullSender,
    /// The sender domain is not a valid domain name.
    InvalidDomain,
    /// The sender domain is not eligible for signing.
    DomainIneligible,
    /// No usable key was found for the sender domain.
    KeyUnavailable,
    /// The header `From` domain does not belong to the signing domain.
    HeaderMismatch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Created,
    SenderInspected,
    BodyRewritten,
    Closed,
}

enum Decision {
    Sign {
        domain: DomainName,
        key: Arc<KeyRecord>,
    },
    Skip(SkipReason),
}

/// The signing state of a single message.
///
/// The hooks must be called in order: [`rewrite_sender`][Self::rewrite_sender],
/// then [`rewrite_body`][Self::rewrite_body], then [`close`][Self::close].
/// Calls out of order are rejected and leave the message untouched.
pub struct MessageState<'a> {
    modifier: &'a Modifier,
    stage: Stage,
    decision: Option<Decision>,
}

impl<'a> MessageState<'a> {
    pub(crate) fn new(modifier: &'a Modifier) -> Self {
        Self {
            modifier,
            stage: Stage::Created,
            decision: None,
        }
    }

    fn expect_stage(&self, expected: Stage) -> Result<(), ModifierError> {
        match self.stage {
            Stage::Closed => Err(ModifierError::Closed),
            stage if stage != expected => Err(ModifierError::OutOfOrder),
            _ => Ok(()),
        }
    }

    /// Inspects the envelope sender and decides whether the message is to be
    /// signed. The sender is returned unchanged.
    pub async fn rewrite_sender(&mut self, from: &str) -> Result<String, ModifierError> {
        self.expect_stage(Stage::Created)?;

        let result = self.decide(from).await;

        self.stage = Stage::SenderInspected;

        match result {
            Ok(decision) => {
                self.decision = Some(decision);
                Ok(from.into())
            }
            Err(e) => {
                self.decision = Some(Decision::Skip(SkipReason::KeyUnavailable));
                Err(e)
            }
        }
    }

    async fn decide(&self, from: &str) -> Result<Decision, ModifierError> {
        let policy = &self.modifier.policy;

        let Some(domain) = sender_domain(from) else {
            trace!(sender = from, "null or domain-less sender, not signing");
            return Ok(Decision::Skip(SkipReason::NullSender));
        };

        let Ok(domain) = DomainName::normalize(domain) else {
            debug!(sender = from, "invalid sender domain, not signing");
            return Ok(Decision::Skip(SkipReason::InvalidDomain));
        };

        let selector = match policy.domains.lookup(&domain) {
            DomainPolicy::Ineligible => {
                debug!(%domain, "domain not eligible for signing");
                return Ok(Decision::Skip(SkipReason::DomainIneligible));
            }
            DomainPolicy::Eligible { selector } => {
                selector.unwrap_or_else(|| policy.selector.clone())
            }
        };

        match self.modifier.key_store.resolve(&domain, &selector).await {
            Ok(key) => {
                trace!(%domain, %selector, "signing key resolved");
                Ok(Decision::Sign { domain, key })
            }
            Err(e) => {
                match &e {
                    KeyStoreError::NotFound { .. } => {
                        debug!(%domain, %selector, "no signing key: {e}");
                    }
                    _ => {
                        warn!(%domain, %selector, "failed to resolve signing key: {e}");
                    }
                }

                match policy.failure_policy {
                    FailurePolicy::Open => Ok(Decision::Skip(SkipReason::KeyUnavailable)),
                    FailurePolicy::Closed => Err(ModifierError::Unsigned {
                        domain,
                        cause: UnsignedCause::KeyUnavailable(e),
                    }),
                }
            }
        }
    }

    /// Signs the message if a key was resolved for the sender, prepending the
    /// signature to the header.
    pub fn rewrite_body(
        &mut self,
        header: &mut HeaderFields,
        body: &[u8],
    ) -> Result<SigningOutcome, ModifierError> {
        self.expect_stage(Stage::SenderInspected)?;

        self.stage = Stage::BodyRewritten;

        let (domain, key) = match &self.decision {
            Some(Decision::Sign { domain, key }) => (domain.clone(), key.clone()),
            Some(Decision::Skip(reason)) => return Ok(SigningOutcome::Skipped(*reason)),
            None => return Err(ModifierError::OutOfOrder),
        };

        let policy = &self.modifier.policy;

        if policy.require_header_match && !header_from_matches(header, &domain) {
            debug!(%domain, "header From domain does not match signing domain, not signing");
            return Ok(SigningOutcome::Skipped(SkipReason::HeaderMismatch));
        }

        let selector = key.selector.clone();

        let mut request = SignRequest::new(domain.clone(), selector.clone(), key.signing_key.clone());
        request.canonicalization = policy.canonicalization;
        request.signed_headers = policy.signed_headers.clone();
        request.oversigned_headers = policy.oversigned_headers.clone();
        request.timestamp = policy.timestamp;
        request.valid_duration = policy.valid_duration;

        let result = signer::sign(request, header, body).and_then(|r| r.into_header_field());

        match result {
            Ok(field) => {
                header.prepend(field);
                debug!(%domain, %selector, "message signed");
                Ok(SigningOutcome::Signed { domain, selector })
            }
            Err(e) => {
                warn!(%domain, %selector, "failed to sign message: {e}");
                match policy.failure_policy {
                    FailurePolicy::Open => Ok(SigningOutcome::Failed(e)),
                    FailurePolicy::Closed => Err(ModifierError::Unsigned {
                        domain,
                        cause: UnsignedCause::Signing(e),
                    }),
                }
            }
        }
    }

    /// Releases the per-message state.
    pub fn close(&mut self) -> Result<(), ModifierError> {
        if self.stage == Stage::Closed {
            return Err(ModifierError::Closed);
        }
        self.stage = Stage::Closed;
        self.decision = None;
        Ok(())
    }
}

impl Drop for MessageState<'_> {
    fn drop(&mut self) {
        if self.stage != Stage::Closed {
            trace!(stage = ?self.stage, "message state dropped without close");
        }
    }
}

// Extracts the domain from an envelope sender `local@domain`, optionally in
// angle brackets. The null sender `<>` has no domain.
fn sender_domain(from: &str) -> Option<&str> {
    let from = from.trim();
    let from = from
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(from);

    let (_, domain) = from.rsplit_once('@')?;
    let domain = domain.trim();

    (!domain.is_empty()).then_some(domain)
}

// Extracts the domain of the first address in a From header body.
fn header_from_domain(value: &[u8]) -> Option<String> {
    let value = value.to_str_lossy();

    let addr = match value.find('<') {
        Some(i) => {
            let rest = &value[i + 1..];
            &rest[..rest.find('>')?]
        }
        None => value
            .split(|c: char| c.is_whitespace() || c == ',')
            .find(|s| s.contains('@'))?,
    };

    let (_, domain) = addr.rsplit_once('@')?;
    let domain = domain.trim();

    (!domain.is_empty()).then(|| domain.into())
}

fn header_from_matches(header: &HeaderFields, domain: &DomainName) -> bool {
    header
        .get("From")
        .and_then(|value| header_from_domain(value.as_ref()))
        .and_then(|d| DomainName::normalize(&d).ok())
        .map_or(false, |d| d.eq_or_subdomain_of(domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_domain_ok() {
        assert_eq!(sender_domain("me@example.com"), Some("example.com"));
        assert_eq!(sender_domain("<me@Example.COM>"), Some("Example.COM"));
        assert_eq!(sender_domain("\"a@b\"@example.org"), Some("example.org"));
        assert_eq!(sender_domain("<>"), None);
        assert_eq!(sender_domain(""), None);
        assert_eq!(sender_domain("postmaster"), None);
        assert_eq!(sender_domain("me@"), None);
    }

    #[test]
    fn header_from_domain_ok() {
        assert_eq!(header_from_domain(b" me@example.com"), Some("example.com".into()));
        assert_eq!(
            header_from_domain(b" \"Me\" <me@mail.example.com>"),
            Some("mail.example.com".into())
        );
        assert_eq!(
            header_from_domain(b" me@example.com (Me Myself)"),
            Some("example.com".into())
        );
        assert_eq!(header_from_domain(b" undisclosed"), None);
        assert_eq!(header_from_domain(b" Me <me@example.com"), None);
    }

    #[test]
    fn header_from_matches_subdomain() {
        let domain = DomainName::new("example.com").unwrap();

        let header: HeaderFields = "From: me@mail.example.com\n".parse().unwrap();
        assert!(header_from_matches(&header, &domain));

        let header: HeaderFields = "From: Me <me@EXAMPLE.com>\n".parse().unwrap();
        assert!(header_from_matches(&header, &domain));

        let header: HeaderFields = "From: me@example.org\n".parse().unwrap();
        assert!(!header_from_matches(&header, &domain));

        let header: HeaderFields = "From: me@notexample.com\n".parse().unwrap();
        assert!(!header_from_matches(&header, &domain));
    }
}
