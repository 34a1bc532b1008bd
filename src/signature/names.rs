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

use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("could not parse domain name")]
pub struct ParseDomainError;

/// A domain name.
///
/// This type is used to wrap domain names as used in the *d=* tag. Labels are
/// restricted to letters, digits, hyphen, and underscore (non-ASCII letters
/// are allowed), so that a domain name can be safely substituted into a file
/// path.
#[derive(Clone, Eq)]
pub struct DomainName(Box<str>);

impl DomainName {
    /// Creates a new domain name from the given string.
    ///
    /// Note that the string is validated and then encapsulated as-is.
    /// Equivalence comparison is case-insensitive.
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if is_valid_dns_name(s) {
            Ok(Self(s.into()))
        } else {
            Err(ParseDomainError)
        }
    }

    /// Creates a domain name in normalized form: lowercase, in A-label form,
    /// without a trailing dot.
    ///
    /// Lookups and key paths always use the normalized form, so that
    /// `Example.COM.`, `example.com`, and their IDNA equivalents resolve to
    /// the same key.
    pub fn normalize(s: &str) -> Result<Self, ParseDomainError> {
        let s = s.strip_suffix('.').unwrap_or(s);
        let ascii = idna::domain_to_ascii(s).map_err(|_| ParseDomainError)?;
        Self::new(&ascii)
    }

    /// Returns whether this domain is equal to or a subdomain of the given
    /// domain, comparing in case-insensitive and IDNA-aware manner.
    pub fn eq_or_subdomain_of(&self, other: &DomainName) -> bool {
        if self == other {
            return true;
        }

        let (Ok(name), Ok(other)) = (
            idna::domain_to_ascii(&self.0),
            idna::domain_to_ascii(&other.0),
        ) else {
            return false;
        };

        if name.len() > other.len() {
            let len = name.len() - other.len();
            matches!(name.get(len..), Some(s) if s.eq_ignore_ascii_case(&other))
                && matches!(name.get(..len), Some(s) if s.ends_with('.'))
        } else {
            false
        }
    }
}

impl FromStr for DomainName {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

fn is_valid_dns_name(s: &str) -> bool {
    fn is_tld(s: &str) -> bool {
        is_label(s) && !s.chars().all(|c: char| c.is_ascii_digit())
    }

    if !has_valid_domain_len(s) {
        return false;
    }

    let mut labels = s.split('.').rev().peekable();

    if matches!(labels.next(), Some(l) if !is_tld(l)) {
        return false;
    }
    if labels.peek().is_none() {
        return false;
    }

    labels.all(is_label)
}

fn is_label(s: &str) -> bool {
    has_valid_label_len(s)
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_') || !c.is_ascii())
}

const MAX_DOMAIN_LENGTH: usize = 253;

fn has_valid_domain_len(s: &str) -> bool {
    matches!(s.len(), 1..=MAX_DOMAIN_LENGTH)
}

fn has_valid_label_len(s: &str) -> bool {
    matches!(s.len(), 1..=63)
}

/// A selector.
///
/// This type is used to wrap a sequence of labels as used in the *s=* tag.
#[derive(Clone, Eq)]
pub struct Selector(Box<str>);

impl Selector {
    /// Creates a new selector from the given string.
    ///
    /// An ASCII string is validated and then encapsulated as-is. A selector
    /// containing non-ASCII labels is stored in its A-label form, as that is
    /// the form published in DNS and written to the *s=* tag. Equivalence
    /// comparison is case-insensitive.
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        // lenient parsing of domain name labels, allows things like "dkim_123"
        if !s.split('.').all(is_label) {
            return Err(ParseDomainError);
        }

        // must survive conversion in both directions
        let ascii = idna::domain_to_ascii(s).map_err(|_| ParseDomainError)?;
        let (_, res) = idna::domain_to_unicode(s);
        if res.is_err() {
            return Err(ParseDomainError);
        }

        if s.is_ascii() {
            Ok(Self(s.into()))
        } else if ascii.split('.').all(has_valid_label_len) {
            Ok(Self(ascii.into()))
        } else {
            Err(ParseDomainError)
        }
    }
}

impl FromStr for Selector {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}
