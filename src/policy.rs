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

//! Domain policy: which sender domains are signed, and with which selector.

use crate::signature::{DomainName, ParseDomainError, Selector};
use std::collections::HashMap;

/// The signing policy for a domain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DomainPolicy {
    /// Messages from the domain are not signed.
    Ineligible,
    /// Messages from the domain are signed, with the given selector or, if
    /// absent, the default selector.
    Eligible { selector: Option<Selector> },
}

/// A lookup deciding whether a domain is eligible for signing.
///
/// Implementations answer from static configuration and are queried
/// concurrently from many message flows.
pub trait DomainLookup: Send + Sync {
    /// Looks up the policy for a domain. The domain is given in normalized
    /// form.
    fn lookup(&self, domain: &DomainName) -> DomainPolicy;

    /// Returns all domains with a known policy, if the lookup can enumerate
    /// them. Used for loading keys ahead of time.
    fn domains(&self) -> Option<Vec<(DomainName, Option<Selector>)>> {
        None
    }
}

/// A lookup where every domain is eligible, with the default selector.
///
/// Whether a message is actually signed is then decided by the existence of
/// a key for the domain.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllDomains;

impl DomainLookup for AllDomains {
    fn lookup(&self, _domain: &DomainName) -> DomainPolicy {
        DomainPolicy::Eligible { selector: None }
    }
}

/// An in-memory table of eligible domains.
///
/// Domains absent from the table are never signed.
#[derive(Clone, Debug, Default)]
pub struct StaticTable {
    entries: HashMap<DomainName, Option<Selector>>,
}

impl StaticTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a table from (domain, selector) pairs. See
    /// [`insert`][Self::insert].
    pub fn from_entries<I, D, S>(entries: I) -> Result<Self, ParseDomainError>
    where
        I: IntoIterator<Item = (D, S)>,
        D: AsRef<str>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for (domain, selector) in entries {
            table.insert(domain.as_ref(), selector.as_ref())?;
        }
        Ok(table)
    }

    /// Adds a domain to the table. An empty selector string means the default
    /// selector is used for the domain.
    pub fn insert(&mut self, domain: &str, selector: &str) -> Result<(), ParseDomainError> {
        let domain = DomainName::normalize(domain)?;
        let selector = match selector.trim() {
            "" => None,
            s => Some(Selector::new(s)?),
        };
        self.entries.insert(domain, selector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DomainLookup for StaticTable {
    fn lookup(&self, domain: &DomainName) -> DomainPolicy {
        let Ok(domain) = DomainName::normalize(domain.as_ref()) else {
            return DomainPolicy::Ineligible;
        };

        match self.entries.get(&domain) {
            Some(selector) => DomainPolicy::Eligible {
                selector: selector.clone(),
            },
            None => DomainPolicy::Ineligible,
        }
    }

    fn domains(&self) -> Option<Vec<(DomainName, Option<Selector>)>> {
        Some(
            self.entries
                .iter()
                .map(|(domain, selector)| (domain.clone(), selector.clone()))
                .collect(),
        )
    }
}
