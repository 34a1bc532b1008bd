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

//! Loading and caching of signing keys.
//!
//! Keys are read from a location derived from a [`KeyPathTemplate`] and cached
//! per (domain, selector) pair for the lifetime of the [`KeyStore`]. At most
//! one load per pair is in flight at any time: concurrent first-time requests
//! wait for the same load and receive the same outcome. Failed loads are not
//! cached, so a key placed on disk later is picked up by the next request.

use crate::{
    crypto::{KeyError, SigningKey},
    signature::{DomainName, Selector, SignatureAlgorithm},
};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{
    fmt::{self, Display, Formatter},
    future::Future,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
    str::FromStr,
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{debug, trace};

/// The identifier of a signing key: domain and selector.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct KeyId {
    pub domain: DomainName,
    pub selector: Selector,
}

impl KeyId {
    pub fn new(domain: DomainName, selector: Selector) -> Self {
        Self { domain, selector }
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}._domainkey.{}", self.selector, self.domain)
    }
}

/// A loaded signing key, ready for use.
#[derive(Debug)]
pub struct KeyRecord {
    pub domain: DomainName,
    pub selector: Selector,
    /// The signature algorithm, derived from the key type.
    pub algorithm: SignatureAlgorithm,
    pub signing_key: Arc<SigningKey>,
}

/// A source of PEM-encoded key material.
///
/// The default source is the file system, see [`FileKeySource`]. Other
/// sources can be plugged in, for example to read keys from a secrets store,
/// or to observe loads in tests.
pub trait KeySource: Send + Sync {
    /// Reads the key material stored at the given path.
    ///
    /// A missing key must be reported as an error of kind
    /// [`ErrorKind::NotFound`].
    fn read_key<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = io::Result<String>> + Send + 'a>>;
}

/// A key source that reads key files from the file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileKeySource;

impl KeySource for FileKeySource {
    fn read_key<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = io::Result<String>> + Send + 'a>> {
        Box::pin(tokio::fs::read_to_string(path))
    }
}

/// An error that occurs when parsing a key path template.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("key path template is empty")]
    Empty,
    #[error("key path template does not contain {{domain}} placeholder")]
    MissingDomain,
    #[error("unknown placeholder {{{0}}} in key path template")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace in key path template")]
    UnbalancedBrace,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum TemplatePart {
    Literal(String),
    Domain,
    Selector,
}

/// A template for the location of key files.
///
/// The placeholders `{domain}` and `{selector}` are replaced with the
/// normalized domain name and the selector. `{domain}` is required.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPathTemplate {
    template: String,
    parts: Vec<TemplatePart>,
}

impl KeyPathTemplate {
    /// Returns the path for the given domain and selector.
    pub fn render(&self, domain: &DomainName, selector: &Selector) -> PathBuf {
        let mut path = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => path.push_str(s),
                TemplatePart::Domain => path.push_str(domain.as_ref()),
                TemplatePart::Selector => path.push_str(selector.as_ref()),
            }
        }
        path.into()
    }
}

impl FromStr for KeyPathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut parts = vec![];
        let mut rest = s;

        while !rest.is_empty() {
            match rest.find(['{', '}']) {
                None => {
                    parts.push(TemplatePart::Literal(rest.into()));
                    break;
                }
                Some(i) => {
                    let (literal, tail) = rest.split_at(i);
                    if !literal.is_empty() {
                        parts.push(TemplatePart::Literal(literal.into()));
                    }

                    let tail = tail.strip_prefix('{').ok_or(TemplateError::UnbalancedBrace)?;
                    let (name, tail) = tail.split_once('}').ok_or(TemplateError::UnbalancedBrace)?;

                    parts.push(match name {
                        "domain" => TemplatePart::Domain,
                        "selector" => TemplatePart::Selector,
                        name if name.contains('{') => return Err(TemplateError::UnbalancedBrace),
                        name => return Err(TemplateError::UnknownPlaceholder(name.into())),
                    });

                    rest = tail;
                }
            }
        }

        if !parts.contains(&TemplatePart::Domain) {
            return Err(TemplateError::MissingDomain);
        }

        Ok(Self {
            template: s.into(),
            parts,
        })
    }
}

impl Display for KeyPathTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// The reason why no usable key was found.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MissingKey {
    #[error("no such file")]
    NoSuchFile,
    #[error(transparent)]
    Invalid(#[from] KeyError),
}

/// An error that occurs when resolving a key.
///
/// Errors are shared among all callers waiting for the same load, and are
/// therefore cloneable.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum KeyStoreError {
    /// The key file is absent or does not contain a usable key.
    #[error("no usable key at {}: {cause}", path.display())]
    NotFound { path: PathBuf, cause: MissingKey },
    /// Some other I/O error occurred while reading the key file.
    #[error("could not read key at {}: {kind}", path.display())]
    Io { path: PathBuf, kind: ErrorKind },
    /// The load was interrupted before producing a result.
    #[error("key load aborted")]
    LoadAborted,
}

type LoadOutcome = Result<Arc<KeyRecord>, KeyStoreError>;

/// A concurrent cache of signing keys with single-flight loading.
pub struct KeyStore {
    template: KeyPathTemplate,
    source: Arc<dyn KeySource>,
    cache: Arc<DashMap<KeyId, Arc<KeyRecord>>>,
    in_flight: Arc<DashMap<KeyId, watch::Receiver<Option<LoadOutcome>>>>,
}

impl KeyStore {
    pub fn new(template: KeyPathTemplate, source: Arc<dyn KeySource>) -> Self {
        Self {
            template,
            source,
            cache: Default::default(),
            in_flight: Default::default(),
        }
    }

    pub fn template(&self) -> &KeyPathTemplate {
        &self.template
    }

    /// Returns the number of keys currently cached.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Resolves the signing key for the given domain and selector.
    ///
    /// Cached keys are returned without waiting. Otherwise the key is loaded
    /// in a spawned task, which completes and populates the cache even when
    /// the caller goes away. Must be called within a Tokio runtime.
    pub async fn resolve(
        &self,
        domain: &DomainName,
        selector: &Selector,
    ) -> Result<Arc<KeyRecord>, KeyStoreError> {
        let id = KeyId::new(domain.clone(), selector.clone());

        if let Some(record) = self.cache.get(&id) {
            trace!(key = %id, "signing key found in cache");
            return Ok(record.value().clone());
        }

        let mut rx = match self.in_flight.entry(id.clone()) {
            Entry::Occupied(entry) => {
                trace!(key = %id, "waiting for signing key load in flight");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // a load may have completed just before the entry was taken
                if let Some(record) = self.cache.get(&id) {
                    return Ok(record.value().clone());
                }

                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());
                self.spawn_load(id, tx);
                rx
            }
        };

        let outcome = {
            let outcome = rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| KeyStoreError::LoadAborted)?;
            (*outcome).clone()
        };

        outcome.unwrap_or(Err(KeyStoreError::LoadAborted))
    }

    fn spawn_load(&self, id: KeyId, tx: watch::Sender<Option<LoadOutcome>>) {
        let path = self.template.render(&id.domain, &id.selector);
        let source = self.source.clone();
        let cache = self.cache.clone();
        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            id: id.clone(),
        };

        tokio::spawn(async move {
            // removes the in-flight entry on every exit path, also on panic
            let _guard = guard;

            debug!(key = %id, path = %path.display(), "loading signing key");

            let outcome = load_key(&*source, &path, &id).await;

            match &outcome {
                Ok(record) => {
                    debug!(key = %id, algorithm = %record.algorithm, "signing key loaded");
                    cache.insert(id, record.clone());
                }
                Err(e) => {
                    debug!(key = %id, "signing key not loaded: {e}");
                }
            }

            tx.send_replace(Some(outcome));
        });
    }

    /// Loads the keys for the given pairs ahead of time.
    ///
    /// Keys that cannot be loaded are skipped. Returns the number of keys
    /// available in the cache for the given pairs.
    pub async fn prewarm<I>(&self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (DomainName, Selector)>,
    {
        let mut loaded = 0;

        for (domain, selector) in pairs {
            match self.resolve(&domain, &selector).await {
                Ok(_) => loaded += 1,
                Err(e) => {
                    debug!(%domain, %selector, "key not available for pre-warming: {e}");
                }
            }
        }

        loaded
    }
}

struct InFlightGuard {
    in_flight: Arc<DashMap<KeyId, watch::Receiver<Option<LoadOutcome>>>>,
    id: KeyId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

async fn load_key(source: &dyn KeySource, path: &Path, id: &KeyId) -> LoadOutcome {
    let pem = source.read_key(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeyStoreError::NotFound {
            path: path.into(),
            cause: MissingKey::NoSuchFile,
        },
        kind => KeyStoreError::Io {
            path: path.into(),
            kind,
        },
    })?;

    let signing_key = SigningKey::from_pem(&pem).map_err(|e| KeyStoreError::NotFound {
        path: path.into(),
        cause: e.into(),
    })?;

    Ok(Arc::new(KeyRecord {
        domain: id.domain.clone(),
        selector: id.selector.clone(),
        algorithm: SignatureAlgorithm::from_key_type(signing_key.key_type()),
        signing_key: Arc::new(signing_key),
    }))
}
