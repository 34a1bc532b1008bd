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

//! A DKIM signing modifier for outbound mail, implementing the signing side of
//! the *DomainKeys Identified Mail* (DKIM) specification described in
//! [RFC 6376].
//!
//! For every outbound message, the modifier decides whether to sign it based
//! on the envelope sender's domain, resolves the signing key and selector for
//! that domain, and prepends a `DKIM-Signature` header field to the message
//! header.
//!
//! The high-level API is in module `modifier`: a [`Modifier`] is configured
//! once and hands out a [`MessageState`] per message, which runs through the
//! sender and body hooks of the mail pipeline. Key material is loaded lazily
//! and cached by the [`KeyStore`]; which domains are signed is decided by a
//! [`DomainLookup`].
//!
//! The lower-level building blocks are available as well: the [`Signer`] can
//! be used on its own to sign a message with a given key, and modules
//! `canonicalize`, `crypto`, and `message_hash` contain the basic helpers for
//! canonicalisation, hashing, and cryptography.
//!
//! # Signing keys
//!
//! Keys are read from PEM files, in PKCS#8 (`PRIVATE KEY`) or, for RSA keys,
//! PKCS#1 (`RSA PRIVATE KEY`) format. Both RSA and Ed25519 ([RFC 8463]) keys
//! are supported; the signature algorithm follows from the key. RSA keys
//! smaller than 1024 bits are rejected, as required by [RFC 8301].
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8301]: https://www.rfc-editor.org/rfc/rfc8301
//! [RFC 8463]: https://www.rfc-editor.org/rfc/rfc8463

pub mod canonicalize;
pub mod crypto;
pub mod header;
pub mod key_store;
pub mod message_hash;
pub mod modifier;
pub mod policy;
pub mod signature;
pub mod signer;
mod util;

pub use crate::{
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    key_store::{FileKeySource, KeyRecord, KeySource, KeyStore, KeyStoreError},
    modifier::{
        ConfigError, FailurePolicy, MessageState, Modifier, ModifierConfig, ModifierError,
        SigningOutcome, SkipReason,
    },
    policy::{AllDomains, DomainLookup, DomainPolicy, StaticTable},
    signature::{DkimSignature, DomainName, Selector, SignatureAlgorithm},
    signer::{SignRequest, Signer, SigningError, SigningResult},
    util::{encode_base64, CanonicalStr},
};
