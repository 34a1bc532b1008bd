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

//! Signer and supporting types.
//!
//! A [`Signer`] is prepared from a [`SignRequest`] and the message header,
//! fed the message body in chunks, and finally produces a [`SigningResult`]
//! holding the formatted *DKIM-Signature* header field.

mod format;
mod sign;

use crate::{
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    message_hash::BodyHasher,
    signature::{
        Canonicalization, DkimSignature, DomainName, Selector, SignatureAlgorithm,
        DKIM_SIGNATURE_NAME,
    },
};
use std::{num::NonZeroUsize, time::Duration};
use tracing::trace;

/// The default validity period of a signature: five days.
pub const DEFAULT_VALID_DURATION: Duration = Duration::from_secs(60 * 60 * 24 * 5);

const DEFAULT_OVERSIGNED_HEADERS: &[&str] = &[
    "From",
    "Subject",
    "Sender",
    "To",
    "Cc",
    "Date",
    "MIME-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
    "Reply-To",
    "In-Reply-To",
    "Message-ID",
    "References",
    "Autocrypt",
    "OpenPGP",
];

const DEFAULT_SIGNED_HEADERS: &[&str] = &[
    "List-Id",
    "List-Help",
    "List-Unsubscribe",
    "List-Post",
    "List-Owner",
    "List-Archive",
    "Resent-To",
    "Resent-Sender",
    "Resent-Message-ID",
    "Resent-Date",
    "Resent-From",
    "Resent-Cc",
];

/// Returns the default header fields to oversign.
///
/// Oversigned header fields are listed in the *h=* tag once more than they
/// occur in the message, which prevents another instance of the header field
/// from being added to the message later.
pub fn default_oversigned_headers() -> Vec<FieldName> {
    to_field_names(DEFAULT_OVERSIGNED_HEADERS)
}

/// Returns the default header fields to sign, in addition to the oversigned
/// ones.
pub fn default_signed_headers() -> Vec<FieldName> {
    to_field_names(DEFAULT_SIGNED_HEADERS)
}

fn to_field_names(names: &[&str]) -> Vec<FieldName> {
    names
        .iter()
        .map(|name| FieldName::new(*name).expect("invalid default header name"))
        .collect()
}

/// Selects the header fields to include in the *h=* tag.
///
/// Every occurrence of a signed or oversigned header field is included, in
/// the order in which they are processed during canonicalization, that is,
/// bottom-up. For each oversigned header field present in the message one
/// more entry is added at the end. Header fields absent from the message are
/// not included at all.
pub fn select_signed_headers(
    headers: &HeaderFields,
    signed_headers: &[FieldName],
    oversigned_headers: &[FieldName],
) -> Vec<FieldName> {
    let mut result: Vec<FieldName> = headers
        .as_ref()
        .iter()
        .rev()
        .map(|(name, _)| name)
        .filter(|name| signed_headers.contains(name) || oversigned_headers.contains(name))
        .cloned()
        .collect();

    let mut extra = vec![];
    for name in oversigned_headers {
        if result.contains(name) && !extra.contains(name) {
            extra.push(name.clone());
        }
    }

    result.extend(extra);
    result
}

/// Timestamp of a signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Timestamp {
    /// The current time at signing.
    Now,
    /// An exact Unix timestamp.
    Exact(u64),
}

/// Formatting options for the *DKIM-Signature* header field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputFormat {
    pub header_name: String,
    pub line_width: NonZeroUsize,
    pub indentation: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: NonZeroUsize::new(format::LINE_WIDTH).unwrap(),
            indentation: "\t".into(),
        }
    }
}

/// A request for creating a DKIM signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignRequest<T> {
    pub domain: DomainName,
    pub selector: Selector,
    pub algorithm: SignatureAlgorithm,
    pub signing_key: T,

    pub canonicalization: Canonicalization,
    pub signed_headers: Vec<FieldName>,
    pub oversigned_headers: Vec<FieldName>,

    pub timestamp: Option<Timestamp>,
    pub valid_duration: Option<Duration>,

    pub format: OutputFormat,
}

impl<T> SignRequest<T>
where
    T: AsRef<SigningKey>,
{
    /// Creates a new signing request with default settings for the given
    /// domain and selector. The signature algorithm follows from the key.
    pub fn new(domain: DomainName, selector: Selector, signing_key: T) -> Self {
        let algorithm = SignatureAlgorithm::from_key_type(signing_key.as_ref().key_type());

        Self {
            domain,
            selector,
            algorithm,
            signing_key,

            canonicalization: Default::default(),
            signed_headers: default_signed_headers(),
            oversigned_headers: default_oversigned_headers(),

            timestamp: Some(Timestamp::Now),
            valid_duration: Some(DEFAULT_VALID_DURATION),

            format: Default::default(),
        }
    }
}

/// An error that occurs when signing a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SigningError {
    #[error("no From header field in message")]
    MissingFromHeader,
    #[error("From header field not among signed header fields")]
    FromHeaderNotSigned,
    #[error("header field name not usable in signature")]
    InvalidSignedFieldName,
    #[error("signing key does not match signature algorithm")]
    KeyTypeMismatch,
    #[error("failed to produce cryptographic signature")]
    SigningFailure,
    #[error("failed to format signature header field")]
    Format,
}

/// The result of a successful signing operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningResult {
    pub signature: DkimSignature,
    /// The header field name. The name and value are meant to be joined with
    /// only an intervening colon: whitespace changes would break *simple*
    /// header canonicalization.
    pub header_name: String,
    pub header_value: String,
}

impl SigningResult {
    /// Formats the signature as a complete header field, without trailing
    /// CRLF.
    pub fn format_header(&self) -> String {
        format!("{}:{}", self.header_name, self.header_value)
    }

    /// Converts the result into a header field, suitable for prepending to a
    /// header block.
    pub fn into_header_field(self) -> Result<HeaderField, SigningError> {
        let name = FieldName::new(self.header_name).map_err(|_| SigningError::Format)?;
        let body = FieldBody::new(self.header_value.into_bytes()).map_err(|_| SigningError::Format)?;
        Ok((name, body))
    }
}

/// A signer for an email message.
pub struct Signer<T> {
    request: SignRequest<T>,
    headers: HeaderFields,
    signed_headers: Vec<FieldName>,
    body_hasher: BodyHasher,
}

impl<T> Signer<T>
where
    T: AsRef<SigningKey>,
{
    /// Prepares a message signing process.
    ///
    /// Problems with the request or the message header are reported here,
    /// before any body data is processed.
    pub fn prepare_signing(request: SignRequest<T>, headers: HeaderFields) -> Result<Self, SigningError> {
        if headers.get("From").is_none() {
            return Err(SigningError::MissingFromHeader);
        }

        if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
            return Err(SigningError::KeyTypeMismatch);
        }

        let signed_headers = select_signed_headers(
            &headers,
            &request.signed_headers,
            &request.oversigned_headers,
        );

        if !signed_headers.iter().any(|name| *name == "From") {
            return Err(SigningError::FromHeaderNotSigned);
        }
        // must not attempt to sign header names containing ';' (incompatible with DKIM-Signature)
        if signed_headers.iter().any(|name| name.as_ref().contains(';')) {
            return Err(SigningError::InvalidSignedFieldName);
        }

        trace!(?signed_headers, "selected header fields to sign");

        let body_hasher = BodyHasher::new(
            request.algorithm.hash_algorithm(),
            request.canonicalization.body,
        );

        Ok(Self {
            request,
            headers,
            signed_headers,
            body_hasher,
        })
    }

    /// Processes a chunk of the message body.
    ///
    /// Note that the chunk is canonicalised and hashed, but not otherwise
    /// retained in memory.
    pub fn body_chunk(&mut self, chunk: &[u8]) {
        self.body_hasher.hash_chunk(chunk);
    }

    /// Finishes the signing process, producing the signature.
    pub fn finish(self) -> Result<SigningResult, SigningError> {
        let Self { request, headers, signed_headers, body_hasher } = self;

        let (body_hash, body_len) = body_hasher.finish();

        trace!(body_len, "computed body hash");

        sign::perform_signing(request, &headers, signed_headers, body_hash)
    }
}

/// Signs a message given as header and complete body.
pub fn sign<T>(
    request: SignRequest<T>,
    headers: &HeaderFields,
    body: &[u8],
) -> Result<SigningResult, SigningError>
where
    T: AsRef<SigningKey>,
{
    let mut signer = Signer::prepare_signing(request, headers.clone())?;
    signer.body_chunk(body);
    signer.finish()
}
