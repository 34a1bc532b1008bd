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
    crypto::{self, HashAlgorithm, SigningKey},
    header::{FieldName, HeaderFields},
    message_hash,
    signature::DkimSignature,
    signer::{
        format::{self, UnsignedDkimSignature},
        SignRequest, SigningError, SigningResult, Timestamp,
    },
};
use std::time::SystemTime;
use tracing::trace;

pub fn perform_signing<T>(
    request: SignRequest<T>,
    headers: &HeaderFields,
    signed_headers: Vec<FieldName>,
    body_hash: Box<[u8]>,
) -> Result<SigningResult, SigningError>
where
    T: AsRef<SigningKey>,
{
    let algorithm = request.algorithm;
    let canonicalization = request.canonicalization;

    // calculate timestamp and expiration

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => now_unix_secs(),
        Timestamp::Exact(t) => t,
    });

    let expiration = request.valid_duration.map(|duration| {
        timestamp.unwrap_or_else(now_unix_secs)
            .saturating_add(duration.as_secs())
    });

    // prepare complete formatted signature header with body hash except with contents of b= tag

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash: &body_hash,
        canonicalization,
        domain: &request.domain,
        signed_headers: &signed_headers,
        selector: &request.selector,
        timestamp,
        expiration,
    };

    let (mut formatted_header_value, insertion_index) =
        format::format_without_signature(&sig, &request.format);

    let header_name = &request.format.header_name;
    let hash_alg = algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        canonicalization.header,
        headers,
        &signed_headers,
        header_name,
        &formatted_header_value,
    );

    let signing_key = request.signing_key.as_ref();

    if signing_key.key_type() != algorithm.key_type() {
        return Err(SigningError::KeyTypeMismatch);
    }

    let signature_data = sign_hash(signing_key, hash_alg, &data_hash)?.into_boxed_slice();

    // insert signature into formatted dkim-sig header

    format::insert_signature_data(
        &mut formatted_header_value,
        insertion_index,
        &request.format,
        &signature_data,
    );

    let signature = DkimSignature {
        algorithm,
        signature_data,
        body_hash,
        canonicalization,
        domain: request.domain,
        signed_headers: signed_headers.into(),
        selector: request.selector,
        timestamp,
        expiration,
    };

    Ok(SigningResult {
        signature,
        header_name: request.format.header_name,
        header_value: formatted_header_value,
    })
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}

fn sign_hash(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
) -> Result<Vec<u8>, SigningError> {
    match signing_key {
        SigningKey::Rsa(k) => match crypto::sign_rsa(hash_alg, k, data_hash) {
            Ok(s) => {
                trace!("RSA signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("RSA signing failed: {e}");
                Err(SigningError::SigningFailure)
            }
        },
        SigningKey::Ed25519(k) => match crypto::sign_ed25519(k, data_hash) {
            Ok(s) => {
                trace!("Ed25519 signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("Ed25519 signing failed: {e}");
                Err(SigningError::SigningFailure)
            }
        },
    }
}
