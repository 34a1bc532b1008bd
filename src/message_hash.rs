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

//! Computation of the message hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{DigestHasher, HashAlgorithm},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DKIM_SIGNATURE_NAME},
};

/// Computes the hash of the header data that the signature covers: the
/// selected header fields, followed by the *DKIM-Signature* header field
/// itself with an empty *b=* tag value, without trailing CRLF.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_header_name: &str,
    formatted_dkim_sig_header_value: &str,
) -> Box<[u8]> {
    debug_assert!(dkim_sig_header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME));

    let mut cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    canonicalize::canonicalize_header(
        &mut cheaders,
        canon_alg,
        dkim_sig_header_name,
        formatted_dkim_sig_header_value,
    );

    let mut hasher = DigestHasher::new(hash_alg);
    hasher.update(&cheaders);
    hasher.finish()
}

/// A producer of the *body hash*.
///
/// The body hasher canonicalises and hashes chunks of the message body as
/// they come in. Chunks are not retained in memory.
pub struct BodyHasher {
    canonicalizer: BodyCanonicalizer,
    hasher: DigestHasher,
}

impl BodyHasher {
    pub fn new(hash_alg: HashAlgorithm, canon_alg: CanonicalizationAlgorithm) -> Self {
        Self {
            canonicalizer: BodyCanonicalizer::new(canon_alg),
            hasher: DigestHasher::new(hash_alg),
        }
    }

    pub fn hash_chunk(&mut self, chunk: &[u8]) {
        let canonicalized_chunk = self.canonicalizer.canonicalize_chunk(chunk);
        self.hasher.update(&canonicalized_chunk);
    }

    /// Finishes hashing, returning the body hash and the length of the
    /// canonicalized body.
    pub fn finish(self) -> (Box<[u8]>, usize) {
        let Self { canonicalizer, mut hasher } = self;

        let final_chunk = canonicalizer.finish();
        hasher.update(&final_chunk);

        let len = hasher.bytes_written();
        (hasher.finish(), len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util;

    #[test]
    fn body_hasher_simple_and_relaxed() {
        let mut simple = BodyHasher::new(HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
        let mut relaxed = BodyHasher::new(HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);

        simple.hash_chunk(b"abc \r\n");
        relaxed.hash_chunk(b"abc \r\n");

        assert_eq!(simple.finish().1, 6);
        assert_eq!(relaxed.finish().1, 5);
    }

    #[test]
    fn body_hasher_empty_body() {
        // See RFC 6376, §3.4.3 and §3.4.4:
        let simple = BodyHasher::new(HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
        let relaxed = BodyHasher::new(HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);

        assert_eq!(
            util::encode_base64(simple.finish().0),
            "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY="
        );
        assert_eq!(
            util::encode_base64(relaxed.finish().0),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn body_hasher_known_hash_sample() {
        let mut hasher = BodyHasher::new(HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);

        let body = b"\
Hello Proff,\r\n\
\r\n\
Let\xe2\x80\x99s try this again, with line\r\n\
breaks and empty lines even.\r\n\
\r\n\
Ciao, und bis bald\r\n\
\r\n\
\r\n\
-- \r\n\
David\r\n\
";

        let (head, tail) = body.split_at(40);
        hasher.hash_chunk(head);
        hasher.hash_chunk(tail);

        let (hash, _) = hasher.finish();
        assert_eq!(
            util::encode_base64(hash),
            "RMSbeRTj/zCxWeWQXpEIbiqxH0Jqg5eYs4ORzOt3MT0="
        );
    }

    #[test]
    fn data_hash_includes_signature_header() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" me@example.com".to_vec()),
            ("To".to_owned(), b" you@example.org".to_vec()),
        ])
        .unwrap();
        let selected = [FieldName::new("From").unwrap(), FieldName::new("To").unwrap()];

        let hash = compute_data_hash(
            HashAlgorithm::Sha256,
            CanonicalizationAlgorithm::Relaxed,
            &headers,
            &selected,
            DKIM_SIGNATURE_NAME,
            " v=1; d=example.com; b=",
        );

        let expected = crate::crypto::digest(
            HashAlgorithm::Sha256,
            b"from:me@example.com\r\nto:you@example.org\r\ndkim-signature:v=1; d=example.com; b=",
        );
        assert_eq!(hash, expected);
    }
}
