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

use crate::crypto::HashAlgorithm;
use digest::DynDigest;
use sha2::Sha256;

/// Computes the message digest of the given bytes.
pub fn digest(hash_alg: HashAlgorithm, bytes: &[u8]) -> Box<[u8]> {
    let mut hasher = DigestHasher::new(hash_alg);
    hasher.update(bytes);
    hasher.finish()
}

/// An incremental hasher for one of the supported hash algorithms.
pub struct DigestHasher {
    digest: Box<dyn DynDigest + Send>,
    bytes_written: usize,
}

impl DigestHasher {
    pub fn new(hash_alg: HashAlgorithm) -> Self {
        let digest: Box<dyn DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
        };

        Self {
            digest,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
        self.bytes_written += bytes.len();
    }

    /// Returns the number of bytes digested so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn finish(self) -> Box<[u8]> {
        self.digest.finalize()
    }
}
