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

use crate::crypto::{CryptoError, HashAlgorithm};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;

/// The minimum acceptable RSA key size, see RFC 8301.
pub const MIN_RSA_KEY_BITS: usize = 1024;

/// Signs the given message hash with RSASSA-PKCS1-v1_5.
pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    data_hash: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let result = match hash_alg {
        HashAlgorithm::Sha256 => private_key.sign(Pkcs1v15Sign::new::<Sha256>(), data_hash),
    };

    result.map_err(|_| CryptoError)
}
