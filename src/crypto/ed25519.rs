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

use crate::crypto::CryptoError;
use ed25519_dalek::{Signer, SigningKey};

/// Signs the given message hash with Ed25519.
///
/// As specified in RFC 8463, PureEdDSA is applied to the SHA-256 hash of the
/// canonicalized data, not to the data itself.
pub fn sign_ed25519(signing_key: &SigningKey, data_hash: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signature = signing_key.try_sign(data_hash).map_err(|_| CryptoError)?;
    Ok(signature.to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{
        pkcs8::{DecodePrivateKey, DecodePublicKey},
        Signature, Verifier, VerifyingKey,
    };

    // Key pair from `openssl genpkey -algorithm Ed25519`, private key bytes
    // only, and the public key derived with `openssl pkey -pubout`.
    const PRIVATE_KEY_PEM: &str = include_str!("../../tests/keys/ed25519.pem");
    const PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MCowBQYDK2VwAyEA9VXMCgG0fXGIzwV7eOxKhz+Pe6DRmOBYjyvVoVrc/Dw=
-----END PUBLIC KEY-----
";

    #[test]
    fn sign_ed25519_verifies() {
        let signing_key = SigningKey::from_pkcs8_pem(PRIVATE_KEY_PEM).unwrap();
        let verifying_key = VerifyingKey::from_public_key_pem(PUBLIC_KEY_PEM).unwrap();

        assert_eq!(signing_key.verifying_key(), verifying_key);

        let data_hash = [7; 32];
        let signature = sign_ed25519(&signing_key, &data_hash).unwrap();

        let signature = Signature::from_slice(&signature).unwrap();
        assert!(verifying_key.verify(&data_hash, &signature).is_ok());
    }
}
