use dkim_modifier::{
    header::{FieldName, HeaderFields},
    key_store::{FileKeySource, KeySource},
    message_hash::{self, BodyHasher},
    signer::SigningResult,
    crypto::SigningKey,
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::fs;

pub const RSA_KEY_PEM: &str = include_str!("../keys/rsa2048.pem");
pub const RSA_PKCS1_KEY_PEM: &str = include_str!("../keys/rsa2048_pkcs1.pem");
pub const ED25519_KEY_PEM: &str = include_str!("../keys/ed25519.pem");

/// A key source that counts the loads it performs, and takes its time
/// performing them.
#[derive(Clone, Default)]
pub struct CountingKeySource {
    loads: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<PathBuf>>>,
    delay: Duration,
}

impl CountingKeySource {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

impl KeySource for CountingKeySource {
    fn read_key<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = io::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().unwrap().push(path.into());
            tokio::time::sleep(self.delay).await;
            FileKeySource.read_key(path).await
        })
    }
}

pub async fn write_key(dir: &Path, file_name: &str, pem: &str) {
    fs::write(dir.join(file_name), pem).await.unwrap();
}

pub fn key_path_template(dir: &Path) -> String {
    format!("{}/{{domain}}_{{selector}}.key", dir.display())
}

pub fn make_header_fields() -> HeaderFields {
    "\
Message-ID: <1511928109048645963@example.com>
Date: Fri, 9 Jun 2023 16:13:12 +0200
MIME-Version: 1.0
Content-Type: text/plain; charset=utf-8
Content-Transfer-Encoding: 8bit
References: <4344283917108237944@example.org>
 <3993077819152979884@example.com>
In-Reply-To: <3993077819152979884@example.com>
From: me <me@example.com>
To: you@example.org
Subject: Re: Hello
"
    .parse()
    .unwrap()
}

pub fn make_body() -> Vec<u8> {
    b"\
Hello,\r
\r
this is  a message   with some   extra whitespace.  \r
\r
\r
"
    .to_vec()
}

/// Verifies a signature produced for the given message, as a verifier would:
/// by recomputing body hash and data hash, and checking the cryptographic
/// signature with the public key.
pub fn verify(result: &SigningResult, headers: &HeaderFields, body: &[u8], key: &SigningKey) {
    let sig = &result.signature;
    let hash_alg = sig.algorithm.hash_algorithm();

    let mut body_hasher = BodyHasher::new(hash_alg, sig.canonicalization.body);
    body_hasher.hash_chunk(body);
    let (body_hash, _) = body_hasher.finish();
    assert_eq!(body_hash, sig.body_hash, "body hash mismatch");

    let value = &result.header_value;
    let i = value.rfind("b=").unwrap();
    let unsigned_value = &value[..i + 2];

    let signed_headers: Vec<FieldName> = sig.signed_headers.to_vec();
    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &signed_headers,
        &result.header_name,
        unsigned_value,
    );

    match key {
        SigningKey::Rsa(k) => {
            let public_key = RsaPublicKey::from(k);
            public_key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &data_hash, &sig.signature_data)
                .expect("RSA signature does not verify");
        }
        SigningKey::Ed25519(k) => {
            let public_key = VerifyingKey::from(k);
            let signature = Signature::from_slice(&sig.signature_data).unwrap();
            public_key
                .verify(&data_hash, &signature)
                .expect("Ed25519 signature does not verify");
        }
    }
}
