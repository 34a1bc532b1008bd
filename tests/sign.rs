pub mod common;

use dkim_modifier::{
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DomainName, Selector, SignatureAlgorithm},
    signer::{self, SignRequest, Signer, SigningError, Timestamp},
};
use std::sync::Arc;

fn make_request(pem: &str) -> SignRequest<Arc<SigningKey>> {
    let signing_key = Arc::new(SigningKey::from_pem(pem).unwrap());

    let mut request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        signing_key,
    );
    request.timestamp = Some(Timestamp::Exact(1686737001));

    request
}

#[test]
fn sign_rsa_relaxed_verifies() {
    let _ = tracing_subscriber::fmt::try_init();

    let headers = common::make_header_fields();
    let body = common::make_body();
    let request = make_request(common::RSA_KEY_PEM);
    let key = request.signing_key.clone();

    let result = signer::sign(request, &headers, &body).unwrap();

    assert_eq!(result.signature.algorithm, SignatureAlgorithm::RsaSha256);
    assert_eq!(result.signature.domain, DomainName::new("example.com").unwrap());
    assert_eq!(result.signature.selector, Selector::new("sel").unwrap());
    assert_eq!(result.signature.timestamp, Some(1686737001));
    assert_eq!(result.signature.expiration, Some(1686737001 + 432000));
    assert_eq!(result.signature.signature_data.len(), 256);

    common::verify(&result, &headers, &body, &key);
}

#[test]
fn sign_rsa_known_header() {
    let _ = tracing_subscriber::fmt::try_init();

    let headers = common::make_header_fields();
    let body = common::make_body();
    let request = make_request(common::RSA_KEY_PEM);

    let result = signer::sign(request, &headers, &body).unwrap();

    assert_eq!(
        result.format_header(),
        "\
DKIM-Signature: v=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=sel;\r
\tt=1686737001; x=1687169001; h=Subject:To:From:In-Reply-To:References:\r
\tContent-Transfer-Encoding:Content-Type:MIME-Version:Date:Message-ID:From:\r
\tSubject:To:Date:MIME-Version:Content-Type:Content-Transfer-Encoding:\r
\tIn-Reply-To:Message-ID:References; bh=T420K4OvEkfwWLlmQbDfdDNAwzp9ccnUY45mv/E\r
\tSMvg=; b=kpTlLvpncX8HNP0NlOrPhvXIDS3XpmJtqyhldtJx4oZdRNRGl0q8TY4At1fNtpc+9kNV\r
\t50DNk9SfmhBLj7ENuXWwLFboA5Hs6nvwEVtiT9nyg8O4C9DZBXjZBhKSKZWtPnic2pyYxd0tpzf/4\r
\tl78zLFxCxevHtRQyWHoXLtcS844kJ7hk7RO9EP8Ac80ZHWZ8h/ZUhrkXgwmFgp5sheFM71fZxlCrQ\r
\tGeC3+61zExnhsFnjlG3O+mtOS7OJns+l+ZNXuDcrl3rFrwCJ5yrUlQK/l5J0XEuDMXE+zT+5nzhlu\r
\t99ubS6EqU5+fXVC1oCyKf+bWlCmvTa9ORCsZv+VvqAw=="
    );
}

#[test]
fn sign_rsa_simple_verifies() {
    use CanonicalizationAlgorithm::*;

    let _ = tracing_subscriber::fmt::try_init();

    let headers = common::make_header_fields();
    let body = common::make_body();
    let mut request = make_request(common::RSA_KEY_PEM);
    request.canonicalization = (Simple, Simple).into();
    let key = request.signing_key.clone();

    let result = signer::sign(request, &headers, &body).unwrap();

    assert!(result.header_value.contains(" c=simple/simple;"));

    common::verify(&result, &headers, &body, &key);
}

#[test]
fn sign_ed25519_verifies() {
    let _ = tracing_subscriber::fmt::try_init();

    let headers = common::make_header_fields();
    let body = common::make_body();
    let request = make_request(common::ED25519_KEY_PEM);
    let key = request.signing_key.clone();

    let result = signer::sign(request, &headers, &body).unwrap();

    assert_eq!(result.signature.algorithm, SignatureAlgorithm::Ed25519Sha256);
    assert!(result.header_value.contains(" a=ed25519-sha256;"));
    assert_eq!(result.signature.signature_data.len(), 64);

    common::verify(&result, &headers, &body, &key);
}

#[test]
fn sign_deterministic() {
    let headers = common::make_header_fields();
    let body = common::make_body();

    for pem in [common::RSA_KEY_PEM, common::ED25519_KEY_PEM] {
        let result1 = signer::sign(make_request(pem), &headers, &body).unwrap();
        let result2 = signer::sign(make_request(pem), &headers, &body).unwrap();

        assert_eq!(result1.format_header(), result2.format_header());
        assert_eq!(result1.signature, result2.signature);
    }
}

#[test]
fn sign_oversigns_present_headers() {
    let headers = common::make_header_fields();
    let body = common::make_body();

    let result = signer::sign(make_request(common::ED25519_KEY_PEM), &headers, &body).unwrap();

    let signed_headers: Vec<_> = result
        .signature
        .signed_headers
        .iter()
        .map(|name| name.as_ref())
        .collect();

    // bottom-up occurrences, then one extra entry for each oversigned field
    assert_eq!(
        signed_headers,
        [
            "Subject",
            "To",
            "From",
            "In-Reply-To",
            "References",
            "Content-Transfer-Encoding",
            "Content-Type",
            "MIME-Version",
            "Date",
            "Message-ID",
            "From",
            "Subject",
            "To",
            "Date",
            "MIME-Version",
            "Content-Type",
            "Content-Transfer-Encoding",
            "In-Reply-To",
            "Message-ID",
            "References",
        ]
    );
    assert!(!signed_headers.contains(&"Cc"));
    assert!(!signed_headers.contains(&"List-Id"));
}

#[test]
fn sign_output_is_folded() {
    let headers = common::make_header_fields();
    let body = common::make_body();

    let result = signer::sign(make_request(common::RSA_KEY_PEM), &headers, &body).unwrap();

    let header = result.format_header();

    assert!(header.starts_with("DKIM-Signature: v=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com;"));
    assert!(header.split("\r\n").all(|line| line.chars().count() <= 79));
    assert!(header.split("\r\n").skip(1).all(|line| line.starts_with('\t')));
    assert!(!header.ends_with("\r\n"));
}

#[test]
fn sign_streaming_equals_oneshot() {
    let headers = common::make_header_fields();
    let body = common::make_body();

    let oneshot = signer::sign(make_request(common::ED25519_KEY_PEM), &headers, &body).unwrap();

    let mut signer = Signer::prepare_signing(make_request(common::ED25519_KEY_PEM), headers).unwrap();
    for chunk in body.chunks(3) {
        signer.body_chunk(chunk);
    }
    let streamed = signer.finish().unwrap();

    assert_eq!(oneshot, streamed);
}

#[test]
fn sign_prepends_before_existing_signature() {
    let mut headers: HeaderFields = "\
DKIM-Signature: v=1; a=rsa-sha256; d=example.org; s=old; b=abc
From: me@example.com
To: you@example.org
"
    .parse()
    .unwrap();
    let body = common::make_body();

    let result = signer::sign(make_request(common::ED25519_KEY_PEM), &headers, &body).unwrap();
    let field = result.into_header_field().unwrap();

    headers.prepend(field);

    let fields = headers.as_ref();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0].0, "DKIM-Signature");
    assert!(fields[0].1.as_ref().starts_with(b" v=1; a=ed25519-sha256;"));
    assert!(fields[1].1.as_ref().ends_with(b"s=old; b=abc"));
}

#[test]
fn sign_missing_from() {
    let headers: HeaderFields = "To: you@example.org\nSubject: hi\n".parse().unwrap();

    let result = signer::sign(make_request(common::RSA_KEY_PEM), &headers, b"");

    assert_eq!(result.unwrap_err(), SigningError::MissingFromHeader);
}

#[test]
fn sign_custom_header_lists() {
    let headers: HeaderFields = "\
From: me@example.com
List-Id: <list.example.com>
X-Custom: 1
"
    .parse()
    .unwrap();
    let body = common::make_body();

    let mut request = make_request(common::ED25519_KEY_PEM);
    request.signed_headers = vec![FieldName::new("X-Custom").unwrap()];
    request.oversigned_headers = vec![FieldName::new("From").unwrap()];
    request.valid_duration = None;
    let key = request.signing_key.clone();

    let result = signer::sign(request, &headers, &body).unwrap();

    assert!(result.header_value.contains(" h=X-Custom:From:From;"));
    assert!(!result.header_value.contains(" x="));

    common::verify(&result, &headers, &body, &key);
}
