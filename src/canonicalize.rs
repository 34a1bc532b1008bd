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

//! Canonicalization of header and body, per RFC 6376, section 3.4.

use crate::{
    header::{FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

fn is_wsp(b: u8) -> bool {
    matches!(b, b'\t' | b' ')
}

/// A streaming canonicalizer for the message body.
///
/// Only CRLF is recognised as line terminator; stray CR and LF bytes are
/// treated like any other content byte. Line breaks are held back until more
/// content follows, so that trailing empty lines are dropped no matter how
/// the body is split into chunks.
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    cr: bool,  // last byte was CR, not yet known whether CRLF follows
    wsp: bool,  // relaxed only: whitespace seen but not yet written
    line_breaks: usize,  // line breaks held back
    content: bool,  // whether any content has been written
}

impl BodyCanonicalizer {
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            cr: false,
            wsp: false,
            line_breaks: 0,
            content: false,
        }
    }

    /// Canonicalizes a chunk of the body, returning the canonical bytes that
    /// can be produced so far.
    pub fn canonicalize_chunk(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(chunk.len());

        for &b in chunk {
            if self.cr {
                self.cr = false;
                if b == LF {
                    self.end_line();
                    continue;
                }
                self.write_content(&mut result, CR);
            }

            if b == CR {
                self.cr = true;
            } else if self.kind == CanonicalizationAlgorithm::Relaxed && is_wsp(b) {
                self.wsp = true;
            } else {
                self.write_content(&mut result, b);
            }
        }

        result
    }

    /// Finishes canonicalization, returning the final canonical bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        if self.cr {
            self.write_content(&mut result, CR);
        }

        // final whitespace without line break is dropped
        if self.content {
            result.extend(CRLF);
        } else if self.kind == CanonicalizationAlgorithm::Simple {
            // empty body is CRLF in simple canonicalization
            result.extend(CRLF);
        }

        result
    }

    fn end_line(&mut self) {
        self.wsp = false;
        self.line_breaks += 1;
    }

    fn write_content(&mut self, result: &mut Vec<u8>, b: u8) {
        for _ in 0..self.line_breaks {
            result.extend(CRLF);
        }
        self.line_breaks = 0;

        if self.wsp {
            result.push(SP);
            self.wsp = false;
        }

        result.push(b);
        self.content = true;
    }
}

/// Canonicalizes the header fields selected in `selected_headers`, in that
/// order.
///
/// Each name in `selected_headers` consumes the bottom-most not yet consumed
/// field of that name. Names for which no field remains contribute nothing,
/// which is what makes oversigning work.
pub fn canonicalize_headers(
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let fields = headers.as_ref();
    let mut consumed = vec![false; fields.len()];
    let mut result = vec![];

    for selected in selected_headers {
        let next = fields
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (name, _))| !consumed[*i] && name == selected);

        if let Some((i, (name, value))) = next {
            canonicalize_header(&mut result, canon_alg, name, value);
            result.extend(CRLF);
            consumed[i] = true;
        }
    }

    result
}

/// Canonicalizes a header field into some result vector. No trailing CRLF is
/// written.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_value_relaxed(result, value);
        }
    }
}

// Unfolds, collapses runs of whitespace into a single SP, and strips
// whitespace at both ends.
fn canonicalize_header_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let value = value.trim_with(is_space);

    let mut in_space = false;
    for &b in value {
        if is_space(b.into()) {
            in_space = true;
        } else {
            if in_space {
                result.push(SP);
                in_space = false;
            }
            result.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    #[test]
    fn canonicalize_headers_relaxed_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("from".to_owned(), b" Good \t ".to_vec()),
            ("to".to_owned(), b" see   me".to_vec()),
            ("Date".to_owned(), b" Fri 24\r\n\tfoo".to_vec()),
            ("To".to_owned(), b" another one".to_vec()),
        ])
        .unwrap();

        let selected_headers = [
            FieldName::new("to").unwrap(),
            FieldName::new("from").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("date").unwrap(),
        ];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Relaxed,
                &headers,
                &selected_headers,
            )),
            BStr::new(&b"to:another one\r\nfrom:Good\r\nto:see me\r\ndate:Fri 24 foo\r\n"[..]),
        );
    }

    #[test]
    fn canonicalize_headers_oversigned_name_contributes_nothing() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" me".to_vec()),
            ("Subject".to_owned(), b"  hello  there ".to_vec()),
        ])
        .unwrap();

        let selected_headers = [
            FieldName::new("From").unwrap(),
            FieldName::new("From").unwrap(),
            FieldName::new("Subject").unwrap(),
        ];

        assert_eq!(
            canonicalize_headers(CanonicalizationAlgorithm::Simple, &headers, &selected_headers),
            b"From: me\r\nSubject:  hello  there \r\n",
        );
    }

    #[test]
    fn body_canon_simple_ok() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Simple,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well  hello \r\n\r\n what agi \r\n"));
    }

    #[test]
    fn body_canon_simple_empty() {
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Simple, &[]), b"\r\n");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Simple, &[b"\r\n\r\n"]), b"\r\n");
    }

    #[test]
    fn body_canon_relaxed_basic() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Relaxed,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_canon_relaxed_small_chunks() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Relaxed,
            &[
                b"well ",
                b" hello ",
                b"\r",
                b"\n\r",
                b"\n what agi \r\n\r\n",
                b"\r\n",
            ],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_canon_relaxed_initial_empty_lines() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Relaxed,
            &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"\r\n\r\n\ra\r\nb c\r\n"));
    }

    #[test]
    fn body_canon_relaxed_empty() {
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Relaxed, &[]), b"");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Relaxed, &[b" \t\r\n\r\n"]), b"");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Relaxed, &[b"test"]), b"test\r\n");
    }

    fn canonicalize_chunks(kind: CanonicalizationAlgorithm, chunks: &[&[u8]]) -> Vec<u8> {
        let mut bc = BodyCanonicalizer::new(kind);
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canonicalize_chunk(c));
        }
        result.extend(bc.finish());
        result
    }
}
