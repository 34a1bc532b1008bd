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
    header::FieldName,
    signature::{Canonicalization, DomainName, Selector, SignatureAlgorithm},
    signer::OutputFormat,
    util::{self, CanonicalStr},
};
use std::iter;

// Note: Careful with offsets: formatting works with *characters*, not bytes!

/// DKIM signature data that does not yet have a cryptographic signature.
pub struct UnsignedDkimSignature<'a> {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: &'a [u8],
    pub canonicalization: Canonicalization,
    pub domain: &'a DomainName,
    pub signed_headers: &'a [FieldName],
    pub selector: &'a Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

pub const LINE_WIDTH: usize = 78;

// Ephemeral context holding current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

/// Returns the formatted header value without the *b=* tag value, and the
/// index where the *b=* tag value is to be inserted.
///
/// The tag order is fixed, *b=* always comes last. The value starts with a
/// space, as it is meant to be appended to the header name plus colon.
pub fn format_without_signature(
    sig: &UnsignedDkimSignature<'_>,
    format: &OutputFormat,
) -> (String, usize) {
    let width = format.line_width.into();
    let indent = &format.indentation[..];

    let mut out = String::new();
    // the cursor starts just past header name + ':'
    let mut i = format.header_name.chars().count() + 1;

    let fmt = Fmt { width, indent, last: false };

    let out_ = &mut out;
    let i_ = &mut i;

    format_tag(out_, i_, fmt, "v", "1");
    format_tag(out_, i_, fmt, "a", sig.algorithm.canonical_str());
    format_tag(out_, i_, fmt, "c", sig.canonicalization.canonical_str());
    format_tag(out_, i_, fmt, "d", sig.domain.as_ref());
    format_tag(out_, i_, fmt, "s", sig.selector.as_ref());
    if let Some(timestamp) = sig.timestamp {
        format_tag(out_, i_, fmt, "t", &timestamp.to_string());
    }
    if let Some(expiration) = sig.expiration {
        format_tag(out_, i_, fmt, "x", &expiration.to_string());
    }
    format_tag_h(out_, i_, fmt, sig.signed_headers);
    format_tag_bh(out_, i_, fmt, sig.body_hash);

    let insertion_i = format_tag_name_b(out_, i_, Fmt { last: true, ..fmt });

    (out, insertion_i)
}

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    let Fmt { last, .. } = fmt;

    // name + '=' + val [+ ';']
    let taglen = name.len() + value.chars().count() + if last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(name);
    out.push('=');
    out.push_str(value);

    if !last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[FieldName]) {
    let Fmt { last, .. } = fmt;

    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let Some(first_name) = names.next() else {
        return;
    };

    // "h=" + name [+ ';'/':']
    let taglen = first_name.chars().count() + if names.peek().is_none() && last { 2 } else { 3 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str("h=");
    out.push_str(first_name);
    // the following ':' or ';' is already accounted for in `i`

    while let Some(name) = names.next() {
        out.push(':');

        // name [+ ';'/':']
        let len = name.chars().count() + if names.peek().is_none() && last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
    }

    if !last {
        out.push(';');
    }
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[u8]) {
    let Fmt { last, .. } = fmt;

    let value = util::encode_base64(value);

    // "bh=" + 1 char (we prefer at least one additional char behind =)
    advance_i_initial(out, i, 4, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("bh=");

    format_chunks_into_string(out, i, fmt, &value);

    // if final chunk makes line *width* chars long, the final ; will be
    // appended nevertheless (giving a width of *width + 1*; this is fine)
    if !last {
        out.push(';');
        *i += 1;
    }
}

// Writes "b=" and returns the index where the value is to be inserted.
fn format_tag_name_b(out: &mut String, i: &mut usize, fmt: Fmt<'_>) -> usize {
    // "b=" + 1 char (we prefer at least one additional char behind =)
    advance_i_initial(out, i, 3, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("b=");

    out.len()
}

/// Advances the cursor `i`, making space for an item of length `len`, inserting
/// line break and indentation if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if *i + len <= width {
        *i += len;
    } else {
        out.push_str("\r\n");
        out.push_str(indent);
        *i = indent.len() + len;
    }
}

// Like `advance_i`, but for the start of a tag, which is preceded by SP when
// it stays on the current line.
fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if *i + len + 1 <= width {
        out.push(' ');
        *i += len + 1;
    } else {
        out.push_str("\r\n");
        out.push_str(indent);
        *i = indent.len() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, fmt: Fmt<'_>, mut s: &str) {
    let Fmt { width, indent, .. } = fmt;

    let first_chunk_len = width.saturating_sub(*i).min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent.len()).max(1);  // no empty chunks
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            return None;
        }
        let c = match s.char_indices().nth(chunk_width) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let chunk;
        (chunk, s) = s.split_at(c);
        Some(chunk)
    });

    for chunk in chunks {
        out.push_str("\r\n");
        out.push_str(indent);
        out.push_str(chunk);
        *i = chunk.chars().count() + indent.len();
    }
}

/// Inserts the Base64-encoded signature data at the insertion index, folding
/// it across lines as necessary.
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    format: &OutputFormat,
    signature_data: &[u8],
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let fmt = Fmt {
        width: format.line_width.into(),
        indent: &format.indentation,
        last: true,
    };

    let s = util::encode_base64(signature_data);

    // find the cursor position on the line where the value goes
    let formatted_header_pre = &formatted_header[..insertion_index];
    let (last_line, folded) = match formatted_header_pre.rsplit_once("\r\n") {
        Some((_, last_line)) => (last_line, true),
        None => (formatted_header_pre, false),
    };
    let mut len = if folded {
        last_line.chars().count()
    } else {
        format.header_name.chars().count() + 1 + last_line.chars().count()
    };

    let mut result = String::with_capacity(s.len() + s.len() / 32);
    format_chunks_into_string(&mut result, &mut len, fmt, &s);

    formatted_header.insert_str(insertion_index, &result);
}
