//! Minimal DER builder and parser for PKCS#8 and SPKI key containers.
//!
//! Only the productions needed to wrap X25519, Ed25519, P-256 and P-384 keys
//! are supported: SEQUENCE, small INTEGER, OCTET STRING, BIT STRING, OBJECT
//! IDENTIFIER and constructed context-specific tags. Lengths use the short
//! form below 128 and at most two continuation bytes above it; anything of
//! 65536 bytes or more is rejected.
//!
//! The [`compat`] module holds byte-scanning fallbacks for non-canonical
//! encodings. They are never the primary decode path.

use thiserror::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

/// Class bits for a constructed, context-specific tag (`[n]`).
const CONTEXT_CONSTRUCTED: u8 = 0xA0;

/// Highest tag number that fits in the low-tag-number form.
const MAX_LOW_TAG_NUMBER: u8 = 30;

/// Largest encodable length (two continuation bytes).
pub const MAX_LENGTH: usize = 0xFFFF;

/// Largest INTEGER value the builder accepts.
pub const MAX_SMALL_INTEGER: u8 = 127;

/// Errors raised while building or parsing DER.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DerError {
    #[error("Length {0} exceeds the supported maximum of 65535 bytes")]
    LengthTooLarge(usize),

    #[error("INTEGER value {0} outside supported range 0..=127")]
    IntegerOutOfRange(u64),

    #[error("Invalid OID: {0}")]
    InvalidOid(String),

    #[error("Invalid context-specific tag number {0}")]
    InvalidContextTag(u8),

    #[error("Invalid BIT STRING: {0}")]
    InvalidBitString(String),

    #[error("Truncated input while reading {0}")]
    Truncated(&'static str),

    #[error("Unexpected tag: expected 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("Unsupported length encoding 0x{0:02x}")]
    UnsupportedLength(u8),

    #[error("{0} trailing bytes after structure")]
    TrailingData(usize),
}

/// Result type for DER operations.
pub type DerResult<T> = Result<T, DerError>;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Encode a definite length.
pub fn encode_length(len: usize) -> DerResult<Vec<u8>> {
    match len {
        0..=0x7F => Ok(vec![len as u8]),
        0x80..=0xFF => Ok(vec![0x81, len as u8]),
        0x100..=MAX_LENGTH => Ok(vec![0x82, (len >> 8) as u8, len as u8]),
        _ => Err(DerError::LengthTooLarge(len)),
    }
}

fn tlv(tag: u8, content: &[u8]) -> DerResult<Vec<u8>> {
    let length = encode_length(content.len())?;
    let mut out = Vec::with_capacity(1 + length.len() + content.len());
    out.push(tag);
    out.extend_from_slice(&length);
    out.extend_from_slice(content);
    Ok(out)
}

/// SEQUENCE over already-encoded elements, in order.
pub fn sequence(elements: &[&[u8]]) -> DerResult<Vec<u8>> {
    tlv(TAG_SEQUENCE, &elements.concat())
}

/// INTEGER restricted to `0..=127`, which is all PKCS#8 and ECPrivateKey
/// version fields need.
pub fn integer(value: u8) -> DerResult<Vec<u8>> {
    if value > MAX_SMALL_INTEGER {
        return Err(DerError::IntegerOutOfRange(u64::from(value)));
    }
    tlv(TAG_INTEGER, &[value])
}

pub fn octet_string(content: &[u8]) -> DerResult<Vec<u8>> {
    tlv(TAG_OCTET_STRING, content)
}

/// BIT STRING with zero unused bits.
pub fn bit_string(content: &[u8]) -> DerResult<Vec<u8>> {
    bit_string_with_unused_bits(content, 0)
}

pub fn bit_string_with_unused_bits(content: &[u8], unused_bits: u8) -> DerResult<Vec<u8>> {
    if unused_bits > 7 {
        return Err(DerError::InvalidBitString(format!(
            "unused bits must be 0..=7, got {unused_bits}"
        )));
    }
    if content.is_empty() && unused_bits != 0 {
        return Err(DerError::InvalidBitString(
            "empty BIT STRING cannot have unused bits".to_string(),
        ));
    }
    let mut body = Vec::with_capacity(content.len() + 1);
    body.push(unused_bits);
    body.extend_from_slice(content);
    tlv(TAG_BIT_STRING, &body)
}

/// OBJECT IDENTIFIER from its arcs, e.g. `&[1, 3, 101, 112]`.
pub fn oid(arcs: &[u64]) -> DerResult<Vec<u8>> {
    tlv(TAG_OID, &encode_oid_arcs(arcs)?)
}

/// Constructed context-specific tag `[tag]` wrapping already-encoded content.
pub fn context_specific(tag: u8, content: &[u8]) -> DerResult<Vec<u8>> {
    if tag > MAX_LOW_TAG_NUMBER {
        return Err(DerError::InvalidContextTag(tag));
    }
    tlv(CONTEXT_CONSTRUCTED | tag, content)
}

fn encode_oid_arcs(arcs: &[u64]) -> DerResult<Vec<u8>> {
    if arcs.len() < 2 {
        return Err(DerError::InvalidOid("at least two arcs required".to_string()));
    }
    let (first, second) = (arcs[0], arcs[1]);
    if first > 2 || (first < 2 && second >= 40) {
        return Err(DerError::InvalidOid(format!(
            "invalid leading arcs {first}.{second}"
        )));
    }

    let mut out = Vec::new();
    let head = first
        .checked_mul(40)
        .and_then(|v| v.checked_add(second))
        .ok_or_else(|| DerError::InvalidOid("leading arc overflow".to_string()))?;
    push_base128(&mut out, head);
    for &arc in &arcs[2..] {
        push_base128(&mut out, arc);
    }
    Ok(out)
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = [0u8; 10];
    let mut count = 0;
    loop {
        groups[count] = (value & 0x7F) as u8;
        count += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

fn decode_oid_arcs(content: &[u8]) -> DerResult<Vec<u64>> {
    if content.is_empty() {
        return Err(DerError::InvalidOid("empty OID".to_string()));
    }
    let mut values = Vec::new();
    let mut current: u64 = 0;
    let mut in_progress = false;
    for &byte in content {
        if current > (u64::MAX >> 7) {
            return Err(DerError::InvalidOid("arc overflow".to_string()));
        }
        current = (current << 7) | u64::from(byte & 0x7F);
        in_progress = byte & 0x80 != 0;
        if !in_progress {
            values.push(current);
            current = 0;
        }
    }
    if in_progress {
        return Err(DerError::InvalidOid("unterminated arc".to_string()));
    }

    let head = values[0];
    let (first, second) = match head {
        0..=39 => (0, head),
        40..=79 => (1, head - 40),
        _ => (2, head - 80),
    };
    let mut arcs = vec![first, second];
    arcs.extend_from_slice(&values[1..]);
    Ok(arcs)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Cursor over a run of DER elements.
///
/// Readers returned by [`DerReader::read_sequence`] and
/// [`DerReader::read_context_specific`] are scoped to that element's body.
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.position >= self.input.len()
    }

    /// Unread bytes.
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.position.min(self.input.len())..]
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    /// Fail if anything is left unread.
    pub fn finish(&self) -> DerResult<()> {
        match self.remaining().len() {
            0 => Ok(()),
            n => Err(DerError::TrailingData(n)),
        }
    }

    fn read_tlv(&mut self) -> DerResult<(u8, &'a [u8])> {
        let (tag, content, consumed) = parse_tlv(self.remaining())?;
        self.position += consumed;
        Ok((tag, content))
    }

    fn read_expected(&mut self, expected: u8) -> DerResult<&'a [u8]> {
        let found = self.peek_tag().ok_or(DerError::Truncated("tag"))?;
        if found != expected {
            return Err(DerError::UnexpectedTag { expected, found });
        }
        let (_, content) = self.read_tlv()?;
        Ok(content)
    }

    pub fn read_sequence(&mut self) -> DerResult<DerReader<'a>> {
        self.read_expected(TAG_SEQUENCE).map(DerReader::new)
    }

    /// INTEGER that fits in a single unsigned byte.
    pub fn read_integer(&mut self) -> DerResult<u8> {
        let content = self.read_expected(TAG_INTEGER)?;
        match content {
            [value] if *value <= MAX_SMALL_INTEGER => Ok(*value),
            [] => Err(DerError::Truncated("INTEGER")),
            _ => {
                let value = content
                    .iter()
                    .take(8)
                    .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                Err(DerError::IntegerOutOfRange(value))
            }
        }
    }

    pub fn read_octet_string(&mut self) -> DerResult<&'a [u8]> {
        self.read_expected(TAG_OCTET_STRING)
    }

    /// BIT STRING content with the leading unused-bits byte stripped.
    pub fn read_bit_string(&mut self) -> DerResult<&'a [u8]> {
        let content = self.read_expected(TAG_BIT_STRING)?;
        match content.split_first() {
            Some((&unused, rest)) if unused <= 7 => Ok(rest),
            Some((&unused, _)) => Err(DerError::InvalidBitString(format!(
                "unused bits must be 0..=7, got {unused}"
            ))),
            None => Err(DerError::InvalidBitString("missing unused-bits byte".to_string())),
        }
    }

    pub fn read_oid(&mut self) -> DerResult<Vec<u64>> {
        let content = self.read_expected(TAG_OID)?;
        decode_oid_arcs(content)
    }

    pub fn read_context_specific(&mut self, tag: u8) -> DerResult<DerReader<'a>> {
        if tag > MAX_LOW_TAG_NUMBER {
            return Err(DerError::InvalidContextTag(tag));
        }
        self.read_expected(CONTEXT_CONSTRUCTED | tag)
            .map(DerReader::new)
    }

    /// Advance past one element of any type.
    pub fn skip(&mut self) -> DerResult<()> {
        self.read_tlv().map(|_| ())
    }

    /// Best-effort scan of the remaining top-level elements for an OCTET
    /// STRING whose content satisfies `predicate`. Does not move the cursor
    /// and stops quietly at the first malformed element.
    pub fn find_octet_string<F>(&self, predicate: F) -> Option<&'a [u8]>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut cursor = self.clone();
        while !cursor.is_empty() {
            let (tag, content) = cursor.read_tlv().ok()?;
            if tag == TAG_OCTET_STRING && predicate(content) {
                return Some(content);
            }
        }
        None
    }
}

/// Returns (tag, content, total bytes consumed).
fn parse_tlv(input: &[u8]) -> DerResult<(u8, &[u8], usize)> {
    let tag = *input.first().ok_or(DerError::Truncated("tag"))?;
    let first_len = *input.get(1).ok_or(DerError::Truncated("length"))?;

    let (len, header) = match first_len {
        0x00..=0x7F => (usize::from(first_len), 2),
        0x81 => {
            let b = *input.get(2).ok_or(DerError::Truncated("length"))?;
            (usize::from(b), 3)
        }
        0x82 => {
            let hi = *input.get(2).ok_or(DerError::Truncated("length"))?;
            let lo = *input.get(3).ok_or(DerError::Truncated("length"))?;
            ((usize::from(hi) << 8) | usize::from(lo), 4)
        }
        other => return Err(DerError::UnsupportedLength(other)),
    };

    let end = header + len;
    if end > input.len() {
        return Err(DerError::Truncated("content"));
    }
    Ok((tag, &input[header..end], end))
}

// ---------------------------------------------------------------------------
// Compatibility shims
// ---------------------------------------------------------------------------

/// Byte-pattern fallbacks for key containers that structural decoding
/// rejects. Callers must try strict decoding first and log when a shim is
/// used.
pub mod compat {
    /// The `len` bytes that follow the first occurrence of `marker`.
    pub fn find_after_marker<'a>(input: &'a [u8], marker: &[u8], len: usize) -> Option<&'a [u8]> {
        if marker.is_empty() {
            return None;
        }
        input
            .windows(marker.len())
            .position(|window| window == marker)
            .map(|start| start + marker.len())
            .and_then(|start| input.get(start..start + len))
    }

    /// Content of the first short-form OCTET STRING header (`04 len`)
    /// announcing exactly `len` bytes, wherever it sits in `input`.
    pub fn scan_octet_string_of_len(input: &[u8], len: usize) -> Option<&[u8]> {
        if len > 0x7F {
            return None;
        }
        let header = [super::TAG_OCTET_STRING, len as u8];
        find_after_marker(input, &header, len)
    }
}
