//! Lenient delimited-text reader.
//!
//! Double-quoted fields may contain the delimiter, `""` escapes and line
//! breaks. A quote is only special at the start of a field; elsewhere it is
//! literal. Records that are not valid UTF-8 are returned as malformed
//! rather than aborting the file.

use std::io::{self, BufRead};

/// Upper bound on one logical record, guarding against a stray opening quote
/// swallowing the rest of the file.
const MAX_RECORD_BYTES: usize = 1 << 20;

/// One logical record of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based physical line the record starts on.
    pub line: u64,
    /// Input text without the line terminator (lossy for malformed records).
    pub raw: String,
    /// Parsed fields, or why the record could not be decoded.
    pub fields: Result<Vec<String>, String>,
}

pub struct DelimitedReader<R> {
    inner: R,
    delimiter: char,
    line: u64,
}

impl<R: BufRead> DelimitedReader<R> {
    pub fn new(inner: R, delimiter: char) -> Self {
        Self {
            inner,
            delimiter,
            line: 0,
        }
    }

    /// Next non-blank record, or `None` at end of input.
    pub fn next_record(&mut self) -> io::Result<Option<RawRecord>> {
        loop {
            let start = self.line + 1;
            let mut bytes = Vec::new();
            let mut physical = Vec::new();

            loop {
                physical.clear();
                let n = self.inner.read_until(b'\n', &mut physical)?;
                if n == 0 {
                    break;
                }
                self.line += 1;
                bytes.extend_from_slice(&physical);
                if !ends_inside_quotes(&bytes, self.delimiter) {
                    break;
                }
                if bytes.len() > MAX_RECORD_BYTES {
                    return Ok(Some(RawRecord {
                        line: start,
                        raw: String::from_utf8_lossy(trim_terminator(&bytes)).into_owned(),
                        fields: Err(format!(
                            "unterminated quoted field spans more than {} bytes",
                            MAX_RECORD_BYTES
                        )),
                    }));
                }
            }

            if bytes.is_empty() {
                return Ok(None);
            }

            let body = trim_terminator(&bytes);
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            return Ok(Some(match std::str::from_utf8(body) {
                Ok(text) => RawRecord {
                    line: start,
                    raw: text.to_string(),
                    fields: Ok(split_fields(text, self.delimiter)),
                },
                Err(e) => RawRecord {
                    line: start,
                    raw: String::from_utf8_lossy(body).into_owned(),
                    fields: Err(format!("invalid UTF-8: {}", e)),
                },
            }));
        }
    }
}

impl<R: BufRead> Iterator for DelimitedReader<R> {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn trim_terminator(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && (bytes[end - 1] == b'\n' || bytes[end - 1] == b'\r') {
        end -= 1;
    }
    &bytes[..end]
}

/// Whether `bytes` stops inside an open quoted field.
fn ends_inside_quotes(bytes: &[u8], delimiter: char) -> bool {
    let mut delim_buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut delim_buf).as_bytes();

    let mut in_quotes = false;
    let mut field_start = true;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_quotes {
            if b == b'"' {
                if bytes.get(i + 1) == Some(&b'"') {
                    i += 1;
                } else {
                    in_quotes = false;
                }
            }
        } else if bytes[i..].starts_with(delim) {
            field_start = true;
            i += delim.len();
            continue;
        } else if b == b'\n' {
            field_start = true;
        } else if b == b'"' && field_start {
            in_quotes = true;
            field_start = false;
        } else {
            field_start = false;
        }
        i += 1;
    }
    in_quotes
}

/// Split one decoded record into fields.
pub fn split_fields(text: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut field_start = true;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == delimiter {
            fields.push(std::mem::take(&mut current));
            field_start = true;
        } else if c == '"' && field_start {
            in_quotes = true;
            field_start = false;
        } else {
            current.push(c);
            field_start = false;
        }
    }
    fields.push(current);
    fields
}
