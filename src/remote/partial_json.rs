//! Best-effort decoding of possibly-truncated JSON.
//!
//! Tool-call arguments are cut off whenever the backend hits its token limit.
//! Rather than failing, [`parse_partial`] returns the deepest structure that was
//! fully read:
//!
//! - leading prose before the first `{` or `[` is skipped, trailing input after
//!   a complete value is ignored;
//! - a truncated string, number or literal is dropped;
//! - an array keeps only its closed elements and stops at the first cut-off one;
//! - an object drops a member whose key or scalar value was cut off, but keeps a
//!   member whose array/object value was cut off, with that value's complete
//!   contents.
//!
//! Malformed input that is not merely truncated is a [`RemoteError::Parse`].

use serde_json::{Map, Value};

use crate::error::{RemoteError, RemoteResult};

/// Decode `input`, recovering as much of a truncated document as possible.
pub fn parse_partial(input: &str) -> RemoteResult<Value> {
    let start = input
        .find(['{', '['])
        .ok_or_else(|| RemoteError::Parse {
            message: "no JSON object or array found in tool output".into(),
        })?;

    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: start,
    };
    match parser.value().map_err(|message| RemoteError::Parse { message })? {
        Outcome::Complete(value) => Ok(value),
        Outcome::Truncated(Some(value)) => {
            tracing::debug!(len = input.len(), "recovered truncated tool output");
            Ok(value)
        }
        Outcome::Truncated(None) => Err(RemoteError::Parse {
            message: "tool output ended before any value was complete".into(),
        }),
    }
}

enum Outcome {
    Complete(Value),
    /// Input ended inside this value. Containers carry what was complete so far.
    Truncated(Option<Value>),
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Outcome, String> {
        self.skip_ws();
        match self.peek() {
            None => Ok(Outcome::Truncated(None)),
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => self.string().map(|s| match s {
                Some(s) => Outcome::Complete(Value::String(s)),
                None => Outcome::Truncated(None),
            }),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(other) => Err(format!(
                "unexpected character '{}' at byte {}",
                other as char, self.pos
            )),
        }
    }

    fn object(&mut self) -> Result<Outcome, String> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Outcome::Truncated(Some(Value::Object(map)))),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Outcome::Complete(Value::Object(map)));
                }
                Some(b'"') => {}
                Some(other) => {
                    return Err(format!(
                        "expected object key at byte {}, found '{}'",
                        self.pos, other as char
                    ));
                }
            }

            let Some(key) = self.string()? else {
                return Ok(Outcome::Truncated(Some(Value::Object(map))));
            };
            self.skip_ws();
            match self.peek() {
                None => return Ok(Outcome::Truncated(Some(Value::Object(map)))),
                Some(b':') => self.pos += 1,
                Some(other) => {
                    return Err(format!(
                        "expected ':' after key \"{key}\", found '{}'",
                        other as char
                    ));
                }
            }

            match self.value()? {
                Outcome::Complete(value) => {
                    map.insert(key, value);
                }
                Outcome::Truncated(Some(partial)) => {
                    map.insert(key, partial);
                    return Ok(Outcome::Truncated(Some(Value::Object(map))));
                }
                Outcome::Truncated(None) => {
                    return Ok(Outcome::Truncated(Some(Value::Object(map))));
                }
            }

            self.skip_ws();
            match self.peek() {
                None => return Ok(Outcome::Truncated(Some(Value::Object(map)))),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Outcome::Complete(Value::Object(map)));
                }
                Some(other) => {
                    return Err(format!(
                        "expected ',' or '}}' at byte {}, found '{}'",
                        self.pos, other as char
                    ));
                }
            }
        }
    }

    fn array(&mut self) -> Result<Outcome, String> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Outcome::Truncated(Some(Value::Array(items)))),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Outcome::Complete(Value::Array(items)));
                }
                Some(_) => {}
            }

            match self.value()? {
                Outcome::Complete(value) => items.push(value),
                Outcome::Truncated(_) => return Ok(Outcome::Truncated(Some(Value::Array(items)))),
            }

            self.skip_ws();
            match self.peek() {
                None => return Ok(Outcome::Truncated(Some(Value::Array(items)))),
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Outcome::Complete(Value::Array(items)));
                }
                Some(other) => {
                    return Err(format!(
                        "expected ',' or ']' at byte {}, found '{}'",
                        self.pos, other as char
                    ));
                }
            }
        }
    }

    /// Read a string starting at the opening quote. `None` if input ends inside it.
    fn string(&mut self) -> Result<Option<String>, String> {
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Ok(None);
            };
            self.pos += 1;
            match byte {
                b'"' => return Ok(Some(String::from_utf8_lossy(&out).into_owned())),
                b'\\' => {
                    let Some(escape) = self.peek() else {
                        return Ok(None);
                    };
                    self.pos += 1;
                    match escape {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let Some(ch) = self.unicode_escape()? else {
                                return Ok(None);
                            };
                            let mut buf = [0u8; 4];
                            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        }
                        other => {
                            return Err(format!("invalid escape '\\{}'", other as char));
                        }
                    }
                }
                _ => out.push(byte),
            }
        }
    }

    /// Decode the hex digits after `\u`, joining surrogate pairs.
    fn unicode_escape(&mut self) -> Result<Option<char>, String> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER)));
        }

        if self.bytes.len() < self.pos + 2 {
            return Ok(None);
        }
        if &self.bytes[self.pos..self.pos + 2] != b"\\u" {
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        }
        self.pos += 2;
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        let combined = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
        Ok(Some(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER)))
    }

    fn hex4(&mut self) -> Result<Option<u32>, String> {
        if self.bytes.len() < self.pos + 4 {
            self.pos = self.bytes.len();
            return Ok(None);
        }
        let digits = std::str::from_utf8(&self.bytes[self.pos..self.pos + 4])
            .map_err(|e| e.to_string())?;
        let code = u32::from_str_radix(digits, 16)
            .map_err(|_| format!("invalid unicode escape \\u{digits}"))?;
        self.pos += 4;
        Ok(Some(code))
    }

    fn number(&mut self) -> Result<Outcome, String> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9')
        ) {
            self.pos += 1;
        }
        // A number running into end of input may have lost digits.
        if self.peek().is_none() {
            return Ok(Outcome::Truncated(None));
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).map_err(|e| e.to_string())?;
        serde_json::from_str::<Value>(text)
            .map(Outcome::Complete)
            .map_err(|_| format!("invalid number \"{text}\""))
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Outcome, String> {
        let rest = &self.bytes[self.pos..];
        let word = word.as_bytes();
        if rest.len() < word.len() && word.starts_with(rest) {
            self.pos = self.bytes.len();
            return Ok(Outcome::Truncated(None));
        }
        if rest.starts_with(word) {
            self.pos += word.len();
            return Ok(Outcome::Complete(value));
        }
        Err(format!("invalid literal at byte {}", self.pos))
    }
}
