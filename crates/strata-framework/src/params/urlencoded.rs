//! Incremental `application/x-www-form-urlencoded` decoding.

use super::{ParamValue, Params};
use crate::error::{ParamsError, ParamsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Percent,
    Hex(u8),
}

/// A push parser for separator-delimited `key=value` pairs.
///
/// Input may be split at any byte, including inside a percent-escape or a
/// multi-byte UTF-8 sequence. After the first decode error further input is
/// ignored and [`end`](Self::end) reports that error.
#[derive(Debug)]
pub struct UrlEncodedParser {
    separator: u8,
    equals: u8,
    key: Vec<u8>,
    value: Vec<u8>,
    in_value: bool,
    escape: Escape,
    params: Params,
    error: Option<ParamsError>,
}

impl UrlEncodedParser {
    /// Creates a parser splitting pairs on `separator` and keys from values
    /// on `equals`.
    pub fn new(separator: u8, equals: u8) -> Self {
        Self {
            separator,
            equals,
            key: Vec::new(),
            value: Vec::new(),
            in_value: false,
            escape: Escape::None,
            params: Params::new(),
            error: None,
        }
    }

    /// Feeds a chunk and returns the number of bytes consumed, which is
    /// always `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.error.is_none() {
            for &byte in data {
                if let Err(err) = self.push(byte) {
                    self.error = Some(err);
                    break;
                }
            }
        }
        data.len()
    }

    /// Finishes parsing and returns the accumulated pairs.
    pub fn end(mut self) -> ParamsResult<Params> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.flush_pair()?;
        Ok(self.params)
    }

    fn push(&mut self, byte: u8) -> ParamsResult<()> {
        match self.escape {
            Escape::Percent => {
                self.escape = Escape::Hex(hex(byte)?);
                return Ok(());
            }
            Escape::Hex(high) => {
                self.escape = Escape::None;
                let decoded = (high << 4) | hex(byte)?;
                self.target().push(decoded);
                return Ok(());
            }
            Escape::None => {}
        }

        match byte {
            b'%' => self.escape = Escape::Percent,
            b'+' => self.target().push(b' '),
            b if b == self.separator => self.flush_pair()?,
            b if b == self.equals && !self.in_value => self.in_value = true,
            b => self.target().push(b),
        }
        Ok(())
    }

    fn target(&mut self) -> &mut Vec<u8> {
        if self.in_value {
            &mut self.value
        } else {
            &mut self.key
        }
    }

    fn flush_pair(&mut self) -> ParamsResult<()> {
        if self.escape != Escape::None {
            return Err(ParamsError::decode("truncated percent-escape"));
        }
        let key = std::mem::take(&mut self.key);
        let value = std::mem::take(&mut self.value);
        self.in_value = false;

        if key.is_empty() {
            return Ok(());
        }
        let key = utf8(key)?;
        let value = utf8(value)?;
        self.params.insert(key, ParamValue::Text(value));
        Ok(())
    }
}

impl Default for UrlEncodedParser {
    fn default() -> Self {
        Self::new(b'&', b'=')
    }
}

/// Parses a complete string such as a query component.
pub fn parse(input: &str, separator: u8, equals: u8) -> ParamsResult<Params> {
    let mut parser = UrlEncodedParser::new(separator, equals);
    parser.write(input.as_bytes());
    parser.end()
}

fn hex(byte: u8) -> ParamsResult<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(ParamsError::decode(format!(
            "invalid hex digit {:?} in percent-escape",
            byte as char
        ))),
    }
}

fn utf8(bytes: Vec<u8>) -> ParamsResult<String> {
    String::from_utf8(bytes).map_err(|e| ParamsError::decode(e.to_string()))
}
