//! Incremental `multipart/form-data` parsing.
//!
//! [`MultipartParser`] is a push state machine: feed it chunks split at any
//! byte and it yields [`MultipartEvent`]s. Part data is released as soon as
//! it can no longer be the start of a delimiter, so memory use is bounded by
//! the delimiter and header sizes rather than by the part size.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ParamsError, ParamsResult};

/// Upper bound for one part's header block.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// The headers of one part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    /// The `name` disposition parameter.
    pub name: String,
    /// The `filename` disposition parameter, if the part is a file.
    pub filename: Option<String>,
    /// The part's `Content-Type`.
    pub content_type: Option<String>,
}

/// Parser output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartEvent {
    /// A part's header block has been parsed.
    PartBegin(PartHeaders),
    /// A slice of the current part's body.
    Data(Bytes),
    /// The current part's body ended at a delimiter.
    PartEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    AfterDelimiter,
    Headers,
    Body,
    Epilogue,
}

/// A push parser for one multipart body.
#[derive(Debug)]
pub struct MultipartParser {
    delimiter: Vec<u8>,
    buf: BytesMut,
    state: State,
}

impl MultipartParser {
    /// Creates a parser for `boundary`.
    pub fn new(boundary: &str) -> ParamsResult<Self> {
        if boundary.is_empty() || boundary.len() > 70 {
            return Err(ParamsError::multipart("invalid boundary length"));
        }
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());

        // A leading CRLF lets the first delimiter match like every other one.
        let mut buf = BytesMut::with_capacity(1024);
        buf.extend_from_slice(b"\r\n");

        Ok(Self {
            delimiter,
            buf,
            state: State::Preamble,
        })
    }

    /// Feeds a chunk and returns the events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> ParamsResult<Vec<MultipartEvent>> {
        if self.state == State::Epilogue {
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            match self.state {
                State::Preamble => match find(&self.buf, &self.delimiter) {
                    Some(at) => {
                        self.buf.advance(at + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                    }
                    None => {
                        let keep = self.delimiter.len() - 1;
                        let stale = self.buf.len().saturating_sub(keep);
                        self.buf.advance(stale);
                        break;
                    }
                },
                State::AfterDelimiter => {
                    if self.buf.len() < 2 {
                        break;
                    }
                    if self.buf.starts_with(b"--") {
                        self.buf.clear();
                        self.state = State::Epilogue;
                        break;
                    }
                    if !self.buf.starts_with(b"\r\n") {
                        return Err(ParamsError::multipart("garbage after boundary"));
                    }
                    self.buf.advance(2);
                    self.state = State::Headers;
                }
                State::Headers => {
                    if self.buf.starts_with(b"\r\n") {
                        return Err(ParamsError::multipart("part without Content-Disposition"));
                    }
                    let Some(at) = find(&self.buf, b"\r\n\r\n") else {
                        if self.buf.len() > MAX_HEADER_SIZE {
                            return Err(ParamsError::multipart("part headers too large"));
                        }
                        break;
                    };
                    let block = self.buf.split_to(at);
                    self.buf.advance(4);
                    events.push(MultipartEvent::PartBegin(parse_headers(&block)?));
                    self.state = State::Body;
                }
                State::Body => match find(&self.buf, &self.delimiter) {
                    Some(at) => {
                        if at > 0 {
                            events.push(MultipartEvent::Data(self.buf.split_to(at).freeze()));
                        }
                        self.buf.advance(self.delimiter.len());
                        events.push(MultipartEvent::PartEnd);
                        self.state = State::AfterDelimiter;
                    }
                    None => {
                        let safe = self.buf.len().saturating_sub(self.delimiter.len() - 1);
                        if safe > 0 {
                            events.push(MultipartEvent::Data(self.buf.split_to(safe).freeze()));
                        }
                        break;
                    }
                },
                State::Epilogue => break,
            }
        }
        Ok(events)
    }

    /// Checks that the closing delimiter has been seen.
    pub fn finish(self) -> ParamsResult<()> {
        match self.state {
            State::Epilogue => Ok(()),
            _ => Err(ParamsError::multipart("unexpected end of body")),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_headers(block: &[u8]) -> ParamsResult<PartHeaders> {
    let block = std::str::from_utf8(block)
        .map_err(|_| ParamsError::multipart("part headers are not valid UTF-8"))?;

    let mut headers = PartHeaders::default();
    let mut has_disposition = false;
    for line in block.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ParamsError::multipart(format!("malformed header line {line:?}")));
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            has_disposition = true;
            for (key, val) in disposition_params(value) {
                match key.to_ascii_lowercase().as_str() {
                    "name" => headers.name = val,
                    "filename" => headers.filename = Some(val),
                    _ => {}
                }
            }
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.to_string());
        }
    }

    if !has_disposition {
        return Err(ParamsError::multipart("part without Content-Disposition"));
    }
    Ok(headers)
}

/// Splits `form-data; name="a"; filename="b;c"` into its parameters,
/// honouring quoted strings.
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
