//! Request head scanning and parsing.
use std::collections::HashMap;

use nom::{
    bytes::complete::take_till,
    character::complete::char,
    combinator::{opt, rest},
    sequence::{preceded, separated_pair},
    IResult, Parser,
};

/// Position of the blank line ending a request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeadEnd {
    /// Length of the head, excluding the blank line.
    pub head_len: usize,
    /// Offset of the first byte after the blank line.
    pub body_start: usize,
}

/// Incrementally searches a growing buffer for the end of a request head.
///
/// Lines may end in `\r\n` or a bare `\n`, so the head ends at a `\n` followed by either `\n` or
/// `\r\n`. The scanner remembers how far it got and never looks at those bytes again, except for
/// a trailing `\n` whose follow-up bytes had not arrived yet.
#[derive(Debug, Default)]
pub(crate) struct HeadScanner {
    scanned: usize,
}

impl HeadScanner {
    pub fn scan(&mut self, buf: &[u8]) -> Option<HeadEnd> {
        let mut at = self.scanned;
        while let Some(offset) = buf[at..].iter().position(|b| *b == b'\n') {
            let lf = at + offset;
            match (buf.get(lf + 1), buf.get(lf + 2)) {
                (Some(b'\n'), _) => return self.found(lf, lf + 2),
                (Some(b'\r'), Some(b'\n')) => return self.found(lf, lf + 3),
                // the terminator may still be on its way
                (None, _) | (Some(b'\r'), None) => {
                    self.scanned = lf;
                    return None;
                }
                _ => at = lf + 1,
            }
        }
        self.scanned = buf.len();
        None
    }

    fn found(&mut self, head_len: usize, body_start: usize) -> Option<HeadEnd> {
        self.scanned = 0;
        Some(HeadEnd {
            head_len,
            body_start,
        })
    }
}

/// Request line and headers of one request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RequestHead {
    pub method: String,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

fn token(input: &str) -> IResult<&str, &str> {
    take_till(|c| c == ' ').parse(input)
}

fn next_token(input: &str) -> IResult<&str, &str> {
    opt(preceded(char(' '), token))
        .map(Option::unwrap_or_default)
        .parse(input)
}

/// `METHOD SP URL SP VERSION`. Missing fields come back empty, extra ones are ignored.
fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    (token, next_token, next_token).parse(input)
}

/// `Name: Value`, split at the first colon.
fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_till(|c| c == ':'), char(':'), rest).parse(input)
}

/// Parses a request head (without the terminating blank line).
///
/// Header names keep their case and a repeated header keeps its last value. Lines without a colon
/// are skipped.
pub(crate) fn parse_head(head: &[u8]) -> RequestHead {
    let text = String::from_utf8_lossy(head);
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let mut parsed = RequestHead::default();
    if let Some(Ok((_, (method, url, version)))) = lines.next().map(request_line) {
        parsed.method = method.to_owned();
        parsed.url = url.to_owned();
        parsed.version = version.to_owned();
    }

    for line in lines {
        if let Ok((_, (name, value))) = header_line(line) {
            parsed
                .headers
                .insert(name.to_owned(), value.trim().to_owned());
        }
    }

    parsed
}
