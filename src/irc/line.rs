// Copyright (C) 2024  parley developers

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! Assembling and splitting `[:prefix] COMMAND params [:trailing]` lines.
//!
//! The builder never appends the CRLF terminator; framing adds it on write.

use crate::message::MAX_CONTENT_LEN;

/// Chaining builder for one wire line.
///
/// ```
/// use parley::irc::line::Line;
///
/// let line = Line::with_prefix("srv")
///     .param("001")
///     .param("alice")
///     .trailing_forced("Welcome to the IRC Network")
///     .build();
/// assert_eq!(line, ":srv 001 alice :Welcome to the IRC Network");
/// ```
pub struct Line {
    buf: String,
}

impl Line {
    pub fn new() -> Self {
        Line { buf: String::new() }
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let mut buf = String::with_capacity(64);
        buf.push(':');
        buf.push_str(prefix);
        Line { buf }
    }

    pub fn param(mut self, param: &str) -> Self {
        if !self.buf.is_empty() {
            self.buf.push(' ');
        }
        self.buf.push_str(param);
        self
    }

    /// Appends the trailing argument, `:`-prefixed only when it contains
    /// spaces (or is empty, which would otherwise vanish).
    pub fn trailing(self, trailing: &str) -> Self {
        if trailing.contains(' ') || trailing.is_empty() || trailing.starts_with(':') {
            self.trailing_forced(trailing)
        } else {
            self.param(trailing)
        }
    }

    /// Appends the trailing argument, always `:`-prefixed.
    pub fn trailing_forced(mut self, trailing: &str) -> Self {
        if !self.buf.is_empty() {
            self.buf.push(' ');
        }
        self.buf.push(':');
        self.buf.push_str(trailing);
        self
    }

    pub fn build(mut self) -> String {
        if self.buf.len() > MAX_CONTENT_LEN {
            let mut at = MAX_CONTENT_LEN;
            while !self.buf.is_char_boundary(at) {
                at -= 1;
            }
            self.buf.truncate(at);
        }
        self.buf
    }
}

impl Default for Line {
    fn default() -> Self {
        Self::new()
    }
}

/// The `nick!user@host` parts of a message prefix. A server origin has
/// only the `nick` slot filled.
#[derive(Debug, Default, PartialEq)]
pub struct Origin<'a> {
    pub nick: Option<&'a str>,
    pub user: Option<&'a str>,
    pub host: Option<&'a str>,
}

/// One parsed inbound line.
#[derive(Debug, Default, PartialEq)]
pub struct WireMessage<'a> {
    pub origin: Origin<'a>,
    pub command: Option<&'a str>,
    pub params: Vec<&'a str>,
}

fn split_origin(prefix: &str) -> Origin<'_> {
    let bang = prefix.find('!');
    let at = prefix.find('@');
    match (bang, at) {
        (None, None) => Origin { nick: Some(prefix), user: None, host: None },
        (None, Some(a)) => Origin {
            nick: Some(&prefix[..a]),
            user: None,
            host: Some(&prefix[a + 1..]),
        },
        (Some(b), None) => Origin {
            nick: Some(&prefix[..b]),
            user: Some(&prefix[b + 1..]),
            host: None,
        },
        (Some(b), Some(a)) if b < a => Origin {
            nick: Some(&prefix[..b]),
            user: Some(&prefix[b + 1..a]),
            host: Some(&prefix[a + 1..]),
        },
        // Malformed x@z!y; still salvage the nick.
        (Some(b), Some(a)) => Origin {
            nick: Some(&prefix[..a]),
            user: Some(&prefix[b + 1..]),
            host: Some(&prefix[a + 1..b]),
        },
    }
}

impl<'a> WireMessage<'a> {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.origin.nick.is_none() && self.params.is_empty()
    }

    pub fn parse(raw: &'a str) -> Self {
        let mut msg = WireMessage::default();
        let mut rest = raw.trim_end_matches(|c| c == '\r' || c == '\n');

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, tail) = match prefixed.find(' ') {
                Some(idx) => (&prefixed[..idx], &prefixed[idx + 1..]),
                None => (prefixed, ""),
            };
            msg.origin = split_origin(prefix);
            rest = tail;
        }

        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if msg.command.is_some() {
                if let Some(trailing) = rest.strip_prefix(':') {
                    msg.params.push(trailing);
                    break;
                }
            }
            let token = match rest.find(' ') {
                Some(idx) => {
                    let t = &rest[..idx];
                    rest = &rest[idx + 1..];
                    t
                }
                None => {
                    let t = rest;
                    rest = "";
                    t
                }
            };
            if msg.command.is_none() {
                msg.command = Some(token);
            } else {
                msg.params.push(token);
            }
        }

        msg
    }
}
