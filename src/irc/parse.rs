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

//! Tokenizer for `CMD [arg ...] [:trailing]` lines.
//!
//! Both user input (with an optional leading `/`) and server-received
//! command lines pass through here. The `:` token starts the trailing
//! argument, which consumes the rest of the line verbatim.

use crate::irc::command::CommandKind;

/// Command plus at most `MAX_TOKENS - 1` arguments.
pub const MAX_TOKENS: usize = 5;

#[derive(Debug, PartialEq)]
pub struct CommandTokens {
    pub command: CommandKind,
    pub label: String,
    pub args: Vec<String>,
}

impl CommandTokens {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Parses one input line. Empty lines yield no command; an unrecognized
/// label yields `CommandKind::Unknown` with the offending label preserved.
pub fn parse_command(line: &str) -> Option<CommandTokens> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    let line = line.strip_prefix('/').unwrap_or(line);
    let line = line.trim_start_matches(' ');
    if line.is_empty() {
        return None;
    }

    let (label, mut rest) = match line.find(' ') {
        Some(idx) => (&line[..idx], &line[idx + 1..]),
        None => (line, ""),
    };

    let mut args = Vec::new();
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if args.len() == MAX_TOKENS - 1 {
            log::debug!("discarding extra arguments: {:?}", rest);
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            args.push(trailing.to_owned());
            break;
        }
        match rest.find(' ') {
            Some(idx) => {
                args.push(rest[..idx].to_owned());
                rest = &rest[idx + 1..];
            }
            None => {
                args.push(rest.to_owned());
                break;
            }
        }
    }

    Some(CommandTokens {
        command: CommandKind::from_label(label),
        label: label.to_owned(),
        args,
    })
}
