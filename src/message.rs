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

use std::collections::VecDeque;

/// Longest wire message, CRLF terminator included.
pub const MAX_MESSAGE_LEN: usize = 512;
/// Longest message content; framing appends the CRLF on write.
pub const MAX_CONTENT_LEN: usize = MAX_MESSAGE_LEN - 2;

const SEPARATOR: char = '|';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Forwarded user traffic (PRIVMSG and friends).
    Relay,
    /// Signal tokens travelling over a pipe.
    Signal,
    /// A command issued by a client.
    Command,
    /// A reply generated by the server.
    Response,
    Standard,
    Ping,
    Pong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessagePriority {
    Low,
    Normal,
    High,
}

/// A value-typed message record. `separator` carries out-of-band routing
/// data (the owning fd slot for the server's own out queue); it is joined
/// to the content with `|` on encode.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    content: String,
    separator: String,
    kind: MessageKind,
    priority: MessagePriority,
}

impl Message {
    pub fn new(kind: MessageKind, content: &str) -> Self {
        Self::with_separator(kind, "", content)
    }

    pub fn with_separator(kind: MessageKind, separator: &str, content: &str) -> Self {
        let mut content = content.to_owned();
        if content.len() > MAX_CONTENT_LEN {
            log::warn!("truncating overlong message ({} bytes)", content.len());
            truncate_on_boundary(&mut content, MAX_CONTENT_LEN);
        }
        Message {
            content,
            separator: separator.to_owned(),
            kind,
            priority: MessagePriority::Normal,
        }
    }

    pub fn priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn get_priority(&self) -> MessagePriority {
        self.priority
    }

    /// Wire form: `separator|content` when a separator is set, bare
    /// content otherwise.
    pub fn encode(&self) -> String {
        if self.separator.is_empty() {
            self.content.clone()
        } else {
            format!("{}{}{}", self.separator, SEPARATOR, self.content)
        }
    }
}

/// Splits a `tag|rest` encoded line at the first separator.
pub fn split_tagged(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(SEPARATOR)?;
    Some((&line[..idx], &line[idx + 1..]))
}

fn truncate_on_boundary(s: &mut String, mut at: usize) {
    while !s.is_char_boundary(at) {
        at -= 1;
    }
    s.truncate(at);
}

/// Bounded FIFO of messages. When full, the oldest entry is dropped so the
/// newest is always accepted; drops are counted, never surfaced as errors.
#[derive(Debug)]
pub struct MessageQueue {
    items: VecDeque<Message>,
    capacity: usize,
    dropped: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        MessageQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: Message) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(message);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
