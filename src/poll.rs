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

//! Thin wrapper over `mio::Poll` with per-tick readiness predicates.
//!
//! Each owning loop keeps one manager; registered sources keep a stable
//! token, and after every `poll` call the readiness of each woken token is
//! answerable in O(1).

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

pub struct PollManager {
    poll: Poll,
    events: Events,
    ready: Vec<Token>,
    readiness: HashMap<Token, Readiness>,
}

impl PollManager {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(PollManager {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity),
            ready: Vec::new(),
            readiness: HashMap::new(),
        })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    pub fn add_source<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interests)
    }

    pub fn update_source<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interests)
    }

    pub fn remove_source<S: Source>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Blocks until readiness or timeout, then records which tokens woke
    /// and how. Returns the number of woken tokens.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.ready.clear();
        self.readiness.clear();
        self.poll.poll(&mut self.events, timeout)?;

        for event in self.events.iter() {
            let token = event.token();
            let entry = self.readiness.entry(token).or_default();
            entry.readable |= event.is_readable();
            entry.writable |= event.is_writable();
            entry.error |= event.is_error() || event.is_read_closed();
            if !self.ready.contains(&token) {
                self.ready.push(token);
            }
        }
        Ok(self.ready.len())
    }

    /// Tokens woken by the last `poll`, in readiness order.
    pub fn ready(&self) -> &[Token] {
        &self.ready
    }

    pub fn is_input_ready(&self, token: Token) -> bool {
        self.readiness.get(&token).map(|r| r.readable).unwrap_or(false)
    }

    pub fn is_output_ready(&self, token: Token) -> bool {
        self.readiness.get(&token).map(|r| r.writable).unwrap_or(false)
    }

    pub fn is_error(&self, token: Token) -> bool {
        self.readiness.get(&token).map(|r| r.error).unwrap_or(false)
    }
}
