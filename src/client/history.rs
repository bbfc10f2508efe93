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

pub const DEFAULT_HISTORY_LEN: usize = 128;

/// Bounded ring of entered lines with a prev/next cursor for the UI.
/// The delivery queues stay strictly FIFO; bidirectional traversal lives
/// here instead.
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    /// Distance from the newest entry; `None` when not browsing.
    cursor: Option<usize>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_HISTORY_LEN } else { capacity };
        History { entries: VecDeque::with_capacity(capacity), capacity, cursor: None }
    }

    /// Records a line and leaves browsing mode.
    pub fn push(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_owned());
        self.cursor = None;
    }

    /// Steps towards older entries.
    pub fn prev(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let next_cursor = match self.cursor {
            None => 0,
            Some(c) if c + 1 < self.entries.len() => c + 1,
            Some(c) => c,
        };
        self.cursor = Some(next_cursor);
        self.entries.get(self.entries.len() - 1 - next_cursor).map(String::as_str)
    }

    /// Steps back towards the newest entry; `None` once past it.
    pub fn next(&mut self) -> Option<&str> {
        match self.cursor {
            None | Some(0) => {
                self.cursor = None;
                None
            }
            Some(c) => {
                self.cursor = Some(c - 1);
                self.entries.get(self.entries.len() - c).map(String::as_str)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn browsing_walks_backwards_then_forwards() {
        let mut h = History::new(8);
        h.push("one");
        h.push("two");
        h.push("three");

        assert_eq!(h.prev(), Some("three"));
        assert_eq!(h.prev(), Some("two"));
        assert_eq!(h.prev(), Some("one"));
        // Pinned at the oldest entry.
        assert_eq!(h.prev(), Some("one"));
        assert_eq!(h.next(), Some("two"));
        assert_eq!(h.next(), Some("three"));
        assert_eq!(h.next(), None);
    }

    #[test]
    fn push_resets_the_cursor() {
        let mut h = History::new(8);
        h.push("one");
        h.push("two");
        assert_eq!(h.prev(), Some("two"));
        h.push("three");
        assert_eq!(h.prev(), Some("three"));
    }

    #[test]
    fn overflow_drops_the_oldest_entry() {
        let mut h = History::new(2);
        h.push("one");
        h.push("two");
        h.push("three");
        assert_eq!(h.len(), 2);
        assert_eq!(h.prev(), Some("three"));
        assert_eq!(h.prev(), Some("two"));
        assert_eq!(h.prev(), Some("two"));
    }

    #[test]
    fn empty_lines_are_not_recorded() {
        let mut h = History::new(4);
        h.push("");
        assert!(h.is_empty());
        assert_eq!(h.prev(), None);
    }
}
