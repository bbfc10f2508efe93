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

use crate::message::Message;

pub const MAX_CHANNEL_NAME_LEN: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Survives emptiness.
    Persistent,
    /// Destroyed when its last member leaves.
    Temporary,
}

/// One broadcast waiting to be flushed. The recipient set is the channel
/// membership snapshotted at enqueue time (minus the acting user), so a
/// later joiner never receives it retrospectively.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub message: Message,
    pub targets: Vec<String>,
}

#[derive(Debug)]
pub struct Channel {
    name: String,
    topic: Option<String>,
    kind: ChannelKind,
    queue: VecDeque<Outbound>,
    queue_capacity: usize,
    dropped: u64,
}

impl Channel {
    pub fn new(name: &str, kind: ChannelKind, queue_capacity: usize) -> Self {
        Channel {
            name: name.to_owned(),
            topic: None,
            kind,
            queue: VecDeque::with_capacity(queue_capacity),
            queue_capacity,
            dropped: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn set_topic(&mut self, topic: Option<String>) {
        self.topic = topic;
    }

    pub fn enqueue(&mut self, message: Message, targets: Vec<String>) {
        if self.queue.len() == self.queue_capacity {
            self.queue.pop_front();
            self.dropped += 1;
            log::warn!("channel {} queue overflow, {} dropped", self.name, self.dropped);
        }
        self.queue.push_back(Outbound { message, targets });
    }

    pub fn dequeue(&mut self) -> Option<Outbound> {
        self.queue.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Empties the queue, handing the pending broadcasts to the caller.
    /// Used on teardown so accepted messages still reach their snapshots.
    pub fn drain_pending(&mut self) -> Vec<Outbound> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::MessageKind;

    fn relay(text: &str) -> Message {
        Message::new(MessageKind::Relay, text)
    }

    #[test]
    fn queue_keeps_snapshots() {
        let mut c = Channel::new("#dev", ChannelKind::Temporary, 4);
        c.enqueue(relay("one"), vec!["bob".into()]);
        c.enqueue(relay("two"), vec!["bob".into(), "carol".into()]);

        let first = c.dequeue().unwrap();
        assert_eq!(first.message.content(), "one");
        assert_eq!(first.targets, vec!["bob"]);
        let second = c.dequeue().unwrap();
        assert_eq!(second.targets.len(), 2);
        assert!(c.dequeue().is_none());
    }

    #[test]
    fn overflow_drops_oldest_broadcast() {
        let mut c = Channel::new("#dev", ChannelKind::Persistent, 2);
        c.enqueue(relay("a"), vec![]);
        c.enqueue(relay("b"), vec![]);
        c.enqueue(relay("c"), vec![]);
        assert_eq!(c.dequeue().unwrap().message.content(), "b");
        assert_eq!(c.dequeue().unwrap().message.content(), "c");
    }

    #[test]
    fn drain_pending_empties_the_queue() {
        let mut c = Channel::new("#x", ChannelKind::Temporary, 4);
        c.enqueue(relay("a"), vec!["bob".into()]);
        let pending = c.drain_pending();
        assert_eq!(pending.len(), 1);
        assert!(!c.has_pending());
    }
}
