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

use crate::message::{Message, MessageQueue};

/// A registered participant. Owned exclusively by the session; the fd slot
/// is a back-reference to the connection the user arrived on.
#[derive(Debug)]
pub struct User {
    nickname: String,
    username: String,
    hostname: String,
    realname: String,
    slot: usize,
    queue: MessageQueue,
}

impl User {
    pub fn new(
        nickname: &str,
        username: &str,
        hostname: &str,
        realname: &str,
        slot: usize,
        queue_capacity: usize,
    ) -> Self {
        User {
            nickname: nickname.to_owned(),
            username: username.to_owned(),
            hostname: hostname.to_owned(),
            realname: realname.to_owned(),
            slot,
            queue: MessageQueue::new(queue_capacity),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn realname(&self) -> &str {
        &self.realname
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The `nick!user@host` prefix this user's messages travel under.
    pub fn full_name(&self) -> String {
        format!("{}!{}@{}", self.nickname, self.username, self.hostname)
    }

    pub(crate) fn set_nickname(&mut self, nickname: &str) {
        self.nickname = nickname.to_owned();
    }

    pub fn enqueue(&mut self, message: Message) {
        self.queue.push(message);
    }

    pub fn dequeue(&mut self) -> Option<Message> {
        self.queue.pop()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::MessageKind;

    #[test]
    fn full_name_is_the_wire_prefix() {
        let u = User::new("alice", "alice", "host", "A", 3, 8);
        assert_eq!(u.full_name(), "alice!alice@host");
        assert_eq!(u.slot(), 3);
    }

    #[test]
    fn queue_preserves_order() {
        let mut u = User::new("bob", "bob", "h", "B", 0, 8);
        u.enqueue(Message::new(MessageKind::Response, "first"));
        u.enqueue(Message::new(MessageKind::Relay, "second"));
        assert!(u.has_pending());
        assert_eq!(u.dequeue().unwrap().content(), "first");
        assert_eq!(u.dequeue().unwrap().content(), "second");
        assert!(!u.has_pending());
    }
}
