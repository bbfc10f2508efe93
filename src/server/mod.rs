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

//! Server core: connection records, command execution and the outbound
//! flush plan. The networking layers (`net`, `threaded`) move bytes; all
//! protocol decisions live here so they stay testable without sockets.

pub mod handlers;
pub mod net;
pub mod threaded;

use std::collections::VecDeque;
use std::time::Instant;

use mio::net::TcpStream;
use slab::Slab;

use crate::irc::frame::FrameBuffer;
use crate::irc::line::Line;
use crate::irc::parse;
use crate::irc::replies::Reply;
use crate::message::{split_tagged, Message, MessageKind, MessageQueue};
use crate::session::{Session, SessionLimits, SessionState};

/// Default client fd table size; a further reserved range covers the
/// listener, the signal source and the notification pipes.
pub const DEFAULT_CAPACITY: usize = 1024;
pub const RESERVED_SLOTS: usize = 128;

const SERVER_QUEUE_CAP: usize = 128;

/// What the caller should do with the connection after a line.
#[derive(Debug, PartialEq)]
pub enum LineAction {
    Continue,
    Close,
}

/// Per-connection record, created on accept and destroyed on disconnect.
/// Holds only the nickname as a lookup key into the session, never a
/// reference to the `User`.
pub struct Conn {
    pub stream: Option<TcpStream>,
    pub buf: FrameBuffer,
    pub wq: VecDeque<u8>,
    pub nickname: String,
    pub host: String,
    pub port: u16,
    pub state: SessionState,
    pub connected_at: Instant,
    pub write_interest: bool,
}

impl Conn {
    pub fn new(stream: Option<TcpStream>, host: &str, port: u16) -> Self {
        Conn {
            stream,
            buf: FrameBuffer::new(),
            wq: VecDeque::new(),
            nickname: String::new(),
            host: host.to_owned(),
            port,
            state: SessionState::Connected,
            connected_at: Instant::now(),
            write_interest: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state.is_registered()
    }
}

pub struct ServerCore {
    pub session: Session,
    conns: Slab<Conn>,
    out_queue: MessageQueue,
    name: String,
    capacity: usize,
    wait_time: u64,
    echo: bool,
}

impl ServerCore {
    pub fn new(name: &str, limits: SessionLimits, capacity: usize, wait_time: u64, echo: bool) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        ServerCore {
            session: Session::new(limits),
            conns: Slab::with_capacity(capacity),
            out_queue: MessageQueue::new(SERVER_QUEUE_CAP),
            name: name.to_owned(),
            capacity,
            wait_time,
            echo,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // --- connection table ----------------------------------------------

    /// Claims a free slot, or rejects the connection when the table is
    /// full. Slots are never reassigned while occupied.
    pub fn add_conn(&mut self, conn: Conn) -> Option<usize> {
        if self.conns.len() >= self.capacity {
            log::warn!("connection table full ({}), rejecting client", self.capacity);
            return None;
        }
        Some(self.conns.insert(conn))
    }

    pub fn remove_conn(&mut self, slot: usize) -> Option<Conn> {
        if self.conns.contains(slot) {
            Some(self.conns.remove(slot))
        } else {
            None
        }
    }

    pub fn conn(&self, slot: usize) -> Option<&Conn> {
        self.conns.get(slot)
    }

    pub fn conn_mut(&mut self, slot: usize) -> Option<&mut Conn> {
        self.conns.get_mut(slot)
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    pub fn conn_slots(&self) -> Vec<usize> {
        self.conns.iter().map(|(slot, _)| slot).collect()
    }

    // --- command execution ---------------------------------------------

    /// Runs one received frame through the parser and handlers. In echo
    /// mode the frame is bounced back unparsed.
    pub fn handle_line(&mut self, slot: usize, line: &str) -> LineAction {
        if self.echo {
            self.reply(slot, line.to_owned());
            return LineAction::Continue;
        }
        match parse::parse_command(line) {
            Some(tokens) => handlers::execute(self, slot, &tokens),
            None => LineAction::Continue,
        }
    }

    /// Routes a reply line to its connection: registered clients go
    /// through their user queue, earlier states through the server queue
    /// with the fd slot embedded in the separator.
    pub(crate) fn reply(&mut self, slot: usize, line: String) {
        let (registered, nickname) = match self.conns.get(slot) {
            Some(conn) => (conn.is_registered(), conn.nickname.clone()),
            None => return,
        };
        if registered {
            let msg = Message::new(MessageKind::Response, &line);
            if self.session.enqueue_to_user(&nickname, msg).is_ok() {
                return;
            }
        }
        let msg = Message::with_separator(MessageKind::Response, &slot.to_string(), &line);
        self.out_queue.push(msg);
    }

    pub(crate) fn nick_or_star(&self, slot: usize) -> String {
        match self.conns.get(slot) {
            Some(conn) if !conn.nickname.is_empty() => conn.nickname.clone(),
            _ => "*".to_owned(),
        }
    }

    /// `:<server> <code> <target> [extras ...] :<text>`
    pub(crate) fn numeric(&mut self, slot: usize, reply: Reply, extras: &[&str], text: &str) {
        let target = self.nick_or_star(slot);
        let mut line = Line::with_prefix(&self.name).param(reply.code).param(&target);
        for extra in extras {
            line = line.param(extra);
        }
        let built = line.trailing_forced(text).build();
        self.reply(slot, built);
    }

    // --- outbound flush -------------------------------------------------

    /// Drains everything pending into delivery order: the server's own
    /// queue first, then each ready user, then each ready channel fanned
    /// out to its per-broadcast membership snapshot.
    pub fn flush_plan(&mut self) -> Vec<(usize, String)> {
        let mut plan = Vec::new();

        while let Some(msg) = self.out_queue.pop() {
            let encoded = msg.encode();
            match split_tagged(&encoded).and_then(|(tag, line)| {
                tag.parse::<usize>().ok().map(|slot| (slot, line.to_owned()))
            }) {
                Some(entry) => plan.push(entry),
                None => log::error!("malformed server queue entry: {:?}", encoded),
            }
        }

        for nick in self.session.take_ready_users() {
            let slot = match self.session.user(&nick) {
                Some(user) => user.slot(),
                None => continue,
            };
            while let Some(msg) = self.session.user_mut(&nick).expect("just looked up").dequeue() {
                plan.push((slot, msg.content().to_owned()));
            }
        }

        for chan in self.session.take_ready_channels() {
            let pending = match self.session.channel_mut(&chan) {
                Some(channel) => channel.drain_pending(),
                None => continue,
            };
            for outbound in pending {
                for target in &outbound.targets {
                    if let Some(user) = self.session.user(target) {
                        plan.push((user.slot(), outbound.message.content().to_owned()));
                    }
                }
            }
        }

        plan
    }

    // --- lifecycle ------------------------------------------------------

    /// Transport-level teardown: a registered user says an implicit QUIT
    /// to every channel, then vanishes from the session. The caller owns
    /// closing the socket and freeing the slot.
    pub fn disconnect_cleanup(&mut self, slot: usize) {
        let (registered, nickname) = match self.conns.get(slot) {
            Some(conn) => (conn.is_registered(), conn.nickname.clone()),
            None => return,
        };
        if !registered {
            return;
        }
        if let Some(user) = self.session.user(&nickname) {
            let line = Line::with_prefix(&user.full_name()).param("QUIT").build();
            let farewell = Message::new(MessageKind::Relay, &line);
            self.session.leave_all(&nickname, &farewell);
            self.session.unregister_user(&nickname);
            log::info!("{} unregistered on disconnect", nickname);
        }
    }

    /// Connections that never completed registration within `wait_time`
    /// seconds are due for closing.
    pub fn sweep_idle(&mut self) -> Vec<usize> {
        let wait_time = self.wait_time;
        self.conns
            .iter()
            .filter(|(_, conn)| {
                !conn.is_registered() && conn.connected_at.elapsed().as_secs() >= wait_time
            })
            .map(|(slot, _)| slot)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::SessionLimits;

    fn core() -> ServerCore {
        ServerCore::new("parley.server", SessionLimits::default(), 8, 60, false)
    }

    #[test]
    fn conn_table_rejects_overflow() {
        let mut c = ServerCore::new("s", SessionLimits::default(), 2, 60, false);
        assert!(c.add_conn(Conn::new(None, "h", 1)).is_some());
        assert!(c.add_conn(Conn::new(None, "h", 2)).is_some());
        assert!(c.add_conn(Conn::new(None, "h", 3)).is_none());
    }

    #[test]
    fn slot_is_stable_until_removed() {
        let mut c = core();
        let a = c.add_conn(Conn::new(None, "h", 1)).unwrap();
        let b = c.add_conn(Conn::new(None, "h", 2)).unwrap();
        assert_ne!(a, b);
        c.remove_conn(a);
        assert!(c.conn(a).is_none());
        assert!(c.conn(b).is_some());
    }

    #[test]
    fn unregistered_replies_flush_through_the_server_queue() {
        let mut c = core();
        let slot = c.add_conn(Conn::new(None, "h", 1)).unwrap();
        c.reply(slot, "hello".to_owned());
        assert_eq!(c.flush_plan(), vec![(slot, "hello".to_owned())]);
    }

    #[test]
    fn echo_mode_bounces_frames_back() {
        let mut c = ServerCore::new("s", SessionLimits::default(), 8, 60, true);
        let slot = c.add_conn(Conn::new(None, "h", 1)).unwrap();
        assert_eq!(c.handle_line(slot, "anything at all"), LineAction::Continue);
        assert_eq!(c.flush_plan(), vec![(slot, "anything at all".to_owned())]);
    }

    #[test]
    fn sweep_finds_only_stale_unregistered_conns() {
        let mut c = ServerCore::new("s", SessionLimits::default(), 8, 0, false);
        let slot = c.add_conn(Conn::new(None, "h", 1)).unwrap();
        // wait_time 0: immediately overdue.
        assert_eq!(c.sweep_idle(), vec![slot]);
        c.conn_mut(slot).unwrap().state = SessionState::Registered;
        assert!(c.sweep_idle().is_empty());
    }
}
