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

//! Typed events, a bounded event queue and a per-subtype dispatcher.
//!
//! Producers (the poll loop, the signal decoder) push events; the owning
//! thread drains the queue and routes each event to the handler registered
//! for its (class, sub-kind) pair, falling back to the class base handler.

use std::collections::HashMap;
use std::collections::VecDeque;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UiEvent {
    Key,
    WinResize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkEvent {
    ClientConnect,
    ClientDisconnect,
    ClientMsg,
    ServerMsg,
    AddPollFd,
    RemovePollFd,
    PeerClose,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    Timer,
    Exit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventClass {
    Ui(UiEvent),
    Network(NetworkEvent),
    System(SystemEvent),
}

/// Coarse class tag, used for base-handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassTag {
    Ui,
    Network,
    System,
}

impl EventClass {
    pub fn tag(self) -> ClassTag {
        match self {
            EventClass::Ui(_) => ClassTag::Ui,
            EventClass::Network(_) => ClassTag::Network,
            EventClass::System(_) => ClassTag::System,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventData {
    Empty,
    Int(i64),
    Text(String),
}

impl EventData {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EventData::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventData::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub class: EventClass,
    pub data: EventData,
}

impl Event {
    pub fn ui(sub: UiEvent, data: EventData) -> Self {
        Event { class: EventClass::Ui(sub), data }
    }

    pub fn network(sub: NetworkEvent, data: EventData) -> Self {
        Event { class: EventClass::Network(sub), data }
    }

    pub fn system(sub: SystemEvent) -> Self {
        Event { class: EventClass::System(sub), data: EventData::Empty }
    }

    /// A received frame, tagged with the fd slot that produced it.
    pub fn client_msg(slot: usize, line: &str) -> Self {
        Event::network(
            NetworkEvent::ClientMsg,
            EventData::Text(format!("{}|{}", slot, line)),
        )
    }
}

/// Bounded ring of events. Enqueue never blocks: a full queue drops its
/// oldest entry and counts the loss.
#[derive(Debug)]
pub struct EventQueue {
    ring: VecDeque<Event>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_QUEUE_CAPACITY } else { capacity };
        EventQueue {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
            self.dropped += 1;
            log::warn!("event queue overflow, {} dropped so far", self.dropped);
        }
        self.ring.push_back(event);
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.ring.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

pub type EventHandler<C> = fn(&mut C, &Event);

/// Routes events to handlers registered by their owner. Dispatch picks the
/// sub-kind handler first and falls back to the class base handler.
pub struct Dispatcher<C> {
    base: HashMap<ClassTag, EventHandler<C>>,
    ui: HashMap<UiEvent, EventHandler<C>>,
    network: HashMap<NetworkEvent, EventHandler<C>>,
    system: HashMap<SystemEvent, EventHandler<C>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Dispatcher {
            base: HashMap::new(),
            ui: HashMap::new(),
            network: HashMap::new(),
            system: HashMap::new(),
        }
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_base(&mut self, tag: ClassTag, handler: EventHandler<C>) {
        self.base.insert(tag, handler);
    }

    pub fn on_ui(&mut self, sub: UiEvent, handler: EventHandler<C>) {
        self.ui.insert(sub, handler);
    }

    pub fn on_network(&mut self, sub: NetworkEvent, handler: EventHandler<C>) {
        self.network.insert(sub, handler);
    }

    pub fn on_system(&mut self, sub: SystemEvent, handler: EventHandler<C>) {
        self.system.insert(sub, handler);
    }

    pub fn dispatch(&self, ctx: &mut C, event: &Event) {
        let handler = match event.class {
            EventClass::Ui(sub) => self.ui.get(&sub),
            EventClass::Network(sub) => self.network.get(&sub),
            EventClass::System(sub) => self.system.get(&sub),
        };
        match handler.or_else(|| self.base.get(&event.class.tag())) {
            Some(handler) => handler(ctx, event),
            None => log::debug!("no handler for {:?}", event.class),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Trace {
        seen: Vec<&'static str>,
    }

    fn on_exit(t: &mut Trace, _: &Event) {
        t.seen.push("exit");
    }

    fn on_any_network(t: &mut Trace, _: &Event) {
        t.seen.push("net-base");
    }

    #[test]
    fn dispatch_prefers_subkind_over_base() {
        let mut d: Dispatcher<Trace> = Dispatcher::new();
        d.on_system(SystemEvent::Exit, on_exit);
        d.on_base(ClassTag::Network, on_any_network);

        let mut trace = Trace::default();
        d.dispatch(&mut trace, &Event::system(SystemEvent::Exit));
        d.dispatch(
            &mut trace,
            &Event::network(NetworkEvent::PeerClose, EventData::Int(4)),
        );
        // No handler at all: silently ignored.
        d.dispatch(&mut trace, &Event::ui(UiEvent::Key, EventData::Empty));

        assert_eq!(trace.seen, vec!["exit", "net-base"]);
    }

    #[test]
    fn queue_counts_overflow() {
        let mut q = EventQueue::new(2);
        q.push(Event::system(SystemEvent::Timer));
        q.push(Event::system(SystemEvent::Timer));
        q.push(Event::system(SystemEvent::Exit));

        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop(), Some(Event::system(SystemEvent::Timer)));
        assert_eq!(q.pop(), Some(Event::system(SystemEvent::Exit)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn client_msg_carries_slot_and_line() {
        let ev = Event::client_msg(12, "NICK alice");
        let text = ev.data.as_text().unwrap();
        let (slot, line) = crate::message::split_tagged(text).unwrap();
        assert_eq!(slot, "12");
        assert_eq!(line, "NICK alice");
    }
}
