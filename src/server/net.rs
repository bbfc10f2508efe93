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

//! Single-threaded server loop: one `mio::Poll` owns the listener, the
//! signal source and every client socket. Each tick polls, turns readiness
//! into events, drains the event queue through the dispatcher, then
//! flushes the outbound plan.

use std::io;
use std::mem;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Interest, Token};
use mio_signals::{Signal, SignalSet, Signals};

use crate::event::{
    ClassTag, Dispatcher, Event, EventData, EventQueue, NetworkEvent, SystemEvent,
};
use crate::irc::frame::{queue_line, FillOutcome, FlushOutcome};
use crate::message::split_tagged;
use crate::poll::PollManager;

use super::{LineAction, ServerCore};

const LISTENER: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
/// Client tokens start past the reserved range.
const FIRST_CLIENT: usize = 8;

fn conn_token(slot: usize) -> Token {
    Token(FIRST_CLIENT + slot)
}

fn token_slot(token: Token) -> Option<usize> {
    token.0.checked_sub(FIRST_CLIENT)
}

pub struct Server {
    core: ServerCore,
    listener: TcpListener,
    signals: Signals,
    poll: PollManager,
    events: EventQueue,
    dispatcher: Option<Dispatcher<Server>>,
    pending_close: Vec<usize>,
    running: bool,
    last_timer: Instant,
    timer_interval: Duration,
}

impl Server {
    pub fn new(core: ServerCore, mut listener: TcpListener) -> io::Result<Self> {
        let poll = PollManager::new(256)?;
        let mut signals = Signals::new(SignalSet::all())?;
        poll.add_source(&mut listener, LISTENER, Interest::READABLE)?;
        poll.add_source(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;

        Ok(Server {
            core,
            listener,
            signals,
            poll,
            events: EventQueue::new(0),
            dispatcher: Some(build_dispatcher()),
            pending_close: Vec::new(),
            running: true,
            last_timer: Instant::now(),
            timer_interval: Duration::from_secs(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn core(&self) -> &ServerCore {
        &self.core
    }

    pub fn run(&mut self) -> io::Result<()> {
        log::info!("listening on {}", self.listener.local_addr()?);
        while self.running {
            self.tick(Duration::from_secs(1))?;
        }
        for slot in self.core.conn_slots() {
            self.teardown(slot);
        }
        log::info!("server loop finished");
        Ok(())
    }

    /// One iteration: poll, read, dispatch, flush.
    pub fn tick(&mut self, timeout: Duration) -> io::Result<()> {
        self.poll.poll(Some(timeout))?;

        let ready: Vec<Token> = self.poll.ready().to_vec();
        for token in ready {
            match token {
                LISTENER => {
                    if self.poll.is_input_ready(LISTENER) {
                        self.events
                            .push(Event::network(NetworkEvent::ClientConnect, EventData::Empty));
                    }
                }
                SIGNAL_TOKEN => self.drain_signals()?,
                token => {
                    let slot = match token_slot(token) {
                        Some(slot) => slot,
                        None => continue,
                    };
                    if self.poll.is_error(token) {
                        self.events.push(Event::network(
                            NetworkEvent::PeerClose,
                            EventData::Int(slot as i64),
                        ));
                        continue;
                    }
                    if self.poll.is_input_ready(token) {
                        self.read_conn(slot);
                    }
                    if self.poll.is_output_ready(token) {
                        self.write_conn(slot);
                    }
                }
            }
        }

        if self.last_timer.elapsed() >= self.timer_interval {
            self.last_timer = Instant::now();
            self.events.push(Event::system(SystemEvent::Timer));
        }

        let dispatcher = self.dispatcher.take().expect("dispatcher is always present");
        while let Some(event) = self.events.pop() {
            dispatcher.dispatch(self, &event);
        }
        self.dispatcher = Some(dispatcher);

        self.flush_outbound();

        let mut closing = mem::take(&mut self.pending_close);
        closing.dedup();
        for slot in closing {
            self.teardown(slot);
        }
        Ok(())
    }

    fn drain_signals(&mut self) -> io::Result<()> {
        loop {
            match self.signals.receive()? {
                Some(Signal::Interrupt) | Some(Signal::Terminate) | Some(Signal::Quit) => {
                    self.events.push(Event::system(SystemEvent::Exit));
                }
                Some(_) => {}
                None => break,
            }
        }
        Ok(())
    }

    /// Reads whatever the socket holds, turning complete frames into
    /// `ClientMsg` events tagged with the slot.
    fn read_conn(&mut self, slot: usize) {
        let conn = match self.core.conn_mut(slot) {
            Some(conn) => conn,
            None => return,
        };
        let buf = &mut conn.buf;
        let stream = match conn.stream.as_mut() {
            Some(stream) => stream,
            None => return,
        };
        loop {
            match buf.fill(stream) {
                Ok(FillOutcome::Read(_)) | Ok(FillOutcome::Full) => {
                    for frame in buf.take_frames() {
                        self.events.push(Event::client_msg(slot, &frame));
                    }
                }
                Ok(FillOutcome::Blocked) => break,
                Ok(FillOutcome::Eof) => {
                    self.events.push(Event::network(
                        NetworkEvent::ClientDisconnect,
                        EventData::Int(slot as i64),
                    ));
                    break;
                }
                Err(err) => {
                    log::debug!("read error on slot {}: {}", slot, err);
                    self.events.push(Event::network(
                        NetworkEvent::ClientDisconnect,
                        EventData::Int(slot as i64),
                    ));
                    break;
                }
            }
        }
    }

    /// Pushes queued bytes out; adjusts WRITABLE interest so the loop
    /// wakes again only while something is pending.
    fn write_conn(&mut self, slot: usize) {
        let poll = &self.poll;
        let conn = match self.core.conn_mut(slot) {
            Some(conn) => conn,
            None => return,
        };
        if conn.wq.is_empty() && !conn.write_interest {
            return;
        }
        let stream = match conn.stream.as_mut() {
            Some(stream) => stream,
            None => {
                conn.wq.clear();
                return;
            }
        };
        match crate::irc::frame::flush_queue(stream, &mut conn.wq) {
            Ok(FlushOutcome::Drained) => {
                if conn.write_interest {
                    let _ = poll.update_source(stream, conn_token(slot), Interest::READABLE);
                    conn.write_interest = false;
                }
            }
            Ok(FlushOutcome::Blocked) => {
                if !conn.write_interest {
                    let _ = poll.update_source(
                        stream,
                        conn_token(slot),
                        Interest::READABLE | Interest::WRITABLE,
                    );
                    conn.write_interest = true;
                }
            }
            Ok(FlushOutcome::Closed) => self.pending_close.push(slot),
            Err(err) => {
                log::debug!("write error on slot {}: {}", slot, err);
                self.pending_close.push(slot);
            }
        }
    }

    fn flush_outbound(&mut self) {
        let plan = self.core.flush_plan();
        for (slot, line) in plan {
            if let Some(conn) = self.core.conn_mut(slot) {
                queue_line(&mut conn.wq, &line);
            }
        }
        for slot in self.core.conn_slots() {
            self.write_conn(slot);
        }
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let conn = super::Conn::new(
                        Some(stream),
                        &addr.ip().to_string(),
                        addr.port(),
                    );
                    match self.core.add_conn(conn) {
                        Some(slot) => {
                            log::info!("new client from {} (slot {})", addr, slot);
                            self.events.push(Event::network(
                                NetworkEvent::AddPollFd,
                                EventData::Int(slot as i64),
                            ));
                        }
                        None => {
                            // Table full; the stream drops and closes here.
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::error!("accept failed: {}", err);
                    break;
                }
            }
        }
    }

    fn teardown(&mut self, slot: usize) {
        self.core.disconnect_cleanup(slot);
        if let Some(mut conn) = self.core.remove_conn(slot) {
            if let Some(mut stream) = conn.stream.take() {
                let _ = self.poll.remove_source(&mut stream);
            }
            log::info!("connection closed (slot {})", slot);
        }
    }
}

fn build_dispatcher() -> Dispatcher<Server> {
    let mut d = Dispatcher::new();
    d.on_network(NetworkEvent::ClientConnect, on_client_connect);
    d.on_network(NetworkEvent::AddPollFd, on_add_poll_fd);
    d.on_network(NetworkEvent::ClientMsg, on_client_msg);
    d.on_network(NetworkEvent::ClientDisconnect, on_conn_gone);
    d.on_network(NetworkEvent::PeerClose, on_conn_gone);
    d.on_system(SystemEvent::Timer, on_timer);
    d.on_system(SystemEvent::Exit, on_exit);
    d.on_base(ClassTag::Network, on_unhandled_network);
    d
}

fn on_client_connect(server: &mut Server, _: &Event) {
    server.accept_clients();
}

fn on_add_poll_fd(server: &mut Server, event: &Event) {
    let slot = match event.data.as_int() {
        Some(slot) => slot as usize,
        None => return,
    };
    if let Some(conn) = server.core.conn_mut(slot) {
        if let Some(stream) = conn.stream.as_mut() {
            if let Err(err) = server.poll.add_source(stream, conn_token(slot), Interest::READABLE) {
                log::error!("cannot watch slot {}: {}", slot, err);
                server.pending_close.push(slot);
            }
        }
    }
}

fn on_client_msg(server: &mut Server, event: &Event) {
    let text = match event.data.as_text() {
        Some(text) => text,
        None => return,
    };
    let (slot, line) = match split_tagged(text) {
        Some((tag, line)) => match tag.parse::<usize>() {
            Ok(slot) => (slot, line),
            Err(_) => return,
        },
        None => return,
    };
    if server.core.handle_line(slot, line) == LineAction::Close {
        server.teardown(slot);
    }
}

fn on_conn_gone(server: &mut Server, event: &Event) {
    if let Some(slot) = event.data.as_int() {
        server.teardown(slot as usize);
    }
}

fn on_timer(server: &mut Server, _: &Event) {
    for slot in server.core.sweep_idle() {
        log::info!("closing unregistered client (slot {})", slot);
        server.teardown(slot);
    }
}

fn on_exit(server: &mut Server, _: &Event) {
    server.running = false;
}

fn on_unhandled_network(_: &mut Server, event: &Event) {
    log::debug!("unhandled network event {:?}", event.class);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::Conn;
    use crate::session::SessionLimits;
    use std::io::{Read, Write};

    fn test_server(wait_time: u64) -> Server {
        let core = ServerCore::new("parley.server", SessionLimits::default(), 16, wait_time, false);
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        Server::new(core, listener).unwrap()
    }

    fn connect(server: &Server) -> std::net::TcpStream {
        let stream = std::net::TcpStream::connect(server.local_addr().unwrap()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        stream
    }

    fn pump(server: &mut Server, ticks: usize) {
        for _ in 0..ticks {
            server.tick(Duration::from_millis(5)).unwrap();
        }
    }

    /// Ticks the server until `peer` has produced `want` complete lines
    /// (or the budget runs out).
    fn recv_lines(
        server: &mut Server,
        peer: &mut std::net::TcpStream,
        want: usize,
    ) -> Vec<String> {
        let mut acc = String::new();
        let mut buf = [0u8; 2048];
        for _ in 0..200 {
            server.tick(Duration::from_millis(5)).unwrap();
            match peer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => acc.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => panic!("read failed: {}", e),
            }
            if acc.matches("\r\n").count() >= want {
                break;
            }
        }
        acc.split("\r\n").filter(|l| !l.is_empty()).map(str::to_owned).collect()
    }

    #[test]
    fn registration_over_a_real_socket() {
        let mut server = test_server(60);
        let mut a = connect(&server);
        pump(&mut server, 10);
        assert_eq!(server.core().conn_count(), 1);

        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\n").unwrap();
        let lines = recv_lines(&mut server, &mut a, 1);
        assert_eq!(lines, vec![":parley.server 001 alice :Welcome to the IRC Network"]);
    }

    #[test]
    fn two_clients_exchange_channel_messages() {
        let mut server = test_server(60);
        let mut a = connect(&server);
        let mut b = connect(&server);
        pump(&mut server, 3);

        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\nJOIN #dev\r\n").unwrap();
        // Welcome + join echo + topic + names + end-of-names.
        let _ = recv_lines(&mut server, &mut a, 5);
        b.write_all(b"NICK bob\r\nUSER bob 0 * :B\r\nJOIN #dev\r\n").unwrap();
        let _ = recv_lines(&mut server, &mut b, 5);
        // Drain the JOIN broadcast a receives for bob.
        let _ = recv_lines(&mut server, &mut a, 1);

        a.write_all(b"PRIVMSG #dev :hi\r\n").unwrap();
        let lines = recv_lines(&mut server, &mut b, 1);
        assert!(lines.iter().any(|l| l.contains("PRIVMSG #dev :hi")), "{:?}", lines);
    }

    #[test]
    fn quit_closes_the_socket() {
        let mut server = test_server(60);
        let mut a = connect(&server);
        pump(&mut server, 3);
        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\nQUIT :later\r\n").unwrap();

        let mut saw_eof = false;
        let mut buf = [0u8; 512];
        for _ in 0..200 {
            server.tick(Duration::from_millis(5)).unwrap();
            match a.read(&mut buf) {
                Ok(0) => {
                    saw_eof = true;
                    break;
                }
                Ok(_) => {}
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(_) => {
                    saw_eof = true;
                    break;
                }
            }
        }
        assert!(saw_eof);
        assert_eq!(server.core().conn_count(), 0);
        assert!(server.core().session.user("alice").is_none());
    }

    #[test]
    fn idle_unregistered_clients_are_swept() {
        let mut server = test_server(0);
        server.timer_interval = Duration::from_millis(0);
        let mut a = connect(&server);

        // wait_time 0: the first timer tick after the accept closes the
        // client again.
        pump(&mut server, 10);
        assert_eq!(server.core().conn_count(), 0);

        let mut buf = [0u8; 64];
        let mut saw_eof = false;
        for _ in 0..50 {
            match a.read(&mut buf) {
                Ok(0) => {
                    saw_eof = true;
                    break;
                }
                Ok(_) => {}
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(_) => {
                    saw_eof = true;
                    break;
                }
            }
        }
        assert!(saw_eof);
    }

    #[test]
    fn peer_reset_cleans_up_membership() {
        let mut server = test_server(60);
        let mut a = connect(&server);
        let mut b = connect(&server);
        pump(&mut server, 3);
        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\nJOIN #dev\r\n").unwrap();
        b.write_all(b"NICK bob\r\nUSER bob 0 * :B\r\nJOIN #dev\r\n").unwrap();
        let _ = recv_lines(&mut server, &mut a, 5);
        let _ = recv_lines(&mut server, &mut b, 5);

        drop(a);
        pump(&mut server, 10);
        assert!(server.core().session.user("alice").is_none());
        assert!(server.core().session.relations_consistent());
        // bob is told alice went away.
        let lines = recv_lines(&mut server, &mut b, 1);
        assert!(lines.iter().any(|l| l.contains("QUIT")), "{:?}", lines);
    }

    #[test]
    fn rejected_when_table_is_full() {
        let core = ServerCore::new("parley.server", SessionLimits::default(), 1, 60, false);
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut server = Server::new(core, listener).unwrap();

        let _a = connect(&server);
        pump(&mut server, 5);
        assert_eq!(server.core().conn_count(), 1);

        let _b = connect(&server);
        pump(&mut server, 5);
        // The second connection was rejected outright.
        assert_eq!(server.core().conn_count(), 1);
    }

    #[test]
    fn unused_conn_struct_can_live_without_a_stream() {
        // Handlers run against stream-less conns in core tests; make sure
        // the net layer tolerates them too.
        let mut server = test_server(60);
        let slot = server.core.add_conn(Conn::new(None, "host", 1)).unwrap();
        server.read_conn(slot);
        server.write_conn(slot);
        server.teardown(slot);
        assert_eq!(server.core().conn_count(), 0);
    }
}
