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

//! The terminal client engine.
//!
//! The UI proper is an external collaborator reached through
//! [`UserInterface`]: the engine asks it to display formatted lines, and
//! the run loop feeds it one input line at a time. Everything else — the
//! connection state machine, local command execution, forwarding, PING
//! handling — lives here.

pub mod history;

use std::collections::VecDeque;
use std::io;
use std::net::ToSocketAddrs;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Interest, Token};
use mio_signals::{Signal, SignalSet, Signals};

use crate::event::{
    Dispatcher, Event, EventData, EventQueue, NetworkEvent, SystemEvent, UiEvent,
};
use crate::irc::command::CommandKind;
use crate::irc::frame::{flush_queue, queue_line, FillOutcome, FrameBuffer};
use crate::irc::line::{Line, WireMessage};
use crate::irc::parse::parse_command;
use crate::poll::PollManager;
use crate::session::{client_states, is_allowed_command, is_valid_nickname, transition, SessionState};

use history::History;

const STDIN: Token = Token(0);
const CONN: Token = Token(1);
const SIGNAL_TOKEN: Token = Token(2);

/// What the engine consumes from the windowing layer: nothing but "show
/// this line" (and a resize poke).
pub trait UserInterface {
    fn display(&mut self, line: &str);
    fn resized(&mut self) {}
}

/// Side effects the run loop must apply after an input line.
#[derive(Debug, PartialEq)]
pub enum Effect {
    Connected,
    Disconnected,
    Quit,
}

pub enum ReadOutcome {
    Lines(Vec<String>),
    Closed,
    Idle,
}

pub struct ClientEngine<U: UserInterface> {
    pub ui: U,
    state: SessionState,
    nickname: String,
    username: String,
    realname: String,
    address: String,
    port: u16,
    stream: Option<TcpStream>,
    rbuf: FrameBuffer,
    wq: VecDeque<u8>,
    channels: Vec<String>,
    current_channel: Option<String>,
    pub history: History,
}

impl<U: UserInterface> ClientEngine<U> {
    pub fn new(ui: U, nickname: &str, address: &str, port: u16) -> Self {
        ClientEngine {
            ui,
            state: SessionState::Disconnected,
            nickname: nickname.to_owned(),
            username: String::new(),
            realname: String::new(),
            address: address.to_owned(),
            port,
            stream: None,
            rbuf: FrameBuffer::new(),
            wq: VecDeque::new(),
            channels: Vec::new(),
            current_channel: None,
            history: History::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    fn set_state(&mut self, to: SessionState) {
        match transition(client_states(), self.state, to) {
            Ok(next) => self.state = next,
            Err(err) => log::error!("{}", err),
        }
    }

    fn send(&mut self, line: &str) {
        log::debug!("-> {}", line);
        queue_line(&mut self.wq, line);
    }

    /// One UI input line: local commands run here, the rest is forwarded.
    pub fn handle_input_line(&mut self, line: &str) -> Vec<Effect> {
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if line.is_empty() {
            return Vec::new();
        }
        self.history.push(line);

        if !line.starts_with('/') {
            // Bare text goes to the active channel.
            if self.state == SessionState::InChannel {
                if let Some(chan) = self.current_channel.clone() {
                    let out = Line::new()
                        .param("PRIVMSG")
                        .param(&chan)
                        .trailing_forced(line)
                        .build();
                    self.send(&out);
                }
            } else {
                self.ui.display("no active channel, join one first");
            }
            return Vec::new();
        }

        let tokens = match parse_command(line) {
            Some(tokens) => tokens,
            None => return Vec::new(),
        };
        if tokens.command == CommandKind::Unknown {
            self.ui.display(&format!("Unknown command: {}", tokens.label));
            return Vec::new();
        }
        if !is_allowed_command(client_states(), self.state, tokens.command) {
            self.ui
                .display(&format!("{} is not available right now", tokens.label));
            return Vec::new();
        }

        match tokens.command {
            CommandKind::Help => self.show_help(tokens.arg(0)),
            CommandKind::Address => match tokens.arg(0) {
                Some(address) => {
                    self.address = address.to_owned();
                    self.ui.display(&format!("address set to {}", self.address));
                }
                None => self.ui.display(CommandKind::Address.syntax()),
            },
            CommandKind::Port => match tokens.arg(0).and_then(|p| p.parse::<u16>().ok()) {
                Some(port) => {
                    self.port = port;
                    self.ui.display(&format!("port set to {}", self.port));
                }
                None => self.ui.display(CommandKind::Port.syntax()),
            },
            CommandKind::Connect => {
                if let Some(address) = tokens.arg(0) {
                    self.address = address.to_owned();
                }
                if let Some(port) = tokens.arg(1).and_then(|p| p.parse::<u16>().ok()) {
                    self.port = port;
                }
                match self.connect() {
                    Ok(()) => return vec![Effect::Connected],
                    Err(err) => self.ui.display(&format!(
                        "cannot connect to {}:{}: {}",
                        self.address, self.port, err
                    )),
                }
            }
            CommandKind::Disconnect => {
                if self.is_connected() {
                    let mut out = Line::new().param("QUIT");
                    if let Some(reason) = tokens.arg(0) {
                        out = out.trailing_forced(reason);
                    }
                    let out = out.build();
                    self.send(&out);
                }
                self.drop_connection();
                self.ui.display("disconnected");
                return vec![Effect::Disconnected];
            }
            CommandKind::Nick => match tokens.arg(0) {
                Some(nick) => {
                    if !is_valid_nickname(nick) {
                        self.ui.display(&format!("erroneous nickname: {}", nick));
                    } else if self.state == SessionState::Disconnected {
                        self.nickname = nick.to_owned();
                        self.ui.display(&format!("nickname set to {}", self.nickname));
                    } else {
                        let out = format!("NICK {}", nick);
                        self.send(&out);
                        if !self.state.is_registered() {
                            self.nickname = nick.to_owned();
                        }
                        if self.state == SessionState::Connected {
                            self.set_state(SessionState::StartRegistration);
                        }
                    }
                }
                None => self.ui.display(CommandKind::Nick.syntax()),
            },
            CommandKind::User => {
                let username = tokens
                    .arg(0)
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.nickname.clone());
                let realname = tokens
                    .arg(1)
                    .map(str::to_owned)
                    .unwrap_or_else(|| username.clone());
                if username.is_empty() {
                    self.ui.display(CommandKind::User.syntax());
                } else if self.state == SessionState::Disconnected {
                    self.username = username;
                    self.realname = realname;
                    self.ui.display("user details recorded");
                } else {
                    self.username = username;
                    self.realname = realname;
                    let out = format!("USER {} 0 * :{}", self.username, self.realname);
                    self.send(&out);
                    self.set_state(SessionState::Registered);
                }
            }
            CommandKind::Join => match tokens.arg(0) {
                Some(chan) => {
                    let out = format!("JOIN {}", chan);
                    self.send(&out);
                }
                None => self.ui.display(CommandKind::Join.syntax()),
            },
            CommandKind::Part => {
                let chan = tokens
                    .arg(0)
                    .map(str::to_owned)
                    .or_else(|| self.current_channel.clone());
                match chan {
                    Some(chan) => {
                        let mut out = Line::new().param("PART").param(&chan);
                        if let Some(reason) = tokens.arg(1) {
                            out = out.trailing_forced(reason);
                        }
                        let out = out.build();
                        self.send(&out);
                    }
                    None => self.ui.display(CommandKind::Part.syntax()),
                }
            }
            CommandKind::PrivMsg => {
                if tokens.arg_count() < 2 {
                    self.ui.display(CommandKind::PrivMsg.syntax());
                } else {
                    let out = Line::new()
                        .param("PRIVMSG")
                        .param(tokens.arg(0).expect("checked"))
                        .trailing_forced(tokens.arg(1).expect("checked"))
                        .build();
                    self.send(&out);
                }
            }
            CommandKind::Whois => match tokens.arg(0) {
                Some(nick) => {
                    let out = format!("WHOIS {}", nick);
                    self.send(&out);
                }
                None => self.ui.display(CommandKind::Whois.syntax()),
            },
            CommandKind::Quit => {
                if self.is_connected() {
                    let mut out = Line::new().param("QUIT");
                    if let Some(reason) = tokens.arg(0) {
                        out = out.trailing_forced(reason);
                    }
                    let out = out.build();
                    self.send(&out);
                }
                self.drop_connection();
                return vec![Effect::Quit];
            }
            CommandKind::Unknown => unreachable!("handled above"),
        }
        Vec::new()
    }

    fn show_help(&mut self, topic: Option<&str>) {
        match topic.map(CommandKind::from_label) {
            Some(cmd) if cmd != CommandKind::Unknown => {
                self.ui.display(&format!("{} - {}", cmd.syntax(), cmd.description()));
            }
            _ => {
                self.ui.display("available commands:");
                for cmd in CommandKind::all() {
                    self.ui
                        .display(&format!("  {:<34} {}", cmd.syntax(), cmd.description()));
                }
            }
        }
    }

    /// One server line: answer PING, track our own JOIN/PART/NICK echoes,
    /// and hand the rest to the UI formatted for reading.
    pub fn handle_server_line(&mut self, raw: &str) {
        log::debug!("<- {}", raw);
        let msg = WireMessage::parse(raw);
        let command = match msg.command {
            Some(command) => command,
            None => return,
        };
        let from = msg.origin.nick.unwrap_or("server");
        let is_me = msg
            .origin
            .nick
            .map(|n| n.eq_ignore_ascii_case(&self.nickname))
            .unwrap_or(false);

        match command {
            "PING" => {
                let mut out = Line::new().param("PONG");
                if let Some(token) = msg.params.first() {
                    out = out.trailing_forced(token);
                }
                let out = out.build();
                self.send(&out);
            }
            "PRIVMSG" => {
                let target = msg.params.first().copied().unwrap_or("?");
                let text = msg.params.get(1).copied().unwrap_or("");
                self.ui.display(&format!("[{}] <{}> {}", target, from, text));
            }
            "JOIN" => {
                let chan = msg.params.first().copied().unwrap_or("?");
                if is_me {
                    self.channels.push(chan.to_owned());
                    self.current_channel = Some(chan.to_owned());
                    if self.state == SessionState::Registered {
                        self.set_state(SessionState::InChannel);
                    }
                }
                self.ui.display(&format!("{} joined {}", from, chan));
            }
            "PART" => {
                let chan = msg.params.first().copied().unwrap_or("?");
                if is_me {
                    self.channels.retain(|c| !c.eq_ignore_ascii_case(chan));
                    if self
                        .current_channel
                        .as_deref()
                        .map(|c| c.eq_ignore_ascii_case(chan))
                        .unwrap_or(false)
                    {
                        self.current_channel = self.channels.last().cloned();
                    }
                    if self.channels.is_empty() && self.state == SessionState::InChannel {
                        self.set_state(SessionState::Registered);
                    }
                }
                self.ui.display(&format!("{} left {}", from, chan));
            }
            "NICK" => {
                let new = msg.params.first().copied().unwrap_or("?");
                if is_me {
                    self.nickname = new.to_owned();
                }
                self.ui.display(&format!("{} is now known as {}", from, new));
            }
            "QUIT" => {
                let reason = msg.params.first().copied().unwrap_or("");
                self.ui.display(&format!("{} quit {}", from, reason));
            }
            code => {
                self.ui.display(&format!("{} {}", code, msg.params.join(" ")));
            }
        }
    }

    /// Teacher-style address resolution: try each resolved address until
    /// one connects.
    fn connect(&mut self) -> io::Result<()> {
        let conn_str = format!("{}:{}", self.address, self.port);
        let mut addrs = conn_str.to_socket_addrs()?;
        let mut last_err = io::Error::new(io::ErrorKind::Other, "no address resolved");
        let stream = loop {
            match addrs.next() {
                Some(addr) => match TcpStream::connect(addr) {
                    Ok(stream) => break stream,
                    Err(err) => last_err = err,
                },
                None => return Err(last_err),
            }
        };
        self.stream = Some(stream);
        self.set_state(SessionState::Connected);
        self.ui.display(&format!("connected to {}", conn_str));
        Ok(())
    }

    /// Best-effort flush, then forget the transport.
    pub fn drop_connection(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = flush_queue(&mut stream, &mut self.wq);
        }
        self.wq.clear();
        self.rbuf = FrameBuffer::new();
        self.channels.clear();
        self.current_channel = None;
        if self.state != SessionState::Disconnected {
            self.set_state(SessionState::Disconnected);
        }
    }

    /// Pulls whatever the server sent, framed into lines.
    pub fn read_server(&mut self) -> ReadOutcome {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return ReadOutcome::Idle,
        };
        let mut lines = Vec::new();
        loop {
            match self.rbuf.fill(stream) {
                Ok(FillOutcome::Read(_)) | Ok(FillOutcome::Full) => {
                    lines.extend(self.rbuf.take_frames());
                }
                Ok(FillOutcome::Blocked) => break,
                Ok(FillOutcome::Eof) => return ReadOutcome::Closed,
                Err(err) => {
                    log::debug!("read error: {}", err);
                    return ReadOutcome::Closed;
                }
            }
        }
        if lines.is_empty() {
            ReadOutcome::Idle
        } else {
            ReadOutcome::Lines(lines)
        }
    }

    pub fn flush_wire(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = flush_queue(stream, &mut self.wq) {
                log::debug!("flush error: {}", err);
            }
        }
    }
}

struct ClientLoop<U: UserInterface> {
    engine: ClientEngine<U>,
    poll: PollManager,
    events: EventQueue,
    running: bool,
}

fn build_dispatcher<U: UserInterface>() -> Dispatcher<ClientLoop<U>> {
    let mut d = Dispatcher::new();
    d.on_ui(UiEvent::Key, on_key::<U>);
    d.on_ui(UiEvent::WinResize, on_resize::<U>);
    d.on_network(NetworkEvent::ServerMsg, on_server_msg::<U>);
    d.on_network(NetworkEvent::PeerClose, on_peer_close::<U>);
    d.on_network(NetworkEvent::AddPollFd, on_add_poll_fd::<U>);
    d.on_network(NetworkEvent::RemovePollFd, on_remove_poll_fd::<U>);
    d.on_system(SystemEvent::Exit, on_exit::<U>);
    d
}

fn on_key<U: UserInterface>(cl: &mut ClientLoop<U>, event: &Event) {
    let line = match event.data.as_text() {
        Some(line) => line.to_owned(),
        None => return,
    };
    for effect in cl.engine.handle_input_line(&line) {
        match effect {
            Effect::Connected => cl
                .events
                .push(Event::network(NetworkEvent::AddPollFd, EventData::Empty)),
            Effect::Disconnected => {}
            Effect::Quit => cl.running = false,
        }
    }
}

fn on_resize<U: UserInterface>(cl: &mut ClientLoop<U>, _: &Event) {
    cl.engine.ui.resized();
}

fn on_server_msg<U: UserInterface>(cl: &mut ClientLoop<U>, event: &Event) {
    if let Some(line) = event.data.as_text() {
        let line = line.to_owned();
        cl.engine.handle_server_line(&line);
    }
}

fn on_add_poll_fd<U: UserInterface>(cl: &mut ClientLoop<U>, _: &Event) {
    let poll = &cl.poll;
    if let Some(stream) = cl.engine.stream_mut() {
        if let Err(err) = poll.add_source(stream, CONN, Interest::READABLE) {
            log::error!("cannot watch server socket: {}", err);
        }
    }
}

fn on_remove_poll_fd<U: UserInterface>(cl: &mut ClientLoop<U>, _: &Event) {
    let poll = &cl.poll;
    if let Some(stream) = cl.engine.stream_mut() {
        let _ = poll.remove_source(stream);
    }
    cl.engine.drop_connection();
}

fn on_peer_close<U: UserInterface>(cl: &mut ClientLoop<U>, _: &Event) {
    cl.engine.ui.display("server closed the connection");
    cl.events
        .push(Event::network(NetworkEvent::RemovePollFd, EventData::Empty));
}

fn on_exit<U: UserInterface>(cl: &mut ClientLoop<U>, _: &Event) {
    cl.running = false;
}

/// Terminal client loop: stdin, the server socket and signals on one
/// poll. Input lines become `UI::Key` events; server frames become
/// `Network::ServerMsg` events.
pub fn run<U: UserInterface>(engine: ClientEngine<U>) -> io::Result<()> {
    let mut cl = ClientLoop {
        engine,
        poll: PollManager::new(64)?,
        events: EventQueue::new(0),
        running: true,
    };
    let dispatcher = build_dispatcher::<U>();

    let stdin = io::stdin();
    let stdin_fd = stdin.as_raw_fd();
    cl.poll
        .add_source(&mut SourceFd(&stdin_fd), STDIN, Interest::READABLE)?;
    let mut signals = Signals::new(SignalSet::all())?;
    cl.poll.add_source(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;
    let mut stdin_buf = FrameBuffer::new();

    while cl.running {
        cl.poll.poll(Some(Duration::from_secs(1)))?;
        let ready: Vec<Token> = cl.poll.ready().to_vec();
        for token in ready {
            match token {
                STDIN => {
                    // Terminal input is line-buffered; one read per
                    // readiness never blocks.
                    let mut handle = stdin.lock();
                    match stdin_buf.fill(&mut handle) {
                        Ok(FillOutcome::Eof) => cl.events.push(Event::system(SystemEvent::Exit)),
                        Ok(_) => {
                            for line in stdin_buf.take_frames() {
                                cl.events.push(Event::ui(UiEvent::Key, EventData::Text(line)));
                            }
                        }
                        Err(err) => {
                            log::error!("stdin read failed: {}", err);
                            cl.events.push(Event::system(SystemEvent::Exit));
                        }
                    }
                }
                CONN => match cl.engine.read_server() {
                    ReadOutcome::Lines(lines) => {
                        for line in lines {
                            cl.events
                                .push(Event::network(NetworkEvent::ServerMsg, EventData::Text(line)));
                        }
                    }
                    ReadOutcome::Closed => cl
                        .events
                        .push(Event::network(NetworkEvent::PeerClose, EventData::Empty)),
                    ReadOutcome::Idle => {}
                },
                SIGNAL_TOKEN => loop {
                    match signals.receive()? {
                        Some(Signal::Interrupt) | Some(Signal::Terminate) | Some(Signal::Quit) => {
                            cl.events.push(Event::system(SystemEvent::Exit));
                        }
                        Some(_) => {}
                        None => break,
                    }
                },
                _ => {}
            }
        }

        while let Some(event) = cl.events.pop() {
            dispatcher.dispatch(&mut cl, &event);
        }
        cl.engine.flush_wire();
    }

    cl.engine.drop_connection();
    Ok(())
}
