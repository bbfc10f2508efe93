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

//! Reader-pool server variant.
//!
//! Connections are partitioned across `N` reader threads; a dedicated
//! writer thread owns the outbound flush. The first reader also owns the
//! listening socket. Threads notify each other by writing short
//! CRLF-terminated tokens (`client`, `message`, `sigint`) into the peer's
//! pipe, which every thread polls like any other fd. Sockets are shared
//! as `RwLock<TcpStream>` handles so the writer can use them without
//! stealing them from the owning reader's poll. Locks are never nested:
//! the fd table and the core are each taken and released on their own.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use mio::net::{TcpListener, TcpStream};
use mio::unix::pipe;
use mio::{Interest, Token};
use mio_signals::{Signal, SignalSet, Signals};

use crate::irc::frame::{FillOutcome, FrameScanner, FrameStatus};
use crate::poll::PollManager;

use super::{Conn, LineAction, ServerCore};

const LISTENER: Token = Token(0);
const CONTROL: Token = Token(1);
const ACCEPTS: Token = Token(2);
const FIRST_CLIENT: usize = 8;

const TOKEN_CLIENT: &[u8] = b"client\r\n";
const TOKEN_MESSAGE: &[u8] = b"message\r\n";
const TOKEN_SIGINT: &[u8] = b"sigint\r\n";

struct ConnStream {
    stream: RwLock<TcpStream>,
}

struct Shared {
    core: Mutex<ServerCore>,
    streams: RwLock<HashMap<usize, Arc<ConnStream>>>,
}

pub struct Handle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    reader_controls: Vec<pipe::Sender>,
    writer_control: pipe::Sender,
    readers: Vec<thread::JoinHandle<()>>,
    writer: thread::JoinHandle<()>,
}

impl Handle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn conn_count(&self) -> usize {
        self.shared.core.lock().expect("core lock").conn_count()
    }

    /// Funnels `sigint` through every thread's pipe, then joins them.
    /// The writer goes last so it can flush whatever the readers left.
    pub fn shutdown(mut self) {
        for control in &mut self.reader_controls {
            let _ = control.write(TOKEN_SIGINT);
        }
        for reader in self.readers {
            let _ = reader.join();
        }
        let _ = self.writer_control.write(TOKEN_SIGINT);
        let _ = self.writer.join();
        log::info!("threaded server stopped");
    }
}

/// Spawns the reader pool and the writer thread over an already-bound
/// listener.
pub fn start(core: ServerCore, listener: TcpListener, readers: usize) -> io::Result<Handle> {
    let readers = readers.max(1);
    let local_addr = listener.local_addr()?;
    let shared = Arc::new(Shared {
        core: Mutex::new(core),
        streams: RwLock::new(HashMap::new()),
    });

    // Slot handoff channels: accept thread -> owning reader.
    let mut slot_txs = Vec::with_capacity(readers);
    let mut slot_rxs = Vec::with_capacity(readers);
    for _ in 0..readers {
        let (tx, rx) = channel::unbounded::<usize>();
        slot_txs.push(tx);
        slot_rxs.push(rx);
    }

    // Notification pipes.
    let mut reader_controls = Vec::with_capacity(readers);
    let mut control_rxs = Vec::with_capacity(readers);
    let mut accept_txs = Vec::with_capacity(readers);
    let mut accept_rxs = Vec::with_capacity(readers);
    let mut message_txs = Vec::with_capacity(readers);
    let mut message_rxs = Vec::with_capacity(readers);
    for _ in 0..readers {
        let (tx, rx) = pipe::new()?;
        reader_controls.push(tx);
        control_rxs.push(rx);
        let (tx, rx) = pipe::new()?;
        accept_txs.push(tx);
        accept_rxs.push(rx);
        let (tx, rx) = pipe::new()?;
        message_txs.push(tx);
        message_rxs.push(rx);
    }
    let (writer_control, writer_control_rx) = pipe::new()?;

    let mut handles = Vec::with_capacity(readers);
    let mut listener = Some(listener);
    let mut accept_txs = Some(accept_txs);
    for index in 0..readers {
        let reader = Reader {
            index,
            shared: Arc::clone(&shared),
            poll: PollManager::new(128)?,
            control: control_rxs.remove(0),
            accepts: accept_rxs.remove(0),
            slot_rx: slot_rxs.remove(0),
            // The first reader owns the listener and the accept fan-out.
            listener: if index == 0 { listener.take() } else { None },
            slot_txs: if index == 0 { slot_txs.clone() } else { Vec::new() },
            accept_txs: if index == 0 { accept_txs.take().unwrap_or_default() } else { Vec::new() },
            writer_tx: message_txs.remove(0),
        };
        handles.push(
            thread::Builder::new()
                .name(format!("parley-reader-{}", index))
                .spawn(move || reader.run())?,
        );
    }

    let writer = WriterThread {
        shared: Arc::clone(&shared),
        poll: PollManager::new(16)?,
        control: writer_control_rx,
        messages: message_rxs,
    };
    let writer = thread::Builder::new()
        .name("parley-writer".to_owned())
        .spawn(move || writer.run())?;

    log::info!("threaded server listening on {} with {} readers", local_addr, readers);
    Ok(Handle {
        local_addr,
        shared,
        reader_controls,
        writer_control,
        readers: handles,
        writer,
    })
}

/// Runs the threaded server until a termination signal arrives. Signal
/// handling stays on the calling thread; workers only ever see the
/// `sigint` token on their pipes.
pub fn run(core: ServerCore, listener: TcpListener, readers: usize) -> io::Result<()> {
    let handle = start(core, listener, readers)?;

    let mut poll = PollManager::new(8)?;
    let mut signals = Signals::new(SignalSet::all())?;
    poll.add_source(&mut signals, Token(0), Interest::READABLE)?;
    'outer: loop {
        poll.poll(None)?;
        loop {
            match signals.receive()? {
                Some(Signal::Interrupt) | Some(Signal::Terminate) | Some(Signal::Quit) => {
                    break 'outer;
                }
                Some(_) => {}
                None => break,
            }
        }
    }
    handle.shutdown();
    Ok(())
}

/// Drains a notification pipe into its tokens.
fn read_pipe_tokens(receiver: &mut pipe::Receiver) -> Vec<String> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match receiver.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    FrameScanner::new(&raw)
        .filter_map(|status| match status {
            FrameStatus::Complete(tok) => Some(String::from_utf8_lossy(tok).into_owned()),
            FrameStatus::Partial(_) => None,
        })
        .collect()
}

struct Reader {
    index: usize,
    shared: Arc<Shared>,
    poll: PollManager,
    control: pipe::Receiver,
    accepts: pipe::Receiver,
    slot_rx: channel::Receiver<usize>,
    listener: Option<TcpListener>,
    slot_txs: Vec<channel::Sender<usize>>,
    accept_txs: Vec<pipe::Sender>,
    writer_tx: pipe::Sender,
}

impl Reader {
    fn run(mut self) {
        if let Err(err) = self.register_sources() {
            log::error!("reader {}: cannot register sources: {}", self.index, err);
            return;
        }
        loop {
            if let Err(err) = self.poll.poll(Some(Duration::from_secs(1))) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("reader {}: poll failed: {}", self.index, err);
                break;
            }
            let ready: Vec<Token> = self.poll.ready().to_vec();
            let mut stop = false;
            for token in ready {
                match token {
                    LISTENER if self.listener.is_some() => self.accept_clients(),
                    CONTROL => {
                        for tok in read_pipe_tokens(&mut self.control) {
                            if tok == "sigint" {
                                stop = true;
                            }
                        }
                    }
                    ACCEPTS => {
                        let _ = read_pipe_tokens(&mut self.accepts);
                        self.adopt_new_conns();
                    }
                    token => {
                        let slot = match token.0.checked_sub(FIRST_CLIENT) {
                            Some(slot) => slot,
                            None => continue,
                        };
                        if self.poll.is_error(token) {
                            self.close_conn(slot);
                        } else if self.poll.is_input_ready(token) {
                            self.handle_conn_readable(slot);
                        }
                    }
                }
            }
            if stop {
                break;
            }
        }
        log::debug!("reader {} finished", self.index);
    }

    fn register_sources(&mut self) -> io::Result<()> {
        if let Some(listener) = self.listener.as_mut() {
            self.poll.add_source(listener, LISTENER, Interest::READABLE)?;
        }
        self.poll.add_source(&mut self.control, CONTROL, Interest::READABLE)?;
        self.poll.add_source(&mut self.accepts, ACCEPTS, Interest::READABLE)?;
        Ok(())
    }

    fn notify_writer(&mut self) {
        // A full pipe means a wake-up is already pending; dropping the
        // token is fine.
        let _ = self.writer_tx.write(TOKEN_MESSAGE);
    }

    fn accept_clients(&mut self) {
        loop {
            let (stream, addr) = match self.listener.as_ref().expect("reader 0 owns it").accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::error!("accept failed: {}", err);
                    break;
                }
            };
            let slot = {
                let mut core = self.shared.core.lock().expect("core lock");
                core.add_conn(Conn::new(None, &addr.ip().to_string(), addr.port()))
            };
            let slot = match slot {
                Some(slot) => slot,
                None => continue, // table full, stream drops closed
            };
            self.shared
                .streams
                .write()
                .expect("fd table lock")
                .insert(slot, Arc::new(ConnStream { stream: RwLock::new(stream) }));

            let owner = slot % self.slot_txs.len();
            log::info!("new client from {} (slot {}, reader {})", addr, slot, owner);
            let _ = self.slot_txs[owner].send(slot);
            let _ = self.accept_txs[owner].write(TOKEN_CLIENT);
        }
    }

    /// Claims slots handed over by the accept thread and starts polling
    /// their sockets.
    fn adopt_new_conns(&mut self) {
        while let Ok(slot) = self.slot_rx.try_recv() {
            let arc = {
                let streams = self.shared.streams.read().expect("fd table lock");
                streams.get(&slot).cloned()
            };
            if let Some(arc) = arc {
                let mut stream = arc.stream.write().expect("stream lock");
                if let Err(err) =
                    self.poll.add_source(&mut *stream, Token(FIRST_CLIENT + slot), Interest::READABLE)
                {
                    log::error!("reader {}: cannot watch slot {}: {}", self.index, slot, err);
                }
            }
        }
    }

    fn handle_conn_readable(&mut self, slot: usize) {
        let arc = {
            let streams = self.shared.streams.read().expect("fd table lock");
            streams.get(&slot).cloned()
        };
        let arc = match arc {
            Some(arc) => arc,
            None => return,
        };

        let mut frames = Vec::new();
        let mut closed = false;
        {
            let mut core = self.shared.core.lock().expect("core lock");
            let conn = match core.conn_mut(slot) {
                Some(conn) => conn,
                None => return,
            };
            let guard = arc.stream.read().expect("stream lock");
            let mut stream: &TcpStream = &*guard;
            loop {
                match conn.buf.fill(&mut stream) {
                    Ok(FillOutcome::Read(_)) | Ok(FillOutcome::Full) => {
                        frames.extend(conn.buf.take_frames());
                    }
                    Ok(FillOutcome::Blocked) => break,
                    Ok(FillOutcome::Eof) => {
                        closed = true;
                        break;
                    }
                    Err(err) => {
                        log::debug!("read error on slot {}: {}", slot, err);
                        closed = true;
                        break;
                    }
                }
            }
        }

        let mut should_close = closed;
        if !frames.is_empty() {
            let mut core = self.shared.core.lock().expect("core lock");
            for frame in &frames {
                if core.handle_line(slot, frame) == LineAction::Close {
                    should_close = true;
                }
            }
        }
        if should_close {
            self.close_conn(slot);
        }
        if !frames.is_empty() || should_close {
            self.notify_writer();
        }
    }

    fn close_conn(&mut self, slot: usize) {
        {
            let mut core = self.shared.core.lock().expect("core lock");
            core.disconnect_cleanup(slot);
            core.remove_conn(slot);
        }
        let arc = self.shared.streams.write().expect("fd table lock").remove(&slot);
        if let Some(arc) = arc {
            let mut stream = arc.stream.write().expect("stream lock");
            let _ = self.poll.remove_source(&mut *stream);
            log::info!("connection closed (slot {}, reader {})", slot, self.index);
        }
        self.notify_writer();
    }
}

struct WriterThread {
    shared: Arc<Shared>,
    poll: PollManager,
    control: pipe::Receiver,
    messages: Vec<pipe::Receiver>,
}

impl WriterThread {
    fn run(mut self) {
        if let Err(err) = self.register_sources() {
            log::error!("writer: cannot register sources: {}", err);
            return;
        }
        loop {
            if let Err(err) = self.poll.poll(Some(Duration::from_secs(1))) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("writer: poll failed: {}", err);
                break;
            }
            let ready: Vec<Token> = self.poll.ready().to_vec();
            let mut flush = false;
            let mut stop = false;
            for token in ready {
                if token == Token(0) {
                    for tok in read_pipe_tokens(&mut self.control) {
                        if tok == "sigint" {
                            stop = true;
                        }
                    }
                } else if let Some(idx) = token.0.checked_sub(1) {
                    if let Some(receiver) = self.messages.get_mut(idx) {
                        for tok in read_pipe_tokens(receiver) {
                            if tok == "message" {
                                flush = true;
                            }
                        }
                    }
                }
            }
            if flush || stop {
                self.flush();
            }
            if stop {
                break;
            }
        }
        log::debug!("writer finished");
    }

    fn register_sources(&mut self) -> io::Result<()> {
        self.poll.add_source(&mut self.control, Token(0), Interest::READABLE)?;
        for (idx, receiver) in self.messages.iter_mut().enumerate() {
            self.poll.add_source(receiver, Token(idx + 1), Interest::READABLE)?;
        }
        Ok(())
    }

    fn flush(&self) {
        let plan = {
            let mut core = self.shared.core.lock().expect("core lock");
            core.flush_plan()
        };
        for (slot, line) in plan {
            let arc = {
                let streams = self.shared.streams.read().expect("fd table lock");
                streams.get(&slot).cloned()
            };
            if let Some(arc) = arc {
                let stream = arc.stream.read().expect("stream lock");
                write_line_blocking(&*stream, &line);
            }
        }
    }
}

/// Writes one CRLF-terminated line to a shared socket, riding out EINTR
/// and short would-block windows.
fn write_line_blocking(stream: &TcpStream, line: &str) {
    let mut data = Vec::with_capacity(line.len() + 2);
    data.extend_from_slice(line.trim_end_matches(|c| c == '\r' || c == '\n').as_bytes());
    data.extend_from_slice(b"\r\n");

    let mut writer: &TcpStream = stream;
    let mut offset = 0;
    let mut stalls = 0;
    while offset < data.len() {
        match writer.write(&data[offset..]) {
            Ok(0) => return,
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                stalls += 1;
                if stalls > 200 {
                    log::warn!("dropping {} queued bytes for a stalled peer", data.len() - offset);
                    return;
                }
                thread::sleep(Duration::from_micros(500));
            }
            Err(err) => {
                log::debug!("write failed: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::SessionLimits;
    use std::io::Read as _;

    fn start_server(readers: usize) -> Handle {
        let core = ServerCore::new("parley.server", SessionLimits::default(), 32, 60, false);
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        start(core, listener, readers).unwrap()
    }

    fn connect(handle: &Handle) -> std::net::TcpStream {
        let stream = std::net::TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        stream
    }

    fn recv_until(peer: &mut std::net::TcpStream, needle: &str) -> String {
        let mut acc = String::new();
        let mut buf = [0u8; 2048];
        for _ in 0..100 {
            match peer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => acc.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => panic!("read failed: {}", e),
            }
            if acc.contains(needle) {
                break;
            }
        }
        acc
    }

    #[test]
    fn registration_through_the_pool() {
        let handle = start_server(2);
        let mut a = connect(&handle);
        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\n").unwrap();
        let got = recv_until(&mut a, "001");
        assert!(got.contains(":parley.server 001 alice :Welcome to the IRC Network"), "{:?}", got);
        handle.shutdown();
    }

    #[test]
    fn cross_reader_channel_traffic() {
        let handle = start_server(2);
        let mut a = connect(&handle);
        let mut b = connect(&handle);
        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\nJOIN #dev\r\n").unwrap();
        recv_until(&mut a, "366");
        b.write_all(b"NICK bob\r\nUSER bob 0 * :B\r\nJOIN #dev\r\n").unwrap();
        recv_until(&mut b, "366");

        a.write_all(b"PRIVMSG #dev :hello over there\r\n").unwrap();
        let got = recv_until(&mut b, "hello over there");
        assert!(got.contains("PRIVMSG #dev :hello over there"), "{:?}", got);
        assert!(got.contains(":alice!alice@"), "{:?}", got);
        handle.shutdown();
    }

    #[test]
    fn quit_cleans_the_shared_session() {
        let handle = start_server(2);
        let mut a = connect(&handle);
        a.write_all(b"NICK alice\r\nUSER alice 0 * :A\r\n").unwrap();
        recv_until(&mut a, "001");
        a.write_all(b"QUIT :bye\r\n").unwrap();

        // The reader tears the connection down shortly after.
        let mut gone = false;
        for _ in 0..100 {
            if handle.conn_count() == 0 {
                gone = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(gone);
        handle.shutdown();
    }
}
