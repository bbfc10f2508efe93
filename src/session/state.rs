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

//! Session state tables for the client and server roles.
//!
//! Each state lists its allowed successors and the commands admissible
//! while in it. The tables are data; admissibility checks walk them.

use crate::irc::command::CommandKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connected,
    StartRegistration,
    Registered,
    InChannel,
}

impl SessionState {
    pub fn is_registered(self) -> bool {
        matches!(self, SessionState::Registered | SessionState::InChannel)
    }
}

pub struct StateEntry {
    pub state: SessionState,
    pub next: &'static [SessionState],
    pub commands: &'static [CommandKind],
}

pub type StateTable = &'static [StateEntry];

use CommandKind::*;
use SessionState::*;

static CLIENT_STATES: [StateEntry; 5] = [
    StateEntry {
        state: Disconnected,
        next: &[Connected],
        commands: &[Help, Nick, User, Connect, Address, Port, Quit],
    },
    StateEntry {
        state: Connected,
        next: &[StartRegistration, Disconnected],
        commands: &[Help, Nick, Disconnect, Address, Port, Quit],
    },
    StateEntry {
        state: StartRegistration,
        next: &[Registered, Disconnected],
        commands: &[Help, User, Disconnect, Address, Port, Quit],
    },
    StateEntry {
        state: Registered,
        next: &[InChannel, Disconnected],
        commands: &[Help, Nick, Join, PrivMsg, Disconnect, Whois, Quit],
    },
    StateEntry {
        state: InChannel,
        next: &[Registered, Disconnected],
        commands: &[Help, Nick, Join, PrivMsg, Part, Disconnect, Whois, Quit],
    },
];

// The server's view of each client. PART is admissible from Registered so
// the handler can answer with the precise numeric (403/442) instead of a
// blanket 451.
static SERVER_STATES: [StateEntry; 5] = [
    StateEntry { state: Disconnected, next: &[Connected], commands: &[Connect] },
    StateEntry {
        state: Connected,
        next: &[StartRegistration, Disconnected],
        commands: &[Nick, Quit],
    },
    StateEntry {
        state: StartRegistration,
        next: &[Registered, Disconnected],
        commands: &[User, Quit],
    },
    StateEntry {
        state: Registered,
        next: &[InChannel, Disconnected],
        commands: &[Nick, Join, PrivMsg, Part, Whois, Quit],
    },
    StateEntry {
        state: InChannel,
        next: &[Registered, Disconnected],
        commands: &[Nick, Join, PrivMsg, Part, Whois, Quit],
    },
];

pub fn client_states() -> StateTable {
    &CLIENT_STATES
}

pub fn server_states() -> StateTable {
    &SERVER_STATES
}

fn entry_of(table: StateTable, state: SessionState) -> &'static StateEntry {
    table
        .iter()
        .find(|entry| entry.state == state)
        .expect("every state has a table row")
}

pub fn is_allowed_transition(table: StateTable, from: SessionState, to: SessionState) -> bool {
    entry_of(table, from).next.contains(&to)
}

pub fn is_allowed_command(table: StateTable, state: SessionState, cmd: CommandKind) -> bool {
    entry_of(table, state).commands.contains(&cmd)
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("state transition {from:?} -> {to:?} is not allowed")]
pub struct BadStateTransition {
    pub from: SessionState,
    pub to: SessionState,
}

pub fn transition(
    table: StateTable,
    from: SessionState,
    to: SessionState,
) -> Result<SessionState, BadStateTransition> {
    if is_allowed_transition(table, from, to) {
        Ok(to)
    } else {
        Err(BadStateTransition { from, to })
    }
}
