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

use std::fmt;

/// Every command the platform understands. The first block is client-local
/// (never sent on the wire); the second is the IRC command set the server
/// handles. `msg` is accepted from users as an alias of `privmsg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Help,
    Connect,
    Disconnect,
    Address,
    Port,
    Nick,
    User,
    Join,
    Part,
    PrivMsg,
    Whois,
    Quit,
    Unknown,
}

impl CommandKind {
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "help" => CommandKind::Help,
            "connect" => CommandKind::Connect,
            "disconnect" => CommandKind::Disconnect,
            "address" => CommandKind::Address,
            "port" => CommandKind::Port,
            "nick" => CommandKind::Nick,
            "user" => CommandKind::User,
            "join" => CommandKind::Join,
            "part" => CommandKind::Part,
            "privmsg" | "msg" => CommandKind::PrivMsg,
            "whois" => CommandKind::Whois,
            "quit" => CommandKind::Quit,
            _ => CommandKind::Unknown,
        }
    }

    /// On-wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Help => "HELP",
            CommandKind::Connect => "CONNECT",
            CommandKind::Disconnect => "DISCONNECT",
            CommandKind::Address => "ADDRESS",
            CommandKind::Port => "PORT",
            CommandKind::Nick => "NICK",
            CommandKind::User => "USER",
            CommandKind::Join => "JOIN",
            CommandKind::Part => "PART",
            CommandKind::PrivMsg => "PRIVMSG",
            CommandKind::Whois => "WHOIS",
            CommandKind::Quit => "QUIT",
            CommandKind::Unknown => "UNKNOWN",
        }
    }

    /// Commands the client executes itself instead of forwarding.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            CommandKind::Help
                | CommandKind::Connect
                | CommandKind::Disconnect
                | CommandKind::Address
                | CommandKind::Port
        )
    }

    pub fn syntax(self) -> &'static str {
        match self {
            CommandKind::Help => "help [command]",
            CommandKind::Connect => "connect [address] [port]",
            CommandKind::Disconnect => "disconnect [message]",
            CommandKind::Address => "address <address>",
            CommandKind::Port => "port <port>",
            CommandKind::Nick => "nick <nickname>",
            CommandKind::User => "user <username> [realname]",
            CommandKind::Join => "join <channel>",
            CommandKind::Part => "part <channel> [message]",
            CommandKind::PrivMsg => "msg <channel | nickname> <text>",
            CommandKind::Whois => "whois <nickname>",
            CommandKind::Quit => "quit [message]",
            CommandKind::Unknown => "",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CommandKind::Help => "shows this help",
            CommandKind::Connect => "connects to the server",
            CommandKind::Disconnect => "disconnects from the server",
            CommandKind::Address => "sets the server address",
            CommandKind::Port => "sets the server port",
            CommandKind::Nick => "sets or changes the nickname",
            CommandKind::User => "completes registration",
            CommandKind::Join => "joins a channel, creating it if missing",
            CommandKind::Part => "leaves a channel",
            CommandKind::PrivMsg => "sends a message to a channel or user",
            CommandKind::Whois => "asks the server about a nickname",
            CommandKind::Quit => "quits the session",
            CommandKind::Unknown => "",
        }
    }

    /// All user-facing commands, in help order.
    pub fn all() -> &'static [CommandKind] {
        const ALL: [CommandKind; 12] = [
            CommandKind::Help,
            CommandKind::Connect,
            CommandKind::Disconnect,
            CommandKind::Address,
            CommandKind::Port,
            CommandKind::Nick,
            CommandKind::User,
            CommandKind::Join,
            CommandKind::Part,
            CommandKind::PrivMsg,
            CommandKind::Whois,
            CommandKind::Quit,
        ];
        &ALL
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
