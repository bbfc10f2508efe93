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

//! The numeric replies the server emits, with their canned texts.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: &'static str,
    pub text: &'static str,
}

pub const RPL_WELCOME: Reply = Reply { code: "001", text: "Welcome to the IRC Network" };
pub const RPL_NOTOPIC: Reply = Reply { code: "331", text: "No topic is set" };
pub const RPL_TOPIC: Reply = Reply { code: "332", text: "" };
pub const RPL_NAMREPLY: Reply = Reply { code: "353", text: "" };
pub const RPL_ENDOFNAMES: Reply = Reply { code: "366", text: "End of NAMES list" };

pub const ERR_NOSUCHNICK: Reply = Reply { code: "401", text: "No such nick" };
pub const ERR_NOSUCHCHANNEL: Reply = Reply { code: "403", text: "No such channel" };
pub const ERR_UNKNOWNCOMMAND: Reply = Reply { code: "421", text: "Unknown command" };
pub const ERR_NONICKNAMEGIVEN: Reply = Reply { code: "431", text: "No nickname given" };
pub const ERR_ERRONEUSNICKNAME: Reply = Reply { code: "432", text: "Erroneous nickname" };
pub const ERR_NICKNAMEINUSE: Reply = Reply { code: "433", text: "Nickname is already in use" };
pub const ERR_NOTONCHANNEL: Reply = Reply { code: "442", text: "You're not on that channel" };
pub const ERR_NOTREGISTERED: Reply = Reply { code: "451", text: "You have not registered" };
pub const ERR_NEEDMOREPARAMS: Reply = Reply { code: "461", text: "Not enough parameters" };
pub const ERR_ALREADYREGISTRED: Reply = Reply { code: "462", text: "Already registered" };
pub const ERR_CHANNELISFULL: Reply = Reply { code: "471", text: "Cannot join channel" };
pub const ERR_BADCHANNAME: Reply = Reply { code: "479", text: "Illegal channel name" };
