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

//! The server-side command handlers.
//!
//! Every handler speaks in IRC numerics: wire-originated failures become
//! replies, never dropped connections (QUIT aside). Handlers mutate the
//! session only through its operations and put every outbound line on a
//! queue; delivery happens at flush.

use crate::irc::command::CommandKind;
use crate::irc::line::Line;
use crate::irc::parse::CommandTokens;
use crate::irc::replies::{self, Reply};
use crate::message::{Message, MessageKind};
use crate::session::{
    is_allowed_command, is_valid_nickname, server_states, transition, JoinOutcome, SessionError,
    SessionState, User,
};

use super::{LineAction, ServerCore};

/// `:<server> <code> * [extras ...] :<text>` — the numerics that address
/// an anonymous target.
fn star_numeric(core: &mut ServerCore, slot: usize, reply: Reply, extras: &[&str]) {
    let mut line = Line::with_prefix(core.server_name()).param(reply.code).param("*");
    for extra in extras {
        line = line.param(extra);
    }
    let built = line.trailing_forced(reply.text).build();
    core.reply(slot, built);
}

fn set_state(core: &mut ServerCore, slot: usize, to: SessionState) {
    let from = match core.conn(slot) {
        Some(conn) => conn.state,
        None => return,
    };
    match transition(server_states(), from, to) {
        Ok(next) => {
            if let Some(conn) = core.conn_mut(slot) {
                conn.state = next;
            }
        }
        Err(err) => log::error!("slot {}: {}", slot, err),
    }
}

pub fn execute(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    let state = match core.conn(slot) {
        Some(conn) => conn.state,
        None => return LineAction::Continue,
    };
    let cmd = tokens.command;
    log::debug!("slot {}: {} {:?}", slot, tokens.label, tokens.args);

    if cmd == CommandKind::Unknown {
        return cmd_unknown(core, slot, tokens);
    }
    if !is_allowed_command(server_states(), state, cmd) {
        if cmd == CommandKind::User && state.is_registered() {
            core.numeric(slot, replies::ERR_ALREADYREGISTRED, &[], replies::ERR_ALREADYREGISTRED.text);
        } else if !state.is_registered() {
            star_numeric(core, slot, replies::ERR_NOTREGISTERED, &[]);
        } else {
            return cmd_unknown(core, slot, tokens);
        }
        return LineAction::Continue;
    }

    match cmd {
        CommandKind::Nick => cmd_nick(core, slot, tokens),
        CommandKind::User => cmd_user(core, slot, tokens),
        CommandKind::Join => cmd_join(core, slot, tokens),
        CommandKind::Part => cmd_part(core, slot, tokens),
        CommandKind::PrivMsg => cmd_privmsg(core, slot, tokens),
        CommandKind::Quit => cmd_quit(core, slot, tokens),
        // WHOIS is admissible but has no handler; answer the diagnostic.
        _ => cmd_unknown(core, slot, tokens),
    }
}

fn cmd_nick(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    let new = match tokens.arg(0) {
        Some(arg) => arg.to_owned(),
        None => {
            star_numeric(core, slot, replies::ERR_NONICKNAMEGIVEN, &[]);
            return LineAction::Continue;
        }
    };
    let (state, current) = match core.conn(slot) {
        Some(conn) => (conn.state, conn.nickname.clone()),
        None => return LineAction::Continue,
    };

    if !is_valid_nickname(&new) {
        star_numeric(core, slot, replies::ERR_ERRONEUSNICKNAME, &[&new]);
        return LineAction::Continue;
    }
    let taken = core.session.user(&new).is_some()
        && !new.eq_ignore_ascii_case(&current);
    if taken {
        star_numeric(core, slot, replies::ERR_NICKNAMEINUSE, &[&new]);
        return LineAction::Continue;
    }

    if state.is_registered() {
        let full = match core.session.user(&current) {
            Some(user) => user.full_name(),
            None => {
                log::error!("registered conn {} has no session user", slot);
                return LineAction::Continue;
            }
        };
        let bcast = Line::with_prefix(&full).param("NICK").param(&new).build();
        let msg = Message::new(MessageKind::Relay, &bcast);
        for chan in core.session.channels_of(&current) {
            let _ = core.session.enqueue_to_channel(&chan, msg.clone(), Some(&current));
        }
        let _ = core.session.enqueue_to_user(&current, msg);
        if let Err(err) = core.session.rename(&current, &new) {
            log::error!("rename {} -> {}: {}", current, new, err);
            return LineAction::Continue;
        }
        if let Some(conn) = core.conn_mut(slot) {
            conn.nickname = new;
        }
    } else {
        if let Some(conn) = core.conn_mut(slot) {
            conn.nickname = new;
        }
        if state == SessionState::Connected {
            set_state(core, slot, SessionState::StartRegistration);
        }
    }
    LineAction::Continue
}

fn cmd_user(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    if tokens.arg_count() < 4 {
        let label = tokens.label.clone();
        core.numeric(
            slot,
            replies::ERR_NEEDMOREPARAMS,
            &[&label],
            replies::ERR_NEEDMOREPARAMS.text,
        );
        return LineAction::Continue;
    }
    let (nickname, host) = match core.conn(slot) {
        Some(conn) => (conn.nickname.clone(), conn.host.clone()),
        None => return LineAction::Continue,
    };

    let user = User::new(
        &nickname,
        tokens.arg(0).unwrap_or(&nickname),
        &host,
        tokens.arg(3).unwrap_or(""),
        slot,
        core.session.queue_cap(),
    );
    match core.session.register_user(user) {
        Ok(()) => {
            set_state(core, slot, SessionState::Registered);
            core.numeric(slot, replies::RPL_WELCOME, &[], replies::RPL_WELCOME.text);
        }
        Err(SessionError::NicknameInUse(_)) => {
            star_numeric(core, slot, replies::ERR_NICKNAMEINUSE, &[&nickname]);
        }
        Err(err) => {
            // Table exhaustion: reject, keep the connection.
            log::warn!("cannot register {}: {}", nickname, err);
        }
    }
    LineAction::Continue
}

fn cmd_join(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    let chan = match tokens.arg(0) {
        Some(arg) => arg.to_owned(),
        None => {
            let label = tokens.label.clone();
            core.numeric(
                slot,
                replies::ERR_NEEDMOREPARAMS,
                &[&label],
                replies::ERR_NEEDMOREPARAMS.text,
            );
            return LineAction::Continue;
        }
    };
    let nick = match core.conn(slot) {
        Some(conn) => conn.nickname.clone(),
        None => return LineAction::Continue,
    };

    match core.session.join(&nick, &chan) {
        Ok(JoinOutcome::AlreadyMember) => {}
        Ok(JoinOutcome::Joined { .. }) => {
            let full = match core.session.user(&nick) {
                Some(user) => user.full_name(),
                None => return LineAction::Continue,
            };
            let bcast = Line::with_prefix(&full).param("JOIN").param(&chan).build();
            let msg = Message::new(MessageKind::Relay, &bcast);
            let _ = core.session.enqueue_to_channel(&chan, msg.clone(), Some(&nick));
            let _ = core.session.enqueue_to_user(&nick, msg);

            let topic = core
                .session
                .channel(&chan)
                .and_then(|c| c.topic().map(str::to_owned));
            match topic {
                Some(topic) => core.numeric(slot, replies::RPL_TOPIC, &[&chan], &topic),
                None => core.numeric(slot, replies::RPL_NOTOPIC, &[&chan], replies::RPL_NOTOPIC.text),
            }
            let names = core.session.members(&chan).unwrap_or_default().join(" ");
            core.numeric(slot, replies::RPL_NAMREPLY, &[&chan], &names);
            core.numeric(slot, replies::RPL_ENDOFNAMES, &[&chan], replies::RPL_ENDOFNAMES.text);

            if core.conn(slot).map(|c| c.state) == Some(SessionState::Registered) {
                set_state(core, slot, SessionState::InChannel);
            }
        }
        Err(SessionError::ChannelFull(_)) => {
            core.numeric(slot, replies::ERR_CHANNELISFULL, &[&chan], replies::ERR_CHANNELISFULL.text);
        }
        Err(SessionError::BadChannelName(_)) => {
            core.numeric(slot, replies::ERR_BADCHANNAME, &[&chan], replies::ERR_BADCHANNAME.text);
        }
        Err(SessionError::ChannelTableFull) => {
            log::warn!("channel table full, rejecting {}", chan);
            core.numeric(slot, replies::ERR_CHANNELISFULL, &[&chan], replies::ERR_CHANNELISFULL.text);
        }
        Err(err) => log::error!("join {} {}: {}", nick, chan, err),
    }
    LineAction::Continue
}

fn cmd_part(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    let chan = match tokens.arg(0) {
        Some(arg) => arg.to_owned(),
        None => {
            let label = tokens.label.clone();
            core.numeric(
                slot,
                replies::ERR_NEEDMOREPARAMS,
                &[&label],
                replies::ERR_NEEDMOREPARAMS.text,
            );
            return LineAction::Continue;
        }
    };
    let nick = match core.conn(slot) {
        Some(conn) => conn.nickname.clone(),
        None => return LineAction::Continue,
    };

    if !core.session.has_channel(&chan) {
        core.numeric(slot, replies::ERR_NOSUCHCHANNEL, &[&chan], replies::ERR_NOSUCHCHANNEL.text);
        return LineAction::Continue;
    }
    if !core.session.is_member(&chan, &nick) {
        core.numeric(slot, replies::ERR_NOTONCHANNEL, &[&chan], replies::ERR_NOTONCHANNEL.text);
        return LineAction::Continue;
    }

    let full = match core.session.user(&nick) {
        Some(user) => user.full_name(),
        None => return LineAction::Continue,
    };
    let mut line = Line::with_prefix(&full).param("PART").param(&chan);
    if let Some(reason) = tokens.arg(1) {
        line = line.trailing_forced(reason);
    }
    let msg = Message::new(MessageKind::Relay, &line.build());
    let _ = core.session.enqueue_to_channel(&chan, msg.clone(), Some(&nick));
    let _ = core.session.enqueue_to_user(&nick, msg);
    let _ = core.session.leave(&nick, &chan);

    if core.session.channels_of(&nick).is_empty()
        && core.conn(slot).map(|c| c.state) == Some(SessionState::InChannel)
    {
        set_state(core, slot, SessionState::Registered);
    }
    LineAction::Continue
}

fn cmd_privmsg(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    if tokens.arg_count() < 2 {
        let label = tokens.label.clone();
        core.numeric(
            slot,
            replies::ERR_NEEDMOREPARAMS,
            &[&label],
            replies::ERR_NEEDMOREPARAMS.text,
        );
        return LineAction::Continue;
    }
    let target = tokens.arg(0).expect("checked above").to_owned();
    let text = tokens.arg(1).expect("checked above").to_owned();
    let nick = match core.conn(slot) {
        Some(conn) => conn.nickname.clone(),
        None => return LineAction::Continue,
    };
    let full = match core.session.user(&nick) {
        Some(user) => user.full_name(),
        None => return LineAction::Continue,
    };
    let line = Line::with_prefix(&full)
        .param("PRIVMSG")
        .param(&target)
        .trailing_forced(&text)
        .build();
    let msg = Message::new(MessageKind::Relay, &line);

    if target.starts_with('#') {
        if !core.session.has_channel(&target) {
            core.numeric(slot, replies::ERR_NOSUCHCHANNEL, &[&target], replies::ERR_NOSUCHCHANNEL.text);
        } else if !core.session.is_member(&target, &nick) {
            core.numeric(slot, replies::ERR_NOTONCHANNEL, &[&target], replies::ERR_NOTONCHANNEL.text);
        } else {
            let _ = core.session.enqueue_to_channel(&target, msg, Some(&nick));
        }
    } else if core.session.user(&target).is_none() {
        core.numeric(slot, replies::ERR_NOSUCHNICK, &[&target], replies::ERR_NOSUCHNICK.text);
    } else {
        let _ = core.session.enqueue_to_user(&target, msg);
    }
    LineAction::Continue
}

fn cmd_quit(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    let (state, nick) = match core.conn(slot) {
        Some(conn) => (conn.state, conn.nickname.clone()),
        None => return LineAction::Continue,
    };
    if !state.is_registered() {
        return LineAction::Close;
    }

    let full = match core.session.user(&nick) {
        Some(user) => user.full_name(),
        None => return LineAction::Close,
    };
    let mut line = Line::with_prefix(&full).param("QUIT");
    if let Some(reason) = tokens.arg(0) {
        line = line.trailing_forced(reason);
    }
    let farewell = Message::new(MessageKind::Relay, &line.build());
    core.session.leave_all(&nick, &farewell);
    core.session.unregister_user(&nick);
    log::info!("{} quit", nick);
    LineAction::Close
}

fn cmd_unknown(core: &mut ServerCore, slot: usize, tokens: &CommandTokens) -> LineAction {
    let registered = core.conn(slot).map(|c| c.is_registered()).unwrap_or(false);
    if registered {
        let label = tokens.label.clone();
        core.numeric(slot, replies::ERR_UNKNOWNCOMMAND, &[&label], replies::ERR_UNKNOWNCOMMAND.text);
    } else {
        star_numeric(core, slot, replies::ERR_NOTREGISTERED, &[]);
    }
    LineAction::Continue
}

#[cfg(test)]
mod test {
    //! Scenario coverage: two clients on one in-memory core, asserting on
    //! the exact flushed wire lines.

    use super::*;
    use crate::server::{Conn, LineAction, ServerCore};
    use crate::session::SessionLimits;

    const SERVER: &str = "parley.server";

    fn core() -> ServerCore {
        ServerCore::new(SERVER, SessionLimits::default(), 16, 60, false)
    }

    fn add_conn(core: &mut ServerCore) -> usize {
        core.add_conn(Conn::new(None, "host", 50000)).unwrap()
    }

    fn handle(core: &mut ServerCore, slot: usize, line: &str) -> LineAction {
        core.handle_line(slot, line)
    }

    fn register(core: &mut ServerCore, slot: usize, nick: &str) {
        handle(core, slot, &format!("NICK {}", nick));
        handle(core, slot, &format!("USER {} 0 * :{}", nick, nick));
        core.flush_plan();
    }

    fn lines_for(plan: &[(usize, String)], slot: usize) -> Vec<String> {
        plan.iter()
            .filter(|(s, _)| *s == slot)
            .map(|(_, l)| l.clone())
            .collect()
    }

    #[test]
    fn s1_registration_yields_welcome() {
        let mut c = core();
        let a = add_conn(&mut c);
        handle(&mut c, a, "NICK alice");
        handle(&mut c, a, "USER alice 0 * :A");

        let plan = c.flush_plan();
        assert_eq!(
            plan,
            vec![(a, format!(":{} 001 alice :Welcome to the IRC Network", SERVER))]
        );
        assert_eq!(c.conn(a).unwrap().state, SessionState::Registered);
    }

    #[test]
    fn s2_join_reports_topic_and_names_in_order() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");

        handle(&mut c, a, "JOIN #dev");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, a),
            vec![
                ":alice!alice@host JOIN #dev".to_owned(),
                format!(":{} 331 alice #dev :No topic is set", SERVER),
                format!(":{} 353 alice #dev :alice", SERVER),
                format!(":{} 366 alice #dev :End of NAMES list", SERVER),
            ]
        );
        assert_eq!(c.conn(a).unwrap().state, SessionState::InChannel);
    }

    #[test]
    fn s3_channel_message_reaches_the_peer_without_echo() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");
        handle(&mut c, a, "JOIN #dev");
        handle(&mut c, b, "JOIN #dev");
        c.flush_plan();

        handle(&mut c, a, "PRIVMSG #dev :hi");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(b, ":alice!alice@host PRIVMSG #dev :hi".to_owned())]);
    }

    #[test]
    fn s4_nickname_collision_leaves_state_alone() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");

        handle(&mut c, a, "NICK bob");
        let plan = c.flush_plan();
        assert_eq!(
            plan,
            vec![(a, format!(":{} 433 * bob :Nickname is already in use", SERVER))]
        );
        assert_eq!(c.conn(a).unwrap().nickname, "alice");
        assert!(c.session.user("alice").is_some());
    }

    #[test]
    fn s5_part_echo_and_temporary_channel_death() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");
        handle(&mut c, a, "JOIN #solo");
        c.flush_plan();

        handle(&mut c, a, "PART #solo :bye");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(a, ":alice!alice@host PART #solo :bye".to_owned())]);
        assert!(!c.session.has_channel("#solo"));
        assert_eq!(c.conn(a).unwrap().state, SessionState::Registered);

        // A later JOIN recreates the channel from scratch.
        handle(&mut c, a, "JOIN #solo");
        assert!(c.session.has_channel("#solo"));
    }

    #[test]
    fn s6_quit_broadcasts_and_cleans_up() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");
        handle(&mut c, a, "JOIN #dev");
        handle(&mut c, b, "JOIN #dev");
        c.flush_plan();

        assert_eq!(handle(&mut c, a, "QUIT :later"), LineAction::Close);
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(b, ":alice!alice@host QUIT :later".to_owned())]);
        assert!(c.session.user("alice").is_none());
        assert!(c.session.is_member("#dev", "bob"));
        assert!(c.session.relations_consistent());
    }

    #[test]
    fn repeated_join_is_idempotent() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");
        handle(&mut c, a, "JOIN #dev");
        c.flush_plan();

        handle(&mut c, a, "JOIN #dev");
        assert!(c.flush_plan().is_empty());
        assert_eq!(c.session.member_count("#dev"), 1);
    }

    #[test]
    fn replies_keep_request_order_within_a_connection() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");

        handle(&mut c, a, "JOIN #one");
        handle(&mut c, a, "JOIN #two");
        let plan = c.flush_plan();
        let lines = lines_for(&plan, a);
        let one = lines.iter().position(|l| l.ends_with("JOIN #one")).unwrap();
        let two = lines.iter().position(|l| l.ends_with("JOIN #two")).unwrap();
        assert!(one < two);
        // The full #one reply block precedes the #two block.
        assert!(lines[one + 1].contains("331 alice #one"));
    }

    #[test]
    fn user_before_nick_is_not_registered() {
        let mut c = core();
        let a = add_conn(&mut c);
        handle(&mut c, a, "USER alice 0 * :A");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(a, format!(":{} 451 * :You have not registered", SERVER))]);
    }

    #[test]
    fn user_twice_is_already_registered() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");
        handle(&mut c, a, "USER alice 0 * :A");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(a, format!(":{} 462 alice :Already registered", SERVER))]);
    }

    #[test]
    fn user_needs_four_params() {
        let mut c = core();
        let a = add_conn(&mut c);
        handle(&mut c, a, "NICK alice");
        handle(&mut c, a, "USER alice");
        let plan = c.flush_plan();
        assert_eq!(
            plan,
            vec![(a, format!(":{} 461 alice USER :Not enough parameters", SERVER))]
        );
        assert_eq!(c.conn(a).unwrap().state, SessionState::StartRegistration);
    }

    #[test]
    fn nick_without_argument() {
        let mut c = core();
        let a = add_conn(&mut c);
        handle(&mut c, a, "NICK");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(a, format!(":{} 431 * :No nickname given", SERVER))]);
    }

    #[test]
    fn erroneous_nicknames_are_rejected() {
        let mut c = core();
        let a = add_conn(&mut c);
        handle(&mut c, a, "NICK 0bad");
        handle(&mut c, a, "NICK waytoolongnick");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, a),
            vec![
                format!(":{} 432 * 0bad :Erroneous nickname", SERVER),
                format!(":{} 432 * waytoolongnick :Erroneous nickname", SERVER),
            ]
        );
    }

    #[test]
    fn rename_broadcasts_to_shared_channels() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");
        handle(&mut c, a, "JOIN #dev");
        handle(&mut c, b, "JOIN #dev");
        c.flush_plan();

        handle(&mut c, a, "NICK overlord");
        let plan = c.flush_plan();
        assert_eq!(lines_for(&plan, a), vec![":alice!alice@host NICK overlord".to_owned()]);
        assert_eq!(lines_for(&plan, b), vec![":alice!alice@host NICK overlord".to_owned()]);
        assert!(c.session.user("overlord").is_some());
        assert!(c.session.user("alice").is_none());
        assert_eq!(c.conn(a).unwrap().nickname, "overlord");
    }

    #[test]
    fn join_rejects_bad_and_full_channels() {
        let limits = SessionLimits { user_cap: 1, ..SessionLimits::default() };
        let mut c = ServerCore::new(SERVER, limits, 16, 60, false);
        let a = c.add_conn(Conn::new(None, "host", 1)).unwrap();
        let b = c.add_conn(Conn::new(None, "host", 2)).unwrap();
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");

        handle(&mut c, a, "JOIN nochan");
        handle(&mut c, a, "JOIN #dev");
        c.flush_plan();
        handle(&mut c, b, "JOIN #dev");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, b),
            vec![format!(":{} 471 bob #dev :Cannot join channel", SERVER)]
        );
    }

    #[test]
    fn part_errors() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");
        handle(&mut c, b, "JOIN #dev");
        c.flush_plan();

        handle(&mut c, a, "PART #nowhere");
        handle(&mut c, a, "PART #dev");
        handle(&mut c, a, "PART");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, a),
            vec![
                format!(":{} 403 alice #nowhere :No such channel", SERVER),
                format!(":{} 442 alice #dev :You're not on that channel", SERVER),
                format!(":{} 461 alice PART :Not enough parameters", SERVER),
            ]
        );
    }

    #[test]
    fn privmsg_errors() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");

        handle(&mut c, a, "PRIVMSG ghost :boo");
        handle(&mut c, a, "PRIVMSG #nowhere :boo");
        handle(&mut c, a, "PRIVMSG #nowhere");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, a),
            vec![
                format!(":{} 401 alice ghost :No such nick", SERVER),
                format!(":{} 403 alice #nowhere :No such channel", SERVER),
                format!(":{} 461 alice PRIVMSG :Not enough parameters", SERVER),
            ]
        );
    }

    #[test]
    fn privmsg_to_a_user_goes_direct() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");

        handle(&mut c, a, "PRIVMSG bob :psst");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(b, ":alice!alice@host PRIVMSG bob :psst".to_owned())]);
    }

    #[test]
    fn msg_alias_is_accepted_on_the_wire_path_too() {
        let mut c = core();
        let a = add_conn(&mut c);
        let b = add_conn(&mut c);
        register(&mut c, a, "alice");
        register(&mut c, b, "bob");

        handle(&mut c, a, "msg bob :psst");
        let plan = c.flush_plan();
        assert_eq!(plan, vec![(b, ":alice!alice@host PRIVMSG bob :psst".to_owned())]);
    }

    #[test]
    fn unknown_commands_get_the_diagnostic() {
        let mut c = core();
        let a = add_conn(&mut c);
        register(&mut c, a, "alice");
        handle(&mut c, a, "FROBNICATE x");
        handle(&mut c, a, "WHOIS bob");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, a),
            vec![
                format!(":{} 421 alice FROBNICATE :Unknown command", SERVER),
                format!(":{} 421 alice WHOIS :Unknown command", SERVER),
            ]
        );
    }

    #[test]
    fn quit_before_registration_is_silent() {
        let mut c = core();
        let a = add_conn(&mut c);
        assert_eq!(handle(&mut c, a, "QUIT"), LineAction::Close);
        assert!(c.flush_plan().is_empty());
    }

    #[test]
    fn commands_out_of_state_get_not_registered() {
        let mut c = core();
        let a = add_conn(&mut c);
        handle(&mut c, a, "JOIN #dev");
        handle(&mut c, a, "PRIVMSG bob :hi");
        let plan = c.flush_plan();
        assert_eq!(
            lines_for(&plan, a),
            vec![
                format!(":{} 451 * :You have not registered", SERVER),
                format!(":{} 451 * :You have not registered", SERVER),
            ]
        );
    }
}
