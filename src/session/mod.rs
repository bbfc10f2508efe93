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

//! The session arena: users, channels, their membership relation and the
//! ready list.
//!
//! The session exclusively owns every `User` and `Channel`, indexed by the
//! lower-cased name (IRC identifiers compare case-insensitively). The two
//! relation tables store only those keys, so a rename is a key rewrite and
//! never a pointer chase. The invariant `user ∈ channel.users ⇔ channel ∈
//! user.channels` must hold after every mutation.

pub mod channel;
pub mod state;
pub mod user;

use std::collections::{HashMap, HashSet};

use crate::message::Message;

pub use channel::{Channel, ChannelKind, Outbound, MAX_CHANNEL_NAME_LEN};
pub use state::{
    client_states, is_allowed_command, is_allowed_transition, server_states, transition,
    BadStateTransition, SessionState, StateEntry, StateTable,
};
pub use user::User;

pub const MAX_NICKNAME_LEN: usize = 9;

/// IRC identifiers are case-insensitive in the ASCII locale.
pub fn lower(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"-_\\[]{}|^~".contains(&c)
}

pub fn is_valid_nickname(s: &str) -> bool {
    let b = s.as_bytes();
    !b.is_empty()
        && b.len() <= MAX_NICKNAME_LEN
        && b.iter().all(|&c| is_name_char(c))
        && !b[0].is_ascii_digit()
}

pub fn is_valid_channel_name(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2
        && b.len() <= MAX_CHANNEL_NAME_LEN
        && b[0] == b'#'
        && b[1..].iter().all(|&c| is_name_char(c))
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SessionError {
    #[error("nickname {0} is already in use")]
    NicknameInUse(String),
    #[error("erroneous nickname {0}")]
    BadNickname(String),
    #[error("no user named {0}")]
    UnknownNick(String),
    #[error("no channel named {0}")]
    UnknownChannel(String),
    #[error("illegal channel name {0}")]
    BadChannelName(String),
    #[error("{nick} is not on {channel}")]
    NotOnChannel { nick: String, channel: String },
    #[error("channel {0} is full")]
    ChannelFull(String),
    #[error("user table is full")]
    UserTableFull,
    #[error("channel table is full")]
    ChannelTableFull,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// Max members per channel.
    pub user_cap: usize,
    /// Capacity of each per-entity out queue.
    pub queue_cap: usize,
    pub max_users: usize,
    pub max_channels: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        SessionLimits { user_cap: 64, queue_cap: 64, max_users: 1024, max_channels: 256 }
    }
}

#[derive(Debug, PartialEq)]
pub enum JoinOutcome {
    Joined { created: bool },
    AlreadyMember,
}

#[derive(Debug, PartialEq)]
pub struct LeaveOutcome {
    pub destroyed: bool,
}

pub struct Session {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
    user_channels: HashMap<String, HashSet<String>>,
    channel_users: HashMap<String, HashSet<String>>,
    ready_users: Vec<String>,
    ready_channels: Vec<String>,
    limits: SessionLimits,
}

impl Session {
    pub fn new(limits: SessionLimits) -> Self {
        Session {
            users: HashMap::new(),
            channels: HashMap::new(),
            user_channels: HashMap::new(),
            channel_users: HashMap::new(),
            ready_users: Vec::new(),
            ready_channels: Vec::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn queue_cap(&self) -> usize {
        self.limits.queue_cap
    }

    // --- users ---------------------------------------------------------

    pub fn register_user(&mut self, user: User) -> Result<(), SessionError> {
        let key = lower(user.nickname());
        if self.users.contains_key(&key) {
            return Err(SessionError::NicknameInUse(user.nickname().to_owned()));
        }
        if self.users.len() >= self.limits.max_users {
            return Err(SessionError::UserTableFull);
        }
        self.user_channels.insert(key.clone(), HashSet::new());
        self.users.insert(key, user);
        Ok(())
    }

    /// Removes a user from the indexes. The caller is expected to have run
    /// `leave_all` first; membership must already be empty.
    pub fn unregister_user(&mut self, nick: &str) -> Option<User> {
        let key = lower(nick);
        if let Some(set) = self.user_channels.remove(&key) {
            debug_assert!(set.is_empty(), "unregistering {} with live memberships", nick);
        }
        self.ready_users.retain(|n| n != &key);
        self.users.remove(&key)
    }

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&lower(nick))
    }

    pub fn user_mut(&mut self, nick: &str) -> Option<&mut User> {
        self.users.get_mut(&lower(nick))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // --- channels ------------------------------------------------------

    pub fn create_channel(&mut self, name: &str, kind: ChannelKind) -> Result<(), SessionError> {
        let key = lower(name);
        if self.channels.contains_key(&key) {
            return Ok(());
        }
        if !is_valid_channel_name(name) {
            return Err(SessionError::BadChannelName(name.to_owned()));
        }
        if self.channels.len() >= self.limits.max_channels {
            return Err(SessionError::ChannelTableFull);
        }
        self.channels.insert(key.clone(), Channel::new(name, kind, self.limits.queue_cap));
        self.channel_users.insert(key, HashSet::new());
        Ok(())
    }

    /// Tears a channel down. Broadcasts still queued are relocated onto
    /// their snapshot recipients' user queues first, so nothing accepted
    /// is lost.
    pub fn destroy_channel(&mut self, name: &str) {
        let key = lower(name);
        let mut channel = match self.channels.remove(&key) {
            Some(c) => c,
            None => return,
        };
        for outbound in channel.drain_pending() {
            for target in &outbound.targets {
                if let Some(user) = self.users.get_mut(target) {
                    user.enqueue(outbound.message.clone());
                    if !self.ready_users.contains(target) {
                        self.ready_users.push(target.clone());
                    }
                }
            }
        }
        if let Some(members) = self.channel_users.remove(&key) {
            for nick in members {
                if let Some(set) = self.user_channels.get_mut(&nick) {
                    set.remove(&key);
                }
            }
        }
        self.ready_channels.retain(|c| c != &key);
        log::debug!("channel {} destroyed", name);
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&lower(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&lower(name))
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(&lower(name))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // --- membership ----------------------------------------------------

    /// Joins `nick` to `name`, creating a missing channel as `Temporary`
    /// in the same step. Joining a channel twice is a no-op.
    pub fn join(&mut self, nick: &str, name: &str) -> Result<JoinOutcome, SessionError> {
        let nick_key = lower(nick);
        let chan_key = lower(name);
        if !self.users.contains_key(&nick_key) {
            return Err(SessionError::UnknownNick(nick.to_owned()));
        }

        let created = if self.channels.contains_key(&chan_key) {
            false
        } else {
            self.create_channel(name, ChannelKind::Temporary)?;
            true
        };

        let members = self.channel_users.get_mut(&chan_key).expect("channel has a member set");
        if members.contains(&nick_key) {
            return Ok(JoinOutcome::AlreadyMember);
        }
        if members.len() >= self.limits.user_cap {
            if created {
                // Impossible to hit with a sane cap, but never leave an
                // empty temporary channel behind.
                self.destroy_channel(name);
            }
            return Err(SessionError::ChannelFull(name.to_owned()));
        }
        members.insert(nick_key.clone());
        self.user_channels
            .get_mut(&nick_key)
            .expect("registered user has a channel set")
            .insert(chan_key);

        debug_assert!(self.relations_consistent());
        Ok(JoinOutcome::Joined { created })
    }

    /// Removes `nick` from `name`; a temporary channel left empty dies
    /// with this call.
    pub fn leave(&mut self, nick: &str, name: &str) -> Result<LeaveOutcome, SessionError> {
        let nick_key = lower(nick);
        let chan_key = lower(name);

        let kind = match self.channels.get(&chan_key) {
            Some(c) => c.kind(),
            None => return Err(SessionError::UnknownChannel(name.to_owned())),
        };
        let members = self.channel_users.get_mut(&chan_key).expect("channel has a member set");
        if !members.remove(&nick_key) {
            return Err(SessionError::NotOnChannel {
                nick: nick.to_owned(),
                channel: name.to_owned(),
            });
        }
        let now_empty = members.is_empty();
        if let Some(set) = self.user_channels.get_mut(&nick_key) {
            set.remove(&chan_key);
        }

        let destroyed = kind == ChannelKind::Temporary && now_empty;
        if destroyed {
            self.destroy_channel(name);
        }
        debug_assert!(self.relations_consistent());
        Ok(LeaveOutcome { destroyed })
    }

    /// QUIT/disconnect path: enqueues the farewell on every channel the
    /// user is in, then leaves each. Returns the channels left.
    pub fn leave_all(&mut self, nick: &str, farewell: &Message) -> Vec<String> {
        let nick_key = lower(nick);
        let mut names: Vec<String> = match self.user_channels.get(&nick_key) {
            Some(set) => set.iter().cloned().collect(),
            None => return Vec::new(),
        };
        names.sort();

        for name in &names {
            let _ = self.enqueue_to_channel(name, farewell.clone(), Some(nick));
        }
        for name in &names {
            let _ = self.leave(nick, name);
        }
        names
    }

    /// Rewires the nickname index and every relation entry that referenced
    /// the old key. Queued messages travel with the user, not the key.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), SessionError> {
        let old_key = lower(old);
        let new_key = lower(new);

        if !self.users.contains_key(&old_key) {
            return Err(SessionError::UnknownNick(old.to_owned()));
        }
        if !is_valid_nickname(new) {
            return Err(SessionError::BadNickname(new.to_owned()));
        }
        if new_key != old_key && self.users.contains_key(&new_key) {
            return Err(SessionError::NicknameInUse(new.to_owned()));
        }

        let mut user = self.users.remove(&old_key).expect("checked above");
        user.set_nickname(new);
        self.users.insert(new_key.clone(), user);

        let memberships = self.user_channels.remove(&old_key).unwrap_or_default();
        for chan in &memberships {
            if let Some(members) = self.channel_users.get_mut(chan) {
                members.remove(&old_key);
                members.insert(new_key.clone());
            }
        }
        self.user_channels.insert(new_key.clone(), memberships);

        for entry in self.ready_users.iter_mut() {
            if *entry == old_key {
                *entry = new_key.clone();
            }
        }
        debug_assert!(self.relations_consistent());
        Ok(())
    }

    pub fn is_member(&self, name: &str, nick: &str) -> bool {
        self.channel_users
            .get(&lower(name))
            .map(|m| m.contains(&lower(nick)))
            .unwrap_or(false)
    }

    /// Display-case nicknames of a channel's members, sorted.
    pub fn members(&self, name: &str) -> Option<Vec<String>> {
        let members = self.channel_users.get(&lower(name))?;
        let mut nicks: Vec<String> = members
            .iter()
            .map(|key| {
                self.users
                    .get(key)
                    .map(|u| u.nickname().to_owned())
                    .unwrap_or_else(|| key.clone())
            })
            .collect();
        nicks.sort();
        Some(nicks)
    }

    pub fn member_count(&self, name: &str) -> usize {
        self.channel_users.get(&lower(name)).map(|m| m.len()).unwrap_or(0)
    }

    /// Display-case names of the channels a user is in, sorted.
    pub fn channels_of(&self, nick: &str) -> Vec<String> {
        let mut names: Vec<String> = match self.user_channels.get(&lower(nick)) {
            Some(set) => set
                .iter()
                .map(|key| {
                    self.channels
                        .get(key)
                        .map(|c| c.name().to_owned())
                        .unwrap_or_else(|| key.clone())
                })
                .collect(),
            None => Vec::new(),
        };
        names.sort();
        names
    }

    // --- queues and the ready list -------------------------------------

    pub fn enqueue_to_user(&mut self, nick: &str, message: Message) -> Result<(), SessionError> {
        let key = lower(nick);
        match self.users.get_mut(&key) {
            Some(user) => {
                user.enqueue(message);
                if !self.ready_users.contains(&key) {
                    self.ready_users.push(key);
                }
                Ok(())
            }
            None => Err(SessionError::UnknownNick(nick.to_owned())),
        }
    }

    /// Enqueues a broadcast with the membership snapshot taken now. `skip`
    /// names the acting user, whose own echo (if any) belongs on their
    /// user queue instead.
    pub fn enqueue_to_channel(
        &mut self,
        name: &str,
        message: Message,
        skip: Option<&str>,
    ) -> Result<(), SessionError> {
        let chan_key = lower(name);
        let skip_key = skip.map(lower);
        let members = match self.channel_users.get(&chan_key) {
            Some(m) => m,
            None => return Err(SessionError::UnknownChannel(name.to_owned())),
        };
        let mut targets: Vec<String> = members
            .iter()
            .filter(|m| Some(m.as_str()) != skip_key.as_deref())
            .cloned()
            .collect();
        targets.sort();

        let channel = self.channels.get_mut(&chan_key).expect("relation implies channel");
        channel.enqueue(message, targets);
        if !self.ready_channels.contains(&chan_key) {
            self.ready_channels.push(chan_key);
        }
        Ok(())
    }

    pub fn mark_user_ready(&mut self, nick: &str) {
        let key = lower(nick);
        if self.users.contains_key(&key) && !self.ready_users.contains(&key) {
            self.ready_users.push(key);
        }
    }

    pub fn mark_channel_ready(&mut self, name: &str) {
        let key = lower(name);
        if self.channels.contains_key(&key) && !self.ready_channels.contains(&key) {
            self.ready_channels.push(key);
        }
    }

    pub fn take_ready_users(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ready_users)
    }

    pub fn take_ready_channels(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ready_channels)
    }

    /// Debugging aid: verifies `user ∈ channel.users ⇔ channel ∈
    /// user.channels` in both directions.
    pub fn relations_consistent(&self) -> bool {
        for (nick, chans) in &self.user_channels {
            for chan in chans {
                match self.channel_users.get(chan) {
                    Some(members) if members.contains(nick) => {}
                    _ => return false,
                }
            }
        }
        for (chan, members) in &self.channel_users {
            for nick in members {
                match self.user_channels.get(nick) {
                    Some(chans) if chans.contains(chan) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::MessageKind;

    fn session() -> Session {
        Session::new(SessionLimits::default())
    }

    fn add_user(s: &mut Session, nick: &str) {
        let user = User::new(nick, nick, "host", nick, s.user_count(), s.queue_cap());
        s.register_user(user).unwrap();
    }

    fn relay(text: &str) -> Message {
        Message::new(MessageKind::Relay, text)
    }

    #[test]
    fn nicknames_are_unique_case_insensitively() {
        let mut s = session();
        add_user(&mut s, "Alice");
        let dup = User::new("alice", "x", "h", "x", 9, 8);
        assert_eq!(
            s.register_user(dup),
            Err(SessionError::NicknameInUse("alice".to_owned()))
        );
        assert!(s.user("ALICE").is_some());
    }

    #[test]
    fn join_keeps_relations_symmetric() {
        let mut s = session();
        add_user(&mut s, "alice");
        add_user(&mut s, "bob");
        s.join("alice", "#dev").unwrap();
        s.join("bob", "#dev").unwrap();
        s.join("alice", "#ops").unwrap();

        assert!(s.relations_consistent());
        assert!(s.is_member("#dev", "alice"));
        assert!(s.is_member("#dev", "bob"));
        assert_eq!(s.channels_of("alice"), vec!["#dev", "#ops"]);
        assert_eq!(s.members("#dev").unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn join_is_idempotent() {
        let mut s = session();
        add_user(&mut s, "alice");
        assert_eq!(s.join("alice", "#dev").unwrap(), JoinOutcome::Joined { created: true });
        assert_eq!(s.join("alice", "#dev").unwrap(), JoinOutcome::AlreadyMember);
        assert_eq!(s.member_count("#dev"), 1);
    }

    #[test]
    fn temporary_channel_dies_with_last_member() {
        let mut s = session();
        add_user(&mut s, "alice");
        s.join("alice", "#solo").unwrap();
        let outcome = s.leave("alice", "#solo").unwrap();
        assert!(outcome.destroyed);
        assert!(!s.has_channel("#solo"));
        // A later join recreates it from scratch.
        assert_eq!(s.join("alice", "#solo").unwrap(), JoinOutcome::Joined { created: true });
    }

    #[test]
    fn persistent_channel_survives_emptiness() {
        let mut s = session();
        add_user(&mut s, "alice");
        s.create_channel("#home", ChannelKind::Persistent).unwrap();
        s.join("alice", "#home").unwrap();
        let outcome = s.leave("alice", "#home").unwrap();
        assert!(!outcome.destroyed);
        assert!(s.has_channel("#home"));
    }

    #[test]
    fn channel_cap_is_enforced() {
        let mut s = Session::new(SessionLimits { user_cap: 2, ..SessionLimits::default() });
        for nick in &["a", "b", "c"] {
            add_user(&mut s, nick);
        }
        s.join("a", "#x").unwrap();
        s.join("b", "#x").unwrap();
        assert_eq!(s.join("c", "#x"), Err(SessionError::ChannelFull("#x".to_owned())));
        assert!(!s.is_member("#x", "c"));
    }

    #[test]
    fn bad_channel_names_are_rejected() {
        let mut s = session();
        add_user(&mut s, "alice");
        assert_eq!(
            s.join("alice", "dev"),
            Err(SessionError::BadChannelName("dev".to_owned()))
        );
        assert_eq!(
            s.join("alice", "#has space"),
            Err(SessionError::BadChannelName("#has space".to_owned()))
        );
        let long = format!("#{}", "c".repeat(MAX_CHANNEL_NAME_LEN));
        assert!(s.join("alice", &long).is_err());
    }

    #[test]
    fn rename_rewires_every_reference() {
        let mut s = session();
        add_user(&mut s, "alice");
        add_user(&mut s, "bob");
        s.join("alice", "#dev").unwrap();
        s.enqueue_to_user("alice", relay("pending")).unwrap();

        s.rename("alice", "overlord").unwrap();

        assert!(s.user("alice").is_none());
        assert!(s.is_member("#dev", "overlord"));
        assert!(!s.is_member("#dev", "alice"));
        assert!(s.relations_consistent());
        // The queued message travelled with the user.
        assert_eq!(s.user_mut("overlord").unwrap().dequeue().unwrap().content(), "pending");
        // And the ready entry follows the new key.
        assert_eq!(s.take_ready_users(), vec!["overlord"]);
    }

    #[test]
    fn rename_rejects_taken_nicknames() {
        let mut s = session();
        add_user(&mut s, "alice");
        add_user(&mut s, "bob");
        assert_eq!(
            s.rename("alice", "BOB"),
            Err(SessionError::NicknameInUse("BOB".to_owned()))
        );
        assert!(s.user("alice").is_some());
    }

    #[test]
    fn leave_all_enqueues_farewell_before_leaving() {
        let mut s = session();
        add_user(&mut s, "alice");
        add_user(&mut s, "bob");
        s.join("alice", "#dev").unwrap();
        s.join("bob", "#dev").unwrap();
        s.join("alice", "#solo").unwrap();

        let left = s.leave_all("alice", &relay(":alice!a@h QUIT :later"));
        assert_eq!(left, vec!["#dev", "#solo"]);
        assert!(s.channels_of("alice").is_empty());
        // #solo was temporary and empty: gone.
        assert!(!s.has_channel("#solo"));
        // #dev still has bob, with the farewell waiting for him alone.
        let out = s.channel_mut("#dev").unwrap().dequeue().unwrap();
        assert_eq!(out.targets, vec!["bob"]);
    }

    #[test]
    fn destroying_a_channel_relocates_pending_broadcasts() {
        let mut s = session();
        add_user(&mut s, "alice");
        add_user(&mut s, "bob");
        s.join("alice", "#dev").unwrap();
        s.join("bob", "#dev").unwrap();

        s.enqueue_to_channel("#dev", relay("for bob"), Some("alice")).unwrap();
        s.destroy_channel("#dev");

        let msg = s.user_mut("bob").unwrap().dequeue().unwrap();
        assert_eq!(msg.content(), "for bob");
        assert!(s.take_ready_users().contains(&"bob".to_owned()));
    }

    #[test]
    fn channel_snapshot_excludes_the_actor() {
        let mut s = session();
        add_user(&mut s, "alice");
        add_user(&mut s, "bob");
        s.join("alice", "#dev").unwrap();
        s.join("bob", "#dev").unwrap();

        s.enqueue_to_channel("#dev", relay("hi"), Some("alice")).unwrap();
        let out = s.channel_mut("#dev").unwrap().dequeue().unwrap();
        assert_eq!(out.targets, vec!["bob"]);
    }

    #[test]
    fn ready_lists_drain_and_clear() {
        let mut s = session();
        add_user(&mut s, "alice");
        s.join("alice", "#dev").unwrap();
        s.mark_user_ready("alice");
        s.mark_user_ready("alice");
        s.mark_channel_ready("#dev");

        assert_eq!(s.take_ready_users(), vec!["alice"]);
        assert!(s.take_ready_users().is_empty());
        assert_eq!(s.take_ready_channels(), vec!["#dev"]);
        assert!(s.take_ready_channels().is_empty());
    }

    #[test]
    fn unregister_removes_the_nickname() {
        let mut s = session();
        add_user(&mut s, "alice");
        let user = s.unregister_user("ALICE").unwrap();
        assert_eq!(user.nickname(), "alice");
        assert!(s.user("alice").is_none());
    }

    #[test]
    fn nickname_validation() {
        assert!(is_valid_nickname("alice"));
        assert!(is_valid_nickname("al[ce]^_"));
        assert!(is_valid_nickname("a1234567"));
        assert!(!is_valid_nickname(""));
        assert!(!is_valid_nickname("0alice"));
        assert!(!is_valid_nickname("tenletters"));
        assert!(!is_valid_nickname("with space"));
        assert!(!is_valid_nickname("no,comma"));
    }

    #[test]
    fn channel_name_validation() {
        assert!(is_valid_channel_name("#dev"));
        assert!(is_valid_channel_name("#a-b_c"));
        assert!(!is_valid_channel_name("dev"));
        assert!(!is_valid_channel_name("#"));
        assert!(!is_valid_channel_name("#has space"));
    }
}
