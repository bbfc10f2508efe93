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

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::Deserialize;

/// The whole configuration file; the parsed value is immutable and handed
/// to the core at start.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerSection {
    #[serde(default = "default_bind_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Max members per channel.
    #[serde(default = "default_user_cap")]
    pub user_cap: usize,
    /// Per-entity out queue capacity.
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
    /// Seconds an unregistered client may linger before being closed.
    #[serde(default = "default_wait_time")]
    pub wait_time: u64,
    /// Reader threads; 0 selects the single-threaded loop.
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub echo: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClientSection {
    #[serde(default)]
    pub nick: String,
    #[serde(default = "default_connect_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_connect_address() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    50100
}

fn default_server_name() -> String {
    "parley.server".to_owned()
}

fn default_capacity() -> usize {
    1024
}

fn default_user_cap() -> usize {
    64
}

fn default_queue_cap() -> usize {
    64
}

fn default_wait_time() -> u64 {
    60
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            address: default_bind_address(),
            port: default_port(),
            name: default_server_name(),
            capacity: default_capacity(),
            user_cap: default_user_cap(),
            queue_cap: default_queue_cap(),
            wait_time: default_wait_time(),
            threads: 0,
            echo: false,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        ClientSection {
            nick: String::new(),
            address: default_connect_address(),
            port: default_port(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not open/read config file: {0}")]
    IO(#[from] io::Error),
    #[error("Could not parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Config {
    pub fn from_str(c: &str) -> Result<Config, ConfigError> {
        toml::from_str::<Config>(c).map_err(|e| e.into())
    }

    pub fn from_path(p: &Path) -> Result<Config, ConfigError> {
        let mut f = File::open(p)?;
        let mut c = String::new();
        f.read_to_string(&mut c)?;
        Config::from_str(c.as_ref())
    }

    /// A missing file is not an error: everything has a default.
    pub fn load_or_default(p: &Path) -> Result<Config, ConfigError> {
        if p.exists() {
            Config::from_path(p)
        } else {
            log::info!("no config file at {:?}, using defaults", p);
            Ok(Config::default())
        }
    }
}

impl ServerSection {
    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl ClientSection {
    pub fn connect_string(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    const SAMPLE: &str = r##"
[server]
port = 6700
user_cap = 8
threads = 4

[client]
nick = "alice"
address = "chat.example.net"
"##;

    #[test]
    fn sample_overrides_defaults() {
        let conf = Config::from_str(SAMPLE).unwrap();
        assert_eq!(conf.server.port, 6700);
        assert_eq!(conf.server.user_cap, 8);
        assert_eq!(conf.server.threads, 4);
        assert_eq!(conf.server.address, "0.0.0.0");
        assert_eq!(conf.server.name, "parley.server");
        assert_eq!(conf.client.nick, "alice");
        assert_eq!(conf.client.connect_string(), "chat.example.net:50100");
    }

    #[test]
    fn empty_input_is_all_defaults() {
        let conf = Config::from_str("").unwrap();
        assert_eq!(conf.server.bind_string(), "0.0.0.0:50100");
        assert_eq!(conf.server.capacity, 1024);
        assert_eq!(conf.server.wait_time, 60);
        assert_eq!(conf.server.threads, 0);
        assert!(!conf.server.echo);
        assert!(conf.client.nick.is_empty());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(Config::from_str("[server\nport=").is_err());
    }
}
