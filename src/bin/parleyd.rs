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

use std::io;
use std::net::ToSocketAddrs;
use std::path::Path;

use mio::net::TcpListener;

use parley::config::cmdline::{ParsedArgs, ParsedArgsError};
use parley::config::config_file::{Config, ConfigError};
use parley::server::{net, threaded, ServerCore};
use parley::session::SessionLimits;

#[derive(thiserror::Error, Debug)]
enum MainError {
    #[error("")]
    Cmdline(#[from] ParsedArgsError),
    #[error("")]
    InitConfig(#[from] ConfigError),
    #[error("Event loop IO error.")]
    EvIo(#[from] io::Error),
}

fn main() -> Result<(), MainError> {
    env_logger::init();

    let args = ParsedArgs::new()?;
    let config = Config::load_or_default(Path::new(&args.config))?;
    let mut server_conf = config.server;
    if args.echo {
        server_conf.echo = true;
    }

    let limits = SessionLimits {
        user_cap: server_conf.user_cap,
        queue_cap: server_conf.queue_cap,
        max_users: server_conf.capacity,
        ..SessionLimits::default()
    };
    let core = ServerCore::new(
        &server_conf.name,
        limits,
        server_conf.capacity,
        server_conf.wait_time,
        server_conf.echo,
    );

    let addr = server_conf
        .bind_string()
        .to_socket_addrs()
        .map_err(MainError::EvIo)?
        .next()
        .ok_or_else(|| {
            MainError::EvIo(io::Error::new(io::ErrorKind::Other, "cannot resolve bind address"))
        })?;
    let listener = TcpListener::bind(addr).map_err(MainError::EvIo)?;

    if server_conf.threads > 0 {
        threaded::run(core, listener, server_conf.threads)?;
    } else {
        net::Server::new(core, listener)?.run()?;
    }
    Ok(())
}
