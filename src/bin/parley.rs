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

use std::io::{self, Write};
use std::path::Path;

use parley::client::{run, ClientEngine, UserInterface};
use parley::config::cmdline::{ParsedArgs, ParsedArgsError};
use parley::config::config_file::{Config, ConfigError};

#[derive(thiserror::Error, Debug)]
enum MainError {
    #[error("")]
    Cmdline(#[from] ParsedArgsError),
    #[error("")]
    InitConfig(#[from] ConfigError),
    #[error("Event loop IO error.")]
    EvIo(#[from] io::Error),
}

/// Plain stdout rendering; a real windowed UI plugs in through the same
/// trait.
struct StdioInterface;

impl UserInterface for StdioInterface {
    fn display(&mut self, line: &str) {
        println!("{}", line);
        let _ = io::stdout().flush();
    }
}

fn main() -> Result<(), MainError> {
    env_logger::init();

    let args = ParsedArgs::new()?;
    let config = Config::load_or_default(Path::new(&args.config))?;
    let engine = ClientEngine::new(
        StdioInterface,
        &config.client.nick,
        &config.client.address,
        config.client.port,
    );
    run(engine)?;
    Ok(())
}
