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

use core::fmt;
use std::env;

use ParseState::{Boolarg, Config};

const HELP_MESSAGE: &str = r#"parley [-c|--config=] [-e|--echo] [-h|--help]

-c --config=str   The config file to use.
-e --echo         Echo server mode: frames bounce back unparsed.
-h --help         This message.
"#;

#[derive(PartialEq)]
enum ParseState {
    Boolarg,
    Config,
}

#[derive(thiserror::Error, Debug)]
pub struct ParsedArgsError(String);

impl fmt::Display for ParsedArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct ParsedArgs {
    pub config: String,
    pub echo: bool,
}

impl Default for ParsedArgs {
    fn default() -> Self {
        ParsedArgs { config: "./parley.conf".to_owned(), echo: false }
    }
}

impl ParsedArgs {
    pub fn new() -> Result<ParsedArgs, ParsedArgsError> {
        let mut itr = env::args();
        itr.next(); // throw away argv[0]
        Self::from_iter(itr)
    }

    pub fn from_iter<I: Iterator<Item = String>>(args: I) -> Result<ParsedArgs, ParsedArgsError> {
        let mut ret = ParsedArgs::default();
        let mut arg_state = Boolarg;
        for arg in args {
            let (flag, val) = if arg_state != Boolarg {
                (arg.as_str(), "")
            } else if let Some(idx) = arg.as_str().find('=') {
                arg.split_at(idx + 1usize)
            } else {
                (arg.as_str(), "")
            };

            arg_state = match flag {
                "-e" | "--echo" => {
                    ret.echo = true;
                    Boolarg
                }
                "-c" | "--config" => Config,
                "--config=" => {
                    ret.config = val.to_string();
                    Boolarg
                }
                "-h" | "--help" => return Err(ParsedArgsError(HELP_MESSAGE.to_string())),
                _ => match arg_state {
                    Boolarg => {
                        return Err(ParsedArgsError(format!(
                            "Unknown option passed ({}), see --help",
                            flag,
                        )))
                    }
                    Config => {
                        ret.config = flag.to_string();
                        Boolarg
                    }
                },
            }
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod test {
    use super::ParsedArgs;

    fn parse(args: &[&str]) -> Result<ParsedArgs, super::ParsedArgsError> {
        ParsedArgs::from_iter(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_hold_without_flags() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.config, "./parley.conf");
        assert!(!args.echo);
    }

    #[test]
    fn config_takes_both_spellings() {
        assert_eq!(parse(&["-c", "/etc/parley.conf"]).unwrap().config, "/etc/parley.conf");
        assert_eq!(parse(&["--config=/tmp/p.conf"]).unwrap().config, "/tmp/p.conf");
    }

    #[test]
    fn echo_flag_is_recognized() {
        assert!(parse(&["-e"]).unwrap().echo);
        assert!(parse(&["--echo"]).unwrap().echo);
    }

    #[test]
    fn unknown_flags_error_out() {
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse(&["-h"]).is_err());
    }
}
