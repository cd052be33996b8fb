// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! POSIX-style option walking.
//!
//! Options here are actions: each one runs the moment it is
//! recognized, so `-c PORT -e -w fw.hex` connects, erases and writes
//! in exactly that order, and a failure stops the walk. The walker is
//! a character-level state machine over the argument list, with every
//! argument terminated by a virtual NUL. It supports clustered short
//! options, `--name value`, `--name=value` and the `--` separator.
//!
//! Short names match the collected span by full equality, long names
//! match the text up to the terminating NUL or `=`.

use std::mem;

use stm32_sbl::Error;

use crate::style;

/// Whether an option consumes an argument.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    /// Stand-alone action.
    Plain,
    /// Action taking one argument.
    Joint,
    /// Prints the synopsis; never fails.
    Usage,
}

/// One entry of the option table.
pub struct Opt<A> {
    pub role: Role,
    pub short: Option<&'static str>,
    pub long: Option<&'static str>,
    pub help: &'static str,
    pub action: A,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Entry,
    Dash,
    ShortOption,
    BeforeShortArgument,
    ShortArgument,
    DashDash,
    LongOption,
    LongArgument,
    Operand,
    ForcedOperand,
}

/// Walk `args`, firing `handler` for every recognized option, in
/// order. Returns the exit code: 0 on a clean walk, the code of the
/// first failure otherwise.
pub fn invoke<A, F, I>(options: &[Opt<A>], args: I, handler: F) -> i32
where
    F: FnMut(&A, &str) -> Result<(), Error>,
    I: IntoIterator<Item = String>,
{
    let mut walker = Walker {
        options,
        handler,
        text: String::new(),
        pending: None,
        result: 0,
    };
    let mut state = State::Entry;

    'args: for argument in args {
        for byte in argument.bytes().chain(std::iter::once(0)) {
            state = match walker.process(state, byte) {
                Some(next) => next,
                None => break 'args,
            };
        }
    }

    // An option still waiting for its argument at exhaustion is fed
    // one empty string.
    if walker.result == 0 && matches!(state, State::ShortArgument | State::LongArgument) {
        let _ = walker.process(state, 0);
    }

    walker.result
}

struct Walker<'a, A, F> {
    options: &'a [Opt<A>],
    handler: F,
    text: String,
    pending: Option<usize>,
    result: i32,
}

impl<'a, A, F> Walker<'a, A, F>
where
    F: FnMut(&A, &str) -> Result<(), Error>,
{
    fn process(&mut self, state: State, byte: u8) -> Option<State> {
        const NUL: u8 = 0;

        match state {
            State::Entry => {
                if byte == b'-' {
                    self.text.clear();
                    return Some(State::Dash);
                }
                self.push(byte);
                Some(State::Operand)
            }

            State::Dash => match byte {
                b'-' => {
                    self.text.clear();
                    Some(State::DashDash)
                }
                byte if byte.is_ascii_alphanumeric() => {
                    self.push(byte);
                    match self.find_short() {
                        Some(index) if self.options[index].role == Role::Joint => {
                            self.pending = Some(index);
                            self.text.clear();
                            Some(State::BeforeShortArgument)
                        }
                        Some(index) => self.invoke(index, State::ShortOption),
                        None => self.invalid(),
                    }
                }
                _ => self.invalid(),
            },

            State::ShortOption => match byte {
                NUL => {
                    self.text.clear();
                    Some(State::Entry)
                }
                byte if byte.is_ascii_alphanumeric() => {
                    self.push(byte);
                    match self.find_short() {
                        // An argument-taking option cannot sit inside
                        // a cluster.
                        Some(index) if self.options[index].role == Role::Joint => self.invalid(),
                        Some(index) => self.invoke(index, State::ShortOption),
                        None => self.invalid(),
                    }
                }
                _ => self.invalid(),
            },

            State::BeforeShortArgument => {
                self.push(byte);
                Some(State::ShortArgument)
            }

            State::ShortArgument => {
                if byte == NUL {
                    return self.invoke_pending(State::Entry);
                }
                self.push(byte);
                Some(State::ShortArgument)
            }

            State::DashDash => match byte {
                NUL => {
                    self.text.clear();
                    Some(State::ForcedOperand)
                }
                byte if byte.is_ascii_alphanumeric() => {
                    self.push(byte);
                    Some(State::LongOption)
                }
                _ => self.invalid(),
            },

            State::LongOption => match byte {
                NUL => match self.find_long() {
                    Some(index) if self.options[index].role == Role::Joint => {
                        self.pending = Some(index);
                        self.text.clear();
                        Some(State::LongArgument)
                    }
                    Some(index) => self.invoke(index, State::Entry),
                    None => self.invalid(),
                },
                b'=' => match self.find_long() {
                    Some(index) if self.options[index].role == Role::Joint => {
                        self.pending = Some(index);
                        self.text.clear();
                        Some(State::LongArgument)
                    }
                    Some(_) => self.invalid(),
                    // Not a known name: `=` keeps accumulating.
                    None => {
                        self.push(byte);
                        Some(State::LongOption)
                    }
                },
                byte if byte.is_ascii_alphanumeric() || byte.is_ascii_punctuation() => {
                    self.push(byte);
                    Some(State::LongOption)
                }
                _ => self.invalid(),
            },

            State::LongArgument => {
                if byte == NUL {
                    return self.invoke_pending(State::Entry);
                }
                self.push(byte);
                Some(State::LongArgument)
            }

            // This tool takes no operands, so reaching the end of one
            // is always an error.
            State::Operand | State::ForcedOperand => {
                if byte == NUL {
                    return self.invalid();
                }
                self.push(byte);
                Some(state)
            }
        }
    }

    fn push(&mut self, byte: u8) {
        if byte != 0 {
            self.text.push(char::from(byte));
        }
    }

    fn find_short(&self) -> Option<usize> {
        self.options
            .iter()
            .position(|option| option.short == Some(self.text.as_str()))
    }

    fn find_long(&self) -> Option<usize> {
        self.options
            .iter()
            .position(|option| option.long == Some(self.text.as_str()))
    }

    fn invoke(&mut self, index: usize, next: State) -> Option<State> {
        let argument = mem::take(&mut self.text);
        let action = &self.options[index].action;
        let outcome = (self.handler)(action, &argument);
        self.finish(outcome, next)
    }

    fn invoke_pending(&mut self, next: State) -> Option<State> {
        let index = match self.pending.take() {
            Some(index) => index,
            None => return self.invalid(),
        };
        self.invoke(index, next)
    }

    fn finish(&mut self, outcome: Result<(), Error>, next: State) -> Option<State> {
        match outcome {
            Ok(()) => {
                println!(" done");
                Some(next)
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(&mut self, error: Error) -> Option<State> {
        self.result = error.code();
        println!(" {} [{}, {}]", style::bold("FAILED"), error, error.code());
        None
    }

    fn invalid(&mut self) -> Option<State> {
        print!("Processing \"{}\"...", self.text);
        self.fail(Error::InvalidOption)
    }
}

/// Print the synopsis, the option reference and the result codes.
pub fn usage<A>(synopsis: &str, options: &[Opt<A>], results: &[(i32, &str)]) {
    println!("Synopsis:");
    println!("\t{}\n", synopsis);
    println!("Options:");

    for option in options {
        match (option.short, option.long) {
            (Some(short), Some(long)) => {
                print!("{}", style::bold(&format!("-{}, --{}", short, long)))
            }
            (Some(short), None) => print!("{}", style::bold(&format!("-{}", short))),
            (None, Some(long)) => print!("{}", style::bold(&format!("--{}", long))),
            (None, None) => {}
        }

        if option.role == Role::Joint {
            println!(" {}", style::underline("ARG"));
        } else {
            println!();
        }

        describe(option.help, 40);
    }

    println!("Return results:");
    for (code, message) in results {
        println!("{}\t{}", style::underline(&code.to_string()), message);
    }

    print!("\nPrinting help...");
}

/// Indented help text wrapped at `width` columns.
fn describe(help: &str, width: usize) {
    let mut line = String::new();

    for word in help.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > width {
            println!("\t{}", line);
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }

    println!("\t{}\n", line);
}

#[cfg(test)]
mod test {
    use super::*;

    use std::cell::RefCell;

    fn table() -> Vec<Opt<&'static str>> {
        vec![
            Opt {
                role: Role::Joint,
                short: Some("c"),
                long: Some("connect"),
                help: "",
                action: "connect",
            },
            Opt {
                role: Role::Plain,
                short: Some("e"),
                long: Some("erase"),
                help: "",
                action: "erase",
            },
            Opt {
                role: Role::Plain,
                short: Some("t"),
                long: Some("trace"),
                help: "",
                action: "trace",
            },
            Opt {
                role: Role::Joint,
                short: None,
                long: Some("trace-time"),
                help: "",
                action: "trace-time",
            },
        ]
    }

    fn args(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|argument| argument.to_string()).collect()
    }

    fn walk(argv: &[&str]) -> (i32, Vec<(String, String)>) {
        let calls = RefCell::new(Vec::new());
        let code = invoke(&table(), args(argv), |action, argument| {
            calls
                .borrow_mut()
                .push((action.to_string(), argument.to_string()));
            Ok(())
        });
        (code, calls.into_inner())
    }

    #[test]
    fn test_actions_fire_in_argv_order() {
        let (code, calls) = walk(&["-c", "/dev/ttyUSB0", "-e", "--trace-time", "10", "-t"]);

        assert_eq!(code, 0);
        let actions: Vec<&str> = calls.iter().map(|(action, _)| action.as_str()).collect();
        assert_eq!(actions, vec!["connect", "erase", "trace-time", "trace"]);
        assert_eq!(calls[0].1, "/dev/ttyUSB0");
        assert_eq!(calls[2].1, "10");
    }

    #[test]
    fn test_short_cluster() {
        let (code, calls) = walk(&["-et"]);

        assert_eq!(code, 0);
        assert_eq!(calls[0].0, "erase");
        assert_eq!(calls[1].0, "trace");
    }

    #[test]
    fn test_joint_short_argument_attached() {
        let (code, calls) = walk(&["-cPORT"]);

        assert_eq!(code, 0);
        assert_eq!(calls[0], ("connect".to_string(), "PORT".to_string()));
    }

    #[test]
    fn test_joint_inside_cluster_is_invalid() {
        let (code, calls) = walk(&["-ec", "PORT"]);

        assert_eq!(code, 1);
        assert_eq!(calls[0].0, "erase");
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_long_with_equals() {
        let (code, calls) = walk(&["--trace-time=10"]);

        assert_eq!(code, 0);
        assert_eq!(calls[0], ("trace-time".to_string(), "10".to_string()));
    }

    #[test]
    fn test_long_with_separate_argument() {
        let (code, calls) = walk(&["--connect", "PORT"]);

        assert_eq!(code, 0);
        assert_eq!(calls[0], ("connect".to_string(), "PORT".to_string()));
    }

    #[test]
    fn test_plain_long_rejects_equals() {
        let (code, calls) = walk(&["--erase=1"]);

        assert_eq!(code, 1);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_unknown_option() {
        let (code, calls) = walk(&["-z"]);
        assert_eq!(code, 1);
        assert!(calls.is_empty());

        let (code, calls) = walk(&["--nope"]);
        assert_eq!(code, 1);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_operands_are_invalid() {
        let (code, calls) = walk(&["stray"]);
        assert_eq!(code, 1);
        assert!(calls.is_empty());

        let (code, calls) = walk(&["--", "stray"]);
        assert_eq!(code, 1);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_missing_argument_becomes_empty() {
        let (code, calls) = walk(&["--connect"]);

        assert_eq!(code, 0);
        assert_eq!(calls[0], ("connect".to_string(), "".to_string()));
    }

    #[test]
    fn test_failure_stops_the_walk() {
        let calls = RefCell::new(Vec::new());
        let code = invoke(&table(), args(&["-e", "-t"]), |action, _| {
            calls.borrow_mut().push(action.to_string());
            Err(Error::NoReply)
        });

        assert_eq!(code, 5);
        assert_eq!(calls.into_inner(), vec!["erase".to_string()]);
    }
}
