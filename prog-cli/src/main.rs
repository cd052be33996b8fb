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

//! Command line programmer for the serial bootloader of STM32
//! microcontrollers.

use std::env;
use std::io::{self, Write};
use std::process;

mod actions;
mod options;
mod style;

use crate::actions::Session;
use crate::options::{Opt, Role};

#[derive(Debug, Clone, Copy)]
enum Action {
    Rts,
    Dtr,
    Connect,
    Unprotect,
    Read,
    Erase,
    Adjust,
    Write,
    Protect,
    TraceTime,
    TraceSize,
    Trace,
    Disconnect,
    Help,
}

#[rustfmt::skip]
static OPTIONS: &[Opt<Action>] = &[
    Opt { role: Role::Joint, short: None,      long: Some("rts"),        action: Action::Rts,
          help: "Select RTS mode: reset - for device RESET, nreset - for inverted device RESET, boot - for device BOOT0 (default), nboot - for inverted device BOOT0, set - stay at high level, clear - stay at low level" },
    Opt { role: Role::Joint, short: None,      long: Some("dtr"),        action: Action::Dtr,
          help: "Select DTR mode: reset - for device RESET (default), nreset - for inverted device RESET, boot - for device BOOT0, nboot - for inverted device BOOT0, set - stay at high level, clear - stay at low level" },
    Opt { role: Role::Joint, short: Some("c"), long: Some("connect"),    action: Action::Connect,
          help: "Open serial port and connect to device bootloader" },
    Opt { role: Role::Plain, short: Some("u"), long: Some("unprotect"),  action: Action::Unprotect,
          help: "Erase and read-out unprotect device memory" },
    Opt { role: Role::Joint, short: Some("r"), long: Some("read"),       action: Action::Read,
          help: "Read data from device memory to file" },
    Opt { role: Role::Plain, short: Some("e"), long: Some("erase"),      action: Action::Erase,
          help: "Erase device memory" },
    Opt { role: Role::Joint, short: Some("a"), long: Some("adjust"),     action: Action::Adjust,
          help: "Adjust device voltage: 0 - [1.8 V, 2.1 V], 1 - [2.1 V, 2.4 V], 2 - [2.4 V, 2.7 V], 3 - [2.7 V, 3.6 V], 4 - [2.7 V, 3.6 V] with Vpp" },
    Opt { role: Role::Joint, short: Some("w"), long: Some("write"),      action: Action::Write,
          help: "Write data from file to device memory" },
    Opt { role: Role::Plain, short: Some("p"), long: Some("protect"),    action: Action::Protect,
          help: "Read-out protect device memory" },
    Opt { role: Role::Joint, short: None,      long: Some("trace-time"), action: Action::TraceTime,
          help: "Set trace intercharacter interval in seconds (5 default)" },
    Opt { role: Role::Joint, short: None,      long: Some("trace-size"), action: Action::TraceSize,
          help: "Set maximum trace log size (4096 default)" },
    Opt { role: Role::Plain, short: Some("t"), long: Some("trace"),      action: Action::Trace,
          help: "Restart device in user mode, with redirecting device output to stdout" },
    Opt { role: Role::Plain, short: Some("d"), long: Some("disconnect"), action: Action::Disconnect,
          help: "Disconnect device and close serial port" },
    Opt { role: Role::Usage, short: Some("h"), long: Some("help"),       action: Action::Help,
          help: "Print this help" },
];

#[rustfmt::skip]
static RESULTS: &[(i32, &str)] = &[
    (9, "Invalid checksum of file"),
    (8, "Invalid device memory location or invalid record in file"),
    (7, "Unsupported device"),
    (6, "Invalid reply from device bootloader"),
    (5, "No reply from device bootloader"),
    (4, "Serial port already open"),
    (3, "Internal error"),
    (2, "Invalid actual parameter"),
    (1, "Invalid option"),
    (0, "No errors, all done"),
];

fn main() {
    init_logger();

    println!(
        "STM32 serial bootloader programmer, version {}",
        env!("CARGO_PKG_VERSION")
    );

    let mut session = Session::new();
    let code = options::invoke(OPTIONS, env::args().skip(1), |action, argument| {
        match action {
            Action::Rts => session.select_rts(argument),
            Action::Dtr => session.select_dtr(argument),
            Action::Connect => session.connect(argument),
            Action::Unprotect => session.unprotect(),
            Action::Read => session.read(argument),
            Action::Erase => session.erase(),
            Action::Adjust => session.adjust(argument),
            Action::Write => session.write(argument),
            Action::Protect => session.protect(),
            Action::TraceTime => session.set_trace_time(argument),
            Action::TraceSize => session.set_trace_size(argument),
            Action::Trace => session.trace(),
            Action::Disconnect => session.disconnect(),
            Action::Help => {
                let synopsis = format!(
                    "{} [{}]",
                    style::bold("stm32-sbl-prog"),
                    style::underline("OPTIONS")
                );
                options::usage(&synopsis, OPTIONS, RESULTS);
                Ok(())
            }
        }
    });

    process::exit(code);
}

fn init_logger() {
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::new().filter_or("STM32_SBL_LOG", "info"));

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    let _ = logger.try_init();
}

#[cfg(unix)]
fn log_format_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}
