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

//! The action handlers behind every command-line option.
//!
//! Handlers share one [`Session`]: configuration options store their
//! value and return, device options talk to the bootloader through
//! the link that `connect` established. State flows between actions
//! only through the device and through files.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use stm32_sbl::constants::{FLASH_ORIGIN, MAX_TRANSFER};
use stm32_sbl::ihex::{self, Buffer};
use stm32_sbl::port::Port;
use stm32_sbl::{Device, Error, LineMode, Part, Result};

/// Ambient state shared by every action in one run.
pub struct Session {
    rts: LineMode,
    dtr: LineMode,
    trace_size: usize,
    trace_time: u64,
    link: Option<Link>,
}

/// Everything that only exists while the port is open.
struct Link {
    device: Device<Port>,
    /// Flash-sized scratch, shared by the read and write actions.
    flash: Vec<u8>,
}

impl Session {
    pub fn new() -> Session {
        Session {
            rts: LineMode::Boot,
            dtr: LineMode::Reset,
            trace_size: 4096,
            trace_time: 5,
            link: None,
        }
    }

    fn link(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or_else(not_connected)
    }

    pub fn select_rts(&mut self, mode: &str) -> Result<()> {
        banner(format_args!("Selecting RTS mode \"{}\"...", mode));
        self.rts = mode.parse().map_err(|_| Error::InvalidArgument)?;
        Ok(())
    }

    pub fn select_dtr(&mut self, mode: &str) -> Result<()> {
        banner(format_args!("Selecting DTR mode \"{}\"...", mode));
        self.dtr = mode.parse().map_err(|_| Error::InvalidArgument)?;
        Ok(())
    }

    pub fn connect(&mut self, path: &str) -> Result<()> {
        banner(format_args!("Connect \"{}\"...", path));

        if self.link.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let mut device = Device::new(Port::open(path)?);
        device.reset(self.rts, self.dtr, true)?;
        device.handshake()?;

        device.probe()?;
        let version = device.version();
        banner(format_args!("V{:X}.{:X}...", version >> 4, version & 0x0F));

        let pid = device.product_id()?;
        banner(format_args!("PID{:04X}...", pid));

        let part = Part::lookup(pid).ok_or(Error::Unsupported)?;
        log::debug!("detected {}, {} KiB of flash", part.name, part.flash_size / 1024);

        let flash = vec![0u8; part.flash_size as usize];
        self.link = Some(Link { device, flash });

        Ok(())
    }

    pub fn unprotect(&mut self) -> Result<()> {
        banner(format_args!("Readout unprotecting..."));
        self.link()?.device.readout_unprotect()
    }

    pub fn read(&mut self, path: &str) -> Result<()> {
        banner(format_args!("Reading to \"{}\"...", path));

        let link = self.link()?;
        let progress = page_progress(link.flash.len());
        for (index, page) in link.flash.chunks_mut(MAX_TRANSFER).enumerate() {
            let address = FLASH_ORIGIN + (index * MAX_TRANSFER) as u32;
            link.device.read_memory(address, page)?;
            progress.inc(page.len() as u64);
        }
        progress.finish_and_clear();

        let buffer = Buffer {
            origin: FLASH_ORIGIN,
            startup: 0,
            data: &mut link.flash,
        };
        ihex::save_file(&buffer, Path::new(path))
    }

    pub fn erase(&mut self) -> Result<()> {
        banner(format_args!("Erasing..."));
        self.link()?.device.erase_all()
    }

    pub fn adjust(&mut self, argument: &str) -> Result<()> {
        banner(format_args!("Adjust voltage \"{}\"...", argument));

        let voltage: u8 = argument.parse().map_err(|_| Error::InvalidArgument)?;
        if voltage > 4 {
            return Err(Error::InvalidArgument);
        }

        self.link()?.device.adjust_voltage(voltage)
    }

    pub fn write(&mut self, path: &str) -> Result<()> {
        banner(format_args!("Writing from \"{}\"...", path));

        let link = self.link()?;
        let mut buffer = Buffer {
            origin: FLASH_ORIGIN,
            startup: 0,
            data: &mut link.flash,
        };
        ihex::load_file(&mut buffer, Path::new(path))?;

        let progress = page_progress(buffer.data.len());
        let mut address = buffer.origin;
        for page in buffer.data.chunks(MAX_TRANSFER) {
            link.device.write_memory(address, page)?;
            address += page.len() as u32;
            progress.inc(page.len() as u64);
        }
        progress.finish_and_clear();

        Ok(())
    }

    pub fn protect(&mut self) -> Result<()> {
        banner(format_args!("Readout protecting..."));
        self.link()?.device.readout_protect()
    }

    pub fn set_trace_time(&mut self, argument: &str) -> Result<()> {
        banner(format_args!("Set trace time \"{}\"...", argument));

        match argument.parse() {
            Ok(seconds) if (1..=60).contains(&seconds) => {
                self.trace_time = seconds;
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    pub fn set_trace_size(&mut self, argument: &str) -> Result<()> {
        banner(format_args!("Set trace size \"{}\"...", argument));

        match argument.parse() {
            Ok(size) if size >= 1 => {
                self.trace_size = size;
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Restart into the user firmware and mirror its serial output.
    /// The banner comes after the mirrored bytes so the stream stays
    /// readable.
    pub fn trace(&mut self) -> Result<()> {
        let outcome = self.trace_console();
        banner(format_args!("Tracing..."));
        outcome
    }

    fn trace_console(&mut self) -> Result<()> {
        let trace_size = self.trace_size;
        let idle_limit = Duration::from_secs(self.trace_time);
        let (rts, dtr) = (self.rts, self.dtr);

        let link = self.link()?;
        link.device.reset(rts, dtr, false)?;

        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        let mut count = 0;
        let mut idle_since = Instant::now();

        while count < trace_size {
            if idle_since.elapsed() > idle_limit {
                break;
            }

            let byte = match link.device.read_byte() {
                Ok(byte) => byte,
                // Nothing arrived within the port timeout; keep
                // listening until the trace time runs out.
                Err(Error::NoReply) => continue,
                Err(error) => return Err(error),
            };

            if byte.is_ascii_graphic() || byte.is_ascii_whitespace() {
                write!(stdout, "{}", byte as char)?;
            } else {
                write!(stdout, "[{:02X}]", byte)?;
            }
            stdout.flush()?;

            count += 1;
            idle_since = Instant::now();
        }

        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        banner(format_args!("Disconnecting..."));

        match self.link.take() {
            Some(link) => link.device.into_port().close(),
            None => Err(not_connected()),
        }
    }
}

fn not_connected() -> Error {
    Error::Internal(io::Error::new(
        io::ErrorKind::NotConnected,
        "serial port is not open",
    ))
}

/// Print an in-progress banner; the option walker appends the
/// outcome to the same line.
fn banner(message: fmt::Arguments<'_>) {
    print!("{}", message);
    let _ = io::stdout().flush();
}

/// Byte-granular progress bar on stderr, cleared once the transfer is
/// done.
fn page_progress(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(ProgressStyle::default_bar().template("{bar:40} {bytes}/{total_bytes}"));
    progress
}
