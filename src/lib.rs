// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Based on the USART bootloader protocol described in ST application
// note AN3155.
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

//! # STM32 Serial Bootloader Interface library
//!
//! This is a library to work with the serial interface of the ROM
//! bootloader built into STM32 microcontrollers.
//!
//! The bootloader is entered by pulsing the modem control lines of
//! the host adapter (wired to the reset and BOOT0 pins of the
//! target), synchronized with a wake-up byte, and then driven with
//! checksummed commands acknowledged byte by byte.
//!
//! # See also
//!
//! - [USART protocol used in the STM32 bootloader (AN3155)](https://www.st.com/resource/en/application_note/cd00264342.pdf)

use std::io;
use std::thread;
use std::time::Duration;

use thiserror::Error as ThisError;

#[rustfmt::skip]
pub mod constants;
pub mod ihex;
pub mod port;

mod device;
pub use self::device::{LineMode, ParseLineModeError, Part};

use crate::constants::*;

/// Outcome of every operation the tool performs.
///
/// Each failure maps to one stable numeric code, which doubles as the
/// process exit status.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Invalid option")]
    InvalidOption,
    #[error("Invalid actual parameter")]
    InvalidArgument,
    #[error("{0}")]
    Internal(#[from] io::Error),
    #[error("Serial port already open")]
    AlreadyOpen,
    #[error("No reply from device bootloader")]
    NoReply,
    #[error("Invalid reply from device bootloader")]
    InvalidReply,
    #[error("Unsupported device")]
    Unsupported,
    #[error("Invalid device memory location or invalid record in file")]
    InvalidContent,
    #[error("Invalid checksum of file")]
    InvalidChecksum,
}

impl Error {
    /// Stable numeric code of this failure.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidOption => 1,
            Error::InvalidArgument => 2,
            Error::Internal(_) => 3,
            Error::AlreadyOpen => 4,
            Error::NoReply => 5,
            Error::InvalidReply => 6,
            Error::Unsupported => 7,
            Error::InvalidContent => 8,
            Error::InvalidChecksum => 9,
        }
    }
}

impl From<serial::Error> for Error {
    fn from(error: serial::Error) -> Self {
        Error::Internal(io::Error::new(io::ErrorKind::Other, error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Serial link the bootloader driver runs on: blocking byte I/O plus
/// modem line and timeout control.
pub trait SerialLink: io::Read + io::Write {
    /// Current inter-byte timeout.
    fn timeout(&self) -> Duration;
    /// Replace the inter-byte timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
    /// Drive the RTS modem line.
    fn set_rts(&mut self, level: bool) -> Result<()>;
    /// Drive the DTR modem line.
    fn set_dtr(&mut self, level: bool) -> Result<()>;
}

/// An STM32 device whose bootloader is reachable through `P`.
pub struct Device<P> {
    port: P,
    version: u8,
    erase_command: u8,
    capabilities: [u8; GET_RESPONSE_LEN],
}

impl<P> Device<P>
where
    P: SerialLink,
{
    pub fn new(port: P) -> Self {
        Device {
            port,
            version: 0,
            erase_command: CMD_EXTENDED_ERASE,
            capabilities: [0; GET_RESPONSE_LEN],
        }
    }

    /// Bootloader version byte (BCD) from the last [`Device::probe`].
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw `Get` response, kept whole for inspection.
    pub fn capabilities(&self) -> &[u8] {
        &self.capabilities
    }

    /// Release the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Pulse the modem lines to restart the target, into the
    /// bootloader when `boot` is set, into the user firmware
    /// otherwise.
    pub fn reset(&mut self, rts: LineMode, dtr: LineMode, boot: bool) -> Result<()> {
        log::debug!("resetting device, boot = {}", boot);

        self.control(rts.level(true, boot), dtr.level(true, boot))?;
        thread::sleep(Duration::from_millis(RESET_PULSE_MS));
        self.control(rts.level(false, boot), dtr.level(false, boot))?;

        Ok(())
    }

    fn control(&mut self, rts: bool, dtr: bool) -> Result<()> {
        self.port.set_rts(rts)?;
        self.port.set_dtr(dtr)?;
        Ok(())
    }

    /// Synchronize with the bootloader after a reset into system
    /// memory.
    pub fn handshake(&mut self) -> Result<()> {
        self.port
            .set_timeout(Duration::from_millis(HANDSHAKE_TIMEOUT_MS))?;

        let mut outcome = Ok(());
        for attempt in 0..HANDSHAKE_RETRIES {
            outcome = self.try_handshake();
            if outcome.is_ok() {
                break;
            }
            log::debug!("handshake attempt {} failed", attempt + 1);
        }

        self.port
            .set_timeout(Duration::from_millis(TRANSFER_TIMEOUT_MS))?;
        outcome
    }

    fn try_handshake(&mut self) -> Result<()> {
        thread::sleep(Duration::from_millis(HANDSHAKE_PAUSE_MS));
        self.drain()?;
        self.write_all(&[SYNC])?;
        self.expect_ack()
    }

    /// Discard whatever the device has already sent.
    fn drain(&mut self) -> Result<()> {
        let timeout = self.port.timeout();
        self.port
            .set_timeout(Duration::from_millis(DRAIN_TIMEOUT_MS))?;

        let mut scratch = [0u8; 64];
        loop {
            match self.port.read(&mut scratch) {
                Ok(0) => break,
                Ok(count) => log::trace!("drained {} stale bytes", count),
                Err(ref error) if error.kind() == io::ErrorKind::TimedOut => break,
                Err(ref error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            }
        }

        self.port.set_timeout(timeout)?;
        Ok(())
    }

    /// Issue `Get` and record the bootloader version and the erase
    /// command it implements.
    pub fn probe(&mut self) -> Result<()> {
        self.request(&[CMD_GET])?;

        let mut capabilities = [0u8; GET_RESPONSE_LEN];
        self.response(&mut capabilities)?;
        log::debug!("Get response: {:02X?}", capabilities);

        self.version = capabilities[1];
        self.erase_command = capabilities[8];
        self.capabilities = capabilities;

        Ok(())
    }

    /// Issue `Get ID` and return the product identifier.
    pub fn product_id(&mut self) -> Result<u16> {
        self.request(&[CMD_GET_ID])?;

        let mut id = [0u8; 3];
        self.response(&mut id)?;

        Ok(u16::from_be_bytes([id[1], id[2]]))
    }

    /// Read `data.len()` bytes of device memory starting at `address`,
    /// one bootloader-sized page at a time.
    pub fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<()> {
        let mut address = address;
        for page in data.chunks_mut(MAX_TRANSFER) {
            log::debug!("reading {} bytes at {:#010X}", page.len(), address);

            self.request(&[CMD_READ_MEMORY])?;
            self.request(&address.to_be_bytes())?;
            self.request(&[(page.len() - 1) as u8])?;
            self.read_exact(page)?;

            address += page.len() as u32;
        }

        Ok(())
    }

    /// Program `data` into device memory starting at `address`.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let mut address = address;
        for page in data.chunks(MAX_TRANSFER) {
            log::debug!("writing {} bytes at {:#010X}", page.len(), address);

            self.request(&[CMD_WRITE_MEMORY])?;
            self.request(&address.to_be_bytes())?;

            let mut frame = Vec::with_capacity(page.len() + 1);
            frame.push((page.len() - 1) as u8);
            frame.extend_from_slice(page);
            self.request(&frame)?;

            address += page.len() as u32;
        }

        Ok(())
    }

    /// Mass-erase the flash with whichever erase command the
    /// bootloader reported in its `Get` response.
    pub fn erase_all(&mut self) -> Result<()> {
        self.request(&[self.erase_command])?;

        if self.erase_command == CMD_EXTENDED_ERASE {
            self.request(&[0xFF, 0xFF])
        } else {
            self.request(&[0xFF])
        }
    }

    /// Disable readout protection. The device mass-erases the flash
    /// and resets, so the bootloader is synchronized again before
    /// returning.
    pub fn readout_unprotect(&mut self) -> Result<()> {
        self.request(&[CMD_READOUT_UNPROTECT])?;
        self.response(&mut [])?;
        self.handshake()
    }

    /// Enable readout protection. The device resets, so the
    /// bootloader is synchronized again before returning.
    pub fn readout_protect(&mut self) -> Result<()> {
        self.request(&[CMD_READOUT_PROTECT])?;
        self.response(&mut [])?;
        self.handshake()
    }

    /// Select the Vdd range recorded in the option bytes.
    ///
    /// The sequence rides on the write-memory opcode with the
    /// option-byte area already unlocked by the bootloader.
    pub fn adjust_voltage(&mut self, voltage: u8) -> Result<()> {
        self.request(&[CMD_WRITE_MEMORY])?;
        self.request(&[0xFF, 0xFF, 0x00, 0x00])?;
        self.request(&[0x00, voltage])
    }

    /// Read a single raw byte, surfacing a timeout as
    /// [`Error::NoReply`].
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Send `payload` with its trailing checksum and wait for the ACK.
    fn request(&mut self, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(checksum(payload));

        log::trace!("request {:02X?}", frame);

        self.write_all(&frame)?;
        self.expect_ack()
    }

    /// Read an exactly sized payload followed by the closing ACK.
    fn response(&mut self, payload: &mut [u8]) -> Result<()> {
        self.read_exact(payload)?;
        self.expect_ack()
    }

    fn expect_ack(&mut self) -> Result<()> {
        match self.read_byte()? {
            ACK => Ok(()),
            NAK => {
                log::debug!("command rejected with NAK");
                Err(Error::InvalidReply)
            }
            other => {
                log::debug!("expected ACK, got {:#04X}", other);
                Err(Error::InvalidReply)
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, data: &mut [u8]) -> Result<()> {
        match self.port.read_exact(data) {
            Ok(()) => Ok(()),
            Err(ref error)
                if error.kind() == io::ErrorKind::TimedOut
                    || error.kind() == io::ErrorKind::UnexpectedEof =>
            {
                Err(Error::NoReply)
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Frame checksum: XOR of the payload, or the complement when the
/// payload is a single byte.
fn checksum(payload: &[u8]) -> u8 {
    if let [byte] = payload {
        return !byte;
    }

    payload.iter().fold(0x00, |checksum, byte| checksum ^ byte)
}
