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

//! Host side of the serial link.

use std::io::{self, Read, Write};
use std::time::Duration;

use serial::core::SerialDevice;
use serial::{SerialPort, SystemPort};

use crate::constants::OPEN_TIMEOUT_MS;
use crate::{Result, SerialLink};

/// Settings for the boot protocol: 115200 baud, 8 data bits, even
/// parity, 1 stop bit, no flow control.
pub fn port_settings() -> serial::PortSettings {
    serial::PortSettings {
        baud_rate: serial::BaudRate::Baud115200,
        char_size: serial::CharSize::Bits8,
        parity: serial::Parity::ParityEven,
        stop_bits: serial::StopBits::Stop1,
        flow_control: serial::FlowControl::FlowNone,
    }
}

/// A system serial port configured for the boot protocol.
///
/// The settings found on the port at open time are kept aside and
/// written back by [`Port::close`], so a console hooked to the same
/// adapter keeps working once the tool is done with it.
pub struct Port {
    inner: SystemPort,
    saved: <SystemPort as SerialDevice>::Settings,
}

impl Port {
    /// Open and configure the device at `path`.
    pub fn open(path: &str) -> Result<Port> {
        let mut inner = serial::open(path)?;
        let saved = SerialDevice::read_settings(&inner)?;

        SerialPort::configure(&mut inner, &port_settings())?;
        SerialPort::set_timeout(&mut inner, Duration::from_millis(OPEN_TIMEOUT_MS))?;

        Ok(Port { inner, saved })
    }

    /// Put the saved settings back and release the port.
    pub fn close(mut self) -> Result<()> {
        SerialDevice::write_settings(&mut self.inner, &self.saved)?;
        Ok(())
    }
}

impl SerialLink for Port {
    fn timeout(&self) -> Duration {
        SerialPort::timeout(&self.inner)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        SerialPort::set_timeout(&mut self.inner, timeout)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        SerialPort::set_rts(&mut self.inner, level)?;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        SerialPort::set_dtr(&mut self.inner, level)?;
        Ok(())
    }
}

impl Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for Port {
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
}
