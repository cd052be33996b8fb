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

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// One member of the supported STM32 family.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Part {
    /// Product identifier reported by `Get ID`.
    pub pid: u16,
    /// Flash size in bytes.
    pub flash_size: u32,
    /// Name of the group of parts sharing this PID.
    pub name: &'static str,
}

#[rustfmt::skip]
const PARTS: &[Part] = &[
    Part { pid: 0x0440, flash_size: 0x0004_0000, name: "F05xxx/030x8" },
    Part { pid: 0x0444, flash_size: 0x0004_0000, name: "F03xx4/03xx6" },
    Part { pid: 0x0442, flash_size: 0x0004_0000, name: "F030xC/09xxx" },
    Part { pid: 0x0445, flash_size: 0x0004_0000, name: "F04xxx/070x6" },
    Part { pid: 0x0448, flash_size: 0x0004_0000, name: "F070xB/071xx/072xx" },
    Part { pid: 0x0412, flash_size: 0x0000_8000, name: "F10xxx low-density" },
    Part { pid: 0x0410, flash_size: 0x0002_0000, name: "F10xxx medium-density" },
    Part { pid: 0x0414, flash_size: 0x0008_0000, name: "F10xxx high-density" },
    Part { pid: 0x0420, flash_size: 0x0002_0000, name: "F10xxx medium-density value line" },
    Part { pid: 0x0428, flash_size: 0x0008_0000, name: "F10xxx high-density value line" },
    Part { pid: 0x0418, flash_size: 0x0004_0000, name: "F105xx/107xx" },
    Part { pid: 0x0430, flash_size: 0x0010_0000, name: "F10xxx extra-density" },
    Part { pid: 0x0423, flash_size: 0x0004_0000, name: "F401xB/401xC" },
];

impl Part {
    /// Look up a part by the product identifier the bootloader
    /// reported.
    pub fn lookup(pid: u16) -> Option<&'static Part> {
        PARTS.iter().find(|part| part.pid == pid)
    }
}

/// How one of the modem control lines is wired to the target board,
/// which decides how it is driven during a reset pulse.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LineMode {
    /// The line drives the reset pin.
    Reset,
    /// The line drives the reset pin, inverted.
    NReset,
    /// The line drives the boot selection pin.
    Boot,
    /// The line drives the boot selection pin, inverted.
    NBoot,
    /// The line stays high.
    Set,
    /// The line stays low.
    Clear,
}

impl LineMode {
    /// Level of the line while the reset pin is `asserted`, heading
    /// for the bootloader when `boot` is set.
    pub(crate) fn level(self, asserted: bool, boot: bool) -> bool {
        match self {
            LineMode::Reset => asserted,
            LineMode::NReset => !asserted,
            LineMode::Boot => boot,
            LineMode::NBoot => !boot,
            LineMode::Set => true,
            LineMode::Clear => false,
        }
    }
}

#[derive(Debug)]
pub struct ParseLineModeError;

impl Display for ParseLineModeError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "invalid value, mode must be one of: `reset`, `nreset`, `boot`, `nboot`, `set` or `clear`")
    }
}

impl Error for ParseLineModeError {}

impl FromStr for LineMode {
    type Err = ParseLineModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset" => Ok(LineMode::Reset),
            "nreset" => Ok(LineMode::NReset),
            "boot" => Ok(LineMode::Boot),
            "nboot" => Ok(LineMode::NBoot),
            "set" => Ok(LineMode::Set),
            "clear" => Ok(LineMode::Clear),
            _ => Err(ParseLineModeError),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup() {
        let part = Part::lookup(0x0410).unwrap();
        assert_eq!(part.flash_size, 0x0002_0000);
        assert_eq!(part.name, "F10xxx medium-density");

        assert!(Part::lookup(0xFFFF).is_none());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("reset".parse::<LineMode>().unwrap(), LineMode::Reset);
        assert_eq!("nboot".parse::<LineMode>().unwrap(), LineMode::NBoot);
        assert_eq!("clear".parse::<LineMode>().unwrap(), LineMode::Clear);
        assert!("RESET".parse::<LineMode>().is_err());
        assert!("".parse::<LineMode>().is_err());
    }

    #[test]
    fn test_pulse_levels() {
        // (mode, asserted phase, released phase) for boot = true.
        let table = [
            (LineMode::Reset, true, false),
            (LineMode::NReset, false, true),
            (LineMode::Boot, true, true),
            (LineMode::NBoot, false, false),
            (LineMode::Set, true, true),
            (LineMode::Clear, false, false),
        ];

        for &(mode, asserted, released) in &table {
            assert_eq!(mode.level(true, true), asserted, "{:?}", mode);
            assert_eq!(mode.level(false, true), released, "{:?}", mode);
        }

        assert_eq!(LineMode::Boot.level(true, false), false);
        assert_eq!(LineMode::NBoot.level(false, false), true);
    }
}
