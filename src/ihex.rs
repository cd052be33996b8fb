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

//! Intel HEX (I32HEX) firmware images.
//!
//! Images travel as text records, one per line, with 32-bit linear
//! addressing through type-04 extended address records. The loader
//! fills a [`Buffer`] window and narrows it to the span of addresses
//! the file actually touched; the saver emits data records of at most
//! 16 bytes that never cross a 64 KiB page.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::mem;
use std::path::Path;

use crate::{Error, Result};

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_ADDRESS: u8 = 0x04;
const START_ADDRESS: u8 = 0x05;

/// Longest run of bytes emitted as a single data record.
const RECORD_BYTES: usize = 16;

/// A window into the target address space held in host memory.
pub struct Buffer<'a> {
    /// Address of `data[0]` on the target.
    pub origin: u32,
    /// Entry point from the start address record, 0 when the file
    /// carries none.
    pub startup: u32,
    pub data: &'a mut [u8],
}

/// Populate `buffer` from the file at `path`, then narrow it to the
/// touched span.
pub fn load_file(buffer: &mut Buffer<'_>, path: &Path) -> Result<()> {
    let file = File::open(path)?;
    load(buffer, BufReader::new(file))
}

/// Save `buffer` to the file at `path`.
pub fn save_file(buffer: &Buffer<'_>, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    save(buffer, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Decode the records in `reader` into `buffer`.
///
/// On return `buffer` spans exactly the addresses the file wrote, or
/// is empty when the file carried no data bytes. Records past an
/// end-of-file record are still processed.
pub fn load<R: BufRead>(buffer: &mut Buffer<'_>, reader: R) -> Result<()> {
    let mut shadow: u16 = 0;
    let mut startup: u32 = 0;
    let mut min = u32::MAX;
    let mut max = 0u32;

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let record = line.as_bytes();
        if record[0] != b':' {
            return Err(malformed());
        }

        let count = hex_byte(record, 1)?;
        let offset = u16::from(hex_byte(record, 3)?) << 8 | u16::from(hex_byte(record, 5)?);
        let kind = hex_byte(record, 7)?;

        let mut sum = count
            .wrapping_add((offset >> 8) as u8)
            .wrapping_add(offset as u8)
            .wrapping_add(kind);
        let mut cursor = 9;

        match kind {
            DATA => {
                let mut offset = offset;
                for _ in 0..count {
                    let byte = hex_byte(record, cursor)?;
                    cursor += 2;
                    sum = sum.wrapping_add(byte);

                    let address = (u32::from(shadow) << 16) + u32::from(offset);
                    offset = offset.wrapping_add(1);

                    if address < buffer.origin
                        || address - buffer.origin >= buffer.data.len() as u32
                    {
                        return Err(Error::InvalidContent);
                    }

                    buffer.data[(address - buffer.origin) as usize] = byte;
                    min = min.min(address);
                    max = max.max(address);
                }
            }

            END_OF_FILE => {}

            EXTENDED_ADDRESS => {
                let hi = hex_byte(record, 9)?;
                let lo = hex_byte(record, 11)?;
                cursor = 13;
                sum = sum.wrapping_add(hi).wrapping_add(lo);
                shadow = u16::from(hi) << 8 | u16::from(lo);
            }

            START_ADDRESS => {
                let mut entry = 0u32;
                for _ in 0..4 {
                    let byte = hex_byte(record, cursor)?;
                    cursor += 2;
                    sum = sum.wrapping_add(byte);
                    entry = entry << 8 | u32::from(byte);
                }
                startup = entry;
            }

            _ => return Err(Error::InvalidContent),
        }

        let checksum = hex_byte(record, cursor)?;
        if sum.wrapping_add(checksum) != 0 {
            return Err(Error::InvalidChecksum);
        }
    }

    buffer.startup = startup;

    if min > max {
        buffer.data = &mut [];
    } else {
        let skip = (min - buffer.origin) as usize;
        let len = (max - min + 1) as usize;
        let data = mem::take(&mut buffer.data);
        buffer.data = &mut data[skip..skip + len];
        buffer.origin = min;
    }

    Ok(())
}

/// Encode `buffer` as records followed by the closing end-of-file
/// record.
pub fn save<W: Write>(buffer: &Buffer<'_>, writer: &mut W) -> Result<()> {
    let mut origin = buffer.origin;
    let mut data: &[u8] = &buffer.data[..];
    let mut shadow: u16 = 0;

    while !data.is_empty() {
        let count = record_len(origin, data.len());

        if (origin >> 16) as u16 != shadow {
            shadow = (origin >> 16) as u16;
            extended_address_record(writer, shadow)?;
        }

        data_record(writer, origin, &data[..count])?;
        origin = origin.wrapping_add(count as u32);
        data = &data[count..];
    }

    writer.write_all(b":00000001FF\n")?;
    Ok(())
}

/// Bytes of the next data record: at most [`RECORD_BYTES`], clamped so
/// the record stays within one 64 KiB page.
fn record_len(origin: u32, remaining: usize) -> usize {
    let mut end = origin.wrapping_add(remaining.min(RECORD_BYTES) as u32);
    if end >> 16 != origin >> 16 {
        end &= 0xFFFF_0000;
    }
    end.wrapping_sub(origin) as usize
}

fn data_record<W: Write>(writer: &mut W, origin: u32, data: &[u8]) -> Result<()> {
    let mut sum = (data.len() as u8)
        .wrapping_add((origin >> 8) as u8)
        .wrapping_add(origin as u8);

    write!(writer, ":{:02X}{:04X}00", data.len(), origin & 0xFFFF)?;
    for byte in data {
        write!(writer, "{:02X}", byte)?;
        sum = sum.wrapping_add(*byte);
    }
    writeln!(writer, "{:02X}", sum.wrapping_neg())?;

    Ok(())
}

fn extended_address_record<W: Write>(writer: &mut W, shadow: u16) -> Result<()> {
    let sum = 0x06u8
        .wrapping_add((shadow >> 8) as u8)
        .wrapping_add(shadow as u8);
    writeln!(writer, ":02000004{:04X}{:02X}", shadow, sum.wrapping_neg())?;

    Ok(())
}

fn hex_byte(record: &[u8], at: usize) -> Result<u8> {
    fn digit(byte: u8) -> Result<u8> {
        (byte as char)
            .to_digit(16)
            .map(|value| value as u8)
            .ok_or_else(malformed)
    }

    match record.get(at..at + 2) {
        Some(&[hi, lo]) => Ok(digit(hi)? << 4 | digit(lo)?),
        _ => Err(malformed()),
    }
}

fn malformed() -> Error {
    Error::Internal(io::Error::new(io::ErrorKind::InvalidData, "malformed record"))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn window(storage: &mut [u8], origin: u32) -> Buffer<'_> {
        Buffer {
            origin,
            startup: 0,
            data: storage,
        }
    }

    #[test]
    fn test_load() {
        let image = ":020000040800F2\n\
                     :100000000102030405060708090A0B0C0D0E0F1068\n\
                     :00000001FF\n";

        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        load(&mut buffer, Cursor::new(image)).unwrap();

        assert_eq!(buffer.origin, 0x0800_0000);
        assert_eq!(buffer.startup, 0);
        assert_eq!(
            buffer.data,
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16][..]
        );
    }

    #[test]
    fn test_load_narrows_to_touched_span() {
        let image = ":020000040800F2\n\
                     :04001000AABBCCDDDE\n\
                     :00000001FF\n";

        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        load(&mut buffer, Cursor::new(image)).unwrap();

        assert_eq!(buffer.origin, 0x0800_0010);
        assert_eq!(buffer.data, &[0xAA, 0xBB, 0xCC, 0xDD][..]);
    }

    #[test]
    fn test_load_empty_file_empties_window() {
        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        load(&mut buffer, Cursor::new(":00000001FF\n")).unwrap();

        assert!(buffer.data.is_empty());
    }

    #[test]
    fn test_load_keeps_reading_past_end_of_file_record() {
        let image = ":020000040800F2\n\
                     :00000001FF\n\
                     :0100000042BD\n";

        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        load(&mut buffer, Cursor::new(image)).unwrap();

        assert_eq!(buffer.data, &[0x42][..]);
    }

    #[test]
    fn test_load_startup_record() {
        let image = ":020000040800F2\n\
                     :0100000042BD\n\
                     :0400000508000129C5\n\
                     :00000001FF\n";

        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        load(&mut buffer, Cursor::new(image)).unwrap();

        assert_eq!(buffer.startup, 0x0800_0129);
    }

    #[test]
    fn test_load_bad_checksum() {
        let image = ":100000000102030405060708090A0B0C0D0E0F1000\n";

        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        let error = load(&mut buffer, Cursor::new(image)).unwrap_err();

        assert!(matches!(error, Error::InvalidChecksum));
    }

    #[test]
    fn test_load_out_of_window() {
        let image = ":020000040900F1\n\
                     :0100000042BD\n";

        let mut storage = vec![0u8; 0x40000];
        let mut buffer = window(&mut storage, 0x0800_0000);
        let error = load(&mut buffer, Cursor::new(image)).unwrap_err();

        assert!(matches!(error, Error::InvalidContent));
    }

    #[test]
    fn test_load_unknown_record_kind() {
        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        let error = load(&mut buffer, Cursor::new(":00000003FD\n")).unwrap_err();

        assert!(matches!(error, Error::InvalidContent));
    }

    #[test]
    fn test_load_malformed_record() {
        let mut storage = vec![0u8; 0x100];
        let mut buffer = window(&mut storage, 0x0800_0000);
        let error = load(&mut buffer, Cursor::new("garbage\n")).unwrap_err();

        assert!(matches!(error, Error::Internal(_)));
    }

    #[test]
    fn test_save_chunks_and_checksums() {
        let data: Vec<u8> = (0u8..20).collect();
        let mut storage = data.clone();
        let buffer = Buffer {
            origin: 0x0800_0000,
            startup: 0,
            data: &mut storage,
        };

        let mut image = Vec::new();
        save(&buffer, &mut image).unwrap();
        let image = String::from_utf8(image).unwrap();

        let lines: Vec<&str> = image.lines().collect();
        assert_eq!(lines[0], ":020000040800F2");
        assert!(lines[1].starts_with(":10000000"));
        assert!(lines[2].starts_with(":04001000"));
        assert_eq!(lines[3], ":00000001FF");

        // Every record sums to zero, checksum included.
        for line in &lines {
            let sum: u8 = (1..line.len())
                .step_by(2)
                .map(|at| hex_byte(line.as_bytes(), at).unwrap())
                .fold(0u8, |sum, byte| sum.wrapping_add(byte));
            assert_eq!(sum, 0, "{}", line);
        }
    }

    #[test]
    fn test_save_respects_page_boundary() {
        let mut storage = vec![0x55u8; 16];
        let buffer = Buffer {
            origin: 0x0800_FFF8,
            startup: 0,
            data: &mut storage,
        };

        let mut image = Vec::new();
        save(&buffer, &mut image).unwrap();
        let image = String::from_utf8(image).unwrap();

        let lines: Vec<&str> = image.lines().collect();
        assert_eq!(lines[0], ":020000040800F2");
        assert!(lines[1].starts_with(":08FFF800"));
        assert_eq!(lines[2], ":020000040801F1");
        assert!(lines[3].starts_with(":08000000"));
        assert_eq!(lines[4], ":00000001FF");
    }

    #[test]
    fn test_round_trip() {
        let data: Vec<u8> = (0..300u32).map(|value| value as u8).collect();
        let mut storage = data.clone();
        let buffer = Buffer {
            origin: 0x0801_FF80,
            startup: 0,
            data: &mut storage,
        };

        let mut image = Vec::new();
        save(&buffer, &mut image).unwrap();

        let mut reloaded = vec![0u8; 0x20000];
        let mut restored = Buffer {
            origin: 0x0801_0000,
            startup: 0,
            data: &mut reloaded,
        };
        load(&mut restored, Cursor::new(image)).unwrap();

        assert_eq!(restored.origin, 0x0801_FF80);
        assert_eq!(restored.startup, 0);
        assert_eq!(restored.data, &data[..]);
    }
}
