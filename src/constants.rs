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

/// Wake-up byte that opens the handshake.
pub const SYNC: u8                  = 0x7F;

pub const CMD_GET: u8               = 0x00;
pub const CMD_GET_ID: u8            = 0x02;
pub const CMD_READ_MEMORY: u8       = 0x11;
pub const CMD_WRITE_MEMORY: u8      = 0x31;
pub const CMD_ERASE: u8             = 0x43;
pub const CMD_EXTENDED_ERASE: u8    = 0x44;
pub const CMD_READOUT_PROTECT: u8   = 0x82;
pub const CMD_READOUT_UNPROTECT: u8 = 0x92;

/// ACK byte
pub const ACK: u8                   = 0x79;
/// NAK byte
pub const NAK: u8                   = 0x1F;

/// Base of the flash in the target address space.
pub const FLASH_ORIGIN: u32         = 0x0800_0000;

/// Largest read or write the bootloader accepts in one command.
pub const MAX_TRANSFER: usize       = 256;

/// Bytes in the `Get` response, excluding the closing ACK.
pub const GET_RESPONSE_LEN: usize   = 13;

pub const HANDSHAKE_RETRIES: usize  = 5;
pub const HANDSHAKE_PAUSE_MS: u64   = 5;
pub const RESET_PULSE_MS: u64       = 1;

/// Inter-byte timeout right after open.
pub const OPEN_TIMEOUT_MS: u64      = 500;
/// Tight timeout while hunting for the handshake ACK.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 100;
/// Relaxed timeout for bulk transfers and slow erases.
pub const TRANSFER_TIMEOUT_MS: u64  = 5000;
/// Timeout used while draining stale input.
pub const DRAIN_TIMEOUT_MS: u64     = 1;
