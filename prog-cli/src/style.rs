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

//! Terminal emphasis for banners and usage output.
//!
//! The `no-tty` feature strips the escapes for dumb terminals and
//! captured logs.

#[cfg(all(unix, not(feature = "no-tty")))]
pub fn bold(text: &str) -> String {
    ansi_term::Style::new().bold().paint(text).to_string()
}

#[cfg(all(unix, not(feature = "no-tty")))]
pub fn underline(text: &str) -> String {
    ansi_term::Style::new().underline().paint(text).to_string()
}

#[cfg(not(all(unix, not(feature = "no-tty"))))]
pub fn bold(text: &str) -> String {
    text.to_string()
}

#[cfg(not(all(unix, not(feature = "no-tty"))))]
pub fn underline(text: &str) -> String {
    text.to_string()
}
