// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the [`Error`] type for name-related errors.

use std::fmt;

/// An error type used to report problems constructing label and name
/// types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// An invalid escape sequence was encountered when parsing a
    /// [`Name`](super::Name) from a [`str`].
    InvalidEscape,

    /// A label was longer than 63 octets.
    LabelTooLong,

    /// The name is too long (longer than 255 octets on the wire).
    NameTooLong,

    /// The last label was not the null label; that is, the name was not
    /// fully qualified.
    NonNullTerminal,

    /// A null label was found in a non-terminal position.
    NullNonTerminal,

    /// When parsing a [`Name`](super::Name) from a [`str`], the string
    /// was empty.
    StrEmpty,

    /// When parsing a [`Name`](super::Name) from a [`str`], the string
    /// was not strictly ASCII.
    StrNotAscii,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::InvalidEscape => f.write_str("invalid escape sequence"),
            Self::LabelTooLong => f.write_str("label is longer than 63 octets"),
            Self::NameTooLong => f.write_str("name is longer than 255 bytes on the wire"),
            Self::NonNullTerminal => f.write_str("name is not fully qualified"),
            Self::NullNonTerminal => f.write_str("non-terminal label is null"),
            Self::StrEmpty => f.write_str("string was empty"),
            Self::StrNotAscii => f.write_str("string was not ASCII"),
        }
    }
}

impl std::error::Error for Error {}
