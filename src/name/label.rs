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

//! Implementation of the [`Label`] type.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::{Error, MAX_LABEL_LEN};

/// The label given to a node in the Domain Name System's tree
/// structure.
///
/// `Label` is a wrapper over `[u8]` that can only be constructed if the
/// slice is a valid DNS label (no more than 63 octets long). In
/// accordance with [RFC 1034 § 3.1] and [RFC 4343], comparisons between
/// `Label`s are ASCII-case-insensitive, while case is preserved in the
/// internal representation.
///
/// ```
/// use std::convert::TryFrom;
/// use update_policy::name::Label;
///
/// let upper = <&Label>::try_from(&b"EXAMPLE"[..]).unwrap();
/// let lower = <&Label>::try_from(&b"example"[..]).unwrap();
/// assert_eq!(upper, lower);
/// ```
///
/// [RFC 1034 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1034#section-3.1
/// [RFC 4343]: https://datatracker.ietf.org/doc/html/rfc4343
#[repr(transparent)]
pub struct Label {
    octets: [u8],
}

#[allow(clippy::len_without_is_empty)] // Following DNS terminology, we have is_null().
impl Label {
    /// Returns the asterisk label `*`, which marks a wildcard domain
    /// name when it appears first.
    pub fn asterisk() -> &'static Self {
        Self::from_unchecked(b"*")
    }

    /// Wraps up a `&[u8]` as a `Label` without checking its length. To
    /// be used only within the parent module, and only on slices
    /// already known to be short enough.
    pub(super) fn from_unchecked(octets: &[u8]) -> &Self {
        // SAFETY: Label is a repr(transparent) wrapper over [u8].
        unsafe { &*(octets as *const [u8] as *const Label) }
    }

    /// Returns whether this `Label` is the asterisk label.
    pub fn is_asterisk(&self) -> bool {
        self.octets == *b"*"
    }

    /// Returns whether this `Label` is the null (zero-length) label.
    pub fn is_null(&self) -> bool {
        self.octets.is_empty()
    }

    /// Returns the number of octets in this `Label`.
    pub fn len(&self) -> usize {
        self.octets.len()
    }

    /// Returns the null (zero-length) `Label`.
    pub fn null() -> &'static Self {
        Self::from_unchecked(&[])
    }

    /// Returns the octets of this `Label`.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }
}

impl<'a> TryFrom<&'a [u8]> for &'a Label {
    type Error = Error;

    fn try_from(octets: &'a [u8]) -> Result<Self, Self::Error> {
        if octets.len() > MAX_LABEL_LEN {
            Err(Error::LabelTooLong)
        } else {
            Ok(Label::from_unchecked(octets))
        }
    }
}

/// Periods, backslashes, and octets that are not ASCII graphic
/// characters are escaped in accordance with RFC 1035 § 5.1 and
/// RFC 4343 § 2.1.
impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &octet in self.octets() {
            match octet {
                b'.' => f.write_str("\\.")?,
                b'\\' => f.write_str("\\\\")?,
                _ if octet.is_ascii_graphic() => write!(f, "{}", octet as char)?,
                _ => write!(f, "\\{:03}", octet)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.octets().eq_ignore_ascii_case(other.octets())
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Labels are ordered as unsigned left-justified octet strings with
/// uppercase ASCII letters treated as lowercase ([RFC 4034 § 6.1]).
///
/// [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1
impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.octets
            .iter()
            .map(u8::to_ascii_lowercase)
            .cmp(other.octets.iter().map(u8::to_ascii_lowercase))
    }
}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with the case-insensitive Eq.
        state.write_usize(self.octets.len());
        for octet in self.octets() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}
