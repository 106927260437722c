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

//! Implementation of data structures related to domain names.
//!
//! Update-policy rules are expressed entirely in terms of fully
//! qualified domain names: the identity a requester authenticated as,
//! the names a rule covers, and the names an update touches. The
//! [`Name`] type here provides exactly the relations rule matching
//! needs (equality, subdomain tests, and wildcard matching and
//! synthesis) over names that are valid by construction.

use std::cmp::Ordering;
use std::collections::TryReserveError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::ops::Index;
use std::str::FromStr;

mod builder;
mod error;
mod label;
pub use builder::NameBuilder;
pub use error::Error;
pub use label::Label;

/// The maximum number of labels in a domain name.
const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A fully qualified domain name.
///
/// A `Name` owns two buffers: the uncompressed on-the-wire
/// representation of the name ([RFC 1035 § 3.1]), and the offset of
/// each label within it. Every `Name` ends with the null label, so a
/// relative name cannot be represented at all.
///
/// `Name`s are constructed through the [`FromStr`] implementation or a
/// [`NameBuilder`]. Comparison and hashing are ASCII-case-insensitive.
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire_repr: Box<[u8]>,
    label_offsets: Box<[u8]>,
}

/// Private helpers.
impl Name {
    /// Builds a `Name` from a wire representation and its label
    /// offsets, which the caller guarantees are valid and consistent.
    fn from_parts(wire_repr: &[u8], label_offsets: &[u8]) -> Self {
        Self {
            wire_repr: wire_repr.into(),
            label_offsets: label_offsets.into(),
        }
    }

    /// Returns the offsets of the labels in the `Name`'s on-the-wire
    /// representation.
    fn label_offsets(&self) -> &[u8] {
        &self.label_offsets
    }
}

////////////////////////////////////////////////////////////////////////
// NAME PUBLIC API                                                    //
////////////////////////////////////////////////////////////////////////

#[allow(clippy::len_without_is_empty)] // A domain name is never empty!
impl Name {
    /// Returns the name of the DNS root, `.`.
    pub fn root() -> Self {
        Self::from_parts(&[0], &[0])
    }

    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        self.len() >= other.len()
            && self
                .labels()
                .rev()
                .zip(other.labels().rev())
                .all(|(a, b)| a == b)
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.len() == 1
    }

    /// Returns whether the `Name` is a wildcard domain name (i.e.,
    /// whether its first label is `*`).
    pub fn is_wildcard(&self) -> bool {
        self[0].is_asterisk()
    }

    /// Returns an iterator over labels in this `Name`, ending with the
    /// null label.
    pub fn labels(&self) -> Labels {
        Labels::new(self)
    }

    /// Returns the number of labels in this `Name`, including the null
    /// label.
    pub fn len(&self) -> usize {
        self.label_offsets.len()
    }

    /// Returns whether this `Name` matches the wildcard domain name
    /// `wildcard`.
    ///
    /// Following [RFC 4592 § 2.1.1], a wildcard `*.<suffix>` covers
    /// names strictly below `<suffix>`, at any depth. `<suffix>` itself
    /// does not match. If `wildcard` is not a wildcard name, nothing
    /// matches it.
    ///
    /// ```
    /// use update_policy::name::Name;
    /// let wildcard: Name = "*.bob.example.".parse().unwrap();
    /// let one: Name = "host.bob.example.".parse().unwrap();
    /// let two: Name = "a.host.bob.example.".parse().unwrap();
    /// let apex: Name = "bob.example.".parse().unwrap();
    /// assert!(one.matches_wildcard(&wildcard));
    /// assert!(two.matches_wildcard(&wildcard));
    /// assert!(!apex.matches_wildcard(&wildcard));
    /// ```
    ///
    /// [RFC 4592 § 2.1.1]: https://datatracker.ietf.org/doc/html/rfc4592#section-2.1.1
    pub fn matches_wildcard(&self, wildcard: &Name) -> bool {
        wildcard.is_wildcard()
            && self.len() >= wildcard.len()
            && self
                .labels()
                .rev()
                .zip(wildcard.labels().skip(1).rev())
                .all(|(a, b)| a == b)
    }

    /// Synthesizes the wildcard name `*.<self>`. This fails with
    /// [`Error::NameTooLong`] if the result would not be a valid name.
    pub fn to_wildcard(&self) -> Result<Name, Error> {
        let mut builder = NameBuilder::new();
        builder.try_push(b'*')?;
        builder.finish_with_suffix(self)
    }

    /// Makes a deep copy of this `Name`, reporting allocation failure
    /// instead of aborting.
    pub fn try_clone(&self) -> Result<Name, TryReserveError> {
        let mut wire_repr = Vec::new();
        wire_repr.try_reserve_exact(self.wire_repr.len())?;
        wire_repr.extend_from_slice(&self.wire_repr);
        let mut label_offsets = Vec::new();
        label_offsets.try_reserve_exact(self.label_offsets.len())?;
        label_offsets.extend_from_slice(&self.label_offsets);
        Ok(Self {
            wire_repr: wire_repr.into_boxed_slice(),
            label_offsets: label_offsets.into_boxed_slice(),
        })
    }

    /// Returns the (uncompressed) on-the-wire representation of the
    /// `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire_repr
    }
}

impl Index<usize> for Name {
    type Output = Label;

    fn index(&self, index: usize) -> &Self::Output {
        let offset = self.label_offsets[index] as usize;
        let len = self.wire_repr[offset] as usize;
        Label::from_unchecked(&self.wire_repr[offset + 1..offset + 1 + len])
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels().take(self.len() - 1) {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.labels().zip(other.labels()).all(|(a, b)| a == b)
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The [`Ord`] implementation for `Name` employs DNSSEC's canonical
/// ordering of domain names. Per [RFC 4034 § 6.1], `Name`s are ordered
/// as strings of labels read from right to left.
///
/// [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1
impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.labels().rev().cmp(other.labels().rev())
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in self.labels() {
            label.hash(state);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATION OVER A NAME'S LABELS                                     //
////////////////////////////////////////////////////////////////////////

/// An iterator over the [`Label`]s in a [`Name`], constructed through
/// [`Name::labels`].
#[derive(Clone, Debug)]
pub struct Labels<'a> {
    name: &'a Name,
    front: usize,
    back: usize,
}

impl Labels<'_> {
    fn new(name: &Name) -> Labels {
        Labels {
            name,
            front: 0,
            back: name.len(),
        }
    }
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a Label;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front < self.back {
            self.front += 1;
            Some(&self.name[self.front - 1])
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Labels<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.back > self.front {
            self.back -= 1;
            Some(&self.name[self.back])
        } else {
            None
        }
    }
}

impl ExactSizeIterator for Labels<'_> {}

impl FusedIterator for Labels<'_> {}

////////////////////////////////////////////////////////////////////////
// PARSING OF NAMES FROM RUST STRINGS                                 //
////////////////////////////////////////////////////////////////////////

/// Parses a fully qualified name in presentation format. The string
/// must be strictly ASCII and end with a period; escape sequences as
/// defined by [RFC 4343 § 2.1] are supported.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Name::root());
        }

        let mut remaining_octets = s.as_bytes();
        let mut builder = NameBuilder::new();
        while let Some(&octet) = remaining_octets.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining_octets[1..])?;
                builder.try_push(value)?;
                remaining_octets = &remaining_octets[consumed + 1..];
            } else if octet == b'.' {
                builder.next_label()?;
                remaining_octets = &remaining_octets[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                builder.try_push(octet)?;
                remaining_octets = &remaining_octets[1..];
            }
        }
        builder.finish()
    }
}

/// Parses an escape sequence. `remaining_octets` starts with the octet
/// immediately *after* the introducing backslash. Returns the escaped
/// value and the number of octets consumed.
fn parse_escape(remaining_octets: &[u8]) -> Result<(u8, usize), Error> {
    match remaining_octets {
        [] => Err(Error::InvalidEscape),
        [d1, d2, d3, ..]
            if d1.is_ascii_digit() && d2.is_ascii_digit() && d3.is_ascii_digit() =>
        {
            let value = [d1, d2, d3]
                .iter()
                .fold(0u16, |acc, d| 10 * acc + u16::from(**d - b'0'));
            u8::try_from(value)
                .map(|value| (value, 3))
                .map_err(|_| Error::InvalidEscape)
        }
        [d, ..] if d.is_ascii_digit() => Err(Error::InvalidEscape),
        [octet, ..] => Ok((*octet, 1)),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
