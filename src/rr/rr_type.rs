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

//! Provides the [`Type`] structure for DNS RR types.

use std::fmt;
use std::str::FromStr;

use crate::util::Caseless;

////////////////////////////////////////////////////////////////////////
// RR TYPES                                                           //
////////////////////////////////////////////////////////////////////////

/// Represents the RR type of a DNS record.
///
/// An RR type is represented on the wire as an unsigned 16-bit integer.
/// Hence this is basically a wrapper around `u16` with nice
/// [`Debug`](fmt::Debug), [`Display`](fmt::Display), and [`FromStr`]
/// implementations for the common textual representations of RR types.
/// Constants for common RR types (e.g. [`Type::A`]) are provided.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

impl Type {
    pub const A: Type = Type(1);
    pub const NS: Type = Type(2);
    pub const CNAME: Type = Type(5);
    pub const SOA: Type = Type(6);
    pub const PTR: Type = Type(12);
    pub const HINFO: Type = Type(13);
    pub const MX: Type = Type(15);
    pub const TXT: Type = Type(16);
    pub const AAAA: Type = Type(28);
    pub const SRV: Type = Type(33);
    pub const NAPTR: Type = Type(35);
    pub const DNAME: Type = Type(39);
    pub const OPT: Type = Type(41);
    pub const DS: Type = Type(43);
    pub const SSHFP: Type = Type(44);
    pub const RRSIG: Type = Type(46);
    pub const NSEC: Type = Type(47);
    pub const DNSKEY: Type = Type(48);
    pub const NSEC3: Type = Type(50);
    pub const NSEC3PARAM: Type = Type(51);
    pub const TLSA: Type = Type(52);
    pub const CDS: Type = Type(59);
    pub const CDNSKEY: Type = Type(60);
    pub const SVCB: Type = Type(64);
    pub const HTTPS: Type = Type(65);
    pub const TKEY: Type = Type(249);
    pub const TSIG: Type = Type(250);
    pub const ANY: Type = Type(255);
    pub const CAA: Type = Type(257);

    /// Returns whether this is a "user" type: any type other than
    /// [`Type::NS`], [`Type::SOA`], and [`Type::RRSIG`].
    ///
    /// The excluded types carry delegation, zone-ownership, and
    /// signature data. Update-policy rules without an explicit type
    /// list only cover user types.
    pub fn is_user_type(self) -> bool {
        !matches!(self, Self::NS | Self::SOA | Self::RRSIG)
    }
}

/// Mnemonics for the types with constants above.
const MNEMONICS: &[(Type, &str)] = &[
    (Type::A, "A"),
    (Type::NS, "NS"),
    (Type::CNAME, "CNAME"),
    (Type::SOA, "SOA"),
    (Type::PTR, "PTR"),
    (Type::HINFO, "HINFO"),
    (Type::MX, "MX"),
    (Type::TXT, "TXT"),
    (Type::AAAA, "AAAA"),
    (Type::SRV, "SRV"),
    (Type::NAPTR, "NAPTR"),
    (Type::DNAME, "DNAME"),
    (Type::OPT, "OPT"),
    (Type::DS, "DS"),
    (Type::SSHFP, "SSHFP"),
    (Type::RRSIG, "RRSIG"),
    (Type::NSEC, "NSEC"),
    (Type::DNSKEY, "DNSKEY"),
    (Type::NSEC3, "NSEC3"),
    (Type::NSEC3PARAM, "NSEC3PARAM"),
    (Type::TLSA, "TLSA"),
    (Type::CDS, "CDS"),
    (Type::CDNSKEY, "CDNSKEY"),
    (Type::SVCB, "SVCB"),
    (Type::HTTPS, "HTTPS"),
    (Type::TKEY, "TKEY"),
    (Type::TSIG, "TSIG"),
    (Type::ANY, "ANY"),
    (Type::CAA, "CAA"),
];

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl FromStr for Type {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some((rr_type, _)) = MNEMONICS
            .iter()
            .find(|(_, mnemonic)| Caseless(mnemonic) == Caseless(text))
        {
            Ok(*rr_type)
        } else if text
            .get(0..4)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
        {
            text[4..]
                .parse::<u16>()
                .map(Self::from)
                .or(Err("type value is not a valid unsigned 16-bit integer"))
        } else {
            Err("unknown type")
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match MNEMONICS.iter().find(|(rr_type, _)| rr_type == self) {
            Some((_, mnemonic)) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.0), // RFC 3597 § 5
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
