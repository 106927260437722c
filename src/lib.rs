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

//! Authorization of DNS dynamic updates ([RFC 2136]).
//!
//! A server that accepts dynamic updates must decide, for every record
//! an update would touch, whether the (authenticated) requester may
//! modify it. This crate provides the decision engine: an ordered
//! [`policy::Table`] of grant/deny [`policy::Rule`]s that is consulted
//! first-match-wins and denies by default.
//!
//! The [`name`] and [`rr`] modules supply the domain-name and RR-type
//! types that rules are expressed in.
//!
//! ```
//! use update_policy::name::Name;
//! use update_policy::policy::{MatchKind, Table};
//! use update_policy::rr::Type;
//!
//! let key: Name = "*.example.".parse().unwrap();
//! let zone: Name = "example.".parse().unwrap();
//! let mut table = Table::new();
//! table.add_rule(true, &key, MatchKind::Subdomain, &zone, &[]).unwrap();
//! let table = table.into_shared();
//!
//! let signer: Name = "a.example.".parse().unwrap();
//! let www: Name = "www.example.".parse().unwrap();
//! assert!(table.evaluate(Some(&signer), &www, Type::A));
//! assert!(!table.evaluate(Some(&signer), &www, Type::NS));
//! assert!(!table.evaluate(None, &www, Type::A));
//! ```
//!
//! [RFC 2136]: https://datatracker.ietf.org/doc/html/rfc2136

pub mod name;
pub mod policy;
pub mod rr;
mod util;
