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

//! Dynamic-update authorization.
//!
//! An update policy is an ordered [`Table`] of [`Rule`]s. Each rule
//! either grants or denies the right to modify records, and applies to
//! a requester identity, a set of names (described by a [`MatchKind`]
//! and a target name), and a set of RR types. [`Table::evaluate`]
//! walks the rules in insertion order and returns the decision of the
//! first rule that matches; if none matches, or if the request carries
//! no authenticated identity, the update is denied.
//!
//! ## Building and sharing a table
//!
//! A table is populated through [`Table::add_rule`], which takes
//! `&mut self`, and then published for concurrent read-only use by
//! wrapping it in an [`Arc`](std::sync::Arc) ([`Table::into_shared`]).
//! Holders share the table through [`Table::attach`] and
//! [`Table::detach`]; the table and its rules are released when the
//! last holder detaches. Once published, a table can no longer be
//! modified (short of [`Arc::get_mut`](std::sync::Arc::get_mut) by a
//! sole holder), and evaluation takes no lock.
//!
//! A zone's currently installed table lives in a [`ZonePolicy`], which
//! may be swapped while updates are being authorized.
//!
//! ## Rule semantics
//!
//! For a request by `signer` to modify `name` with type `type`, a rule
//! matches when all of the following hold:
//!
//! 1. The signer matches the rule's identity: if the identity is a
//!    wildcard name, the signer must match it as a wildcard; otherwise
//!    the two must be equal.
//! 2. `name` matches according to the rule's [`MatchKind`].
//! 3. If the rule lists no types, `type` is a user type (anything but
//!    NS, SOA, and RRSIG; see [`Type::is_user_type`]). Otherwise the
//!    list contains `type` or ANY.
//!
//! [`Type::is_user_type`]: crate::rr::Type::is_user_type

mod error;
mod rule;
mod table;
mod zone;

pub use error::Error;
pub use rule::{MatchKind, Rule};
pub use table::{RuleRef, Rules, SharedTable, Table};
pub use zone::ZonePolicy;
