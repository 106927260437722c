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

//! Implementation of the [`Rule`] and [`MatchKind`] types.

use std::fmt;
use std::str::FromStr;

use log::trace;

use super::Error;
use crate::name::Name;
use crate::rr::Type;
use crate::util::Caseless;

////////////////////////////////////////////////////////////////////////
// MATCH KINDS                                                        //
////////////////////////////////////////////////////////////////////////

/// Determines which names a [`Rule`] applies to.
///
/// The first three kinds compare the updated name against the rule's
/// target name. The `Self*` kinds ignore the target name and compare
/// against the requester's own identity instead.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MatchKind {
    /// The name must equal the target name.
    ExactName,

    /// The name must equal or be a subdomain of the target name.
    Subdomain,

    /// The name must match the target name, which is a wildcard name.
    WildcardName,

    /// The name must equal the signer.
    SelfName,

    /// The name must equal or be a subdomain of the signer.
    SelfSubdomain,

    /// The name must match the wildcard `*.<signer>`, i.e., lie
    /// strictly below the signer.
    SelfWildcard,
}

impl MatchKind {
    /// Returns the keyword used for this kind in update-policy
    /// statements.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::ExactName => "name",
            Self::Subdomain => "subdomain",
            Self::WildcardName => "wildcard",
            Self::SelfName => "self",
            Self::SelfSubdomain => "selfsub",
            Self::SelfWildcard => "selfwild",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for MatchKind {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        [
            Self::ExactName,
            Self::Subdomain,
            Self::WildcardName,
            Self::SelfName,
            Self::SelfSubdomain,
            Self::SelfWildcard,
        ]
        .into_iter()
        .find(|kind| Caseless(kind.keyword()) == Caseless(text))
        .ok_or("unknown match kind")
    }
}

////////////////////////////////////////////////////////////////////////
// RULES                                                              //
////////////////////////////////////////////////////////////////////////

/// A single clause of an update policy.
///
/// A `Rule` owns copies of its names and type list; it shares nothing
/// with the arguments it was built from. Rules are only created by
/// [`Table::add_rule`](super::Table::add_rule) and live as long as
/// their table.
#[derive(Debug)]
pub struct Rule {
    grant: bool,
    identity: Name,
    match_kind: MatchKind,
    target: Name,
    types: Box<[Type]>,
}

impl Rule {
    /// Builds a rule, copying everything it refers to. All allocations
    /// are fallible, and nothing outlives a failed call.
    pub(super) fn try_new(
        grant: bool,
        identity: &Name,
        match_kind: MatchKind,
        target: &Name,
        types: &[Type],
    ) -> Result<Self, Error> {
        let mut owned_types = Vec::new();
        owned_types.try_reserve_exact(types.len())?;
        owned_types.extend_from_slice(types);
        Ok(Self {
            grant,
            identity: identity.try_clone()?,
            match_kind,
            target: target.try_clone()?,
            types: owned_types.into_boxed_slice(),
        })
    }

    /// Returns whether this rule grants (rather than denies) updates.
    pub fn is_grant(&self) -> bool {
        self.grant
    }

    /// Returns the identity pattern requesters are compared against.
    pub fn identity(&self) -> &Name {
        &self.identity
    }

    /// Returns how this rule selects the names it applies to.
    pub fn match_kind(&self) -> MatchKind {
        self.match_kind
    }

    /// Returns the target name. This is unused by the `Self*` kinds.
    pub fn target(&self) -> &Name {
        &self.target
    }

    /// Returns the types this rule lists. An empty list stands for all
    /// user types.
    pub fn types(&self) -> &[Type] {
        &self.types
    }

    /// Returns whether this rule applies to an update of `name` with
    /// type `rr_type` requested by `signer`.
    pub fn matches(&self, signer: &Name, name: &Name, rr_type: Type) -> bool {
        self.matches_identity(signer)
            && self.matches_name(signer, name)
            && self.matches_type(rr_type)
    }

    fn matches_identity(&self, signer: &Name) -> bool {
        if self.identity.is_wildcard() {
            signer.matches_wildcard(&self.identity)
        } else {
            *signer == self.identity
        }
    }

    fn matches_name(&self, signer: &Name, name: &Name) -> bool {
        match self.match_kind {
            MatchKind::ExactName => *name == self.target,
            MatchKind::Subdomain => name.eq_or_subdomain_of(&self.target),
            MatchKind::WildcardName => name.matches_wildcard(&self.target),
            MatchKind::SelfName => name == signer,
            MatchKind::SelfSubdomain => name.eq_or_subdomain_of(signer),
            MatchKind::SelfWildcard => match signer.to_wildcard() {
                Ok(wildcard) => name.matches_wildcard(&wildcard),
                Err(e) => {
                    trace!("Cannot form a wildcard below signer {}: {}", signer, e);
                    false
                }
            },
        }
    }

    fn matches_type(&self, rr_type: Type) -> bool {
        if self.types.is_empty() {
            rr_type.is_user_type()
        } else {
            self.types
                .iter()
                .any(|&listed| listed == Type::ANY || listed == rr_type)
        }
    }
}

/// Rules are displayed as update-policy statements, e.g.
/// `grant *.example. subdomain example. A AAAA`.
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            if self.grant { "grant" } else { "deny" },
            self.identity,
            self.match_kind,
            self.target,
        )?;
        for rr_type in self.types.iter() {
            write!(f, " {}", rr_type)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
