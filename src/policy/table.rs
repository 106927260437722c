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

//! Implementation of the [`Table`] structure.

use std::iter::FusedIterator;
use std::ops::Deref;
use std::slice;
use std::sync::Arc;

use log::{debug, trace, warn};

use super::{Error, MatchKind, Rule};
use crate::name::Name;
use crate::rr::Type;

/// A reference-counted handle to a published [`Table`].
pub type SharedTable = Arc<Table>;

////////////////////////////////////////////////////////////////////////
// TABLE STRUCTURE AND LIFECYCLE                                      //
////////////////////////////////////////////////////////////////////////

/// An ordered collection of update-policy [`Rule`]s.
///
/// A `Table` is built with [`Table::new`] and [`Table::add_rule`], then
/// published with [`Table::into_shared`] so that any number of threads
/// can [`evaluate`](Table::evaluate) requests against it concurrently.
/// Adding rules requires exclusive access, so a table cannot change
/// while it is being evaluated or iterated.
///
/// ```
/// use update_policy::name::Name;
/// use update_policy::policy::{MatchKind, Table};
/// use update_policy::rr::Type;
///
/// let key: Name = "bob.example.".parse().unwrap();
/// let zone: Name = "example.".parse().unwrap();
///
/// let mut table = Table::new();
/// table.add_rule(false, &key, MatchKind::ExactName, &zone, &[Type::ANY]).unwrap();
/// table.add_rule(true, &key, MatchKind::Subdomain, &zone, &[]).unwrap();
/// let table = table.into_shared();
///
/// let other = Table::attach(&table);
/// assert_eq!(Table::ref_count(&table), 2);
/// Table::detach(other);
///
/// let host: Name = "host.example.".parse().unwrap();
/// assert!(table.evaluate(Some(&key), &host, Type::AAAA));
/// assert!(!table.evaluate(Some(&key), &zone, Type::TXT));
/// ```
#[derive(Debug, Default)]
pub struct Table {
    rules: Vec<Rule>,
}

impl Table {
    /// Creates a new, empty `Table`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the table for shared use. The returned handle is its
    /// only holder.
    pub fn into_shared(self) -> SharedTable {
        Arc::new(self)
    }

    /// Returns a new handle to a shared table.
    pub fn attach(table: &SharedTable) -> SharedTable {
        Arc::clone(table)
    }

    /// Gives up a handle to a shared table. The table and all of its
    /// rules are released along with the last handle.
    pub fn detach(table: SharedTable) {
        drop(table);
    }

    /// Returns the number of handles currently sharing `table`.
    pub fn ref_count(table: &SharedTable) -> usize {
        Arc::strong_count(table)
    }

    /// Appends a rule to the table.
    ///
    /// The rule keeps its own copies of `identity`, `target`, and
    /// `types`. An empty `types` slice makes the rule cover all user
    /// types (see [`Type::is_user_type`]).
    ///
    /// If memory for the rule cannot be allocated, this returns
    /// [`Error::OutOfMemory`] and the table is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `match_kind` is [`MatchKind::WildcardName`] and
    /// `target` is not a wildcard name.
    pub fn add_rule(
        &mut self,
        grant: bool,
        identity: &Name,
        match_kind: MatchKind,
        target: &Name,
        types: &[Type],
    ) -> Result<(), Error> {
        assert!(
            match_kind != MatchKind::WildcardName || target.is_wildcard(),
            "a wildcard rule requires a wildcard target name",
        );
        let result = self.rules.try_reserve(1).map_err(Error::from).and_then(|()| {
            Rule::try_new(grant, identity, match_kind, target, types)
        });
        match result {
            Ok(rule) => {
                debug!("Adding update-policy rule #{}: {}", self.rules.len(), rule);
                // Room was reserved above, so this does not allocate.
                self.rules.push(rule);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to add update-policy rule for {}: {}", identity, e);
                Err(e)
            }
        }
    }

    /// Returns the number of rules in the table.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns whether the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns a cursor at the first rule, or `None` if the table is
    /// empty. See [`RuleRef::next_rule`].
    pub fn first_rule(&self) -> Option<RuleRef> {
        RuleRef::at(self, 0)
    }

    /// Returns an iterator over the rules in insertion order.
    pub fn rules(&self) -> Rules {
        Rules {
            inner: self.rules.iter(),
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        debug!("Releasing update-policy table with {} rule(s)", self.rules.len());
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Rule;
    type IntoIter = Rules<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules()
    }
}

////////////////////////////////////////////////////////////////////////
// EVALUATION                                                         //
////////////////////////////////////////////////////////////////////////

impl Table {
    /// Decides whether `signer` may modify records of type `rr_type` at
    /// `name`.
    ///
    /// The rules are tried in insertion order, and the decision of the
    /// first matching rule is returned. Requests without a signer, and
    /// requests that no rule matches, are denied. Callers learn only
    /// the decision, never which rule (if any) produced it.
    pub fn evaluate(&self, signer: Option<&Name>, name: &Name, rr_type: Type) -> bool {
        let signer = match signer {
            Some(signer) => signer,
            None => {
                trace!("Denying unsigned update of {} {}", name, rr_type);
                return false;
            }
        };

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.matches(signer, name, rr_type) {
                trace!(
                    "Update of {} {} by {} decided by rule #{} ({})",
                    name,
                    rr_type,
                    signer,
                    index,
                    rule,
                );
                return rule.is_grant();
            }
        }

        trace!(
            "No rule matches update of {} {} by {}; denying",
            name,
            rr_type,
            signer,
        );
        false
    }

    /// Decides whether `signer` may make an update touching every
    /// `(name, type)` pair in `records`. This requires each pair to be
    /// granted by [`Table::evaluate`]. An update without a signer is
    /// denied even if it touches no records.
    pub fn evaluate_all<'a, I>(&self, signer: Option<&Name>, records: I) -> bool
    where
        I: IntoIterator<Item = (&'a Name, Type)>,
    {
        signer.is_some()
            && records
                .into_iter()
                .all(|(name, rr_type)| self.evaluate(signer, name, rr_type))
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATION                                                          //
////////////////////////////////////////////////////////////////////////

/// An iterator over the [`Rule`]s of a [`Table`], in insertion order.
///
/// To use this iterator, construct one from a [`Table`] using
/// [`Table::rules`].
#[derive(Clone, Debug)]
pub struct Rules<'a> {
    inner: slice::Iter<'a, Rule>,
}

impl<'a> Iterator for Rules<'a> {
    type Item = &'a Rule;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Rules<'_> {}

impl FusedIterator for Rules<'_> {}

/// A cursor at one [`Rule`] of a [`Table`].
///
/// A `RuleRef` dereferences to its rule. The cursor only moves forward
/// (see [`RuleRef::next_rule`]); to start over, call
/// [`Table::first_rule`] again.
#[derive(Clone, Copy, Debug)]
pub struct RuleRef<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> RuleRef<'a> {
    fn at(table: &'a Table, index: usize) -> Option<Self> {
        if index < table.rules.len() {
            Some(Self { table, index })
        } else {
            None
        }
    }

    /// Returns the position of this rule within its table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns a cursor at the following rule, or `None` if this is the
    /// last one.
    pub fn next_rule(&self) -> Option<RuleRef<'a>> {
        Self::at(self.table, self.index + 1)
    }
}

impl<'a> Deref for RuleRef<'a> {
    type Target = Rule;

    fn deref(&self) -> &Self::Target {
        &self.table.rules[self.index]
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::alloc::{GlobalAlloc, Layout, System};
    use std::cell::Cell;
    use std::ptr;
    use std::thread;

    use lazy_static::lazy_static;

    use super::*;

    /// An allocator that can be told to fail one allocation on the
    /// current thread.
    struct FailingAllocator;

    thread_local! {
        /// The number of allocations on this thread that succeed before
        /// the next one fails, or `None` to never fail.
        static ALLOCATIONS_LEFT: Cell<Option<usize>> = const { Cell::new(None) };
    }

    impl FailingAllocator {
        fn should_fail() -> bool {
            ALLOCATIONS_LEFT
                .try_with(|left| match left.get() {
                    Some(0) => true,
                    Some(n) => {
                        left.set(Some(n - 1));
                        false
                    }
                    None => false,
                })
                .unwrap_or(false)
        }
    }

    unsafe impl GlobalAlloc for FailingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            if Self::should_fail() {
                ptr::null_mut()
            } else {
                System.alloc(layout)
            }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            System.dealloc(ptr, layout)
        }

        unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
            if Self::should_fail() {
                ptr::null_mut()
            } else {
                System.realloc(ptr, layout, new_size)
            }
        }
    }

    #[global_allocator]
    static ALLOCATOR: FailingAllocator = FailingAllocator;

    lazy_static! {
        static ref EXAMPLE: Name = "example.".parse().unwrap();
        static ref ANY_EXAMPLE: Name = "*.example.".parse().unwrap();
        static ref SIGNER: Name = "a.example.".parse().unwrap();
        static ref WWW: Name = "www.example.".parse().unwrap();
        static ref EVIL: Name = "a.evil.com.".parse().unwrap();
        static ref BOB: Name = "bob.example.".parse().unwrap();
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    /// The table used by the basic scenario: any key under example.
    /// may update user types anywhere in example.
    fn scenario_table() -> Table {
        let mut table = Table::new();
        table
            .add_rule(true, &ANY_EXAMPLE, MatchKind::Subdomain, &EXAMPLE, &[])
            .unwrap();
        table
    }

    #[test]
    fn empty_table_denies_everything() {
        let table = Table::new();
        for rr_type in [Type::A, Type::NS, Type::SOA, Type::ANY] {
            assert!(!table.evaluate(Some(&SIGNER), &WWW, rr_type));
            assert!(!table.evaluate(None, &WWW, rr_type));
        }
        assert!(!table.evaluate(Some(&Name::root()), &Name::root(), Type::A));
    }

    #[test]
    fn unsigned_requests_are_denied() {
        let mut table = Table::new();
        table
            .add_rule(true, &name("*."), MatchKind::Subdomain, &Name::root(), &[Type::ANY])
            .unwrap();
        assert!(table.evaluate(Some(&SIGNER), &WWW, Type::A));
        assert!(!table.evaluate(None, &WWW, Type::A));
        assert!(!table.evaluate(None, &EXAMPLE, Type::SOA));
    }

    #[test]
    fn scenario_works() {
        let table = scenario_table();
        assert!(table.evaluate(Some(&SIGNER), &WWW, Type::A));
        assert!(!table.evaluate(Some(&SIGNER), &WWW, Type::NS));
        assert!(!table.evaluate(Some(&EVIL), &WWW, Type::A));
    }

    #[test]
    fn first_match_wins() {
        let mut deny_first = Table::new();
        deny_first
            .add_rule(false, &SIGNER, MatchKind::ExactName, &WWW, &[])
            .unwrap();
        deny_first
            .add_rule(true, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &[])
            .unwrap();
        assert!(!deny_first.evaluate(Some(&SIGNER), &WWW, Type::A));
        assert!(deny_first.evaluate(Some(&SIGNER), &name("mail.example."), Type::A));

        let mut grant_first = Table::new();
        grant_first
            .add_rule(true, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &[])
            .unwrap();
        grant_first
            .add_rule(false, &SIGNER, MatchKind::ExactName, &WWW, &[])
            .unwrap();
        assert!(grant_first.evaluate(Some(&SIGNER), &WWW, Type::A));
    }

    #[test]
    fn non_matching_rules_are_skipped() {
        let mut table = Table::new();
        table
            .add_rule(false, &EVIL, MatchKind::Subdomain, &EXAMPLE, &[Type::ANY])
            .unwrap();
        table
            .add_rule(false, &SIGNER, MatchKind::ExactName, &EXAMPLE, &[])
            .unwrap();
        table
            .add_rule(false, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &[Type::MX])
            .unwrap();
        table
            .add_rule(true, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &[])
            .unwrap();
        assert!(table.evaluate(Some(&SIGNER), &WWW, Type::A));
        assert!(!table.evaluate(Some(&SIGNER), &WWW, Type::MX));
        assert!(!table.evaluate(Some(&SIGNER), &EXAMPLE, Type::A));
    }

    #[test]
    fn protected_types_need_explicit_listing() {
        let mut implicit = Table::new();
        implicit
            .add_rule(true, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &[])
            .unwrap();
        let mut explicit = Table::new();
        let protected = [Type::NS, Type::SOA, Type::RRSIG];
        explicit
            .add_rule(true, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &protected)
            .unwrap();
        let mut any = Table::new();
        any.add_rule(true, &SIGNER, MatchKind::Subdomain, &EXAMPLE, &[Type::ANY])
            .unwrap();

        for rr_type in protected {
            assert!(!implicit.evaluate(Some(&SIGNER), &EXAMPLE, rr_type));
            assert!(explicit.evaluate(Some(&SIGNER), &EXAMPLE, rr_type));
            assert!(any.evaluate(Some(&SIGNER), &EXAMPLE, rr_type));
        }
    }

    #[test]
    fn self_matches_only_signer_name() {
        let mut table = Table::new();
        table
            .add_rule(true, &ANY_EXAMPLE, MatchKind::SelfName, &name("unrelated."), &[])
            .unwrap();
        assert!(table.evaluate(Some(&SIGNER), &SIGNER, Type::A));
        assert!(table.evaluate(Some(&BOB), &BOB, Type::TXT));
        assert!(!table.evaluate(Some(&SIGNER), &BOB, Type::A));
        assert!(!table.evaluate(Some(&SIGNER), &name("unrelated."), Type::A));
    }

    #[test]
    fn self_subdomain_is_relative_to_signer() {
        let mut table = Table::new();
        table
            .add_rule(true, &ANY_EXAMPLE, MatchKind::SelfSubdomain, &EXAMPLE, &[])
            .unwrap();
        assert!(table.evaluate(Some(&BOB), &BOB, Type::A));
        assert!(table.evaluate(Some(&BOB), &name("x.bob.example."), Type::A));
        assert!(!table.evaluate(Some(&BOB), &WWW, Type::A));
    }

    #[test]
    fn self_wildcard_excludes_signer() {
        let mut table = Table::new();
        table
            .add_rule(true, &ANY_EXAMPLE, MatchKind::SelfWildcard, &EXAMPLE, &[])
            .unwrap();
        assert!(table.evaluate(Some(&BOB), &name("anything.bob.example."), Type::A));
        assert!(!table.evaluate(Some(&BOB), &BOB, Type::A));
    }

    #[test]
    fn self_wildcard_synthesis_failure_falls_through() {
        let long = name(&format!("{0}.{0}.{0}.{1}.", "x".repeat(63), "x".repeat(61)));
        let mut table = Table::new();
        table
            .add_rule(false, &long, MatchKind::SelfWildcard, &Name::root(), &[Type::ANY])
            .unwrap();
        table
            .add_rule(true, &long, MatchKind::SelfName, &Name::root(), &[])
            .unwrap();
        assert!(table.evaluate(Some(&long), &long, Type::A));
    }

    #[test]
    fn wildcard_kind_matches_below_target_suffix() {
        let mut table = Table::new();
        table
            .add_rule(true, &SIGNER, MatchKind::WildcardName, &ANY_EXAMPLE, &[])
            .unwrap();
        assert!(table.evaluate(Some(&SIGNER), &WWW, Type::A));
        assert!(!table.evaluate(Some(&SIGNER), &EXAMPLE, Type::A));
    }

    #[test]
    #[should_panic(expected = "a wildcard rule requires a wildcard target name")]
    fn wildcard_kind_requires_wildcard_target() {
        let mut table = Table::new();
        let _ = table.add_rule(true, &SIGNER, MatchKind::WildcardName, &EXAMPLE, &[]);
    }

    #[test]
    fn rules_round_trip_and_are_deep_copies() {
        let mut identity = name("*.example.");
        let mut target = name("example.");
        let mut types = vec![Type::A, Type::TXT];

        let mut table = Table::new();
        table
            .add_rule(false, &identity, MatchKind::Subdomain, &target, &types)
            .unwrap();

        identity = name("other.");
        target = name("other.");
        types.push(Type::NS);
        types[0] = Type::AAAA;

        let rule = table.first_rule().unwrap();
        assert!(!rule.is_grant());
        assert_eq!(rule.identity(), &*ANY_EXAMPLE);
        assert_eq!(rule.match_kind(), MatchKind::Subdomain);
        assert_eq!(rule.target(), &*EXAMPLE);
        assert_eq!(rule.types(), &[Type::A, Type::TXT]);
        assert_ne!(rule.identity(), &identity);
        assert_ne!(rule.target(), &target);
    }

    #[test]
    fn cursor_visits_rules_in_insertion_order() {
        let mut table = Table::new();
        assert!(table.first_rule().is_none());
        table
            .add_rule(true, &SIGNER, MatchKind::ExactName, &WWW, &[])
            .unwrap();
        table
            .add_rule(false, &BOB, MatchKind::SelfName, &EXAMPLE, &[Type::A])
            .unwrap();
        table
            .add_rule(true, &EVIL, MatchKind::Subdomain, &EXAMPLE, &[])
            .unwrap();

        let first = table.first_rule().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(first.identity(), &*SIGNER);
        let second = first.next_rule().unwrap();
        assert_eq!(second.identity(), &*BOB);
        let third = second.next_rule().unwrap();
        assert_eq!(third.identity(), &*EVIL);
        assert!(third.next_rule().is_none());

        // Restarting yields the same sequence.
        assert_eq!(table.first_rule().unwrap().identity(), &*SIGNER);
        let identities: Vec<&Name> = table.rules().map(Rule::identity).collect();
        assert_eq!(identities, [&*SIGNER, &*BOB, &*EVIL]);
        assert_eq!(table.rules().len(), 3);
        assert_eq!((&table).into_iter().count(), table.len());
    }

    #[test]
    fn attach_and_detach_track_holders() {
        let table = scenario_table().into_shared();
        assert_eq!(Table::ref_count(&table), 1);
        let second = Table::attach(&table);
        let third = Table::attach(&second);
        assert_eq!(Table::ref_count(&table), 3);
        assert!(Arc::ptr_eq(&table, &third));
        Table::detach(second);
        assert_eq!(Table::ref_count(&table), 2);
        Table::detach(third);
        assert_eq!(Table::ref_count(&table), 1);
        assert!(table.evaluate(Some(&SIGNER), &WWW, Type::A));
    }

    #[test]
    fn evaluate_all_requires_every_record() {
        let table = scenario_table();
        let records = [(&*WWW, Type::A), (&*EXAMPLE, Type::TXT)];
        assert!(table.evaluate_all(Some(&SIGNER), records));
        let records = [(&*WWW, Type::A), (&*EXAMPLE, Type::SOA)];
        assert!(!table.evaluate_all(Some(&SIGNER), records));
        assert!(!table.evaluate_all(None, [(&*WWW, Type::A)]));
        assert!(table.evaluate_all(Some(&SIGNER), Vec::<(&Name, Type)>::new()));
        assert!(!table.evaluate_all(None, Vec::<(&Name, Type)>::new()));
    }

    #[test]
    fn shared_table_evaluates_concurrently() {
        let table = scenario_table().into_shared();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Table::attach(&table);
                thread::spawn(move || {
                    let host = name(&format!("host{}.example.", i));
                    (0..100).all(|_| {
                        table.evaluate(Some(&SIGNER), &host, Type::A)
                            && !table.evaluate(Some(&SIGNER), &host, Type::NS)
                            && !table.evaluate(Some(&EVIL), &host, Type::A)
                    })
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(Table::ref_count(&table), 1);
    }

    #[test]
    fn failed_add_rule_leaves_table_unchanged() {
        let identity = name("key.example.");
        let target = name("example.");
        let types = [Type::A, Type::AAAA];

        // Fill the table to capacity so that adding a rule must also
        // grow the rule vector.
        let mut table = Table::new();
        table
            .add_rule(false, &identity, MatchKind::ExactName, &target, &[])
            .unwrap();
        while table.rules.len() < table.rules.capacity() {
            table
                .add_rule(false, &identity, MatchKind::ExactName, &target, &[])
                .unwrap();
        }
        let old_len = table.len();

        // Fail each allocation add_rule makes in turn: the vector slot,
        // the type list, and two buffers per name.
        let mut failures = 0;
        loop {
            ALLOCATIONS_LEFT.with(|left| left.set(Some(failures)));
            let result = table.add_rule(true, &identity, MatchKind::Subdomain, &target, &types);
            ALLOCATIONS_LEFT.with(|left| left.set(None));
            if result.is_ok() {
                break;
            }
            assert_eq!(result, Err(Error::OutOfMemory));
            assert_eq!(table.len(), old_len);
            assert_eq!(table.rules().count(), old_len);
            let first = table.first_rule().unwrap();
            assert!(!first.is_grant());
            assert_eq!(first.match_kind(), MatchKind::ExactName);
            assert!(table.rules().all(|rule| !rule.is_grant()));
            failures += 1;
        }
        assert_eq!(failures, 6);

        let added = table.rules().last().unwrap();
        assert_eq!(table.len(), old_len + 1);
        assert!(added.is_grant());
        assert_eq!(added.identity(), &identity);
        assert_eq!(added.match_kind(), MatchKind::Subdomain);
        assert_eq!(added.target(), &target);
        assert_eq!(added.types(), &types);
        assert!(table.evaluate(Some(&identity), &WWW, Type::AAAA));

        // With no failure pending, adding rules works as usual.
        table
            .add_rule(true, &identity, MatchKind::SelfName, &target, &[])
            .unwrap();
        assert_eq!(table.len(), old_len + 2);
    }
}
