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

//! Implementation of the [`ZonePolicy`] structure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use log::debug;

use super::{SharedTable, Table};
use crate::name::Name;
use crate::rr::Type;

/// The update policy currently in force for a zone.
///
/// A `ZonePolicy` holds the zone's installed [`Table`] (if any) and a
/// flag that turns dynamic updates off regardless of the table. The
/// table can be replaced at any time, e.g. on reconfiguration.
/// Authorizations already in progress continue with the table they
/// started with; ones started after [`ZonePolicy::set_table`] returns
/// see the new one.
#[derive(Debug, Default)]
pub struct ZonePolicy {
    table: RwLock<Option<SharedTable>>,
    updates_disabled: AtomicBool,
}

impl ZonePolicy {
    /// Creates a new `ZonePolicy` with no table installed. Until one
    /// is, all updates are denied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the installed table, if any.
    pub fn table(&self) -> Option<SharedTable> {
        self.table.read().unwrap().as_ref().map(Table::attach)
    }

    /// Installs `table`, or removes the installed table if passed
    /// `None`. The zone's handle to the previous table is released.
    pub fn set_table(&self, table: Option<SharedTable>) {
        match table {
            Some(ref table) => debug!("Installing update policy with {} rule(s)", table.len()),
            None => debug!("Removing update policy"),
        }
        let previous = std::mem::replace(&mut *self.table.write().unwrap(), table);
        if let Some(previous) = previous {
            Table::detach(previous);
        }
    }

    /// Returns whether dynamic updates have been turned off.
    pub fn updates_disabled(&self) -> bool {
        self.updates_disabled.load(Ordering::Relaxed)
    }

    /// Turns dynamic updates off (or back on). While updates are
    /// disabled, [`ZonePolicy::authorize`] denies everything.
    pub fn set_updates_disabled(&self, disabled: bool) {
        debug!("Dynamic updates {}", if disabled { "disabled" } else { "enabled" });
        self.updates_disabled.store(disabled, Ordering::Relaxed);
    }

    /// Returns whether the zone accepts dynamic updates, i.e., whether
    /// updates are enabled and a table is installed. The zone's data
    /// should then be treated as written by the server rather than
    /// maintained by hand.
    pub fn is_dynamic(&self) -> bool {
        !self.updates_disabled() && self.table.read().unwrap().is_some()
    }

    /// Decides whether `signer` may modify records of type `rr_type` at
    /// `name` in this zone. See [`Table::evaluate`].
    pub fn authorize(&self, signer: Option<&Name>, name: &Name, rr_type: Type) -> bool {
        self.usable_table()
            .is_some_and(|table| table.evaluate(signer, name, rr_type))
    }

    /// Decides whether `signer` may make an update touching all of
    /// `records`. See [`Table::evaluate_all`].
    pub fn authorize_all<'a, I>(&self, signer: Option<&Name>, records: I) -> bool
    where
        I: IntoIterator<Item = (&'a Name, Type)>,
    {
        self.usable_table()
            .is_some_and(|table| table.evaluate_all(signer, records))
    }

    /// Returns the installed table unless updates are disabled. The
    /// read lock is released before the table is consulted.
    fn usable_table(&self) -> Option<SharedTable> {
        if self.updates_disabled() {
            None
        } else {
            self.table()
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
