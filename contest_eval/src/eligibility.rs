use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use log::debug;

use crate::config::AccountInfo;

/// One entry of the global identity-rename log.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RenameEvent {
    pub old: String,
    pub new: String,
    pub at: DateTime<Utc>,
}

/// Upper bound on rename-chain resolution. The log has contained cycles;
/// resolution must terminate regardless.
const MAX_CHAIN: usize = 32;

/// Mapping old name -> new name, built once per contest year from the rename
/// log bounded to events before the registration cutoff.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RenameMap {
    renames: HashMap<String, String>,
}

impl RenameMap {
    /// Builds the map from a stream of rename events, keeping only those that
    /// happened strictly before `cutoff`. A later rename of the same old name
    /// wins, matching the order of the log.
    pub fn from_events(
        events: impl IntoIterator<Item = RenameEvent>,
        cutoff: DateTime<Utc>,
    ) -> RenameMap {
        let mut renames: HashMap<String, String> = HashMap::new();
        for ev in events {
            if ev.at < cutoff {
                renames.insert(ev.old, ev.new);
            }
        }
        debug!("rename map built with {} entries", renames.len());
        RenameMap { renames }
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    /// Resolves a raw user name to its canonical form, following rename
    /// chains transitively (A -> B -> C resolves A to C). Resolution depth is
    /// capped so a cyclic log terminates.
    pub fn resolve(&self, name: &str) -> String {
        let mut current = name;
        for _ in 0..MAX_CHAIN {
            match self.renames.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.to_string()
    }
}

/// Why a voter was excluded from a round.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ExclusionReason {
    NotYetRegistered,
    InsufficientEdits,
}

impl Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::NotYetRegistered => write!(f, "not yet registered"),
            ExclusionReason::InsufficientEdits => write!(f, "insufficient edits"),
        }
    }
}

/// The shared, read-only eligibility configuration. Built exactly once per
/// contest year and passed by reference to every round that screens voters.
/// There is deliberately no mutating method on it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct EligibilityConfig {
    registered_before: DateTime<Utc>,
    min_edits: u64,
    count_deleted_edits: bool,
    renames: RenameMap,
}

impl EligibilityConfig {
    pub fn new(
        registered_before: DateTime<Utc>,
        min_edits: u64,
        count_deleted_edits: bool,
        renames: RenameMap,
    ) -> EligibilityConfig {
        EligibilityConfig {
            registered_before,
            min_edits,
            count_deleted_edits,
            renames,
        }
    }

    pub fn registered_before(&self) -> DateTime<Utc> {
        self.registered_before
    }

    pub fn min_edits(&self) -> u64 {
        self.min_edits
    }

    pub fn renames(&self) -> &RenameMap {
        &self.renames
    }

    /// The edit count the eligibility check uses: deleted edits are excluded
    /// unless the configuration says otherwise.
    pub fn edit_count(&self, account: &AccountInfo) -> u64 {
        if self.count_deleted_edits {
            account.live_edits + account.deleted_edits
        } else {
            account.live_edits
        }
    }

    /// Screens one canonical voter. The caller is responsible for having
    /// resolved renames and looked up the account; a lookup failure must be
    /// surfaced as an error, not funneled through here.
    pub fn screen(&self, account: &AccountInfo) -> Result<(), ExclusionReason> {
        if account.registered >= self.registered_before {
            return Err(ExclusionReason::NotYetRegistered);
        }
        if self.edit_count(account) < self.min_edits {
            return Err(ExclusionReason::InsufficientEdits);
        }
        Ok(())
    }
}
