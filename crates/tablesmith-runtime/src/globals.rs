use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use tablesmith_model::Dependency;

use crate::errors::GenerateError;
use crate::rows::RowArena;
use crate::value::{ObjectReference, RowHandle};

/// Keeps track of the most recent id per table.
///
/// Ids are monotonic and never reused, including across continuation
/// boundaries: restoring a snapshot restores the high-water marks.
#[derive(Debug, Clone, Default)]
pub struct IdManager {
    last_used_ids: BTreeMap<String, u64>,
}

impl IdManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_last_used(last_used_ids: BTreeMap<String, u64>) -> Self {
        Self { last_used_ids }
    }

    pub fn generate_id(&mut self, tablename: &str) -> u64 {
        let entry = self.last_used_ids.entry(tablename.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn last_used(&self, tablename: &str) -> u64 {
        self.last_used_ids.get(tablename).copied().unwrap_or(0)
    }

    pub fn last_used_ids(&self) -> &BTreeMap<String, u64> {
        &self.last_used_ids
    }
}

/// Lifecycle of a forward-reference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never referenced.
    Unused,
    /// Referenced before its object existed; an id has been handed out and
    /// the object must be created before the pass ends.
    Allocated,
    /// Filled by a generated object.
    Consumed,
}

/// A slot that represents a nickname or tablename that can be referenced
/// before any matching row exists.
#[derive(Debug, Clone)]
struct NicknameSlot {
    tablename: String,
    allocated_id: Option<u64>,
    consumed: bool,
}

impl NicknameSlot {
    fn new(tablename: String) -> Self {
        Self {
            tablename,
            allocated_id: None,
            consumed: false,
        }
    }

    fn status(&self) -> SlotState {
        if self.consumed {
            SlotState::Consumed
        } else if self.allocated_id.is_some() {
            SlotState::Allocated
        } else {
            SlotState::Unused
        }
    }
}

/// What a name resolves to: a row created this run, or a lightweight
/// reference (forward slot or rehydrated binding).
#[derive(Debug, Clone)]
pub enum Binding {
    Row(RowHandle),
    Reference(ObjectReference),
}

/// Globally named objects and the rest of global scope.
///
/// Designed to be persisted so long-running executions can stop and restart;
/// other interpreter internals do not survive a continuation.
#[derive(Debug)]
pub struct Globals {
    pub id_manager: IdManager,
    pub today: NaiveDate,
    nicknames_and_tables: BTreeMap<String, String>,
    named_slots: BTreeMap<String, NicknameSlot>,
    nicknamed_objects: BTreeMap<String, Binding>,
    last_seen_of_table: BTreeMap<String, Binding>,
    dependencies: BTreeSet<Dependency>,
}

impl Globals {
    pub fn new(today: NaiveDate, nicknames_and_tables: BTreeMap<String, String>) -> Self {
        let named_slots = nicknames_and_tables
            .iter()
            .map(|(name, table)| (name.clone(), NicknameSlot::new(table.clone())))
            .collect();
        Self {
            id_manager: IdManager::new(),
            today,
            nicknames_and_tables,
            named_slots,
            nicknamed_objects: BTreeMap::new(),
            last_seen_of_table: BTreeMap::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub(crate) fn rehydrate(
        today: NaiveDate,
        id_manager: IdManager,
        nicknames_and_tables: BTreeMap<String, String>,
        nicknamed_objects: BTreeMap<String, ObjectReference>,
        table_bindings: BTreeMap<String, ObjectReference>,
        dependencies: BTreeSet<Dependency>,
    ) -> Self {
        let mut named_slots: BTreeMap<String, NicknameSlot> = nicknames_and_tables
            .iter()
            .map(|(name, table)| (name.clone(), NicknameSlot::new(table.clone())))
            .collect();
        // Names already fulfilled by a previous invocation keep resolving
        // without demanding a fresh object this run.
        for name in nicknamed_objects.keys().chain(table_bindings.keys()) {
            if let Some(slot) = named_slots.get_mut(name) {
                slot.consumed = true;
            }
        }
        Self {
            id_manager,
            today,
            nicknames_and_tables,
            named_slots,
            nicknamed_objects: nicknamed_objects
                .into_iter()
                .map(|(name, reference)| (name, Binding::Reference(reference)))
                .collect(),
            last_seen_of_table: table_bindings
                .into_iter()
                .map(|(name, reference)| (name, Binding::Reference(reference)))
                .collect(),
            dependencies,
        }
    }

    /// Register a row for lookup by tablename and, optionally, nickname.
    /// Later registrations win: a nickname always resolves to the most
    /// recently created row carrying it.
    pub fn register_object(&mut self, tablename: &str, nickname: Option<&str>, handle: RowHandle) {
        if let Some(nickname) = nickname {
            self.nicknamed_objects
                .insert(nickname.to_string(), Binding::Row(handle));
        }
        self.last_seen_of_table
            .insert(tablename.to_string(), Binding::Row(handle));
    }

    /// Resolve a nickname or tablename. Fulfilled bindings win over forward
    /// slots; resolving an untouched slot allocates its id, creating the
    /// obligation that a matching object appears before the pass ends.
    pub fn resolve_name(&mut self, name: &str) -> Option<Binding> {
        if let Some(binding) = self.last_seen_of_table.get(name) {
            return Some(binding.clone());
        }
        if let Some(binding) = self.nicknamed_objects.get(name) {
            return Some(binding.clone());
        }
        let ids = &mut self.id_manager;
        let slot = self.named_slots.get_mut(name)?;
        if slot.consumed {
            return None;
        }
        let id = match slot.allocated_id {
            Some(id) => id,
            None => {
                let id = ids.generate_id(&slot.tablename);
                slot.allocated_id = Some(id);
                id
            }
        };
        Some(Binding::Reference(ObjectReference {
            tablename: slot.tablename.clone(),
            id,
        }))
    }

    /// Take the id already promised for this nickname or tablename by a
    /// forward reference, if any, marking the slot as filled.
    pub fn consume_slot_id(&mut self, nickname: Option<&str>, tablename: &str) -> Option<u64> {
        for name in nickname.into_iter().chain(std::iter::once(tablename)) {
            if let Some(slot) = self.named_slots.get_mut(name) {
                if slot.status() == SlotState::Allocated {
                    slot.consumed = true;
                    return slot.allocated_id;
                }
            }
        }
        None
    }

    /// Error if any forward reference is still waiting for its object;
    /// every outstanding name is reported together.
    pub fn check_slots_filled(&self) -> Result<(), GenerateError> {
        let not_filled: Vec<String> = self
            .named_slots
            .iter()
            .filter(|(_, slot)| slot.status() == SlotState::Allocated)
            .map(|(name, _)| name.clone())
            .collect();
        if not_filled.is_empty() {
            Ok(())
        } else {
            Err(GenerateError::UnresolvedReferences { names: not_filled })
        }
    }

    pub fn slot_state(&self, name: &str) -> Option<SlotState> {
        self.named_slots.get(name).map(NicknameSlot::status)
    }

    /// Record a "table A's field points at table B" edge for the mapping
    /// builder; the set deduplicates.
    pub fn register_dependency(&mut self, dependency: Dependency) {
        self.dependencies.insert(dependency);
    }

    pub fn dependencies(&self) -> &BTreeSet<Dependency> {
        &self.dependencies
    }

    pub fn nicknames_and_tables(&self) -> &BTreeMap<String, String> {
        &self.nicknames_and_tables
    }

    pub(crate) fn binding_reference(
        &self,
        binding: &Binding,
        arena: &RowArena,
    ) -> ObjectReference {
        match binding {
            Binding::Row(handle) => {
                let row = arena.get(*handle);
                ObjectReference {
                    tablename: row.tablename.clone(),
                    id: row.id,
                }
            }
            Binding::Reference(reference) => reference.clone(),
        }
    }

    pub(crate) fn nickname_bindings(&self) -> &BTreeMap<String, Binding> {
        &self.nicknamed_objects
    }

    pub(crate) fn table_bindings(&self) -> &BTreeMap<String, Binding> {
        &self.last_seen_of_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals() -> Globals {
        let mut slots = BTreeMap::new();
        slots.insert("bobby".to_string(), "Contact".to_string());
        slots.insert("Contact".to_string(), "Contact".to_string());
        Globals::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(), slots)
    }

    #[test]
    fn ids_are_monotonic() {
        let mut ids = IdManager::new();
        assert_eq!(ids.generate_id("Account"), 1);
        assert_eq!(ids.generate_id("Account"), 2);
        assert_eq!(ids.generate_id("Contact"), 1);
        assert_eq!(ids.last_used("Account"), 2);
    }

    #[test]
    fn forward_slot_allocates_then_is_consumed() {
        let mut globals = globals();
        let Some(Binding::Reference(reference)) = globals.resolve_name("bobby") else {
            panic!("expected a forward reference");
        };
        assert_eq!(reference.tablename, "Contact");
        assert_eq!(reference.id, 1);
        assert!(globals.check_slots_filled().is_err());

        // the object arrives and takes over the promised id
        assert_eq!(globals.consume_slot_id(Some("bobby"), "Contact"), Some(1));
        assert!(globals.check_slots_filled().is_ok());
        assert_eq!(globals.slot_state("bobby"), Some(SlotState::Consumed));
    }

    #[test]
    fn unresolved_slots_are_reported_together() {
        let mut globals = globals();
        globals.resolve_name("bobby");
        globals.resolve_name("Contact");
        let err = globals.check_slots_filled().unwrap_err();
        let GenerateError::UnresolvedReferences { names } = err else {
            panic!("expected UnresolvedReferences");
        };
        assert_eq!(names, vec!["Contact".to_string(), "bobby".to_string()]);
    }
}
