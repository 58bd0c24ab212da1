use crate::value::{RowHandle, Value};

/// Evaluation state of one field of a row under construction.
///
/// The tri-state map is what gives sibling references their lazy, memoized,
/// cycle-detected behavior: a `Pending` field is computed on first access,
/// a `Done` field is a cache hit, and reaching an `InProgress` field again
/// means the evaluation recursed into itself.
#[derive(Debug, Clone)]
pub enum FieldSlot {
    Pending,
    InProgress,
    Done(Value),
}

/// One generated record, owned by the arena.
#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub tablename: String,
    pub id: u64,
    pub child_index: u64,
    pub nickname: Option<String>,
    fields: Vec<(String, FieldSlot)>,
}

impl ObjectRow {
    /// Seed a fresh row: `id` is already known, every declared field starts
    /// `Pending` in declaration order.
    pub fn new<'n>(
        tablename: &str,
        id: u64,
        child_index: u64,
        nickname: Option<String>,
        declared_fields: impl Iterator<Item = &'n str>,
    ) -> Self {
        let mut fields = vec![("id".to_string(), FieldSlot::Done(Value::Int(id as i64)))];
        for name in declared_fields {
            if name != "id" {
                fields.push((name.to_string(), FieldSlot::Pending));
            }
        }
        Self {
            tablename: tablename.to_string(),
            id,
            child_index,
            nickname,
            fields,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&FieldSlot> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, slot)| slot)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(field, _)| field == name)
    }

    pub fn mark_in_progress(&mut self, name: &str) {
        self.set(name, FieldSlot::InProgress);
    }

    pub fn set_done(&mut self, name: &str, value: Value) {
        self.set(name, FieldSlot::Done(value));
    }

    fn set(&mut self, name: &str, slot: FieldSlot) {
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some((_, existing)) => *existing = slot,
            None => self.fields.push((name.to_string(), slot)),
        }
    }

    /// Completed fields in declaration order (`id` first).
    pub fn done_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().filter_map(|(name, slot)| match slot {
            FieldSlot::Done(value) => Some((name.as_str(), value)),
            _ => None,
        })
    }
}

/// Arena of every row created during a run.
///
/// Rows are addressed by stable `RowHandle`s so field values can point at
/// rows (including the row under construction) without ownership cycles.
#[derive(Debug, Default)]
pub struct RowArena {
    rows: Vec<ObjectRow>,
}

impl RowArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, row: ObjectRow) -> RowHandle {
        self.rows.push(row);
        RowHandle(self.rows.len() - 1)
    }

    pub fn get(&self, handle: RowHandle) -> &ObjectRow {
        &self.rows[handle.0]
    }

    pub fn get_mut(&mut self, handle: RowHandle) -> &mut ObjectRow {
        &mut self.rows[handle.0]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_seed_id_first_and_fields_pending() {
        let row = ObjectRow::new("Account", 3, 0, None, ["name", "industry"].into_iter());
        assert!(matches!(row.slot("id"), Some(FieldSlot::Done(Value::Int(3)))));
        assert!(matches!(row.slot("name"), Some(FieldSlot::Pending)));
        let done: Vec<&str> = row.done_fields().map(|(name, _)| name).collect();
        assert_eq!(done, vec!["id"]);
    }

    #[test]
    fn set_done_memoizes() {
        let mut row = ObjectRow::new("Account", 1, 0, None, ["name"].into_iter());
        row.mark_in_progress("name");
        assert!(matches!(row.slot("name"), Some(FieldSlot::InProgress)));
        row.set_done("name", Value::Text("Acme".to_string()));
        let done: Vec<&str> = row.done_fields().map(|(name, _)| name).collect();
        assert_eq!(done, vec!["id", "name"]);
    }
}
