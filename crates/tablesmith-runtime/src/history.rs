use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use tablesmith_model::NodeId;

use crate::errors::GenerateError;
use crate::value::ObjectReference;

/// One remembered row: enough to hand out references without keeping the
/// row payload alive.
#[derive(Debug, Clone)]
struct HistoryEntry {
    id: u64,
    nickname: Option<String>,
    /// Enclosing template-instance rows active when this row was created,
    /// outermost first.
    ancestors: Vec<ObjectReference>,
}

/// Creation-ordered record of every row generated this run, backing the
/// random-reference sampler.
///
/// Sampling honors two optional constraints: `unique` (never return the same
/// row twice for a given call site) and an ancestor scope (only rows created
/// while a specific enclosing template instance was active).
#[derive(Debug, Default)]
pub struct RowHistory {
    tables: BTreeMap<String, Vec<HistoryEntry>>,
    nicknames_to_tables: BTreeMap<String, String>,
    used_by_call_site: BTreeMap<NodeId, BTreeSet<u64>>,
}

impl RowHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_row(
        &mut self,
        tablename: &str,
        nickname: Option<&str>,
        id: u64,
        ancestors: Vec<ObjectReference>,
    ) {
        if let Some(nickname) = nickname {
            self.nicknames_to_tables
                .entry(nickname.to_string())
                .or_insert_with(|| tablename.to_string());
        }
        self.tables
            .entry(tablename.to_string())
            .or_default()
            .push(HistoryEntry {
                id,
                nickname: nickname.map(str::to_string),
                ancestors,
            });
    }

    /// Sample a row created under `name` (a nickname or tablename).
    pub fn random_row_reference(
        &mut self,
        name: &str,
        unique: Option<NodeId>,
        ancestor: Option<&ObjectReference>,
        rng: &mut ChaCha8Rng,
    ) -> Result<ObjectReference, GenerateError> {
        let (tablename, nickname) = match self.nicknames_to_tables.get(name) {
            Some(tablename) => (tablename.clone(), Some(name)),
            None => (name.to_string(), None),
        };
        let entries = self.tables.get(&tablename).ok_or_else(|| {
            GenerateError::name(format!("no rows exist for table '{tablename}'"), None)
        })?;

        let used = unique.map(|site| {
            self.used_by_call_site
                .entry(site)
                .or_default()
                .clone()
        });

        let candidates: Vec<u64> = entries
            .iter()
            .filter(|entry| match nickname {
                Some(nickname) => entry.nickname.as_deref() == Some(nickname),
                None => true,
            })
            .filter(|entry| match ancestor {
                Some(ancestor) => entry.ancestors.contains(ancestor),
                None => true,
            })
            .filter(|entry| match &used {
                Some(used) => !used.contains(&entry.id),
                None => true,
            })
            .map(|entry| entry.id)
            .collect();

        if candidates.is_empty() {
            let message = if unique.is_some() {
                format!("no unused '{name}' rows available for a unique random reference")
            } else {
                format!("no '{name}' rows available to reference")
            };
            return Err(GenerateError::value(message, None));
        }

        let id = candidates[rng.random_range(0..candidates.len())];
        if let Some(site) = unique {
            self.used_by_call_site.entry(site).or_default().insert(id);
        }
        Ok(ObjectReference { tablename, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn reference(table: &str, id: u64) -> ObjectReference {
        ObjectReference {
            tablename: table.to_string(),
            id,
        }
    }

    #[test]
    fn unique_sampling_exhausts_then_errors() {
        let mut history = RowHistory::new();
        for id in 1..=3 {
            history.save_row("Contact", None, id, Vec::new());
        }
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let site = sample_node_id();

        let mut seen = BTreeSet::new();
        for _ in 0..3 {
            let reference = history
                .random_row_reference("Contact", Some(site), None, &mut rng)
                .expect("a candidate remains");
            assert!(seen.insert(reference.id));
        }
        assert!(
            history
                .random_row_reference("Contact", Some(site), None, &mut rng)
                .is_err()
        );
    }

    #[test]
    fn ancestor_scope_restricts_candidates() {
        let mut history = RowHistory::new();
        history.save_row("Contact", None, 1, vec![reference("Account", 1)]);
        history.save_row("Contact", None, 2, vec![reference("Account", 2)]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..8 {
            let picked = history
                .random_row_reference("Contact", None, Some(&reference("Account", 2)), &mut rng)
                .expect("scoped candidate exists");
            assert_eq!(picked.id, 2);
        }
    }

    #[test]
    fn nickname_filters_to_its_rows() {
        let mut history = RowHistory::new();
        history.save_row("Contact", Some("vip"), 1, Vec::new());
        history.save_row("Contact", None, 2, Vec::new());
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..8 {
            let picked = history
                .random_row_reference("vip", None, None, &mut rng)
                .expect("nicknamed row exists");
            assert_eq!(picked.id, 1);
            assert_eq!(picked.tablename, "Contact");
        }
    }

    // NodeIds are minted by building a model node.
    fn sample_node_id() -> NodeId {
        use tablesmith_model::{ScalarLiteral, SimpleValue, SourceLocation};
        SimpleValue::new(ScalarLiteral::Null, SourceLocation::new("test.yml", 1)).node_id()
    }
}
