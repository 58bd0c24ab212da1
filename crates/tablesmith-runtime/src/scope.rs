use std::collections::BTreeMap;

use tablesmith_model::ObjectTemplate;

use crate::value::{RowHandle, Value};

/// One frame of the execution scope stack, pushed when entering a template
/// and popped on exit. Variable lookup walks frames nearest-enclosing first.
#[derive(Debug)]
pub struct Frame<'r> {
    vars: BTreeMap<String, Value>,
    pub template: Option<&'r ObjectTemplate>,
    pub row: Option<RowHandle>,
    plugin_state: BTreeMap<String, serde_json::Value>,
}

impl<'r> Frame<'r> {
    fn new(template: Option<&'r ObjectTemplate>) -> Self {
        Self {
            vars: BTreeMap::new(),
            template,
            row: None,
            plugin_state: BTreeMap::new(),
        }
    }
}

/// Explicit stack of `Frame`s; the root frame exists for the whole run and
/// holds top-level variables and persistent plugin state.
#[derive(Debug)]
pub struct ScopeStack<'r> {
    frames: Vec<Frame<'r>>,
}

impl<'r> Default for ScopeStack<'r> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> ScopeStack<'r> {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(None)],
        }
    }

    pub fn push(&mut self, template: Option<&'r ObjectTemplate>) {
        self.frames.push(Frame::new(template));
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the root frame");
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind a variable in the current frame, visible to subsequent
    /// statements in this scope and to descendants, not to statements
    /// already processed.
    pub fn set_var(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(name.to_string(), value);
        }
    }

    pub fn lookup_var(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.vars.get(name))
    }

    /// Mark the row currently being built in the innermost template frame.
    pub fn set_row(&mut self, handle: RowHandle) {
        if let Some(frame) = self.frames.last_mut() {
            frame.row = Some(handle);
        }
    }

    /// The innermost row under construction together with its template.
    pub fn current_row_frame(&self) -> Option<(&'r ObjectTemplate, RowHandle)> {
        self.frames.iter().rev().find_map(|frame| {
            match (frame.template, frame.row) {
                (Some(template), Some(row)) => Some((template, row)),
                _ => None,
            }
        })
    }

    pub fn current_row(&self) -> Option<RowHandle> {
        self.current_row_frame().map(|(_, handle)| handle)
    }

    /// Rows of every enclosing frame, outermost first.
    pub fn active_rows(&self) -> Vec<RowHandle> {
        self.frames.iter().filter_map(|frame| frame.row).collect()
    }

    /// Mutable per-plugin state slot, keyed by plugin identity. Existing
    /// slots are found wherever they live on the stack; new slots are
    /// created on the root frame so they persist for the whole run.
    pub fn plugin_state_mut(&mut self, namespace: &str) -> &mut serde_json::Value {
        let index = self
            .frames
            .iter()
            .rposition(|frame| frame.plugin_state.contains_key(namespace))
            .unwrap_or(0);
        self.frames[index]
            .plugin_state
            .entry(namespace.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()))
    }

    pub fn root_plugin_state(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.frames[0].plugin_state
    }

    pub fn set_root_plugin_state(&mut self, state: BTreeMap<String, serde_json::Value>) {
        self.frames[0].plugin_state = state;
    }
}
