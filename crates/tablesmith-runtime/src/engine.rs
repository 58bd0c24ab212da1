use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tablesmith_model::{
    Dependency, FieldExpr, NodeId, ObjectTemplate, RecipeSummary, ScalarLiteral, SimpleValue,
    Statement, StructuredValue, INTERNAL_PREFIX,
};

use crate::errors::GenerateError;
use crate::funcs::{CallArgs, Callable, FunctionRegistry, LazyArgs};
use crate::globals::{Binding, Globals, IdManager};
use crate::history::RowHistory;
use crate::output::OutputSink;
use crate::rows::{FieldSlot, ObjectRow, RowArena};
use crate::scope::ScopeStack;
use crate::snapshot::{ContinuationState, SNAPSHOT_VERSION};
use crate::template::{self, Expr, TemplateCache};
use crate::value::{coerce_numeric_text, ObjectReference, RowHandle, Value};

/// When has the recipe been iterated over enough times?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppingCriteria {
    pub tablename: String,
    pub count: u64,
}

impl StoppingCriteria {
    pub fn new(tablename: impl Into<String>, count: u64) -> Self {
        Self {
            tablename: tablename.into(),
            count,
        }
    }
}

/// Checks whether the stopping criteria have been met, and that each pass
/// actually moves toward them.
#[derive(Debug)]
struct FinishedChecker {
    start_ids: BTreeMap<String, u64>,
    stopping_criteria: Option<StoppingCriteria>,
    target_progress_id: u64,
}

impl FinishedChecker {
    fn new(start_ids: BTreeMap<String, u64>, stopping_criteria: Option<StoppingCriteria>) -> Self {
        Self {
            start_ids,
            stopping_criteria,
            target_progress_id: 0,
        }
    }

    fn check_if_finished(&mut self, ids: &IdManager) -> Result<bool, GenerateError> {
        // if nobody told us how much to make, finish after the first pass
        let Some(criteria) = &self.stopping_criteria else {
            return Ok(true);
        };
        let start = self
            .start_ids
            .get(&criteria.tablename)
            .copied()
            .unwrap_or(1);
        let target_id = start + criteria.count - 1;
        let last_used = ids.last_used(&criteria.tablename);

        if last_used == self.target_progress_id {
            return Err(GenerateError::NoProgress {
                message: format!(
                    "'{}' max id was {} before evaluating the recipe and is {} after; \
                     at this rate the target of {} will never be reached",
                    criteria.tablename, self.target_progress_id, last_used, target_id
                ),
            });
        }
        self.target_progress_id = last_used;

        Ok(last_used >= target_id)
    }
}

/// Summary of one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub passes: u64,
    pub rows_written: BTreeMap<String, u64>,
    pub duration_ms: u64,
}

/// Options for building an interpreter.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Repeat passes until this table reaches this many new rows; absent
    /// means run exactly one pass.
    pub stopping_criteria: Option<StoppingCriteria>,
    /// Seed for deterministic sampling.
    pub seed: Option<u64>,
    /// Fixed value for the `today` pseudo-variable; defaults to the local
    /// date and is persisted across continuations.
    pub today: Option<NaiveDate>,
    /// Recipe options visible to expressions by name.
    pub recipe_options: BTreeMap<String, Value>,
}

/// The recipe execution runtime: walks statements, drives field evaluation,
/// and owns all mutable run state (identity, scopes, arena, history).
#[derive(Debug)]
pub struct Interpreter<'r> {
    statements: &'r [Statement],
    summary: RecipeSummary,
    registry: FunctionRegistry,
    recipe_options: BTreeMap<String, Value>,
    globals: Globals,
    arena: RowArena,
    history: RowHistory,
    scopes: ScopeStack<'r>,
    templates: TemplateCache,
    rng: ChaCha8Rng,
    checker: FinishedChecker,
    continuing: bool,
    eval_stack: Vec<String>,
    current_node: Option<NodeId>,
    rows_written: BTreeMap<String, u64>,
}

impl<'r> Interpreter<'r> {
    pub fn new(statements: &'r [Statement], options: ExecuteOptions) -> Result<Self, GenerateError> {
        let ExecuteOptions {
            stopping_criteria,
            seed,
            today,
            recipe_options,
        } = options;
        let summary = Self::checked_summary(statements, stopping_criteria.as_ref())?;
        let today = today.unwrap_or_else(|| Local::now().date_naive());
        let globals = Globals::new(today, collect_name_slots(statements));
        Ok(Self {
            statements,
            summary,
            registry: FunctionRegistry::with_builtins(),
            recipe_options,
            globals,
            arena: RowArena::new(),
            history: RowHistory::new(),
            scopes: ScopeStack::new(),
            templates: TemplateCache::new(),
            rng: ChaCha8Rng::seed_from_u64(seed.unwrap_or_else(rand::random)),
            checker: FinishedChecker::new(BTreeMap::new(), stopping_criteria),
            continuing: false,
            eval_stack: Vec::new(),
            current_node: None,
            rows_written: BTreeMap::new(),
        })
    }

    /// Rehydrate a continuation snapshot: ids continue from the persisted
    /// high-water marks, nickname bindings stay resolvable, and `just_once`
    /// templates are skipped.
    pub fn resume(
        statements: &'r [Statement],
        options: ExecuteOptions,
        state: ContinuationState,
    ) -> Result<Self, GenerateError> {
        let ExecuteOptions {
            stopping_criteria,
            seed,
            today: _,
            recipe_options,
        } = options;
        let summary = Self::checked_summary(statements, stopping_criteria.as_ref())?;
        let start_ids = state.resume_start_ids();

        // recipes may declare slots the snapshot has never seen
        let mut name_slots = collect_name_slots(statements);
        name_slots.extend(state.nicknames_and_tables);

        let globals = Globals::rehydrate(
            state.today,
            IdManager::from_last_used(state.last_used_ids),
            name_slots,
            state.nicknamed_objects,
            state.table_bindings,
            state.intertable_dependencies.into_iter().collect(),
        );
        let mut scopes = ScopeStack::new();
        scopes.set_root_plugin_state(state.plugin_state);

        Ok(Self {
            statements,
            summary,
            registry: FunctionRegistry::with_builtins(),
            recipe_options,
            globals,
            arena: RowArena::new(),
            history: RowHistory::new(),
            scopes,
            templates: TemplateCache::new(),
            rng: ChaCha8Rng::seed_from_u64(seed.unwrap_or_else(rand::random)),
            checker: FinishedChecker::new(start_ids, stopping_criteria),
            continuing: true,
            eval_stack: Vec::new(),
            current_node: None,
            rows_written: BTreeMap::new(),
        })
    }

    fn checked_summary(
        statements: &[Statement],
        stopping_criteria: Option<&StoppingCriteria>,
    ) -> Result<RecipeSummary, GenerateError> {
        let summary = RecipeSummary::from_statements(statements);
        if let Some(criteria) = stopping_criteria {
            if !summary.contains_table(&criteria.tablename) {
                return Err(GenerateError::name(
                    format!("no template creates '{}'", criteria.tablename),
                    None,
                ));
            }
        }
        Ok(summary)
    }

    /// Run passes until the stopping criteria are satisfied (or once,
    /// without criteria), writing every finished row to `sink`.
    pub fn execute(&mut self, sink: &mut dyn OutputSink) -> Result<RunReport, GenerateError> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        self.rows_written.clear();
        let mut passes = 0_u64;

        info!(
            run_id = %run_id,
            statements = self.statements.len(),
            continuing = self.continuing,
            "generation started"
        );
        sink.declare_tables(&self.summary)?;

        loop {
            passes += 1;
            let continuing = self.continuing;
            {
                let statements = self.statements;
                let mut cx = EvalContext {
                    interp: &mut *self,
                    sink: &mut *sink,
                };
                cx.execute_statements(statements, continuing)?;
            }
            // every forward reference must be satisfied by end of pass
            self.globals.check_slots_filled()?;
            let finished = self.checker.check_if_finished(&self.globals.id_manager)?;
            self.continuing = true;
            debug!(pass = passes, finished, "pass completed");
            if finished {
                break;
            }
        }

        let report = RunReport {
            run_id: run_id.clone(),
            passes,
            rows_written: self.rows_written.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            run_id = %run_id,
            passes,
            tables = report.rows_written.len(),
            duration_ms = report.duration_ms,
            "generation completed"
        );
        Ok(report)
    }

    /// Capture the identity state for a later invocation to continue from.
    pub fn snapshot(&self) -> ContinuationState {
        ContinuationState {
            version: SNAPSHOT_VERSION.to_string(),
            today: self.globals.today,
            last_used_ids: self.globals.id_manager.last_used_ids().clone(),
            start_ids: self.checker.start_ids.clone(),
            nicknames_and_tables: self.globals.nicknames_and_tables().clone(),
            nicknamed_objects: self
                .globals
                .nickname_bindings()
                .iter()
                .map(|(name, binding)| {
                    (name.clone(), self.globals.binding_reference(binding, &self.arena))
                })
                .collect(),
            table_bindings: self
                .globals
                .table_bindings()
                .iter()
                .map(|(name, binding)| {
                    (name.clone(), self.globals.binding_reference(binding, &self.arena))
                })
                .collect(),
            intertable_dependencies: self.globals.dependencies().iter().cloned().collect(),
            plugin_state: self.scopes.root_plugin_state().clone(),
        }
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn summary(&self) -> &RecipeSummary {
        &self.summary
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.globals.dependencies().iter()
    }

    /// Add or replace a function, e.g. a plugin's `Namespace.method`.
    pub fn register_function(&mut self, name: &str, callable: Callable) {
        self.registry.register(name, callable);
    }
}

/// Every nickname points at its tablename; tablenames are nicknames for
/// themselves too, because you can refer to them.
fn collect_name_slots(statements: &[Statement]) -> BTreeMap<String, String> {
    fn visit(statements: &[Statement], slots: &mut BTreeMap<String, String>) {
        for statement in statements {
            if let Statement::Template(template) = statement {
                visit_template(template, slots);
            }
        }
    }
    fn visit_template(template: &ObjectTemplate, slots: &mut BTreeMap<String, String>) {
        if let Some(nickname) = &template.nickname {
            slots.insert(nickname.clone(), template.tablename.clone());
        }
        slots.insert(template.tablename.clone(), template.tablename.clone());
        for field in &template.fields {
            if let FieldExpr::Nested(nested) = &field.definition {
                visit_template(nested, slots);
            }
        }
        visit(&template.friends, slots);
    }
    let mut slots = BTreeMap::new();
    visit(statements, &mut slots);
    slots
}

/// Evaluation context handed to functions: the interpreter state plus the
/// output sink (nested templates write rows mid-evaluation).
pub struct EvalContext<'a, 'r> {
    interp: &'a mut Interpreter<'r>,
    sink: &'a mut dyn OutputSink,
}

impl<'a, 'r> EvalContext<'a, 'r> {
    // --- statement execution ---

    fn execute_statements(
        &mut self,
        statements: &'r [Statement],
        continuing: bool,
    ) -> Result<(), GenerateError> {
        for statement in statements {
            match statement {
                Statement::Variable(variable) => {
                    let value = self
                        .evaluate(&variable.expression)
                        .map_err(|e| e.with_location(&variable.location))?;
                    self.interp.scopes.set_var(&variable.varname, value);
                }
                Statement::Template(template) => {
                    let should_skip = template.just_once && continuing;
                    if !should_skip {
                        self.generate_rows(template)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn generate_rows(
        &mut self,
        template: &'r ObjectTemplate,
    ) -> Result<Option<RowHandle>, GenerateError> {
        self.interp.scopes.push(Some(template));
        let result = self.generate_rows_inner(template);
        self.interp.scopes.pop();
        result.map_err(|e| e.with_location(&template.location))
    }

    fn generate_rows_inner(
        &mut self,
        template: &'r ObjectTemplate,
    ) -> Result<Option<RowHandle>, GenerateError> {
        let mut last = None;
        if let Some(for_each) = &template.for_each {
            let value = self
                .evaluate(&for_each.expression)
                .map_err(|e| e.with_location(&for_each.location))?;
            let Value::List(items) = value else {
                return Err(GenerateError::value(
                    format!(
                        "`for_each` value must be a list for `{}`, got {}",
                        for_each.varname,
                        value.type_name()
                    ),
                    Some(&for_each.location),
                ));
            };
            for (index, item) in items.into_iter().enumerate() {
                self.interp.scopes.set_var(&for_each.varname, item);
                self.interp
                    .scopes
                    .set_var("child_index", Value::Int(index as i64));
                last = Some(self.generate_row(template, index as u64)?);
            }
        } else {
            let count = self.evaluate_count(template)?;
            for index in 0..count {
                self.interp
                    .scopes
                    .set_var("child_index", Value::Int(index as i64));
                last = Some(self.generate_row(template, index)?);
            }
        }
        Ok(last)
    }

    fn evaluate_count(&mut self, template: &'r ObjectTemplate) -> Result<u64, GenerateError> {
        let Some(expr) = &template.count_expr else {
            return Ok(1);
        };
        let value = self.evaluate(expr)?;
        let count = match &value {
            Value::Int(n) => Some(*n),
            Value::Float(n) => Some(*n as i64),
            Value::Text(text) => text.parse::<f64>().ok().map(|n| n as i64),
            _ => None,
        };
        match count {
            // a negative count generates nothing rather than failing
            Some(n) => Ok(n.max(0) as u64),
            None => Err(GenerateError::value(
                format!(
                    "cannot evaluate the count for '{}' as a number, got {}",
                    template.name(),
                    value.type_name()
                ),
                Some(expr.location()),
            )),
        }
    }

    fn generate_row(
        &mut self,
        template: &'r ObjectTemplate,
        child_index: u64,
    ) -> Result<RowHandle, GenerateError> {
        // a forward reference may already have promised this row its id
        let id = self
            .interp
            .globals
            .consume_slot_id(template.nickname.as_deref(), &template.tablename)
            .unwrap_or_else(|| self.interp.globals.id_manager.generate_id(&template.tablename));

        let row = ObjectRow::new(
            &template.tablename,
            id,
            child_index,
            template.nickname.clone(),
            template.fields.iter().map(|field| field.name.as_str()),
        );
        let handle = self.interp.arena.alloc(row);
        self.interp.scopes.set_row(handle);
        // registered before fields are evaluated so the template can
        // reference itself via `this`
        self.interp
            .globals
            .register_object(&template.tablename, template.nickname.as_deref(), handle);

        for field in &template.fields {
            self.demand_field(handle, template, &field.name)
                .map_err(|e| e.for_field(&field.name, &field.location))?;
        }

        self.record_dependencies(handle, template);

        let ancestors = self.ancestor_references(handle);
        self.interp.history.save_row(
            &template.tablename,
            template.nickname.as_deref(),
            id,
            ancestors,
        );

        if !template.tablename.starts_with(INTERNAL_PREFIX) {
            let fields = self.emitted_fields(handle);
            self.sink.write_row(&template.tablename, &fields)?;
            *self
                .interp
                .rows_written
                .entry(template.tablename.clone())
                .or_insert(0) += 1;
        }

        // friends fire once per parent iteration, sharing the parent scope
        self.execute_statements(&template.friends, true)?;

        Ok(handle)
    }

    fn record_dependencies(&mut self, handle: RowHandle, template: &ObjectTemplate) {
        let mut edges = Vec::new();
        {
            let row = self.interp.arena.get(handle);
            for (name, value) in row.done_fields() {
                if name.starts_with(INTERNAL_PREFIX) {
                    continue;
                }
                let target = match value {
                    Value::Row(other) => Some(self.interp.arena.get(*other).tablename.clone()),
                    Value::Reference(reference) => Some(reference.tablename.clone()),
                    _ => None,
                };
                if let Some(table_name_to) = target {
                    edges.push(Dependency {
                        table_name_from: template.tablename.clone(),
                        table_name_to,
                        field_name: name.to_string(),
                    });
                }
            }
        }
        for edge in edges {
            self.interp.globals.register_dependency(edge);
        }
    }

    fn ancestor_references(&self, exclude: RowHandle) -> Vec<ObjectReference> {
        self.interp
            .scopes
            .active_rows()
            .into_iter()
            .filter(|handle| *handle != exclude)
            .map(|handle| {
                let row = self.interp.arena.get(handle);
                ObjectReference {
                    tablename: row.tablename.clone(),
                    id: row.id,
                }
            })
            .collect()
    }

    fn emitted_fields(&self, handle: RowHandle) -> Vec<(String, Value)> {
        self.interp
            .arena
            .get(handle)
            .done_fields()
            .filter(|(name, _)| !name.starts_with(INTERNAL_PREFIX))
            .map(|(name, value)| (name.to_string(), self.flatten_value(value)))
            .collect()
    }

    fn flatten_value(&self, value: &Value) -> Value {
        match value {
            Value::Row(handle) => {
                let row = self.interp.arena.get(*handle);
                Value::Reference(ObjectReference {
                    tablename: row.tablename.clone(),
                    id: row.id,
                })
            }
            Value::List(items) => {
                Value::List(items.iter().map(|item| self.flatten_value(item)).collect())
            }
            other => other.clone(),
        }
    }

    // --- field evaluation ---

    /// Fetch a field of a row, computing it on demand. Results are memoized
    /// into the row so the declaration-order sweep (and any further sibling
    /// references) are cache hits: a field is never computed twice.
    fn demand_field(
        &mut self,
        handle: RowHandle,
        template: &'r ObjectTemplate,
        name: &str,
    ) -> Result<Value, GenerateError> {
        match self.interp.arena.get(handle).slot(name) {
            Some(FieldSlot::Done(value)) => return Ok(value.clone()),
            Some(FieldSlot::InProgress) => {
                let mut chain = self.interp.eval_stack.clone();
                chain.push(name.to_string());
                return Err(GenerateError::FieldCycle {
                    chain,
                    location: template.field(name).map(|field| field.location.clone()),
                });
            }
            Some(FieldSlot::Pending) => {}
            None => {
                return Err(GenerateError::name(
                    format!("row of '{}' has no field '{name}'", template.tablename),
                    None,
                ));
            }
        }

        let field = template.field(name).ok_or_else(|| {
            GenerateError::name(
                format!("template '{}' declares no field '{name}'", template.name()),
                None,
            )
        })?;

        self.interp.arena.get_mut(handle).mark_in_progress(name);
        self.interp.eval_stack.push(name.to_string());
        let result = self.evaluate(&field.definition);
        self.interp.eval_stack.pop();
        let value = result?;
        self.interp.arena.get_mut(handle).set_done(name, value.clone());
        Ok(value)
    }

    /// Evaluate any field expression to a value.
    pub fn evaluate(&mut self, expr: &'r FieldExpr) -> Result<Value, GenerateError> {
        match expr {
            FieldExpr::Simple(value) => self.render_simple(value),
            FieldExpr::Structured(value) => self.call_structured(value),
            FieldExpr::Nested(template) => {
                let last = self.generate_rows(template)?;
                Ok(last.map(Value::Row).unwrap_or(Value::Null))
            }
        }
    }

    fn render_simple(&mut self, value: &'r SimpleValue) -> Result<Value, GenerateError> {
        let previous = self.interp.current_node.replace(value.node_id());
        let result = self.render_simple_inner(value);
        self.interp.current_node = previous;
        result.map_err(|e| e.with_location(&value.location))
    }

    fn render_simple_inner(&mut self, value: &'r SimpleValue) -> Result<Value, GenerateError> {
        match &value.definition {
            ScalarLiteral::Text(text) if template::contains_expression(text) => {
                let compiled = self.interp.templates.get_or_compile(text)?;
                self.render_template(&compiled)
            }
            ScalarLiteral::Text(text) => {
                Ok(coerce_numeric_text(text).unwrap_or_else(|| Value::Text(text.clone())))
            }
            other => Ok(Value::from_literal(other)),
        }
    }

    fn render_template(
        &mut self,
        compiled: &template::Template,
    ) -> Result<Value, GenerateError> {
        // a lone expression yields its native value, not text
        if let Some(expr) = compiled.single_expression() {
            return self.eval_ast(expr);
        }
        let mut out = String::new();
        for segment in &compiled.segments {
            match segment {
                template::Segment::Literal(literal) => out.push_str(literal),
                template::Segment::Expr(expr) => {
                    let value = self.eval_ast(expr)?;
                    out.push_str(&self.render_text(&value));
                }
            }
        }
        Ok(coerce_numeric_text(&out).unwrap_or(Value::Text(out)))
    }

    fn call_structured(&mut self, value: &'r StructuredValue) -> Result<Value, GenerateError> {
        let previous = self.interp.current_node.replace(value.node_id());
        let result = self.dispatch_call(value);
        self.interp.current_node = previous;
        result.map_err(|e| e.with_location(&value.location))
    }

    fn dispatch_call(&mut self, value: &'r StructuredValue) -> Result<Value, GenerateError> {
        let callable = self
            .interp
            .registry
            .lookup(&value.function_name)
            .ok_or_else(|| {
                GenerateError::name(
                    format!(
                        "cannot find a function named '{}' to handle the field value",
                        value.function_name
                    ),
                    Some(&value.location),
                )
            })?;
        match callable {
            Callable::Eager(function) => {
                let mut call_args = CallArgs::default();
                for arg in &value.args {
                    call_args.args.push(self.evaluate(arg)?);
                }
                for (name, arg) in &value.kwargs {
                    let rendered = self.evaluate(arg)?;
                    call_args.kwargs.push((name.clone(), rendered));
                }
                function(self, call_args)
            }
            Callable::Lazy(function) => function(
                self,
                LazyArgs {
                    args: &value.args,
                    kwargs: &value.kwargs,
                },
            ),
        }
    }

    // --- expression evaluation ---

    fn eval_ast(&mut self, expr: &Expr) -> Result<Value, GenerateError> {
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(n) => Ok(Value::Float(*n)),
            Expr::Str(text) => Ok(Value::Text(text.clone())),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Ident(name) => self.lookup_name(name),
            Expr::Attr(base, attr) => {
                let value = self.eval_ast(base)?;
                self.attr_value(&value, attr)
            }
            Expr::Call { name, args, kwargs } => self.call_expr_function(name, args, kwargs),
            Expr::Neg(inner) => {
                let value = self.eval_ast(inner)?;
                template::negate(&value)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval_ast(left)?;
                let right = self.eval_ast(right)?;
                template::binary_op(*op, &left, &right)
            }
        }
    }

    /// Resolve a bare name: the row's own fields first (triggering lazy
    /// sibling evaluation), then scope variables, then nickname/tablename
    /// bindings and forward slots, then recipe options, then builtins.
    pub fn lookup_name(&mut self, name: &str) -> Result<Value, GenerateError> {
        if let Some((template, handle)) = self.interp.scopes.current_row_frame() {
            if self.interp.arena.get(handle).has_field(name) || template.field(name).is_some() {
                return self.demand_field(handle, template, name);
            }
        }
        if let Some(value) = self.interp.scopes.lookup_var(name) {
            return Ok(value.clone());
        }
        if let Some(binding) = self.interp.globals.resolve_name(name) {
            return Ok(match binding {
                Binding::Row(handle) => Value::Row(handle),
                Binding::Reference(reference) => Value::Reference(reference),
            });
        }
        if let Some(value) = self.interp.recipe_options.get(name) {
            return Ok(value.clone());
        }
        match name {
            "id" | "count" => Ok(self
                .interp
                .scopes
                .current_row()
                .map(|handle| Value::Int(self.interp.arena.get(handle).id as i64))
                .unwrap_or(Value::Null)),
            "child_index" => Ok(self
                .interp
                .scopes
                .current_row()
                .map(|handle| Value::Int(self.interp.arena.get(handle).child_index as i64))
                .unwrap_or(Value::Null)),
            "this" => Ok(self
                .interp
                .scopes
                .current_row()
                .map(Value::Row)
                .unwrap_or(Value::Null)),
            "today" => Ok(Value::Date(self.interp.globals.today)),
            "now" => Ok(Value::DateTime(Local::now().naive_local())),
            _ => Err(GenerateError::name(format!("unknown name '{name}'"), None)),
        }
    }

    fn attr_value(&mut self, value: &Value, attr: &str) -> Result<Value, GenerateError> {
        match value {
            Value::Row(handle) => self.row_attr(*handle, attr),
            Value::Reference(reference) => {
                if attr == "id" {
                    Ok(Value::Int(reference.id as i64))
                } else {
                    Err(GenerateError::name(
                        format!(
                            "only 'id' is available on a '{}' reference, not '{attr}'",
                            reference.tablename
                        ),
                        None,
                    ))
                }
            }
            other => Err(GenerateError::name(
                format!("cannot read attribute '{attr}' of {}", other.type_name()),
                None,
            )),
        }
    }

    fn row_attr(&mut self, handle: RowHandle, attr: &str) -> Result<Value, GenerateError> {
        // a row still being built gets lazy sibling semantics
        let building = self
            .interp
            .scopes
            .current_row_frame()
            .filter(|(_, active)| *active == handle);
        if let Some((template, _)) = building {
            if self.interp.arena.get(handle).has_field(attr) || template.field(attr).is_some() {
                return self.demand_field(handle, template, attr);
            }
        }
        let row = self.interp.arena.get(handle);
        match row.slot(attr) {
            Some(FieldSlot::Done(value)) => Ok(value.clone()),
            Some(_) => Err(GenerateError::value(
                format!(
                    "field '{attr}' of {}({}) is not yet available",
                    row.tablename, row.id
                ),
                None,
            )),
            None if attr == "child_index" => Ok(Value::Int(row.child_index as i64)),
            None => Err(GenerateError::name(
                format!("no field '{attr}' on a '{}' row", row.tablename),
                None,
            )),
        }
    }

    fn call_expr_function(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, GenerateError> {
        let callable = self.interp.registry.lookup(name).ok_or_else(|| {
            GenerateError::name(format!("unknown function '{name}'"), None)
        })?;
        match callable {
            Callable::Eager(function) => {
                let mut call_args = CallArgs::default();
                for arg in args {
                    call_args.args.push(self.eval_ast(arg)?);
                }
                for (key, arg) in kwargs {
                    let rendered = self.eval_ast(arg)?;
                    call_args.kwargs.push((key.clone(), rendered));
                }
                function(self, call_args)
            }
            Callable::Lazy(_) => Err(GenerateError::value(
                format!("lazy function '{name}' cannot be called inside an expression"),
                None,
            )),
        }
    }

    // --- services for functions ---

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.interp.rng
    }

    pub fn today(&self) -> NaiveDate {
        self.interp.globals.today
    }

    /// Per-plugin persistent state, keyed by plugin identity and captured
    /// into continuation snapshots.
    pub fn plugin_state_mut(&mut self, namespace: &str) -> &mut serde_json::Value {
        self.interp.scopes.plugin_state_mut(namespace)
    }

    /// Sample among the rows created so far under a nickname or tablename,
    /// optionally never repeating a row for this call site (`unique`) and
    /// optionally restricted to rows created under the current instance of
    /// an enclosing template (`scope`).
    pub fn random_row_reference(
        &mut self,
        name: &str,
        unique: bool,
        scope: Option<&str>,
    ) -> Result<Value, GenerateError> {
        let site = if unique {
            Some(self.interp.current_node.ok_or_else(|| {
                GenerateError::value(
                    "a unique random_reference needs a field context",
                    None,
                )
            })?)
        } else {
            None
        };
        let ancestor = match scope {
            Some(tablename) => {
                let handle = self
                    .interp
                    .scopes
                    .active_rows()
                    .into_iter()
                    .rev()
                    .find(|handle| self.interp.arena.get(*handle).tablename == tablename)
                    .ok_or_else(|| {
                        GenerateError::value(
                            format!(
                                "no enclosing '{tablename}' instance is active for a scoped \
                                 random_reference"
                            ),
                            None,
                        )
                    })?;
                let row = self.interp.arena.get(handle);
                Some(ObjectReference {
                    tablename: row.tablename.clone(),
                    id: row.id,
                })
            }
            None => None,
        };
        let reference = self.interp.history.random_row_reference(
            name,
            site,
            ancestor.as_ref(),
            &mut self.interp.rng,
        )?;
        Ok(Value::Reference(reference))
    }

    /// Stringify a value the way templates interpolate it; rows and
    /// references render as their id.
    pub fn render_text(&self, value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::Text(value) => value.clone(),
            Value::Date(value) => value.format("%Y-%m-%d").to_string(),
            Value::DateTime(value) => value.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Value::List(items) => {
                let rendered: Vec<String> =
                    items.iter().map(|item| self.render_text(item)).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Row(handle) => self.interp.arena.get(*handle).id.to_string(),
            Value::Reference(reference) => reference.id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_checker_requires_progress() {
        let mut ids = IdManager::new();
        let mut checker = FinishedChecker::new(
            BTreeMap::new(),
            Some(StoppingCriteria::new("Account", 3)),
        );
        ids.generate_id("Account");
        assert!(!checker.check_if_finished(&ids).unwrap());
        ids.generate_id("Account");
        assert!(!checker.check_if_finished(&ids).unwrap());
        // no new ids since the last check: we are stuck
        assert!(matches!(
            checker.check_if_finished(&ids),
            Err(GenerateError::NoProgress { .. })
        ));
    }

    #[test]
    fn finished_checker_without_criteria_finishes_immediately() {
        let ids = IdManager::new();
        let mut checker = FinishedChecker::new(BTreeMap::new(), None);
        assert!(checker.check_if_finished(&ids).unwrap());
    }

    #[test]
    fn name_slots_cover_friends_and_nested_templates() {
        use tablesmith_model::{FieldFactory, SourceLocation};

        let loc = SourceLocation::new("r.yml", 1);
        let nested = ObjectTemplate::new(
            "Address",
            Some("hq".to_string()),
            None,
            None,
            false,
            Vec::new(),
            Vec::new(),
            loc.clone(),
        )
        .unwrap();
        let friend = ObjectTemplate::new(
            "Contact",
            None,
            None,
            None,
            false,
            Vec::new(),
            Vec::new(),
            loc.clone(),
        )
        .unwrap();
        let top = ObjectTemplate::new(
            "Account",
            Some("acme".to_string()),
            None,
            None,
            false,
            vec![FieldFactory::new(
                "address",
                FieldExpr::Nested(Box::new(nested)),
                loc.clone(),
            )],
            vec![Statement::Template(friend)],
            loc,
        )
        .unwrap();

        let slots = collect_name_slots(&[Statement::Template(top)]);
        for name in ["Account", "acme", "Address", "hq", "Contact"] {
            assert!(slots.contains_key(name), "missing slot for {name}");
        }
    }
}
