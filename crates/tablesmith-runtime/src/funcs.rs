use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use rand::Rng;

use tablesmith_model::{FieldExpr, StructuredValue};

use crate::engine::EvalContext;
use crate::errors::GenerateError;
use crate::value::Value;

/// Evaluated arguments passed to an eager function.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// A parameter that may be passed positionally or by name.
    pub fn named_or_positional(&self, name: &str, index: usize) -> Option<&Value> {
        self.kwarg(name).or_else(|| self.positional(index))
    }

    pub fn exactly_one(&self, function: &str) -> Result<&Value, GenerateError> {
        if self.args.len() == 1 && self.kwargs.is_empty() {
            Ok(&self.args[0])
        } else {
            Err(GenerateError::value(
                format!("'{function}' takes exactly one argument"),
                None,
            ))
        }
    }
}

/// Unevaluated arguments passed to a lazy function; the callee decides
/// whether and when to evaluate them.
#[derive(Debug, Clone, Copy)]
pub struct LazyArgs<'r> {
    pub args: &'r [FieldExpr],
    pub kwargs: &'r [(String, FieldExpr)],
}

pub type EagerFn = for<'a, 'r> fn(&mut EvalContext<'a, 'r>, CallArgs) -> Result<Value, GenerateError>;
pub type LazyFn =
    for<'a, 'r> fn(&mut EvalContext<'a, 'r>, LazyArgs<'r>) -> Result<Value, GenerateError>;

/// A registered function: eager callables receive evaluated values, lazy
/// callables receive expression thunks (required for control flow, so
/// unchosen branches are never evaluated).
#[derive(Debug, Clone, Copy)]
pub enum Callable {
    Eager(EagerFn),
    Lazy(LazyFn),
}

/// Registry of functions addressable from recipes, by plain name or by
/// `Namespace.method` dotted name.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    plain: BTreeMap<String, Callable>,
    namespaces: BTreeMap<String, BTreeMap<String, Callable>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("reference", Callable::Eager(builtin_reference));
        registry.register("random_reference", Callable::Eager(builtin_random_reference));
        registry.register("random_number", Callable::Eager(builtin_random_number));
        registry.register("range", Callable::Eager(builtin_range));
        registry.register("date", Callable::Eager(builtin_date));
        registry.register("date_between", Callable::Eager(builtin_date_between));
        registry.register("random_choice", Callable::Lazy(builtin_random_choice));
        registry.register("choice", Callable::Lazy(builtin_choice));
        registry.register("if", Callable::Lazy(builtin_if));
        registry
    }

    /// Register under a plain or dotted name.
    pub fn register(&mut self, name: &str, callable: Callable) {
        match name.split_once('.') {
            Some((namespace, method)) => {
                self.namespaces
                    .entry(namespace.to_string())
                    .or_default()
                    .insert(method.to_string(), callable);
            }
            None => {
                self.plain.insert(name.to_string(), callable);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Callable> {
        match name.split_once('.') {
            Some((namespace, method)) => self
                .namespaces
                .get(namespace)?
                .get(method)
                .copied(),
            None => self.plain.get(name).copied(),
        }
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }
}

// --- eager builtins ---

fn builtin_reference(ctx: &mut EvalContext<'_, '_>, args: CallArgs) -> Result<Value, GenerateError> {
    let target = args.exactly_one("reference")?;
    match target {
        Value::Row(_) | Value::Reference(_) => Ok(target.clone()),
        Value::Text(name) => {
            let value = ctx.lookup_name(name).map_err(|e| match e {
                GenerateError::Name { .. } => {
                    GenerateError::name(format!("cannot find an object named '{name}'"), None)
                }
                other => other,
            })?;
            match value {
                Value::Row(_) | Value::Reference(_) => Ok(value),
                other => Err(GenerateError::value(
                    format!("reference to incorrect object type: '{name}' is {}", other.type_name()),
                    None,
                )),
            }
        }
        other => Err(GenerateError::value(
            format!("cannot get a reference to an object of type {}", other.type_name()),
            None,
        )),
    }
}

fn builtin_random_reference(
    ctx: &mut EvalContext<'_, '_>,
    args: CallArgs,
) -> Result<Value, GenerateError> {
    let name = args
        .named_or_positional("to", 0)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GenerateError::value("'random_reference' needs a tablename or nickname", None)
        })?;
    let unique = args.kwarg("unique").map(Value::truthy).unwrap_or(false);
    let scope = args
        .kwarg("scope")
        .and_then(Value::as_str)
        .map(str::to_string);
    ctx.random_row_reference(&name, unique, scope.as_deref())
}

fn builtin_random_number(
    ctx: &mut EvalContext<'_, '_>,
    args: CallArgs,
) -> Result<Value, GenerateError> {
    let min = int_param(&args, "min", 0, "random_number")?;
    let max = int_param(&args, "max", 1, "random_number")?;
    let step = match args.named_or_positional("step", 2) {
        Some(value) => coerce_int(value, "step", "random_number")?,
        None => 1,
    };
    if step < 1 {
        return Err(GenerateError::value(
            "'random_number' step must be at least 1",
            None,
        ));
    }
    if max < min {
        return Err(GenerateError::value(
            format!("'random_number' range is empty: min {min}, max {max}"),
            None,
        ));
    }
    let slots = (max - min) / step + 1;
    let pick = ctx.rng().random_range(0..slots);
    Ok(Value::Int(min + pick * step))
}

fn builtin_range(ctx: &mut EvalContext<'_, '_>, args: CallArgs) -> Result<Value, GenerateError> {
    let _ = ctx;
    let ints: Vec<i64> = args
        .args
        .iter()
        .map(|value| coerce_int(value, "bound", "range"))
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(GenerateError::value(
                "'range' takes one to three integer arguments",
                None,
            ));
        }
    };
    if step == 0 {
        return Err(GenerateError::value("'range' step cannot be zero", None));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current += step;
    }
    Ok(Value::List(items))
}

fn builtin_date(ctx: &mut EvalContext<'_, '_>, args: CallArgs) -> Result<Value, GenerateError> {
    let _ = ctx;
    if let Some(spec) = args.positional(0) {
        return Ok(Value::Date(parse_date(spec)?));
    }
    let year = kwarg_int(&args, "year", "date")?;
    let month = kwarg_int(&args, "month", "date")?;
    let day = kwarg_int(&args, "day", "date")?;
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).ok_or_else(|| {
        GenerateError::value(format!("invalid date: {year}-{month}-{day}"), None)
    })?;
    Ok(Value::Date(date))
}

fn builtin_date_between(
    ctx: &mut EvalContext<'_, '_>,
    args: CallArgs,
) -> Result<Value, GenerateError> {
    let start = args
        .named_or_positional("start_date", 0)
        .ok_or_else(|| GenerateError::value("'date_between' needs start_date", None))?;
    let end = args
        .named_or_positional("end_date", 1)
        .ok_or_else(|| GenerateError::value("'date_between' needs end_date", None))?;
    let start = resolve_date_spec(ctx, start)?;
    let end = resolve_date_spec(ctx, end)?;
    if start > end {
        // empty ranges are swallowed rather than raised
        return Ok(Value::Null);
    }
    let span = (end - start).num_days();
    let offset = ctx.rng().random_range(0..=span);
    Ok(Value::Date(start + Duration::days(offset)))
}

/// A concrete date, an ISO string, or the relative forms `today`,
/// `+Nd`/`-Nd` (days) and `+Ny`/`-Ny` (years).
fn resolve_date_spec(
    ctx: &mut EvalContext<'_, '_>,
    value: &Value,
) -> Result<NaiveDate, GenerateError> {
    if let Some(text) = value.as_str() {
        if text == "today" {
            return Ok(ctx.today());
        }
        if let Some(rest) = text.strip_prefix('+').or_else(|| text.strip_prefix('-')) {
            let negative = text.starts_with('-');
            let (amount, unit) = rest.split_at(rest.len().saturating_sub(1));
            if let Ok(amount) = amount.parse::<i64>() {
                let amount = if negative { -amount } else { amount };
                let today = ctx.today();
                match unit {
                    "d" => return Ok(today + Duration::days(amount)),
                    "y" => {
                        let year = today.year() + amount as i32;
                        return NaiveDate::from_ymd_opt(year, today.month(), today.day())
                            .or_else(|| NaiveDate::from_ymd_opt(year, today.month(), 28))
                            .ok_or_else(|| {
                                GenerateError::value(format!("invalid relative date '{text}'"), None)
                            });
                    }
                    _ => {}
                }
            }
        }
    }
    parse_date(value)
}

// --- lazy builtins ---

fn builtin_random_choice<'a, 'r>(
    ctx: &mut EvalContext<'a, 'r>,
    args: LazyArgs<'r>,
) -> Result<Value, GenerateError> {
    let use_args = !args.args.is_empty();
    let use_kwargs = !args.kwargs.is_empty();
    if !use_args && !use_kwargs {
        return Err(GenerateError::value("no choices supplied", None));
    }
    if use_args && use_kwargs {
        return Err(GenerateError::value(
            "both choices and probabilities supplied",
            None,
        ));
    }

    if use_kwargs {
        // pick: weight pairs; the pick is the name itself
        let mut weighted = Vec::new();
        for (pick, weight_expr) in args.kwargs {
            let weight_value = ctx.evaluate(weight_expr)?;
            weighted.push((parse_weight(&weight_value)?, pick.clone()));
        }
        let pick = weighted_pick(ctx, &weighted)?.clone();
        return Ok(Value::Text(pick));
    }

    if let Some(first) = args.args.first() {
        if as_choice(first).is_some() {
            let mut weighted = Vec::new();
            for expr in args.args {
                let choice = as_choice(expr).ok_or_else(|| {
                    GenerateError::syntax(
                        "weighted choices must all be `choice` blocks",
                        Some(expr.location()),
                    )
                })?;
                let weight_expr = choice.kwarg("probability").ok_or_else(|| {
                    GenerateError::syntax(
                        "weighted choices need a `probability`",
                        Some(&choice.location),
                    )
                })?;
                let weight_value = ctx.evaluate(weight_expr)?;
                weighted.push((parse_weight(&weight_value)?, choice_pick(choice)?));
            }
            let pick = *weighted_pick(ctx, &weighted)?;
            return ctx.evaluate(pick);
        }
    }

    let index = ctx.rng().random_range(0..args.args.len());
    ctx.evaluate(&args.args[index])
}

fn builtin_choice<'a, 'r>(
    _ctx: &mut EvalContext<'a, 'r>,
    _args: LazyArgs<'r>,
) -> Result<Value, GenerateError> {
    Err(GenerateError::syntax(
        "`choice` is only valid inside `random_choice` or `if`",
        None,
    ))
}

fn builtin_if<'a, 'r>(
    ctx: &mut EvalContext<'a, 'r>,
    args: LazyArgs<'r>,
) -> Result<Value, GenerateError> {
    if args.args.is_empty() {
        return Err(GenerateError::value("no choices supplied", None));
    }
    let choices: Vec<&StructuredValue> = args
        .args
        .iter()
        .map(|expr| {
            as_choice(expr).ok_or_else(|| {
                GenerateError::syntax("`if` expects `choice` blocks", Some(expr.location()))
            })
        })
        .collect::<Result<_, _>>()?;

    let last = choices.len() - 1;
    for (index, &choice) in choices.iter().enumerate() {
        let when = choice.kwarg("when");
        if when.is_none() && index < last {
            return Err(GenerateError::syntax(
                "every choice except the last one should have a when-clause",
                Some(&choice.location),
            ));
        }
        if let Some(when) = when {
            let condition = ctx.evaluate(when)?;
            if condition.truthy() {
                return ctx.evaluate(choice_pick(choice)?);
            }
        }
    }
    // no when-clause fired: the last choice is the default
    ctx.evaluate(choice_pick(choices[last])?)
}

// --- helpers ---

fn as_choice(expr: &FieldExpr) -> Option<&StructuredValue> {
    match expr {
        FieldExpr::Structured(value) if value.function_name == "choice" => Some(value),
        _ => None,
    }
}

fn choice_pick(choice: &StructuredValue) -> Result<&FieldExpr, GenerateError> {
    choice
        .kwarg("pick")
        .or_else(|| choice.args.first())
        .ok_or_else(|| {
            GenerateError::syntax("`choice` needs a `pick` value", Some(&choice.location))
        })
}

/// Weights are numbers or percent strings like `60%`; they only need to be
/// proportional, not sum to anything.
fn parse_weight(value: &Value) -> Result<f64, GenerateError> {
    if let Some(number) = value.as_f64() {
        return Ok(number);
    }
    if let Some(text) = value.as_str() {
        if let Ok(number) = text.trim_end_matches('%').parse::<f64>() {
            return Ok(number);
        }
    }
    Err(GenerateError::value(
        format!("cannot interpret {} as a probability", value.type_name()),
        None,
    ))
}

fn weighted_pick<'c, T>(
    ctx: &mut EvalContext<'_, '_>,
    weighted: &'c [(f64, T)],
) -> Result<&'c T, GenerateError> {
    let total: f64 = weighted.iter().map(|(weight, _)| weight).sum();
    if total <= 0.0 {
        return Err(GenerateError::value("choice weights sum to zero", None));
    }
    let mut remaining = ctx.rng().random_range(0.0..total);
    for (weight, item) in weighted {
        remaining -= weight;
        if remaining <= 0.0 {
            return Ok(item);
        }
    }
    weighted
        .last()
        .map(|(_, item)| item)
        .ok_or_else(|| GenerateError::value("no choices supplied", None))
}

fn int_param(
    args: &CallArgs,
    name: &str,
    index: usize,
    function: &str,
) -> Result<i64, GenerateError> {
    let value = args.named_or_positional(name, index).ok_or_else(|| {
        GenerateError::value(format!("'{function}' needs a '{name}' argument"), None)
    })?;
    coerce_int(value, name, function)
}

fn kwarg_int(args: &CallArgs, name: &str, function: &str) -> Result<i64, GenerateError> {
    let value = args.kwarg(name).ok_or_else(|| {
        GenerateError::value(format!("'{function}' needs a '{name}' argument"), None)
    })?;
    coerce_int(value, name, function)
}

fn coerce_int(value: &Value, name: &str, function: &str) -> Result<i64, GenerateError> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(n) if n.fract() == 0.0 => Ok(*n as i64),
        Value::Text(text) => text.parse::<i64>().map_err(|_| {
            GenerateError::value(
                format!("'{function}' argument '{name}' must be an integer, got '{text}'"),
                None,
            )
        }),
        other => Err(GenerateError::value(
            format!(
                "'{function}' argument '{name}' must be an integer, got {}",
                other.type_name()
            ),
            None,
        )),
    }
}

pub(crate) fn parse_date(value: &Value) -> Result<NaiveDate, GenerateError> {
    match value {
        Value::Date(date) => Ok(*date),
        Value::DateTime(datetime) => Ok(datetime.date()),
        Value::Text(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
            GenerateError::value(format!("cannot parse '{text}' as a date"), None)
        }),
        other => Err(GenerateError::value(
            format!("cannot interpret {} as a date", other.type_name()),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_names_resolve_through_namespaces() {
        let mut registry = FunctionRegistry::new();
        registry.register("Counter.next", Callable::Eager(builtin_range));
        assert!(registry.lookup("Counter.next").is_some());
        assert!(registry.lookup("Counter.missing").is_none());
        assert!(registry.lookup("Counter").is_none());
        assert!(registry.has_namespace("Counter"));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = FunctionRegistry::with_builtins();
        assert!(matches!(registry.lookup("reference"), Some(Callable::Eager(_))));
        assert!(matches!(registry.lookup("if"), Some(Callable::Lazy(_))));
        assert!(matches!(
            registry.lookup("random_choice"),
            Some(Callable::Lazy(_))
        ));
    }

    #[test]
    fn weights_parse_percent_strings() {
        assert_eq!(parse_weight(&Value::Text("60%".to_string())).unwrap(), 60.0);
        assert_eq!(parse_weight(&Value::Int(3)).unwrap(), 3.0);
        assert!(parse_weight(&Value::Null).is_err());
    }
}
