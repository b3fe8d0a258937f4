//! The parser state machine (§4.3): consumes an argument vector against a
//! [`Registry`], dispatching per option kind, and the requirement checks
//! that follow a successful parse (§4.4).

use crate::host::{ByteStreamReader, EnvReader};
use crate::message::{Message, TerminalString};
use crate::model::{Case, ValueKind};
use crate::registry::Registry;
use crate::schema::{Choices, FunctionContext, OptionKind, VersionSource};
use crate::value::{OptionId, Value, Values};
use std::collections::HashSet;
use thiserror::Error;

#[cfg(feature = "tracing_debug")]
use tracing::debug;

/// Hard parse errors (§7, items 2-10; schema errors are reported earlier by
/// [`crate::registry::Registry::register`]).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unknown option '{0}'{}", suggestion_suffix(.1))]
    UnknownName(String, Vec<String>),
    #[error("Option {0} expects a parameter")]
    MissingParam(String),
    #[error("Option {0} does not accept an inline value")]
    NoInlineAllowed(String),
    #[error("Invalid parameter to {0}: {1}. {2}")]
    InvalidParam(String, String, String),
    #[error("Option {0} has too many values ({1}). Should have at most {2}.")]
    TooManyValues(String, usize, usize),
    #[error("Option {0} is required.")]
    RequiredAbsent(String),
    #[error("Option {0} requires {1}.")]
    RequiresUnsatisfied(String, String),
    #[error("Could not resolve version: {0}")]
    VersionResolveError(String),
    #[error("Option {0}'s letter must be last in a cluster to accept parameters")]
    ClusterPositionError(String),
    #[error("{0}")]
    Callback(String),
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Did you mean: {}?", suggestions.join(", "))
    }
}

/// Renders a parse error as a terminal string, so every error kind is
/// carried through the same wrap/ANSI machinery as help and warning text
/// rather than bypassed via `thiserror`'s bare `Display` (§7, §4.5).
impl From<ParseError> for Message {
    fn from(err: ParseError) -> Message {
        let mut ts = TerminalString::new();
        ts.split(&err.to_string(), None);
        Message::Error(ts)
    }
}

/// What a parse produces: a populated values record with deprecation
/// warnings, or one of the flow-control outcomes (§4.3, §7).
pub enum ParseOutcome {
    Values(Values, Vec<String>),
    Help(String),
    Version(String),
    Completion(Vec<String>),
}

pub struct ParseOptions<'a> {
    pub short_cluster: bool,
    pub env: &'a dyn EnvReader,
    pub byte_reader: &'a dyn ByteStreamReader,
    pub prog: &'a str,
}

struct Ctx<'a> {
    registry: &'a Registry,
    opts: &'a ParseOptions<'a>,
    values: Values,
    warnings: Vec<String>,
    deprecated_seen: HashSet<OptionId>,
    touched: HashSet<OptionId>,
    comp: bool,
}

/// Parse `args` against `registry`. Completion behavior activates when
/// `cursor` is `Some`; in that mode parse errors are swallowed and the
/// function always returns a [`ParseOutcome::Completion`] (§4.3).
pub fn parse(
    registry: &Registry,
    args: &[String],
    cursor: Option<(usize, String)>,
    opts: &ParseOptions,
) -> Result<ParseOutcome, ParseError> {
    let mut ctx = Ctx {
        registry,
        opts,
        values: Values::new(),
        warnings: Vec::new(),
        deprecated_seen: HashSet::new(),
        touched: HashSet::new(),
        comp: cursor.is_some(),
    };

    match run(&mut ctx, args, cursor.as_ref()) {
        Ok(Some(outcome)) => return Ok(outcome),
        Ok(None) => {}
        Err(e) => {
            if ctx.comp {
                // completion mode swallows hard errors (§4.3, §7)
            } else {
                return Err(e);
            }
        }
    }

    if ctx.comp {
        let (idx, prefix) = cursor.unwrap_or((args.len(), String::new()));
        let candidates = complete_for_cursor(&ctx, args, idx, &prefix);
        return Ok(ParseOutcome::Completion(candidates));
    }

    materialize_defaults(&mut ctx)?;
    check_requirements(&ctx)?;

    #[cfg(feature = "tracing_debug")]
    debug!("parse complete: {} values, {} warnings", ctx.values.iter().count(), ctx.warnings.len());

    Ok(ParseOutcome::Values(ctx.values, ctx.warnings))
}

fn complete_at_top_level(ctx: &Ctx, prefix: &str) -> Vec<String> {
    ctx.registry
        .all_names()
        .into_iter()
        .filter(|n| n.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

/// Resolves which of the four completion contexts (§4.3) applies at token
/// index `idx`: if the immediately preceding token names an option that
/// still expects a parameter, complete against that option's choices, its
/// boolean truth/falsity names, or its `complete` callback, in that order of
/// precedence; otherwise fall back to prefix-filtered option names.
fn complete_for_cursor(ctx: &Ctx, args: &[String], idx: usize, prefix: &str) -> Vec<String> {
    if idx > 0 {
        if let Some(prev) = args.get(idx - 1) {
            let (head, inline) = split_inline(prev);
            if inline.is_none() {
                if let Some(id) = ctx.registry.lookup_name(head) {
                    let def = ctx.registry.def(id);
                    if !def.is_niladic() && !matches!(def.kind, OptionKind::Command { .. }) {
                        return complete_for_option(ctx, id, prefix);
                    }
                }
            }
        }
    }
    complete_at_top_level(ctx, prefix)
}

/// Completion candidates for the parameter position of a monadic/variadic
/// option, per §4.3's context-specific rules.
fn complete_for_option(ctx: &Ctx, id: OptionId, prefix: &str) -> Vec<String> {
    let def = ctx.registry.def(id);
    if let Some(choices) = &def.choices {
        return choices
            .literals()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect();
    }
    let kind = match &def.kind {
        OptionKind::Single(k) | OptionKind::Array(k) => Some(*k),
        _ => None,
    };
    if matches!(kind, Some(ValueKind::Boolean)) {
        let truth = def.truth_names.clone().unwrap_or_else(|| vec!["true".to_string()]);
        let falsity = def.falsity_names.clone().unwrap_or_else(|| vec!["false".to_string()]);
        return truth
            .into_iter()
            .chain(falsity)
            .filter(|c| c.starts_with(prefix))
            .collect();
    }
    if let Some(complete_fn) = &def.complete {
        return complete_fn(prefix);
    }
    Vec::new()
}

fn split_inline(token: &str) -> (&str, Option<&str>) {
    match token.find('=') {
        Some(i) => (&token[..i], Some(&token[i + 1..])),
        None => (token, None),
    }
}

fn looks_like_name(registry: &Registry, token: &str) -> bool {
    let (head, _) = split_inline(token);
    registry.lookup_name(head).is_some() || registry.lookup_name(token).is_some()
}

fn run(
    ctx: &mut Ctx,
    args: &[String],
    cursor: Option<&(usize, String)>,
) -> Result<Option<ParseOutcome>, ParseError> {
    let mut i = 0usize;
    while i < args.len() {
        if let Some((idx, prefix)) = cursor {
            if *idx == i {
                let candidates = complete_for_cursor(ctx, args, i, prefix);
                return Ok(Some(ParseOutcome::Completion(candidates)));
            }
        }
        let token = &args[i];

        if let Some((marker, owner)) = ctx.registry.positional_marker.clone() {
            if token == &marker {
                let rest = &args[i + 1..];
                consume_positional(ctx, owner, rest)?;
                return Ok(None);
            }
        }

        let (head, inline) = split_inline(token);
        if let Some(id) = ctx.registry.lookup_name(head) {
            let negated = is_negation(ctx.registry, id, head);
            let consumed = dispatch(ctx, id, head, inline, negated, args, i + 1)?;
            if let Some(outcome) = consumed.outcome {
                return Ok(Some(outcome));
            }
            if ctx.registry.def(id).break_after {
                return Ok(None);
            }
            i += 1 + consumed.extra_tokens;
            continue;
        }

        if ctx.opts.short_cluster && head.starts_with('-') && !head.starts_with("--") && head.len() > 2 {
            if let Some(extra) = try_cluster(ctx, head, args, i + 1)? {
                i += 1 + extra;
                continue;
            }
        }

        if let Some(owner) = ctx.registry.bare_positional {
            if !looks_like_name(ctx.registry, token) {
                let consumed = dispatch_bare_positional(ctx, owner, args, i)?;
                if consumed > 0 {
                    i += consumed;
                    continue;
                }
            }
        }

        let suggestions = ctx.registry.similar_names(head, 0.6);
        return Err(ParseError::UnknownName(token.clone(), suggestions));
    }
    Ok(None)
}

/// Name-resolution rule 5 (§4.3): when no registered name, cluster, or
/// positional marker matches `args[i]` but a bare positional option exists,
/// offer the free token(s) starting at `i` to that option directly, reusing
/// the same param-collection and merge logic as a named array/single
/// option's own handler.
fn dispatch_bare_positional(
    ctx: &mut Ctx,
    owner: OptionId,
    args: &[String],
    i: usize,
) -> Result<usize, ParseError> {
    match &ctx.registry.def(owner).kind {
        OptionKind::Single(kind) => {
            let kind = *kind;
            let raw = args[i].clone();
            let value = normalize_and_validate(ctx, owner, "positional", kind, &raw)?;
            ctx.values.set(owner, value);
            ctx.touched.insert(owner);
            Ok(1)
        }
        OptionKind::Array(kind) => {
            let kind = *kind;
            let (raws, extra) = collect_array_params(ctx, owner, "positional", None, args, i)?;
            let mut elements = Vec::new();
            for raw in &raws {
                elements.push(normalize_and_validate(ctx, owner, "positional", kind, raw)?);
            }
            let def = ctx.registry.def(owner);
            let new_values = merge_array(def.unique, kind, &elements);
            let final_value = if def.append && ctx.touched.contains(&owner) {
                append_array(ctx.values.get(owner), &new_values, def.unique)
            } else {
                new_values
            };
            if let Some(limit) = def.limit {
                let len = match &final_value {
                    Value::ArrayStr(v) => v.len(),
                    Value::ArrayNum(v) => v.len(),
                    _ => 0,
                };
                if len > limit {
                    return Err(ParseError::TooManyValues(ctx.registry.preferred_name(owner), len, limit));
                }
            }
            ctx.values.set(owner, final_value);
            ctx.touched.insert(owner);
            Ok(extra)
        }
        _ => Ok(0),
    }
}

fn is_negation(registry: &Registry, id: OptionId, head: &str) -> bool {
    registry.def(id).negation_names.iter().any(|n| n == head)
}

struct Dispatched {
    extra_tokens: usize,
    outcome: Option<ParseOutcome>,
}

fn no_extra() -> Dispatched {
    Dispatched { extra_tokens: 0, outcome: None }
}

fn dispatch(
    ctx: &mut Ctx,
    id: OptionId,
    head: &str,
    inline: Option<&str>,
    negated: bool,
    args: &[String],
    next: usize,
) -> Result<Dispatched, ParseError> {
    let def_is_niladic = ctx.registry.def(id).is_niladic();
    if def_is_niladic && inline.is_some() && !matches!(ctx.registry.def(id).kind, OptionKind::Command { .. }) {
        return Err(ParseError::NoInlineAllowed(ctx.registry.preferred_name(id)));
    }
    mark_deprecated(ctx, id);

    if ctx.registry.def(id).break_after {
        // Finalize defaults before this option's own handler runs, so a
        // break option's callback observes the same values a post-parse
        // consumer would (§4.3).
        materialize_defaults(ctx)?;
    }

    let kind_is_command = matches!(ctx.registry.def(id).kind, OptionKind::Command { .. });
    if kind_is_command {
        let rest = args[next..].to_vec();
        let catalog_thunk = match &ctx.registry.def(id).kind {
            OptionKind::Command { catalog } => catalog.clone(),
            _ => unreachable!(),
        };
        let sub_catalog = catalog_thunk();
        let sub_registry = Registry::register(sub_catalog)
            .map_err(|e| ParseError::Callback(e.to_string()))?;
        let sub_outcome = parse(&sub_registry, &rest, None, ctx.opts)?;
        if let ParseOutcome::Values(sub_values, sub_warnings) = sub_outcome {
            ctx.warnings.extend(sub_warnings);
            ctx.values.set(id, Value::Sub(Box::new(sub_values)));
        }
        return Ok(Dispatched {
            extra_tokens: rest.len(),
            outcome: None,
        });
    }

    match &ctx.registry.def(id).kind {
        OptionKind::Flag => {
            ctx.values.set(id, Value::Bool(!negated));
            Ok(no_extra())
        }
        OptionKind::Help { saved } => {
            let text = crate::printer::render_help(ctx.registry, 0);
            if *saved {
                ctx.values.set(id, Value::Unit);
                Ok(no_extra())
            } else {
                Ok(Dispatched { extra_tokens: 0, outcome: Some(ParseOutcome::Help(text)) })
            }
        }
        OptionKind::Version { source, saved } => {
            let text = resolve_version(source, ctx.opts.byte_reader)?;
            if *saved {
                ctx.values.set(id, Value::Str(text));
                Ok(no_extra())
            } else {
                Ok(Dispatched { extra_tokens: 0, outcome: Some(ParseOutcome::Version(text)) })
            }
        }
        OptionKind::Single(kind) => {
            let (raw, extra) = take_one_param(ctx, id, head, inline, args, next)?;
            let value = normalize_and_validate(ctx, id, head, *kind, &raw)?;
            ctx.values.set(id, value);
            ctx.touched.insert(id);
            Ok(Dispatched { extra_tokens: extra, outcome: None })
        }
        OptionKind::Array(kind) => {
            let (raws, extra) = collect_array_params(ctx, id, head, inline, args, next)?;
            let mut elements = Vec::new();
            for raw in &raws {
                elements.push(normalize_and_validate(ctx, id, head, *kind, raw)?);
            }
            let def = ctx.registry.def(id);
            let new_values = merge_array(def.unique, *kind, &elements);
            let final_value = if def.append && ctx.touched.contains(&id) {
                append_array(ctx.values.get(id), &new_values, def.unique)
            } else {
                new_values
            };
            let limit = def.limit;
            if let Some(limit) = limit {
                let len = match &final_value {
                    Value::ArrayStr(v) => v.len(),
                    Value::ArrayNum(v) => v.len(),
                    _ => 0,
                };
                if len > limit {
                    return Err(ParseError::TooManyValues(
                        ctx.registry.preferred_name(id),
                        len,
                        limit,
                    ));
                }
            }
            ctx.values.set(id, final_value);
            ctx.touched.insert(id);
            Ok(Dispatched { extra_tokens: extra, outcome: None })
        }
        OptionKind::Function { param_count, exec } => {
            let mut take = param_count.min();
            while !param_count.accepts(take) && next + take < args.len()
                && !looks_like_name(ctx.registry, &args[next + take])
            {
                take += 1;
            }
            let param: String = args[next..(next + take).min(args.len())].join(" ");
            let fctx = FunctionContext {
                values: &ctx.values,
                index: next,
                name: head,
                param: &param,
                comp: ctx.comp,
            };
            let (value, skip) = exec(fctx).map_err(ParseError::Callback)?;
            ctx.values.set(id, value);
            Ok(Dispatched { extra_tokens: take + skip, outcome: None })
        }
        OptionKind::Command { .. } => unreachable!(),
    }
}

fn mark_deprecated(ctx: &mut Ctx, id: OptionId) {
    if ctx.registry.def(id).deprecated.is_some() && ctx.deprecated_seen.insert(id) {
        let msg = ctx.registry.def(id).deprecated.clone().unwrap();
        ctx.warnings.push(format!(
            "option {} is deprecated: {}",
            ctx.registry.preferred_name(id),
            msg
        ));
    }
}

fn resolve_version(source: &VersionSource, reader: &dyn ByteStreamReader) -> Result<String, ParseError> {
    match source {
        VersionSource::Fixed(s) => Ok(s.clone()),
        VersionSource::Resolve(path) => {
            let bytes = reader
                .read(path)
                .map_err(|e| ParseError::VersionResolveError(e.to_string()))?;
            let text = String::from_utf8_lossy(&bytes);
            let re = regex::Regex::new(r#""version"\s*:\s*"([^"]+)""#).unwrap();
            re.captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| ParseError::VersionResolveError(path.clone()))
        }
    }
}

fn take_one_param(
    ctx: &Ctx,
    id: OptionId,
    head: &str,
    inline: Option<&str>,
    args: &[String],
    next: usize,
) -> Result<(String, usize), ParseError> {
    if let Some(v) = inline {
        if v.is_empty() {
            if let Some(fallback) = &ctx.registry.def(id).fallback {
                return Ok((fallback.to_string_raw(), 0));
            }
        }
        return Ok((v.to_string(), 0));
    }
    match args.get(next) {
        Some(v) => Ok((v.clone(), 1)),
        None => Err(ParseError::MissingParam(head.to_string())),
    }
}

fn collect_array_params(
    ctx: &Ctx,
    id: OptionId,
    head: &str,
    inline: Option<&str>,
    args: &[String],
    next: usize,
) -> Result<(Vec<String>, usize), ParseError> {
    let def = ctx.registry.def(id);
    let mut raws: Vec<String> = Vec::new();
    let mut extra = 0;

    let expand = |raw: &str| -> Vec<String> {
        match &def.separator {
            Some(sep) => sep.split(raw).into_iter().map(str::to_string).collect(),
            None => vec![raw.to_string()],
        }
    };

    if let Some(v) = inline {
        raws.extend(expand(v));
    } else {
        let mut idx = next;
        while idx < args.len() {
            if looks_like_name(ctx.registry, &args[idx]) {
                break;
            }
            if let Some((marker, _)) = &ctx.registry.positional_marker {
                if &args[idx] == marker {
                    break;
                }
            }
            raws.extend(expand(&args[idx]));
            idx += 1;
            extra += 1;
            if let Some(limit) = def.limit {
                if raws.len() >= limit {
                    break;
                }
            }
        }
        if raws.is_empty() {
            return Err(ParseError::MissingParam(head.to_string()));
        }
    }
    Ok((raws, extra))
}

fn merge_array(unique: bool, kind: ValueKind, elements: &[Value]) -> Value {
    match kind {
        ValueKind::ArrayNumber | ValueKind::Number => {
            let mut nums: Vec<f64> = elements.iter().filter_map(Value::as_num).collect();
            if unique {
                let mut seen = Vec::new();
                nums.retain(|n| {
                    if seen.contains(n) {
                        false
                    } else {
                        seen.push(*n);
                        true
                    }
                });
            }
            Value::ArrayNum(nums)
        }
        _ => {
            let mut strs: Vec<String> = elements
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_default())
                .collect();
            if unique {
                let mut seen: HashSet<String> = HashSet::new();
                strs.retain(|s| seen.insert(s.clone()));
            }
            Value::ArrayStr(strs)
        }
    }
}

fn append_array(existing: Option<&Value>, new: &Value, unique: bool) -> Value {
    match (existing, new) {
        (Some(Value::ArrayStr(old)), Value::ArrayStr(fresh)) => {
            let mut merged = old.clone();
            merged.extend(fresh.iter().cloned());
            if unique {
                let mut seen: HashSet<String> = HashSet::new();
                merged.retain(|s| seen.insert(s.clone()));
            }
            Value::ArrayStr(merged)
        }
        (Some(Value::ArrayNum(old)), Value::ArrayNum(fresh)) => {
            let mut merged = old.clone();
            merged.extend(fresh.iter().cloned());
            if unique {
                let mut seen = Vec::new();
                merged.retain(|n| {
                    if seen.contains(n) {
                        false
                    } else {
                        seen.push(*n);
                        true
                    }
                });
            }
            Value::ArrayNum(merged)
        }
        _ => new.clone(),
    }
}

fn normalize_and_validate(
    ctx: &Ctx,
    id: OptionId,
    head: &str,
    kind: ValueKind,
    raw: &str,
) -> Result<Value, ParseError> {
    let def = ctx.registry.def(id);
    let name = ctx.registry.preferred_name(id);

    if let Some(choices) = &def.choices {
        let resolved = choices.resolve(raw).ok_or_else(|| {
            ParseError::InvalidParam(
                name.clone(),
                raw.to_string(),
                format!("Possible values are {{{}}}.", choices_literal_list(choices)),
            )
        })?;
        return apply_parse_callback(ctx, id, head, raw, resolved);
    }

    let mut value = match kind {
        ValueKind::Boolean => {
            let truth = def.truth_names.clone().unwrap_or_else(|| vec!["true".to_string()]);
            let falsity = def.falsity_names.clone().unwrap_or_else(|| vec!["false".to_string()]);
            let matches_one = |names: &[String]| {
                names.iter().any(|n| {
                    if def.case_sensitive {
                        n == raw
                    } else {
                        n.eq_ignore_ascii_case(raw)
                    }
                })
            };
            if matches_one(&truth) {
                Value::Bool(true)
            } else if matches_one(&falsity) {
                Value::Bool(false)
            } else {
                return Err(ParseError::InvalidParam(
                    name,
                    format!("'{raw}'"),
                    format!(
                        "Possible values are {{'{}', '{}'}}.",
                        truth.first().cloned().unwrap_or_default(),
                        falsity.first().cloned().unwrap_or_default()
                    ),
                ));
            }
        }
        ValueKind::String | ValueKind::ArrayString => {
            let mut s = raw.to_string();
            if def.trim {
                s = s.trim().to_string();
            }
            match def.case {
                Some(Case::Lower) => s = s.to_lowercase(),
                Some(Case::Upper) => s = s.to_uppercase(),
                None => {}
            }
            if let Some(re) = &def.regex {
                if !re.is_match(&s) {
                    return Err(ParseError::InvalidParam(
                        name,
                        s,
                        format!("Value must match {}.", re.as_str()),
                    ));
                }
            }
            Value::Str(s)
        }
        ValueKind::Number | ValueKind::ArrayNumber => {
            let mut n: f64 = raw.parse().map_err(|_| {
                ParseError::InvalidParam(name.clone(), raw.to_string(), "Value must be a number.".to_string())
            })?;
            if let Some(round) = def.round {
                n = round.apply(n);
            }
            if let Some(range) = &def.range {
                if !range.contains(n) {
                    return Err(ParseError::InvalidParam(
                        name,
                        raw.to_string(),
                        format!("Value must be in the range {range}."),
                    ));
                }
            }
            Value::Num(n)
        }
        ValueKind::Flag => Value::Bool(true),
    };

    if matches!(value, Value::Num(_)) && matches!(kind, ValueKind::ArrayNumber) {
        // kept as scalar Num here; caller (merge_array) assembles the array.
    }
    if let Value::Str(_) = &mut value {}

    apply_parse_callback(ctx, id, head, raw, value)
}

fn apply_parse_callback(
    ctx: &Ctx,
    id: OptionId,
    head: &str,
    raw: &str,
    value: Value,
) -> Result<Value, ParseError> {
    let def = ctx.registry.def(id);
    if let Some(parse_fn) = &def.parse {
        return parse_fn(&ctx.values, head, raw).map_err(|e| {
            ParseError::InvalidParam(ctx.registry.preferred_name(id), raw.to_string(), e)
        });
    }
    Ok(value)
}

fn choices_literal_list(choices: &Choices) -> String {
    choices
        .literals()
        .into_iter()
        .map(|l| format!("'{l}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn consume_positional(ctx: &mut Ctx, owner: OptionId, rest: &[String]) -> Result<(), ParseError> {
    let kind = match &ctx.registry.def(owner).kind {
        OptionKind::Single(k) | OptionKind::Array(k) => *k,
        _ => ValueKind::String,
    };
    let mut elements = Vec::new();
    for raw in rest {
        elements.push(normalize_and_validate(ctx, owner, "positional", kind, raw)?);
    }
    let def = ctx.registry.def(owner);
    let value = if matches!(def.kind, OptionKind::Array(_)) {
        merge_array(def.unique, kind, &elements)
    } else {
        elements.into_iter().next().unwrap_or(Value::Unit)
    };
    ctx.values.set(owner, value);
    ctx.touched.insert(owner);
    Ok(())
}

fn try_cluster(
    ctx: &mut Ctx,
    head: &str,
    args: &[String],
    next: usize,
) -> Result<Option<usize>, ParseError> {
    let letters: Vec<char> = head[1..].chars().collect();
    let ids: Option<Vec<OptionId>> = letters.iter().map(|c| ctx.registry.lookup_cluster(*c)).collect();
    let ids = match ids {
        Some(ids) => ids,
        None => return Ok(None),
    };

    for (pos, id) in ids.iter().enumerate() {
        let last = pos == ids.len() - 1;
        if !last && !ctx.registry.def(*id).is_niladic() {
            return Err(ParseError::ClusterPositionError(ctx.registry.preferred_name(*id)));
        }
    }

    let mut extra = 0;
    for (pos, id) in ids.iter().enumerate() {
        let last = pos == ids.len() - 1;
        mark_deprecated(ctx, *id);
        match &ctx.registry.def(*id).kind {
            OptionKind::Flag => {
                ctx.values.set(*id, Value::Bool(true));
            }
            _ if last => {
                let dispatched = dispatch(ctx, *id, head, None, false, args, next)?;
                extra += dispatched.extra_tokens;
            }
            _ => {
                ctx.values.set(*id, Value::Bool(true));
            }
        }
    }
    Ok(Some(extra))
}

fn materialize_defaults(ctx: &mut Ctx) -> Result<(), ParseError> {
    let ids: Vec<OptionId> = ctx.registry.ids().collect();
    for id in ids {
        if ctx.values.is_present(id) {
            continue;
        }
        let def = ctx.registry.def(id);
        if let Some(env_name) = &def.env_var {
            if let Some(raw) = ctx.opts.env.get(env_name) {
                let kind = match &def.kind {
                    OptionKind::Single(k) | OptionKind::Array(k) => *k,
                    _ => ValueKind::String,
                };
                let value = normalize_and_validate(ctx, id, env_name, kind, &raw)?;
                ctx.values.set(id, value);
                continue;
            }
        }
        match &ctx.registry.def(id).default {
            Some(crate::schema::DefaultValue::Value(v)) => {
                ctx.values.set(id, v.clone());
            }
            Some(crate::schema::DefaultValue::Computed(f)) => {
                let v = f();
                ctx.values.set(id, v);
            }
            None => {}
        }
    }
    Ok(())
}

fn check_requirements(ctx: &Ctx) -> Result<(), ParseError> {
    let name_of = |id: OptionId| ctx.registry.preferred_name(id);
    for id in ctx.registry.ids() {
        let def = ctx.registry.def(id);
        if def.required && !ctx.values.is_present(id) {
            return Err(ParseError::RequiredAbsent(name_of(id)));
        }
        if let Some(req) = ctx.registry.required_if(id) {
            if req.eval(&ctx.values, ctx.registry) && !ctx.values.is_present(id) {
                return Err(ParseError::RequiredAbsent(name_of(id)));
            }
        }
        if ctx.values.is_present(id) {
            if let Some(req) = ctx.registry.requires(id) {
                if !req.eval(&ctx.values, ctx.registry) {
                    return Err(ParseError::RequiresUnsatisfied(name_of(id), req.render(&name_of)));
                }
            }
        }
    }
    Ok(())
}

trait ToStringRaw {
    fn to_string_raw(&self) -> String;
}

impl ToStringRaw for Value {
    fn to_string_raw(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{OverlayEnvReader, FsByteStreamReader};
    use crate::schema::OptionDef;
    use crate::model::{Arity, Range};

    fn opts<'a>(env: &'a dyn EnvReader, reader: &'a dyn ByteStreamReader) -> ParseOptions<'a> {
        ParseOptions { short_cluster: true, env, byte_reader: reader, prog: "prog" }
    }

    fn run_values(registry: &Registry, args: &[&str]) -> Result<(Values, Vec<String>), ParseError> {
        let env = OverlayEnvReader::new(vec![], false);
        let reader = FsByteStreamReader;
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        match parse(registry, &args, None, &opts(&env, &reader))? {
            ParseOutcome::Values(v, w) => Ok((v, w)),
            _ => panic!("expected values outcome"),
        }
    }

    fn run_completion(registry: &Registry, args: &[&str], cursor_index: usize, prefix: &str) -> Vec<String> {
        let env = OverlayEnvReader::new(vec![], false);
        let reader = FsByteStreamReader;
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        match parse(
            registry,
            &args,
            Some((cursor_index, prefix.to_string())),
            &opts(&env, &reader),
        )
        .unwrap()
        {
            ParseOutcome::Completion(c) => c,
            _ => panic!("expected completion outcome"),
        }
    }

    #[test]
    fn required_flag_missing_errors() {
        let registry = Registry::register(vec![
            OptionDef::flag("f").names(vec!["-f"]),
            OptionDef::flag("r").names(vec!["-r"]).required(true),
        ])
        .unwrap();
        let err = run_values(&registry, &[]).unwrap_err();
        assert_eq!(err, ParseError::RequiredAbsent("-r".to_string()));
    }

    #[test]
    fn requires_unsatisfied_renders_value_map() {
        let registry = Registry::register(vec![
            OptionDef::single("f", ValueKind::String)
                .names(vec!["-f"])
                .requires(crate::schema::ReqBuilder::ValueMap(
                    "s".to_string(),
                    crate::schema::RequiredValueBuilder::Equals(Value::Str("abc".to_string())),
                )),
            OptionDef::single("s", ValueKind::String).names(vec!["-s"]),
        ])
        .unwrap();
        let err = run_values(&registry, &["-f", "x", "-s", "xyz"]).unwrap_err();
        assert_eq!(
            err,
            ParseError::RequiresUnsatisfied("-f".to_string(), "-s = 'abc'".to_string())
        );
    }

    #[test]
    fn number_range_violation() {
        let registry = Registry::register(vec![OptionDef::single("n", ValueKind::Number)
            .names(vec!["-n"])
            .range(Range::new(0.0, f64::INFINITY))])
        .unwrap();
        let err = run_values(&registry, &["-n", "-3"]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidParam(
                "-n".to_string(),
                "-3".to_string(),
                "Value must be in the range [0, Infinity].".to_string()
            )
        );
        assert_eq!(
            err.to_string(),
            "Invalid parameter to -n: -3. Value must be in the range [0, Infinity]."
        );
    }

    #[test]
    fn array_too_many_values() {
        let registry = Registry::register(vec![OptionDef::array("ss", ValueKind::String)
            .names(vec!["-ss"])
            .separator(crate::schema::Separator::Literal(",".to_string()))
            .limit(2)])
        .unwrap();
        let err = run_values(&registry, &["-ss", "a,b,c"]).unwrap_err();
        assert!(matches!(err, ParseError::TooManyValues(_, 3, 2)));
    }

    #[test]
    fn cluster_equivalence() {
        let registry = Registry::register(vec![
            OptionDef::flag("a").names(vec!["-a"]).cluster_letters(vec!['a']),
            OptionDef::flag("b").names(vec!["-b"]).cluster_letters(vec!['b']),
            OptionDef::single("s", ValueKind::String)
                .names(vec!["-s"])
                .cluster_letters(vec!['s']),
        ])
        .unwrap();
        let (values, _) = run_values(&registry, &["-abs", "val"]).unwrap();
        let a = registry.lookup_name("-a").unwrap();
        let b = registry.lookup_name("-b").unwrap();
        let s = registry.lookup_name("-s").unwrap();
        assert_eq!(values.get(a), Some(&Value::Bool(true)));
        assert_eq!(values.get(b), Some(&Value::Bool(true)));
        assert_eq!(values.get(s), Some(&Value::Str("val".to_string())));
    }

    #[test]
    fn boolean_case_sensitive_mismatch() {
        let registry = Registry::register(vec![OptionDef::single("b", ValueKind::Boolean)
            .names(vec!["-b"])
            .truth_falsity_names(vec!["true"], vec!["false"], true)])
        .unwrap();
        let err = run_values(&registry, &["-b", "True"]).unwrap_err();
        assert!(matches!(err, ParseError::InvalidParam(..)));
    }

    #[test]
    fn append_and_unique_union_preserves_order() {
        let registry = Registry::register(vec![OptionDef::array("ss", ValueKind::String)
            .names(vec!["-ss"])
            .append(true)
            .unique(true)])
        .unwrap();
        let (values, _) = run_values(&registry, &["-ss", "a", "b", "-ss", "b", "c"]).unwrap();
        let id = registry.lookup_name("-ss").unwrap();
        assert_eq!(
            values.get(id),
            Some(&Value::ArrayStr(vec!["a".to_string(), "b".to_string(), "c".to_string()]))
        );
    }

    #[test]
    fn default_materializes_when_absent() {
        let registry = Registry::register(vec![OptionDef::single("n", ValueKind::Number)
            .names(vec!["-n"])
            .default(crate::schema::DefaultValue::Value(Value::Num(5.0)))])
        .unwrap();
        let (values, _) = run_values(&registry, &[]).unwrap();
        let id = registry.lookup_name("-n").unwrap();
        assert_eq!(values.get(id), Some(&Value::Num(5.0)));
    }

    #[test]
    fn function_consumes_fixed_params() {
        let exec: crate::schema::FunctionExec =
            std::rc::Rc::new(|ctx| Ok((Value::Str(ctx.param.to_string()), 0)));
        let registry = Registry::register(vec![OptionDef::function("f", Arity::Fixed(1), exec).names(vec!["-f"])])
            .unwrap();
        let (values, _) = run_values(&registry, &["-f", "hi"]).unwrap();
        let id = registry.lookup_name("-f").unwrap();
        assert_eq!(values.get(id), Some(&Value::Str("hi".to_string())));
    }

    #[test]
    fn break_after_finalizes_defaults_before_callback_and_stops_parse() {
        // "n" is registered first, so its id is OptionId(0); this callback
        // checks that the default was already materialized by the time the
        // break option's own handler runs.
        let exec: crate::schema::FunctionExec = std::rc::Rc::new(|ctx| {
            let seen = ctx.values.is_present(OptionId(0));
            Ok((Value::Bool(seen), 0))
        });
        let registry = Registry::register(vec![
            OptionDef::single("n", ValueKind::String)
                .names(vec!["-n"])
                .default(crate::schema::DefaultValue::Value(Value::Str("d".to_string()))),
            OptionDef::function("f", Arity::Fixed(0), exec)
                .names(vec!["-f"])
                .break_after(true),
        ])
        .unwrap();
        let (values, _) = run_values(&registry, &["-f", "-n", "ignored"]).unwrap();
        let f_id = registry.lookup_name("-f").unwrap();
        assert_eq!(values.get(f_id), Some(&Value::Bool(true)));
        let n_id = registry.lookup_name("-n").unwrap();
        assert_eq!(values.get(n_id), Some(&Value::Str("d".to_string())));
    }

    #[test]
    fn deprecated_option_emits_warning_once() {
        let registry = Registry::register(vec![OptionDef::flag("f")
            .names(vec!["-f"])
            .deprecated("use --new instead")])
        .unwrap();
        let (_, warnings) = run_values(&registry, &["-f"]).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_name_suggests_similar() {
        let registry = Registry::register(vec![OptionDef::flag("f").names(vec!["--flag"])]).unwrap();
        let err = run_values(&registry, &["--flga"]).unwrap_err();
        match err {
            ParseError::UnknownName(_, suggestions) => assert!(suggestions.contains(&"--flag".to_string())),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn completion_on_choices_parameter_emits_literals() {
        let registry = Registry::register(vec![OptionDef::single("s", ValueKind::String)
            .names(vec!["-s"])
            .choices(Choices::Array(vec!["one".to_string(), "two".to_string()]))])
        .unwrap();
        let candidates = run_completion(&registry, &["-s"], 1, "");
        assert_eq!(candidates, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn completion_on_boolean_parameter_emits_truth_and_falsity() {
        let registry = Registry::register(vec![OptionDef::single("b", ValueKind::Boolean)
            .names(vec!["-b"])
            .truth_falsity_names(vec!["yes"], vec!["no"], false)])
        .unwrap();
        let candidates = run_completion(&registry, &["-b"], 1, "");
        assert_eq!(candidates, vec!["yes".to_string(), "no".to_string()]);
    }

    #[test]
    fn completion_on_custom_callback_delegates_to_it() {
        let complete: crate::schema::CompleteFn =
            std::rc::Rc::new(|prefix| vec![format!("{prefix}custom")]);
        let registry = Registry::register(vec![OptionDef::single("c", ValueKind::String)
            .names(vec!["-c"])
            .complete(complete)])
        .unwrap();
        let candidates = run_completion(&registry, &["-c"], 1, "pre-");
        assert_eq!(candidates, vec!["pre-custom".to_string()]);
    }

    #[test]
    fn completion_between_options_lists_filtered_names() {
        let registry = Registry::register(vec![
            OptionDef::flag("a").names(vec!["--alpha"]),
            OptionDef::flag("b").names(vec!["--beta"]),
        ])
        .unwrap();
        let candidates = run_completion(&registry, &[], 0, "--a");
        assert_eq!(candidates, vec!["--alpha".to_string()]);
    }

    #[test]
    fn bare_positional_single_consumes_unmatched_token() {
        let registry = Registry::register(vec![
            OptionDef::flag("f").names(vec!["-f"]),
            OptionDef::single("file", ValueKind::String).positional_bare(),
        ])
        .unwrap();
        let (values, _) = run_values(&registry, &["-f", "input.txt"]).unwrap();
        let id = registry.lookup_key("file").unwrap();
        assert_eq!(values.get(id), Some(&Value::Str("input.txt".to_string())));
    }

    #[test]
    fn bare_positional_array_consumes_remaining_free_tokens() {
        let registry =
            Registry::register(vec![OptionDef::array("files", ValueKind::String).positional_bare()])
                .unwrap();
        let (values, _) = run_values(&registry, &["a.txt", "b.txt"]).unwrap();
        let id = registry.lookup_key("files").unwrap();
        assert_eq!(
            values.get(id),
            Some(&Value::ArrayStr(vec!["a.txt".to_string(), "b.txt".to_string()]))
        );
    }

    #[test]
    fn parse_error_converts_to_terminal_error_message() {
        let err = ParseError::RequiredAbsent("-r".to_string());
        let message: crate::message::Message = err.into();
        assert_eq!(message.wrap(0), "Option -r is required.");
    }
}
