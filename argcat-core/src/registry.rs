//! Compiles a [`Catalog`] into an indexed [`Registry`] (§4.1).

use crate::message::{Message, TerminalString};
use crate::model::ValueKind;
use crate::requirement::{Req, RequiredValue};
use crate::schema::{Catalog, OptionDef, OptionKind, Positional, ReqBuilder, RequiredValueBuilder};
use crate::value::OptionId;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

#[cfg(feature = "tracing_debug")]
use tracing::debug;

/// Schema construction errors, one variant per constraint in §4.1.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("option '{0}' has no name")]
    NoName(String),
    #[error("name '{0}' is invalid; names must not contain '=' or whitespace")]
    InvalidName(String),
    #[error("name '{0}' is used by more than one option")]
    DuplicateName(String),
    #[error("cluster letter '{0}' is used by more than one option")]
    DuplicateClusterLetter(char),
    #[error("option '{0}' declares an empty enumeration")]
    EmptyChoices(String),
    #[error("option '{0}' declares an empty positional marker")]
    EmptyPositionalMarker(String),
    #[error("option '{0}' declares an empty version string")]
    EmptyVersion(String),
    #[error("option '{0}' requires a value of the wrong type for option '{1}'")]
    RequirementTypeMismatch(String, String),
    #[error("option '{0}' requires unknown option '{1}'")]
    UnknownRequirement(String, String),
    #[error("option '{0}' requires itself, directly or transitively")]
    SelfReference(String),
}

/// Renders a schema error as a terminal string, for the same reason
/// [`crate::parser::ParseError`] does (§7, §4.5).
impl From<SchemaError> for Message {
    fn from(err: SchemaError) -> Message {
        let mut ts = TerminalString::new();
        ts.split(&err.to_string(), None);
        Message::Error(ts)
    }
}

pub(crate) struct RegisteredOption {
    pub(crate) def: OptionDef,
    pub(crate) requires: Option<Req>,
    pub(crate) required_if: Option<Req>,
}

/// The indexed, validated catalog used by every phase after schema
/// registration.
pub struct Registry {
    pub(crate) options: Vec<RegisteredOption>,
    name_to_id: HashMap<String, OptionId>,
    cluster_to_id: HashMap<char, OptionId>,
    key_to_id: HashMap<String, OptionId>,
    pub(crate) positional_marker: Option<(String, OptionId)>,
    pub(crate) bare_positional: Option<OptionId>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("option_count", &self.options.len())
            .finish()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('=') && !name.chars().any(char::is_whitespace)
}

fn resolve_req(
    builder: &ReqBuilder,
    key_to_id: &HashMap<String, OptionId>,
    owner_key: &str,
) -> Result<Req, SchemaError> {
    match builder {
        ReqBuilder::NameOnly(key) => {
            let id = key_to_id
                .get(key)
                .copied()
                .ok_or_else(|| SchemaError::UnknownRequirement(owner_key.to_string(), key.clone()))?;
            Ok(Req::NameOnly(id))
        }
        ReqBuilder::ValueMap(key, rv) => {
            let id = key_to_id
                .get(key)
                .copied()
                .ok_or_else(|| SchemaError::UnknownRequirement(owner_key.to_string(), key.clone()))?;
            let resolved = match rv {
                RequiredValueBuilder::Any => RequiredValue::Any,
                RequiredValueBuilder::Absent => RequiredValue::Absent,
                RequiredValueBuilder::Equals(v) => RequiredValue::Equals(v.clone()),
            };
            Ok(Req::ValueMap(id, resolved))
        }
        ReqBuilder::All(inner) => Ok(Req::All(
            inner
                .iter()
                .map(|r| resolve_req(r, key_to_id, owner_key))
                .collect::<Result<_, _>>()?,
        )),
        ReqBuilder::One(inner) => Ok(Req::One(
            inner
                .iter()
                .map(|r| resolve_req(r, key_to_id, owner_key))
                .collect::<Result<_, _>>()?,
        )),
        ReqBuilder::Not(inner) => Ok(Req::Not(Box::new(resolve_req(
            inner, key_to_id, owner_key,
        )?))),
        ReqBuilder::Predicate(f, text) => Ok(Req::Predicate(f.clone(), text.clone())),
    }
}

fn value_kind_of(def: &OptionDef) -> Option<ValueKind> {
    match &def.kind {
        OptionKind::Single(k) | OptionKind::Array(k) => Some(*k),
        OptionKind::Flag => Some(ValueKind::Flag),
        _ => None,
    }
}

impl Registry {
    /// Compile and validate a catalog, producing an indexed [`Registry`] or
    /// the first [`SchemaError`] encountered.
    ///
    /// Nested `command` catalogs are validated recursively; a visited-by-
    /// identity set of catalog thunk pointers breaks self-referential
    /// cycles (§4.1, §9).
    pub fn register(catalog: Catalog) -> Result<Registry, SchemaError> {
        Self::register_inner(catalog, &mut HashSet::new())
    }

    fn register_inner(
        catalog: Catalog,
        visited: &mut HashSet<usize>,
    ) -> Result<Registry, SchemaError> {
        let mut options = Vec::with_capacity(catalog.len());
        let mut name_to_id = HashMap::new();
        let mut cluster_to_id = HashMap::new();
        let mut key_to_id = HashMap::new();
        let mut positional_marker = None;
        let mut bare_positional = None;

        let mut value_kind_by_id: Vec<Option<ValueKind>> = Vec::with_capacity(catalog.len());
        for (idx, def) in catalog.iter().enumerate() {
            let id = OptionId(idx);
            key_to_id.insert(def.key.clone(), id);
            value_kind_by_id.push(value_kind_of(def));
        }

        for (idx, def) in catalog.into_iter().enumerate() {
            let id = OptionId(idx);

            if def.positional.is_none() {
                let non_empty = def.names.iter().any(|n| !n.is_empty());
                if !non_empty {
                    return Err(SchemaError::NoName(def.key.clone()));
                }
            }

            for name in def.names.iter().chain(def.negation_names.iter()) {
                if name.is_empty() {
                    continue;
                }
                if !valid_name(name) {
                    return Err(SchemaError::InvalidName(name.clone()));
                }
                if name_to_id.insert(name.clone(), id).is_some() {
                    return Err(SchemaError::DuplicateName(name.clone()));
                }
            }

            match &def.positional {
                Some(Positional::Marker(marker)) => {
                    if marker.is_empty() {
                        return Err(SchemaError::EmptyPositionalMarker(def.key.clone()));
                    }
                    if name_to_id.insert(marker.clone(), id).is_some() {
                        return Err(SchemaError::DuplicateName(marker.clone()));
                    }
                    positional_marker = Some((marker.clone(), id));
                }
                Some(Positional::Bare) => {
                    bare_positional = Some(id);
                }
                None => {}
            }

            for letter in &def.cluster_letters {
                if cluster_to_id.insert(*letter, id).is_some() {
                    return Err(SchemaError::DuplicateClusterLetter(*letter));
                }
            }

            if let Some(choices) = &def.choices {
                if choices.literals().is_empty() {
                    return Err(SchemaError::EmptyChoices(def.key.clone()));
                }
            }

            if let OptionKind::Version {
                source: crate::schema::VersionSource::Fixed(s),
                ..
            } = &def.kind
            {
                if s.is_empty() {
                    return Err(SchemaError::EmptyVersion(def.key.clone()));
                }
            }

            if let OptionKind::Command { catalog: thunk } = &def.kind {
                let ptr = Rc::as_ptr(thunk) as *const () as usize;
                if visited.insert(ptr) {
                    let sub_catalog = thunk();
                    Self::register_inner(sub_catalog, visited)?;
                }
            }

            let requires = def
                .requires
                .as_ref()
                .map(|r| resolve_req(r, &key_to_id, &def.key))
                .transpose()?;
            if let Some(req) = &requires {
                check_type_compat(&def.key, req, &value_kind_by_id)?;
            }
            let required_if = def
                .required_if
                .as_ref()
                .map(|r| resolve_req(r, &key_to_id, &def.key))
                .transpose()?;

            options.push(RegisteredOption {
                def,
                requires,
                required_if,
            });
        }

        for (idx, opt) in options.iter().enumerate() {
            if let Some(req) = &opt.requires {
                if requirement_reaches(req, OptionId(idx), &options) {
                    return Err(SchemaError::SelfReference(opt.def.key.clone()));
                }
            }
        }

        #[cfg(feature = "tracing_debug")]
        debug!("registered {} options", options.len());

        Ok(Registry {
            options,
            name_to_id,
            cluster_to_id,
            key_to_id,
            positional_marker,
            bare_positional,
        })
    }

    pub fn lookup_name(&self, name: &str) -> Option<OptionId> {
        self.name_to_id.get(name).copied()
    }

    pub fn lookup_cluster(&self, ch: char) -> Option<OptionId> {
        self.cluster_to_id.get(&ch).copied()
    }

    pub fn lookup_key(&self, key: &str) -> Option<OptionId> {
        self.key_to_id.get(key).copied()
    }

    pub fn def(&self, id: OptionId) -> &OptionDef {
        &self.options[id.0].def
    }

    pub fn requires(&self, id: OptionId) -> Option<&Req> {
        self.options[id.0].requires.as_ref()
    }

    pub fn required_if(&self, id: OptionId) -> Option<&Req> {
        self.options[id.0].required_if.as_ref()
    }

    pub fn ids(&self) -> impl Iterator<Item = OptionId> {
        (0..self.options.len()).map(OptionId)
    }

    /// The name used in error messages for an option: `preferredName` if
    /// set, else the first non-empty declared name, else its positional
    /// marker.
    pub fn preferred_name(&self, id: OptionId) -> String {
        let def = self.def(id);
        if let Some(p) = &def.preferred_name {
            return p.clone();
        }
        if let Some(n) = def.names.iter().find(|n| !n.is_empty()) {
            return n.clone();
        }
        if let Some(Positional::Marker(marker)) = &def.positional {
            return marker.clone();
        }
        def.key.clone()
    }

    pub fn all_names(&self) -> Vec<&str> {
        self.name_to_id.keys().map(|s| s.as_str()).collect()
    }

    /// Names "close" to `input`, ranked by descending Gestalt similarity
    /// and filtered by `threshold`, collapsing names already close to an
    /// accepted suggestion (§4.1).
    pub fn similar_names(&self, input: &str, threshold: f64) -> Vec<String> {
        similar_names(self.all_names().into_iter().map(str::to_string), input, threshold)
    }

    /// Optional diagnostic pass (§4.1): flags name pairs that are too
    /// similar to be easily typed apart, and name slots whose naming
    /// convention (case, dash-prefix, separator) is inconsistent across
    /// options. Returns human-readable warning lines; an empty catalog or
    /// one with no issues returns an empty vec.
    pub fn naming_issues(&self, similarity_threshold: f64) -> Vec<String> {
        let mut issues = Vec::new();
        let names: Vec<&str> = self.all_names();
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let (a, b) = (names[i], names[j]);
                if a == b {
                    continue;
                }
                let score = gestalt_similarity(a, b);
                if score >= similarity_threshold {
                    issues.push(format!(
                        "names '{a}' and '{b}' are too similar (similarity {score:.2})"
                    ));
                }
            }
        }

        let max_slots = self.options.iter().map(|o| o.def.names.len()).max().unwrap_or(0);
        for slot in 0..max_slots {
            let mut styles: HashSet<(NameCase, NamePrefix)> = HashSet::new();
            for option in &self.options {
                if let Some(name) = option.def.names.get(slot).filter(|n| !n.is_empty()) {
                    styles.insert((name_case(name), name_prefix(name)));
                }
            }
            if styles.len() > 1 {
                issues.push(format!(
                    "name slot {slot} mixes naming conventions across options"
                ));
            }
        }
        issues
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
enum NameCase {
    Lower,
    Upper,
    Capitalized,
    Mixed,
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
enum NamePrefix {
    Bare,
    Single,
    Double,
}

fn name_case(name: &str) -> NameCase {
    let body: String = name.chars().skip_while(|c| *c == '-').collect();
    let alpha: String = body.chars().filter(|c| c.is_alphabetic()).collect();
    if alpha.is_empty() {
        return NameCase::Lower;
    }
    if alpha.chars().all(|c| c.is_lowercase()) {
        NameCase::Lower
    } else if alpha.chars().all(|c| c.is_uppercase()) {
        NameCase::Upper
    } else if alpha.chars().next().unwrap().is_uppercase() {
        NameCase::Capitalized
    } else {
        NameCase::Mixed
    }
}

fn name_prefix(name: &str) -> NamePrefix {
    if name.starts_with("--") {
        NamePrefix::Double
    } else if name.starts_with('-') {
        NamePrefix::Single
    } else {
        NamePrefix::Bare
    }
}

/// Checks that every `ValueMap(id, Equals(literal))` in `req` targets an
/// option whose declared value kind can hold `literal` (e.g. rejects
/// requiring a string option with a numeric literal), per §4.1.
fn check_type_compat(
    owner_key: &str,
    req: &Req,
    value_kind_by_id: &[Option<ValueKind>],
) -> Result<(), SchemaError> {
    match req {
        Req::ValueMap(id, RequiredValue::Equals(value)) => {
            if let Some(kind) = value_kind_by_id.get(id.0).copied().flatten() {
                let compatible = matches!(
                    (kind, value),
                    (ValueKind::Flag, crate::value::Value::Bool(_))
                        | (ValueKind::Boolean, crate::value::Value::Bool(_))
                        | (ValueKind::String, crate::value::Value::Str(_))
                        | (ValueKind::Number, crate::value::Value::Num(_))
                        | (ValueKind::ArrayString, crate::value::Value::ArrayStr(_))
                        | (ValueKind::ArrayNumber, crate::value::Value::ArrayNum(_))
                );
                if !compatible {
                    return Err(SchemaError::RequirementTypeMismatch(
                        owner_key.to_string(),
                        format!("option#{}", id.0),
                    ));
                }
            }
            Ok(())
        }
        Req::All(inner) | Req::One(inner) => {
            for r in inner {
                check_type_compat(owner_key, r, value_kind_by_id)?;
            }
            Ok(())
        }
        Req::Not(inner) => check_type_compat(owner_key, inner, value_kind_by_id),
        Req::NameOnly(_) | Req::ValueMap(_, _) | Req::Predicate(..) => Ok(()),
    }
}

fn requirement_reaches(req: &Req, target: OptionId, options: &[RegisteredOption]) -> bool {
    let mut seen = HashSet::new();
    let mut stack: Vec<OptionId> = req.referenced_ids();
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(next) = options[id.0].requires.as_ref() {
            stack.extend(next.referenced_ids());
        }
    }
    false
}

/// Ratcliff/Obershelp ("Gestalt") similarity ratio in `[0, 1]`.
pub fn gestalt_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return f64::NAN;
    }
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let matches = matching_chars(&a, &b);
    (2.0 * matches as f64) / (a.len() + b.len()) as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (start_a, start_b, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 0..a.len() {
        for j in 0..b.len() {
            if a[i] == b[j] {
                table[i + 1][j + 1] = table[i][j] + 1;
                if table[i + 1][j + 1] > best.2 {
                    best = (i + 1 - table[i + 1][j + 1], j + 1 - table[i + 1][j + 1], table[i + 1][j + 1]);
                }
            }
        }
    }
    best
}

fn similar_names(
    candidates: impl Iterator<Item = String>,
    input: &str,
    threshold: f64,
) -> Vec<String> {
    let mut scored: Vec<(String, f64)> = candidates
        .map(|name| {
            let score = gestalt_similarity(&name, input);
            (name, score)
        })
        .filter(|(_, score)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));

    let mut accepted: Vec<String> = Vec::new();
    for (name, _) in scored {
        let too_close_to_accepted = accepted
            .iter()
            .any(|acc| gestalt_similarity(acc, &name) >= threshold);
        if !too_close_to_accepted {
            accepted.push(name);
        }
    }
    accepted
}
