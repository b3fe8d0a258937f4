//! The option catalog: the user-facing declarative definition of a schema,
//! before it is compiled into a [`crate::registry::Registry`] (§4.1).

use crate::model::{Arity, Case, Range, Round, ValueKind};
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// A `requires`/`requiredIf` expression, referencing other options by their
/// catalog [`OptionDef::key`] rather than a resolved id — the registry
/// resolves these names to ids (and reports [`crate::registry::SchemaError::UnknownRequirement`]
/// on typos) during [`crate::registry::Registry::register`].
#[derive(Clone)]
pub enum ReqBuilder {
    NameOnly(String),
    ValueMap(String, RequiredValueBuilder),
    All(Vec<ReqBuilder>),
    One(Vec<ReqBuilder>),
    Not(Box<ReqBuilder>),
    Predicate(Rc<dyn Fn(&crate::value::Values) -> bool>, String),
}

#[derive(Clone)]
pub enum RequiredValueBuilder {
    Any,
    Absent,
    Equals(Value),
}

/// The `positional` option-definition field (§3): either a bare positional,
/// which absorbs unmatched free arguments directly wherever name resolution
/// allows them (rule 5, §4.3), or a marker string that switches the parser
/// into positional mode once that literal token is seen on the command
/// line.
#[derive(Clone)]
pub enum Positional {
    Bare,
    Marker(String),
}

/// `choices`: either a plain enumeration, or a map from the raw input token
/// to the value it resolves to.
#[derive(Clone)]
pub enum Choices {
    Array(Vec<String>),
    Map(HashMap<String, Value>),
}

impl Choices {
    pub(crate) fn literals(&self) -> Vec<String> {
        match self {
            Choices::Array(v) => v.clone(),
            Choices::Map(m) => m.keys().cloned().collect(),
        }
    }

    pub(crate) fn resolve(&self, raw: &str) -> Option<Value> {
        match self {
            Choices::Array(v) => v
                .iter()
                .find(|c| c.as_str() == raw)
                .map(|c| Value::Str(c.clone())),
            Choices::Map(m) => m.get(raw).cloned(),
        }
    }
}

/// `separator`: splits a single inline/next-token parameter into multiple
/// array elements.
#[derive(Clone)]
pub enum Separator {
    Literal(String),
    Regex(regex::Regex),
}

impl Separator {
    pub(crate) fn split<'a>(&self, input: &'a str) -> Vec<&'a str> {
        match self {
            Separator::Literal(sep) => input.split(sep.as_str()).collect(),
            Separator::Regex(re) => re.split(input).collect(),
        }
    }
}

#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Computed(Rc<dyn Fn() -> Value>),
}

pub type ParseFn = Rc<dyn Fn(&crate::value::Values, &str, &str) -> Result<Value, String>>;
pub type CompleteFn = Rc<dyn Fn(&str) -> Vec<String>>;

/// Context passed to a `function` option's callback, per §4.3.
pub struct FunctionContext<'a> {
    pub values: &'a crate::value::Values,
    pub index: usize,
    pub name: &'a str,
    pub param: &'a str,
    pub comp: bool,
}

pub type FunctionExec = Rc<dyn Fn(FunctionContext) -> Result<(Value, usize), String>>;

/// A sub-catalog thunk for `command` options. Stored as an `Rc` so its
/// pointer identity can be used as the cycle-breaker visited-set key during
/// recursive schema validation (§4.1).
pub type CatalogThunk = Rc<dyn Fn() -> Catalog>;

pub enum VersionSource {
    Fixed(String),
    /// Resolved via the host's byte-stream reader against a relative path
    /// (normally `"package.json"`), per §6.
    Resolve(String),
}

/// The tagged option-kind data, one variant per row of the option-kind table
/// in §3.
pub enum OptionKind {
    Flag,
    Single(ValueKind),
    Array(ValueKind),
    Function {
        param_count: Arity,
        exec: FunctionExec,
    },
    Command {
        catalog: CatalogThunk,
    },
    Help {
        saved: bool,
    },
    Version {
        source: VersionSource,
        saved: bool,
    },
}

/// A single option/argument definition, built via the fluent methods below
/// and collected into a [`Catalog`].
pub struct OptionDef {
    pub(crate) key: String,
    pub(crate) kind: OptionKind,
    pub(crate) names: Vec<String>,
    pub(crate) preferred_name: Option<String>,
    pub(crate) negation_names: Vec<String>,
    pub(crate) positional: Option<Positional>,
    pub(crate) cluster_letters: Vec<char>,
    pub(crate) separator: Option<Separator>,
    pub(crate) append: bool,
    pub(crate) unique: bool,
    pub(crate) limit: Option<usize>,
    pub(crate) regex: Option<regex::Regex>,
    pub(crate) range: Option<Range>,
    pub(crate) choices: Option<Choices>,
    pub(crate) trim: bool,
    pub(crate) case: Option<Case>,
    pub(crate) round: Option<Round>,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) fallback: Option<Value>,
    pub(crate) env_var: Option<String>,
    pub(crate) parse: Option<ParseFn>,
    pub(crate) complete: Option<CompleteFn>,
    pub(crate) required: bool,
    pub(crate) requires: Option<ReqBuilder>,
    pub(crate) required_if: Option<ReqBuilder>,
    pub(crate) deprecated: Option<String>,
    pub(crate) hide: bool,
    pub(crate) group: Option<String>,
    pub(crate) desc: Option<String>,
    pub(crate) link: Option<String>,
    pub(crate) break_after: bool,
    pub(crate) truth_names: Option<Vec<String>>,
    pub(crate) falsity_names: Option<Vec<String>>,
    pub(crate) case_sensitive: bool,
}

impl OptionDef {
    fn blank(key: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            key: key.into(),
            kind,
            names: Vec::new(),
            preferred_name: None,
            negation_names: Vec::new(),
            positional: None,
            cluster_letters: Vec::new(),
            separator: None,
            append: false,
            unique: false,
            limit: None,
            regex: None,
            range: None,
            choices: None,
            trim: false,
            case: None,
            round: None,
            default: None,
            fallback: None,
            env_var: None,
            parse: None,
            complete: None,
            required: false,
            requires: None,
            required_if: None,
            deprecated: None,
            hide: false,
            group: None,
            desc: None,
            link: None,
            break_after: false,
            truth_names: None,
            falsity_names: None,
            case_sensitive: false,
        }
    }

    pub fn flag(key: impl Into<String>) -> Self {
        Self::blank(key, OptionKind::Flag)
    }

    pub fn single(key: impl Into<String>, kind: ValueKind) -> Self {
        Self::blank(key, OptionKind::Single(kind))
    }

    pub fn array(key: impl Into<String>, kind: ValueKind) -> Self {
        Self::blank(key, OptionKind::Array(kind))
    }

    pub fn function(key: impl Into<String>, param_count: Arity, exec: FunctionExec) -> Self {
        Self::blank(key, OptionKind::Function { param_count, exec })
    }

    pub fn command(key: impl Into<String>, catalog: CatalogThunk) -> Self {
        Self::blank(key, OptionKind::Command { catalog })
    }

    pub fn help(key: impl Into<String>) -> Self {
        Self::blank(key, OptionKind::Help { saved: false })
    }

    pub fn version(key: impl Into<String>, source: VersionSource) -> Self {
        Self::blank(key, OptionKind::Version {
            source,
            saved: false,
        })
    }

    pub fn names(mut self, names: Vec<impl Into<String>>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn preferred_name(mut self, name: impl Into<String>) -> Self {
        self.preferred_name = Some(name.into());
        self
    }

    pub fn negation_names(mut self, names: Vec<impl Into<String>>) -> Self {
        self.negation_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn positional(mut self, marker: impl Into<String>) -> Self {
        self.positional = Some(Positional::Marker(marker.into()));
        self
    }

    /// Declares this option a bare positional (`positional: true`): unmatched
    /// free arguments are offered to it directly, with no marker token
    /// required (§3, §4.3 name-resolution rule 5).
    pub fn positional_bare(mut self) -> Self {
        self.positional = Some(Positional::Bare);
        self
    }

    pub fn cluster_letters(mut self, letters: Vec<char>) -> Self {
        self.cluster_letters = letters;
        self
    }

    pub fn separator(mut self, separator: Separator) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn regex(mut self, regex: regex::Regex) -> Self {
        self.regex = Some(regex);
        self
    }

    pub fn range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn choices(mut self, choices: Choices) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn case(mut self, case: Case) -> Self {
        self.case = Some(case);
        self
    }

    pub fn round(mut self, round: Round) -> Self {
        self.round = Some(round);
        self
    }

    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = Some(name.into());
        self
    }

    pub fn parse(mut self, parse: ParseFn) -> Self {
        self.parse = Some(parse);
        self
    }

    pub fn complete(mut self, complete: CompleteFn) -> Self {
        self.complete = Some(complete);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn requires(mut self, requires: ReqBuilder) -> Self {
        self.requires = Some(requires);
        self
    }

    pub fn required_if(mut self, required_if: ReqBuilder) -> Self {
        self.required_if = Some(required_if);
        self
    }

    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    pub fn hide(mut self, hide: bool) -> Self {
        self.hide = hide;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn break_after(mut self, brk: bool) -> Self {
        self.break_after = brk;
        self
    }

    pub fn truth_falsity_names(
        mut self,
        truth: Vec<impl Into<String>>,
        falsity: Vec<impl Into<String>>,
        case_sensitive: bool,
    ) -> Self {
        self.truth_names = Some(truth.into_iter().map(Into::into).collect());
        self.falsity_names = Some(falsity.into_iter().map(Into::into).collect());
        self.case_sensitive = case_sensitive;
        self
    }

    pub(crate) fn is_niladic(&self) -> bool {
        matches!(
            self.kind,
            OptionKind::Flag | OptionKind::Help { .. } | OptionKind::Version { .. }
        )
    }
}

/// An ordered list of option definitions — the user's catalog, before
/// compilation into a [`crate::registry::Registry`].
pub type Catalog = Vec<OptionDef>;
