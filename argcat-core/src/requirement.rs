//! The requirement tree: `requires`/`requiredIf` expressions and their
//! evaluator (§4.4).

use crate::registry::Registry;
use crate::value::{OptionId, Value, Values};
use std::fmt;
use std::rc::Rc;

/// What a [`Req::ValueMap`] entry demands of an option's value.
#[derive(Clone)]
pub enum RequiredValue {
    /// `undefined` in the spec: the option must simply be present.
    Any,
    /// `null` in the spec: the option must be absent.
    Absent,
    /// The option's value must equal this literal.
    Equals(Value),
}

/// A boolean expression over other options' presence/values, attached to an
/// option via `requires` or `requiredIf`.
#[derive(Clone)]
pub enum Req {
    NameOnly(OptionId),
    ValueMap(OptionId, RequiredValue),
    All(Vec<Req>),
    One(Vec<Req>),
    Not(Box<Req>),
    /// An opaque predicate; `render` supplies the text shown in error
    /// messages since the closure body itself cannot be inspected.
    Predicate(Rc<dyn Fn(&Values) -> bool>, String),
}

impl fmt::Debug for Req {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Req::NameOnly(id) => write!(f, "NameOnly({id:?})"),
            Req::ValueMap(id, _) => write!(f, "ValueMap({id:?})"),
            Req::All(rs) => write!(f, "All({rs:?})"),
            Req::One(rs) => write!(f, "One({rs:?})"),
            Req::Not(r) => write!(f, "Not({r:?})"),
            Req::Predicate(_, text) => write!(f, "Predicate({text})"),
        }
    }
}

/// Compares two values for a [`RequiredValue::Equals`] match. Array values
/// belonging to an option declared `unique` compare as multisets (order does
/// not matter, since the parser's own dedup already discards order
/// significance for such options); all other values compare as ordered data.
fn values_equal(a: &Value, b: &Value, unique: bool) -> bool {
    match (a, b) {
        (Value::ArrayStr(x), Value::ArrayStr(y)) if unique => multiset_eq(x, y),
        (Value::ArrayNum(x), Value::ArrayNum(y)) if unique => {
            multiset_eq_f64(x, y)
        }
        (Value::ArrayStr(x), Value::ArrayStr(y)) => x == y,
        (Value::ArrayNum(x), Value::ArrayNum(y)) => x == y,
        _ => a == b,
    }
}

fn multiset_eq(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

fn multiset_eq_f64(a: &[f64], b: &[f64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
    b_sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
    a_sorted == b_sorted
}

impl Req {
    /// Evaluate this requirement against a populated values record.
    ///
    /// `parser_ctx` is the registry the values were produced against; it
    /// resolves whether a `ValueMap`'s target option is declared `unique`,
    /// which changes array equality from ordered to multiset comparison
    /// (§4.4).
    pub fn eval(&self, values: &Values, parser_ctx: &Registry) -> bool {
        match self {
            Req::NameOnly(id) => values.is_present(*id),
            Req::ValueMap(id, required) => match required {
                RequiredValue::Any => values.is_present(*id),
                RequiredValue::Absent => !values.is_present(*id),
                RequiredValue::Equals(expected) => {
                    let unique = parser_ctx.def(*id).unique;
                    values
                        .get(*id)
                        .map(|actual| values_equal(actual, expected, unique))
                        .unwrap_or(false)
                }
            },
            Req::All(reqs) => reqs.iter().all(|r| r.eval(values, parser_ctx)),
            Req::One(reqs) => reqs.iter().any(|r| r.eval(values, parser_ctx)),
            Req::Not(inner) => !inner.eval(values, parser_ctx),
            Req::Predicate(f, _) => f(values),
        }
    }

    /// Collect every option id this requirement references, used by schema
    /// validation's self-reference and dependency-cycle checks.
    pub fn referenced_ids(&self) -> Vec<OptionId> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids(&self, out: &mut Vec<OptionId>) {
        match self {
            Req::NameOnly(id) => out.push(*id),
            Req::ValueMap(id, _) => out.push(*id),
            Req::All(reqs) | Req::One(reqs) => {
                for r in reqs {
                    r.collect_ids(out);
                }
            }
            Req::Not(inner) => inner.collect_ids(out),
            Req::Predicate(..) => {}
        }
    }

    /// Canonical text rendering of this requirement, e.g. `-s = 'abc'` or
    /// `(-f1 or -f2)` or `no -f2`, using `name_of` to resolve preferred
    /// option names.
    pub fn render(&self, name_of: &dyn Fn(OptionId) -> String) -> String {
        match self {
            Req::NameOnly(id) => name_of(id_ref(id)),
            Req::ValueMap(id, required) => match required {
                RequiredValue::Any => name_of(id_ref(id)),
                RequiredValue::Absent => format!("no {}", name_of(id_ref(id))),
                RequiredValue::Equals(v) => format!("{} = {}", name_of(id_ref(id)), v),
            },
            Req::All(reqs) => reqs
                .iter()
                .map(|r| r.render(name_of))
                .collect::<Vec<_>>()
                .join(" and "),
            Req::One(reqs) => {
                let parts = reqs
                    .iter()
                    .map(|r| r.render(name_of))
                    .collect::<Vec<_>>()
                    .join(" or ");
                if reqs.len() > 1 {
                    format!("({parts})")
                } else {
                    parts
                }
            }
            Req::Not(inner) => match inner.as_ref() {
                Req::NameOnly(id) => format!("no {}", name_of(id_ref(id))),
                other => format!("not {}", other.render(name_of)),
            },
            Req::Predicate(_, text) => text.clone(),
        }
    }
}

fn id_ref(id: &OptionId) -> OptionId {
    *id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OptionDef;
    use rstest::rstest;

    fn name_of(id: OptionId) -> String {
        format!("-opt{}", id.0)
    }

    /// A registry with `n` plain flag options, `--opt0`..`--opt{n-1}`, with
    /// the ids in `unique_ids` declared `unique`.
    fn test_registry(n: usize, unique_ids: &[usize]) -> Registry {
        let catalog = (0..n)
            .map(|i| {
                OptionDef::flag(format!("opt{i}"))
                    .names(vec![format!("--opt{i}")])
                    .unique(unique_ids.contains(&i))
            })
            .collect();
        Registry::register(catalog).unwrap()
    }

    #[test]
    fn name_only_presence() {
        let registry = test_registry(1, &[]);
        let mut values = Values::new();
        let id = OptionId(0);
        let req = Req::NameOnly(id);
        assert!(!req.eval(&values, &registry));
        values.set(id, Value::Unit);
        assert!(req.eval(&values, &registry));
    }

    #[test]
    fn value_map_equals() {
        let registry = test_registry(1, &[]);
        let id = OptionId(0);
        let mut values = Values::new();
        values.set(id, Value::Str("abc".to_string()));
        let req = Req::ValueMap(id, RequiredValue::Equals(Value::Str("abc".to_string())));
        assert!(req.eval(&values, &registry));
        let req_fail = Req::ValueMap(id, RequiredValue::Equals(Value::Str("xyz".to_string())));
        assert!(!req_fail.eval(&values, &registry));
    }

    #[test]
    fn value_map_absent() {
        let registry = test_registry(2, &[]);
        let id = OptionId(1);
        let values = Values::new();
        let req = Req::ValueMap(id, RequiredValue::Absent);
        assert!(req.eval(&values, &registry));
    }

    #[test]
    fn value_map_array_equals_is_ordered_for_non_unique() {
        let registry = test_registry(1, &[]);
        let id = OptionId(0);
        let mut values = Values::new();
        values.set(id, Value::ArrayStr(vec!["b".to_string(), "a".to_string()]));
        let req = Req::ValueMap(
            id,
            RequiredValue::Equals(Value::ArrayStr(vec!["a".to_string(), "b".to_string()])),
        );
        assert!(!req.eval(&values, &registry));
    }

    #[test]
    fn value_map_array_equals_is_multiset_for_unique() {
        let registry = test_registry(1, &[0]);
        let id = OptionId(0);
        let mut values = Values::new();
        values.set(id, Value::ArrayStr(vec!["b".to_string(), "a".to_string()]));
        let req = Req::ValueMap(
            id,
            RequiredValue::Equals(Value::ArrayStr(vec!["a".to_string(), "b".to_string()])),
        );
        assert!(req.eval(&values, &registry));
    }

    #[rstest]
    #[case(vec![true, true], true)]
    #[case(vec![true, false], false)]
    fn all_short_circuits(#[case] present: Vec<bool>, #[case] expected: bool) {
        let registry = test_registry(present.len(), &[]);
        let mut values = Values::new();
        let ids: Vec<OptionId> = (0..present.len()).map(OptionId).collect();
        for (i, p) in present.iter().enumerate() {
            if *p {
                values.set(ids[i], Value::Unit);
            }
        }
        let req = Req::All(ids.iter().map(|id| Req::NameOnly(*id)).collect());
        assert_eq!(req.eval(&values, &registry), expected);
    }

    #[test]
    fn one_disjunction() {
        let registry = test_registry(2, &[]);
        let id0 = OptionId(0);
        let id1 = OptionId(1);
        let mut values = Values::new();
        values.set(id1, Value::Unit);
        let req = Req::One(vec![Req::NameOnly(id0), Req::NameOnly(id1)]);
        assert!(req.eval(&values, &registry));
    }

    #[test]
    fn render_value_map() {
        let id = OptionId(0);
        let req = Req::ValueMap(id, RequiredValue::Equals(Value::Str("abc".to_string())));
        assert_eq!(req.render(&name_of), "-opt0 = 'abc'");
    }

    #[test]
    fn render_one_of() {
        let req = Req::One(vec![Req::NameOnly(OptionId(1)), Req::NameOnly(OptionId(2))]);
        assert_eq!(req.render(&name_of), "(-opt1 or -opt2)");
    }

    #[test]
    fn render_not_name_only() {
        let req = Req::Not(Box::new(Req::NameOnly(OptionId(2))));
        assert_eq!(req.render(&name_of), "no -opt2");
    }

    #[test]
    fn predicate_opaque() {
        let registry = test_registry(0, &[]);
        let req = Req::Predicate(Rc::new(|_v: &Values| true), "custom condition".to_string());
        assert!(req.eval(&Values::new(), &registry));
        assert_eq!(req.render(&name_of), "custom condition");
    }
}
