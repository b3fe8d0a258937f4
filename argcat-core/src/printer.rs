//! Renders a [`Registry`] into usage and help text (§4.5's consumer): one
//! row per visible option (`[names] [param] [description]`), grouped and
//! column-aligned, generalizing the teacher's `ColumnRenderer` layout
//! (`blarg_builder::parser::interface`).

use crate::message::TerminalString;
use crate::model::ValueKind;
use crate::registry::Registry;
use crate::schema::{OptionKind, Positional};
use crate::value::OptionId;

fn param_slot(registry: &Registry, id: OptionId) -> String {
    let def = registry.def(id);
    match &def.kind {
        OptionKind::Flag | OptionKind::Help { .. } => String::new(),
        OptionKind::Version { .. } => String::new(),
        OptionKind::Single(kind) => format!("<{}>", placeholder(*kind)),
        OptionKind::Array(kind) => format!("<{}>...", placeholder(*kind)),
        OptionKind::Function { param_count, .. } => format!("<param>{{{}}}", param_count),
        OptionKind::Command { .. } => "...".to_string(),
    }
}

fn placeholder(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Flag => "",
        ValueKind::Boolean => "bool",
        ValueKind::String => "string",
        ValueKind::Number => "number",
        ValueKind::ArrayString => "string",
        ValueKind::ArrayNumber => "number",
    }
}

/// One rendered row of the option table: the joined names + param slot, and
/// the description text (with `deprecated`/`link` appended).
pub struct Row {
    pub group: Option<String>,
    pub names: String,
    pub param: String,
    pub description: TerminalString,
}

/// Build the help rows for every non-hidden option in `registry`, in
/// catalog order (§4.5, §9: hidden options never appear in generated text).
pub fn build_rows(registry: &Registry) -> Vec<Row> {
    registry
        .ids()
        .filter_map(|id| {
            let def = registry.def(id);
            if def.hide {
                return None;
            }
            let mut names: Vec<String> = def.names.clone();
            match &def.positional {
                Some(Positional::Marker(marker)) => names = vec![marker.clone()],
                Some(Positional::Bare) => names = vec!["...".to_string()],
                None => {}
            }
            if names.is_empty() {
                return None;
            }
            let mut description = TerminalString::new();
            if let Some(desc) = &def.desc {
                description.split(desc, None);
            }
            if let Some(default) = &def.default {
                let text = match default {
                    crate::schema::DefaultValue::Value(v) => format!("(default: {v})"),
                    crate::schema::DefaultValue::Computed(_) => "(has a default)".to_string(),
                };
                description.word(text);
            }
            if let Some(re) = &def.regex {
                description.word(format!("(must match {})", re.as_str()));
            }
            if let Some(range) = &def.range {
                description.word(format!("(range {range})"));
            }
            if let Some(choices) = &def.choices {
                let literals = choices
                    .literals()
                    .into_iter()
                    .map(|l| format!("'{l}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                description.word(format!("(one of {{{literals}}})"));
            }
            if let Some(env_var) = &def.env_var {
                description.word(format!("(env: {env_var})"));
            }
            if let Some(msg) = &def.deprecated {
                if !description.is_empty() {
                    description.word("(deprecated:");
                } else {
                    description.word("(deprecated");
                }
                description.split(msg, None);
                description.close(")");
            }
            if let Some(link) = &def.link {
                description.word(format!("[{link}]"));
            }
            Some(Row {
                group: def.group.clone(),
                names: names.join(", "),
                param: param_slot(registry, id),
                description,
            })
        })
        .collect()
}

/// Render the full help text: grouped rows, column-aligned to the widest
/// names+param cell, wrapped at `width` (`0` = no wrap).
pub fn render_help(registry: &Registry, width: usize) -> String {
    let rows = build_rows(registry);
    let mut groups: Vec<Option<String>> = Vec::new();
    for row in &rows {
        if !groups.contains(&row.group) {
            groups.push(row.group.clone());
        }
    }

    let left_width = rows
        .iter()
        .map(|r| {
            let mut cell = r.names.clone();
            if !r.param.is_empty() {
                cell.push(' ');
                cell.push_str(&r.param);
            }
            cell.chars().count()
        })
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for group in groups {
        if let Some(name) = &group {
            out.push_str(name);
            out.push(':');
            out.push('\n');
        }
        for row in rows.iter().filter(|r| r.group == group) {
            let mut cell = row.names.clone();
            if !row.param.is_empty() {
                cell.push(' ');
                cell.push_str(&row.param);
            }
            let pad = left_width.saturating_sub(cell.chars().count());
            let mut line = TerminalString::new().indent(left_width + 3);
            line.word(format!("  {}{}", cell, " ".repeat(pad)));
            line.merge(row.description.clone());
            out.push_str(&line.wrap(0, width, false));
            out.push('\n');
        }
    }
    out
}

/// Render a single-line usage synopsis: `<prog> [options] <positional>...`.
pub fn render_usage(registry: &Registry, prog: &str) -> String {
    let mut parts = vec![prog.to_string()];
    for id in registry.ids() {
        let def = registry.def(id);
        if def.hide {
            continue;
        }
        let token = if let Some(positional) = &def.positional {
            let label = match positional {
                Positional::Marker(marker) => marker.clone(),
                Positional::Bare => "...".to_string(),
            };
            if def.required {
                format!("<{label}>")
            } else {
                format!("[{label}]")
            }
        } else if let Some(name) = def.names.iter().find(|n| !n.is_empty()) {
            let slot = param_slot(registry, id);
            let inner = if slot.is_empty() {
                name.clone()
            } else {
                format!("{name} {slot}")
            };
            if def.required {
                inner
            } else {
                format!("[{inner}]")
            }
        } else {
            continue;
        };
        parts.push(token);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OptionDef;

    #[test]
    fn hidden_options_excluded_from_help() {
        let registry = Registry::register(vec![
            OptionDef::flag("a").names(vec!["--a"]).desc("visible"),
            OptionDef::flag("b").names(vec!["--b"]).desc("secret").hide(true),
        ])
        .unwrap();
        let help = render_help(&registry, 0);
        assert!(help.contains("--a"));
        assert!(!help.contains("--b"));
    }

    #[test]
    fn usage_marks_required_without_brackets() {
        let registry = Registry::register(vec![
            OptionDef::flag("a").names(vec!["--a"]).required(true),
            OptionDef::flag("b").names(vec!["--b"]),
        ])
        .unwrap();
        let usage = render_usage(&registry, "prog");
        assert_eq!(usage, "prog --a [--b]");
    }

    #[test]
    fn build_rows_assembles_full_description() {
        let registry = Registry::register(vec![OptionDef::single("n", ValueKind::Number)
            .names(vec!["-n"])
            .desc("a number")
            .default(crate::schema::DefaultValue::Value(crate::value::Value::Num(1.0)))
            .range(crate::model::Range::new(0.0, 10.0))
            .env_var("N")])
        .unwrap();
        let rows = build_rows(&registry);
        let row = &rows[0];
        let text = row.description.clone().wrap(0, 0, false);
        assert!(text.contains("a number"));
        assert!(text.contains("default: 1"));
        assert!(text.contains("range [0, 10]"));
        assert!(text.contains("env: N"));
    }

    #[test]
    fn build_rows_lists_choices() {
        let registry = Registry::register(vec![OptionDef::single("s", ValueKind::String)
            .names(vec!["-s"])
            .choices(crate::schema::Choices::Array(vec!["one".to_string(), "two".to_string()]))])
        .unwrap();
        let rows = build_rows(&registry);
        let text = rows[0].description.clone().wrap(0, 0, false);
        assert!(text.contains("'one', 'two'"));
    }

    #[test]
    fn bare_positional_rendered_with_ellipsis() {
        let registry =
            Registry::register(vec![OptionDef::array("files", ValueKind::String).positional_bare()])
                .unwrap();
        let rows = build_rows(&registry);
        assert_eq!(rows[0].names, "...");
        let usage = render_usage(&registry, "prog");
        assert_eq!(usage, "prog [...]");
    }

    #[test]
    fn grouped_rows_preserve_group_order() {
        let registry = Registry::register(vec![
            OptionDef::flag("a").names(vec!["--a"]).group("G1"),
            OptionDef::flag("b").names(vec!["--b"]).group("G2"),
        ])
        .unwrap();
        let help = render_help(&registry, 0);
        assert!(help.find("G1:").unwrap() < help.find("G2:").unwrap());
    }
}
