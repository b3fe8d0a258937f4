//! The top-level driver: builds a [`Registry`] from a [`Catalog`] once and
//! offers both raw-argument and raw-line entry points, wiring in the host
//! capabilities (§5, §6).

use crate::host::{ByteStreamReader, EnvReader, FsByteStreamReader, ProcessEnvReader};
use crate::parser::{self, ParseError, ParseOptions, ParseOutcome};
use crate::registry::{Registry, SchemaError};
use crate::schema::Catalog;
use crate::tokenizer::{strip_env_overlay, tokenize};
use crate::value::Values;

/// Compiles a catalog into a [`Registry`] and dispatches parses against it.
/// Corresponds to the teacher's `CommandLineParser` facade
/// (`blarg_builder::parser::GeneralParser`), generalized to the tagged
/// option-kind model.
pub struct CommandLineParser {
    registry: Registry,
    short_cluster: bool,
    prog: String,
}

/// The non-error result of a top-level parse.
pub enum Outcome {
    Values(Values, Vec<String>),
    Help(String),
    Version(String),
    Completion(Vec<String>),
}

impl CommandLineParser {
    pub fn build(prog: impl Into<String>, catalog: Catalog) -> Result<Self, SchemaError> {
        let registry = Registry::register(catalog)?;
        Ok(Self {
            registry,
            short_cluster: false,
            prog: prog.into(),
        })
    }

    pub fn short_cluster(mut self, enabled: bool) -> Self {
        self.short_cluster = enabled;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parse an already-tokenized argument vector against the default host
    /// capabilities (real process env, real filesystem).
    pub fn parse(&self, args: &[String]) -> Result<Outcome, ParseError> {
        let env = ProcessEnvReader;
        let reader = FsByteStreamReader;
        self.parse_with(args, None, &env, &reader)
    }

    /// Parse a raw command line, honoring `COMP_LINE`/`COMP_POINT`-style
    /// completion cursors and leading `NAME=VALUE` overlays (§4.2, §6).
    pub fn parse_line(&self, line: &str, cursor: Option<usize>) -> Result<Outcome, ParseError> {
        let tokenized = tokenize(line, cursor);
        let (args, overlay) = strip_env_overlay(&tokenized.args);
        let env = crate::host::OverlayEnvReader::new(overlay, true);
        let reader = FsByteStreamReader;
        let cursor_arg = match (tokenized.cursor_index, tokenized.cursor_prefix) {
            (Some(idx), Some(prefix)) => Some((idx, prefix)),
            _ => None,
        };
        self.parse_with(&args, cursor_arg, &env, &reader)
    }

    fn parse_with(
        &self,
        args: &[String],
        cursor: Option<(usize, String)>,
        env: &dyn EnvReader,
        reader: &dyn ByteStreamReader,
    ) -> Result<Outcome, ParseError> {
        let opts = ParseOptions {
            short_cluster: self.short_cluster,
            env,
            byte_reader: reader,
            prog: &self.prog,
        };
        match parser::parse(&self.registry, args, cursor, &opts)? {
            ParseOutcome::Values(v, w) => Ok(Outcome::Values(v, w)),
            ParseOutcome::Help(h) => Ok(Outcome::Help(h)),
            ParseOutcome::Version(v) => Ok(Outcome::Version(v)),
            ParseOutcome::Completion(c) => Ok(Outcome::Completion(c)),
        }
    }

    pub fn render_help(&self, width: usize) -> String {
        crate::printer::render_help(&self.registry, width)
    }

    pub fn render_usage(&self) -> String {
        crate::printer::render_usage(&self.registry, &self.prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueKind;
    use crate::schema::OptionDef;

    #[test]
    fn parse_line_tokenizes_and_resolves() {
        let cli = CommandLineParser::build(
            "prog",
            vec![OptionDef::single("name", ValueKind::String).names(vec!["--name"])],
        )
        .unwrap();
        let outcome = cli.parse_line("prog --name 'Jane Doe'", None).unwrap();
        match outcome {
            Outcome::Values(values, _) => {
                let id = cli.registry().lookup_name("--name").unwrap();
                assert_eq!(values.get(id).unwrap().as_str(), Some("Jane Doe"));
            }
            _ => panic!("expected values"),
        }
    }

    #[test]
    fn unregistered_option_surfaces_unknown_name() {
        let cli = CommandLineParser::build("prog", vec![OptionDef::flag("f").names(vec!["-f"])]).unwrap();
        match cli.parse(&["-g".to_string()]) {
            Err(ParseError::UnknownName(..)) => {}
            _ => panic!("expected UnknownName, got a different outcome"),
        }
    }
}
