//! Host capabilities the core consumes: process environment, a byte-stream
//! reader (for `version.resolve`), and a terminal-width probe (§1, §9).
//!
//! Isolating these behind traits keeps the engine testable without process-
//! global mutation, mirroring the teacher's [`UserInterface`] /
//! `ConsoleInterface` split (`blarg_builder::parser::interface`).

use std::collections::HashMap;
use std::io;

/// Reads process environment variables, with an overlay the tokenizer may
/// populate from leading `NAME=VALUE` tokens (§4.2, §6). The overlay is
/// consulted first so it never mutates the real process environment.
pub trait EnvReader {
    fn get(&self, name: &str) -> Option<String>;
}

/// The default, process-backed environment reader.
#[derive(Default)]
pub struct ProcessEnvReader;

impl EnvReader for ProcessEnvReader {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// An in-memory environment, used for tests and for the overlay produced by
/// [`crate::tokenizer::strip_env_overlay`].
#[derive(Default, Clone, Debug)]
pub struct OverlayEnvReader {
    overlay: HashMap<String, String>,
    fallback_to_process: bool,
}

impl OverlayEnvReader {
    pub fn new(overlay: Vec<(String, String)>, fallback_to_process: bool) -> Self {
        Self {
            overlay: overlay.into_iter().collect(),
            fallback_to_process,
        }
    }
}

impl EnvReader for OverlayEnvReader {
    fn get(&self, name: &str) -> Option<String> {
        self.overlay
            .get(name)
            .cloned()
            .or_else(|| {
                if self.fallback_to_process {
                    std::env::var(name).ok()
                } else {
                    None
                }
            })
    }
}

/// Reads a byte stream the host resolves from a relative path (used by the
/// `version` option kind's `resolve` hook, §6).
pub trait ByteStreamReader {
    fn read(&self, relative_path: &str) -> io::Result<Vec<u8>>;
}

/// Reads relative to the process's current working directory.
#[derive(Default)]
pub struct FsByteStreamReader;

impl ByteStreamReader for FsByteStreamReader {
    fn read(&self, relative_path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(relative_path)
    }
}

/// Probes the terminal width for the message builder's default wrap width
/// (§4.5). `FORCE_WIDTH` (consulted by the caller, not here) overrides this.
pub trait TerminalWidth {
    /// `0` means "no wrap" (the probe could not determine a width, or the
    /// sink is not a terminal).
    fn width(&self) -> usize;
}

#[derive(Default)]
pub struct RealTerminalWidth;

impl TerminalWidth for RealTerminalWidth {
    fn width(&self) -> usize {
        terminal_size::terminal_size()
            .map(|(terminal_size::Width(w), _)| w as usize)
            .unwrap_or(0)
    }
}

/// A fixed width, for tests and non-interactive hosts.
pub struct FixedWidth(pub usize);

impl TerminalWidth for FixedWidth {
    fn width(&self) -> usize {
        self.0
    }
}

/// Color policy, resolved once per invocation per §4.5: `NO_COLOR`
/// disables, `FORCE_COLOR` forces, otherwise enabled only when the sink is
/// a TTY.
pub fn color_enabled(env: &dyn EnvReader, sink_is_tty: bool) -> bool {
    if env.get("NO_COLOR").is_some() {
        return false;
    }
    if env.get("FORCE_COLOR").is_some() {
        return true;
    }
    sink_is_tty
}

/// The default wrap width: `FORCE_WIDTH` overrides the terminal probe;
/// `0` means "no wrap" per §4.5.
pub fn wrap_width(env: &dyn EnvReader, probe: &dyn TerminalWidth) -> usize {
    if let Some(forced) = env.get("FORCE_WIDTH") {
        if let Ok(w) = forced.parse::<usize>() {
            return w;
        }
    }
    probe.width()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_takes_precedence() {
        let env = OverlayEnvReader::new(vec![("FOO".to_string(), "bar".to_string())], false);
        assert_eq!(env.get("FOO").as_deref(), Some("bar"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn no_color_disables() {
        let env = OverlayEnvReader::new(vec![("NO_COLOR".to_string(), "1".to_string())], false);
        assert!(!color_enabled(&env, true));
    }

    #[test]
    fn force_color_enables() {
        let env = OverlayEnvReader::new(vec![("FORCE_COLOR".to_string(), "1".to_string())], false);
        assert!(color_enabled(&env, false));
    }

    #[test]
    fn force_width_overrides_probe() {
        let env = OverlayEnvReader::new(vec![("FORCE_WIDTH".to_string(), "42".to_string())], false);
        assert_eq!(wrap_width(&env, &FixedWidth(80)), 42);
    }

    #[test]
    fn probe_used_without_force_width() {
        let env = OverlayEnvReader::new(vec![], false);
        assert_eq!(wrap_width(&env, &FixedWidth(80)), 80);
    }
}
