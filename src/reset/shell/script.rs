//! Script materialization and the dispatcher control protocol.
//!
//! Each lifecycle phase is written to its own file with a strict-mode
//! preamble and the campaign's environment snapshot re-declared read-only.
//! A dispatcher script reads control lines on stdin:
//!
//! | Direction         | Line                          | Meaning                  |
//! |-------------------|-------------------------------|--------------------------|
//! | parent → shell    | `<exec-marker><script-path>`  | run one phase            |
//! | parent → shell    | `<exit-marker>`               | shut down                |
//! | shell → parent    | `<exitcode-marker><N>`        | phase finished with `N`  |
//!
//! Markers embed a per-session nonce so that script output cannot be
//! mistaken for control lines by accident.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

use crate::models::campaign::EnvSnapshot;
use crate::reset::shell::policy::{Phase, ShellScripts};
use crate::{AppError, Result};

/// `PS4` used by phase scripts; bash repeats its first character per nesting
/// level.
pub const TRACE_PS4: &str = "+~trace~ ";

/// Markers of one dispatcher session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMarkers {
    nonce: String,
    exec: String,
    exit: String,
    exitcode: String,
}

/// How the parent interprets one line of dispatcher output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// A phase finished with this exit code.
    ExitCode(i32),
    /// Shell execution trace.
    Trace(String),
    /// A marker-like line that is not part of the protocol.
    Unexpected(String),
    /// Genuine script output.
    Output(String),
}

impl ControlMarkers {
    /// Markers with a fresh random nonce.
    #[must_use]
    pub fn new() -> Self {
        Self::with_nonce(&Uuid::new_v4().simple().to_string())
    }

    /// Markers built around `nonce`.
    #[must_use]
    pub fn with_nonce(nonce: &str) -> Self {
        Self {
            nonce: nonce.to_owned(),
            exec: format!("#{nonce}#exec#"),
            exit: format!("#{nonce}#exit#"),
            exitcode: format!("#{nonce}#exitcode#"),
        }
    }

    /// Control line asking the dispatcher to run `script`.
    #[must_use]
    pub fn exec_line(&self, script: &Path) -> String {
        format!("{}{}\n", self.exec, script.display())
    }

    /// Control line asking the dispatcher to exit.
    #[must_use]
    pub fn exit_line(&self) -> String {
        format!("{}\n", self.exit)
    }

    /// Classify one line of dispatcher output.
    #[must_use]
    pub fn classify(&self, line: &str) -> ControlLine {
        if let Some(code) = line.strip_prefix(&self.exitcode) {
            return code
                .trim()
                .parse()
                .map_or_else(|_| ControlLine::Unexpected(line.to_owned()), ControlLine::ExitCode);
        }
        if is_trace(line) {
            return ControlLine::Trace(line.to_owned());
        }
        if line.contains(&self.nonce) {
            return ControlLine::Unexpected(line.to_owned());
        }
        ControlLine::Output(line.to_owned())
    }
}

impl Default for ControlMarkers {
    fn default() -> Self {
        Self::new()
    }
}

fn is_trace(line: &str) -> bool {
    let marker = &TRACE_PS4[1..];
    line.starts_with('+') && line.trim_start_matches('+').starts_with(marker)
}

fn env_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .unwrap_or_else(|_| unreachable!("static pattern compiles"))
    })
}

/// Quote `value` for safe inclusion in a bash script.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render the script file for one phase.
///
/// # Errors
///
/// Returns `AppError::Config` when an environment variable name is not a
/// valid shell identifier.
pub fn render_phase_script(
    phase: Phase,
    body: &str,
    env: &EnvSnapshot,
    exports_file: &Path,
) -> Result<String> {
    let mut script = String::new();
    let _ = writeln!(script, "# {phase} phase");
    script.push_str("set -o errexit\nset -o errtrace\nset -o nounset\nset -o pipefail\n");
    for (name, value) in env {
        if !env_name_pattern().is_match(name) {
            return Err(AppError::Config(format!(
                "environment variable name {name:?} is not a valid shell identifier"
            )));
        }
        let _ = writeln!(script, "declare -rx {name}={}", shell_quote(value));
    }
    let _ = writeln!(script, "PS4={}", shell_quote(TRACE_PS4));
    script.push_str("set -o xtrace\n");
    script.push_str(body);
    if !body.ends_with('\n') {
        script.push('\n');
    }
    script.push_str("{ set +o xtrace; } 2>/dev/null\n");
    let _ = writeln!(
        script,
        "export -p | grep -v -E '^declare -[a-zA-Z]*r[a-zA-Z]* ' > {} || true",
        shell_quote(&exports_file.display().to_string())
    );
    Ok(script)
}

/// Render the dispatcher loop.
#[must_use]
pub fn render_dispatcher(markers: &ControlMarkers, exports_file: &Path) -> String {
    let mut script = String::new();
    script.push_str("# lifecycle dispatcher\nset -o nounset\n");
    let _ = writeln!(script, "__exec_marker={}", shell_quote(&markers.exec));
    let _ = writeln!(script, "__exit_marker={}", shell_quote(&markers.exit));
    let _ = writeln!(script, "__exitcode_marker={}", shell_quote(&markers.exitcode));
    let _ = writeln!(
        script,
        "__exports_file={}",
        shell_quote(&exports_file.display().to_string())
    );
    script.push_str(
        r#"while IFS= read -r __line; do
  case "$__line" in
    "$__exit_marker")
      break
      ;;
    "$__exec_marker"*)
      __script="${__line#"$__exec_marker"}"
      : > "$__exports_file"
      ( source "$__script" ) </dev/null 2>&1
      __code=$?
      if [ "$__code" -eq 0 ] && [ -s "$__exports_file" ]; then
        source "$__exports_file"
      fi
      printf '%s%d\n' "$__exitcode_marker" "$__code"
      ;;
    *)
      printf 'unexpected control line: %s\n' "$__line"
      ;;
  esac
done
"#,
    );
    script
}

/// Scripts written to disk for one dispatcher session.
///
/// The directory is removed when the set is dropped.
#[derive(Debug)]
pub struct ScriptSet {
    dir: TempDir,
    dispatcher: PathBuf,
    phases: HashMap<Phase, PathBuf>,
}

impl ScriptSet {
    /// Write the dispatcher and every defined phase script to a fresh
    /// temporary directory.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` for an invalid environment variable name.
    /// - `AppError::Io` when the files cannot be written.
    pub fn materialize(
        scripts: &ShellScripts,
        env: &EnvSnapshot,
        markers: &ControlMarkers,
    ) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("campaign-resetter-")
            .tempdir()?;
        let exports_file = dir.path().join("exports.bash");

        let mut phases = HashMap::new();
        for phase in Phase::ALL {
            if let Some(body) = scripts.get(phase) {
                let path = dir.path().join(format!("{phase}.bash"));
                std::fs::write(&path, render_phase_script(phase, body, env, &exports_file)?)?;
                phases.insert(phase, path);
            }
        }

        let dispatcher = dir.path().join("dispatcher.bash");
        std::fs::write(&dispatcher, render_dispatcher(markers, &exports_file))?;

        debug!(dir = %dir.path().display(), phases = phases.len(), "lifecycle scripts materialized");
        Ok(Self {
            dir,
            dispatcher,
            phases,
        })
    }

    /// Path of the dispatcher script.
    #[must_use]
    pub fn dispatcher(&self) -> &Path {
        &self.dispatcher
    }

    /// Path of the script for `phase`, when defined.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> Option<&Path> {
        self.phases.get(&phase).map(PathBuf::as_path)
    }

    /// Directory holding the scripts.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
