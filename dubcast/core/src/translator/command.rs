//! External translator program adapter

use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::{TranslationError, TranslationRequest, Translator};
use crate::config::TranslatorConfig;

/// Runs a translator executable once per chunk
///
/// Arguments are templates; `{input}`, `{source}`, `{target}` and `{profile}`
/// are substituted per call. The last non-empty line the program prints on
/// stdout is taken as the path of the translated audio.
///
/// This runs on the blocking worker pool, so it uses `std::process`.
#[derive(Clone, Debug)]
pub struct CommandTranslator {
    program: String,
    args: Vec<String>,
}

impl CommandTranslator {
    /// Create from a program and argument templates
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn render_args(&self, request: &TranslationRequest) -> Vec<String> {
        let input = request.audio_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{source}", &request.source_language)
                    .replace("{target}", &request.target_language)
                    .replace("{profile}", &request.model_profile)
            })
            .collect()
    }
}

impl Translator for CommandTranslator {
    fn translate(&self, request: &TranslationRequest) -> Result<PathBuf, TranslationError> {
        let output = Command::new(&self.program)
            .args(self.render_args(request))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TranslationError::Launch(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(TranslationError::CommandFailed {
                status: output.status.to_string(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or(TranslationError::MissingOutput { path: None })?;

        if !path.is_file() {
            return Err(TranslationError::MissingOutput { path: Some(path) });
        }
        Ok(path)
    }
}
