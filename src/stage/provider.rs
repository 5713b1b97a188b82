//! Model providers and the registry the dispatcher resolves them from.
//!
//! A provider knows how to turn a prompt and model name into a command line.
//! It never runs anything itself; [`ProcessInvoker`](super::ProcessInvoker)
//! does that.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::StageFailure;

/// Concrete command for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, then stdin is closed.
    pub stdin: Option<String>,
}

pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn build_request(&self, prompt: &str, model: Option<&str>) -> ProviderCommand;

    /// Checked before every call. A missing tool is an environment failure,
    /// never a retryable one.
    fn validate_availability(&self) -> Result<(), StageFailure>;
}

/// Which CLI dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Claude,
    Codex,
    Gemini,
    /// Any other program: prompt on stdin, `--model` when set.
    Stdin,
}

/// A provider backed by a locally installed CLI.
#[derive(Debug, Clone)]
pub struct CliProvider {
    id: String,
    program: String,
    dialect: Dialect,
}

impl CliProvider {
    pub fn claude(program: impl Into<String>) -> Self {
        Self {
            id: "claude".to_string(),
            program: program.into(),
            dialect: Dialect::Claude,
        }
    }

    pub fn codex(program: impl Into<String>) -> Self {
        Self {
            id: "codex".to_string(),
            program: program.into(),
            dialect: Dialect::Codex,
        }
    }

    pub fn gemini(program: impl Into<String>) -> Self {
        Self {
            id: "gemini".to_string(),
            program: program.into(),
            dialect: Dialect::Gemini,
        }
    }

    /// A program declared under `[providers]` that is none of the known CLIs.
    pub fn custom(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            dialect: Dialect::Stdin,
        }
    }

    fn install_hint(&self) -> &'static str {
        match self.dialect {
            Dialect::Stdin => "check the [providers] table in .harness/harness.toml",
            Dialect::Claude => "install it with `npm install -g @anthropic-ai/claude-code`",
            Dialect::Codex => "install it with `npm install -g @openai/codex`",
            Dialect::Gemini => "install it with `npm install -g @google/gemini-cli`",
        }
    }
}

impl Provider for CliProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn build_request(&self, prompt: &str, model: Option<&str>) -> ProviderCommand {
        let mut args: Vec<String> = match self.dialect {
            Dialect::Claude => vec![
                "--print".into(),
                "--dangerously-skip-permissions".into(),
                "--output-format".into(),
                "text".into(),
            ],
            Dialect::Codex => vec![
                "exec".into(),
                "--full-auto".into(),
                "--skip-git-repo-check".into(),
            ],
            Dialect::Gemini => vec!["--yolo".into()],
            Dialect::Stdin => Vec::new(),
        };

        if let Some(model) = model.filter(|m| !m.is_empty()) {
            match self.dialect {
                Dialect::Claude | Dialect::Stdin => args.push("--model".into()),
                Dialect::Codex | Dialect::Gemini => args.push("-m".into()),
            }
            args.push(model.to_string());
        }

        // codex reads the prompt from stdin when given "-"
        if self.dialect == Dialect::Codex {
            args.push("-".into());
        }

        ProviderCommand {
            program: self.program.clone(),
            args,
            stdin: Some(prompt.to_string()),
        }
    }

    fn validate_availability(&self) -> Result<(), StageFailure> {
        if program_available(&self.program) {
            Ok(())
        } else {
            Err(StageFailure::environment(
                format!("'{}' was not found on PATH", self.program),
                self.install_hint(),
            ))
        }
    }
}

/// True when `program` is an executable path or resolves through `PATH`.
pub fn program_available(program: &str) -> bool {
    let program = program.trim();
    if program.is_empty() {
        return false;
    }
    if program.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(std::path::Path::new(program));
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| is_executable(&dir.join(program)))
}

fn is_executable(candidate: &std::path::Path) -> bool {
    if !candidate.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(candidate)
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Providers keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// claude, codex and gemini, each invoked by its usual program name.
    pub fn with_defaults() -> Self {
        Self::with_commands(&BTreeMap::new())
    }

    /// Defaults with per-provider program overrides (e.g. a wrapper script).
    pub fn with_commands(overrides: &BTreeMap<String, String>) -> Self {
        let program = |id: &str| overrides.get(id).cloned().unwrap_or_else(|| id.to_string());
        let mut registry = Self::new();
        registry.register(Arc::new(CliProvider::claude(program("claude"))));
        registry.register(Arc::new(CliProvider::codex(program("codex"))));
        registry.register(Arc::new(CliProvider::gemini(program("gemini"))));
        for (id, command) in overrides {
            if !registry.contains(id) {
                registry.register(Arc::new(CliProvider::custom(id.clone(), command.clone())));
            }
        }
        registry
    }

    /// Adds or replaces a provider under its own id.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Provider>, StageFailure> {
        self.providers.get(id).cloned().ok_or_else(|| {
            StageFailure::environment(
                format!("Unknown provider '{}'", id),
                format!(
                    "choose one of: {}",
                    self.ids().collect::<Vec<_>>().join(", ")
                ),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureClass;

    #[test]
    fn defaults_register_three_providers() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["claude", "codex", "gemini"]);
    }

    #[test]
    fn unknown_provider_is_an_environment_failure() {
        let err = ProviderRegistry::with_defaults().resolve("llama").err().unwrap();
        assert_eq!(err.class(), FailureClass::Environment);
        assert!(err.to_string().contains("claude, codex, gemini"));
    }

    #[test]
    fn claude_request_passes_model_and_prompt_on_stdin() {
        let cmd = CliProvider::claude("claude").build_request("do it", Some("opus"));
        assert_eq!(cmd.program, "claude");
        assert!(cmd.args.contains(&"--print".to_string()));
        let model_at = cmd.args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(cmd.args[model_at + 1], "opus");
        assert_eq!(cmd.stdin.as_deref(), Some("do it"));
    }

    #[test]
    fn codex_reads_prompt_from_stdin_marker() {
        let cmd = CliProvider::codex("codex").build_request("p", None);
        assert_eq!(cmd.args.first().map(String::as_str), Some("exec"));
        assert_eq!(cmd.args.last().map(String::as_str), Some("-"));
        assert!(!cmd.args.contains(&"-m".to_string()));
    }

    #[test]
    fn missing_program_fails_validation_with_hint() {
        let provider = CliProvider::gemini("definitely-not-a-real-binary-xyz");
        let err = provider.validate_availability().unwrap_err();
        assert_eq!(err.class(), FailureClass::Environment);
        assert!(err.to_string().contains("gemini-cli"));
    }

    #[test]
    fn overrides_replace_program_name() {
        let mut overrides = BTreeMap::new();
        overrides.insert("claude".to_string(), "/opt/bin/claude-wrapper".to_string());
        let registry = ProviderRegistry::with_commands(&overrides);
        let cmd = registry.resolve("claude").unwrap().build_request("x", None);
        assert_eq!(cmd.program, "/opt/bin/claude-wrapper");
    }

    #[test]
    fn unknown_override_ids_become_stdin_providers() {
        let mut overrides = BTreeMap::new();
        overrides.insert("local".to_string(), "/usr/bin/my-model".to_string());
        let registry = ProviderRegistry::with_commands(&overrides);
        assert!(registry.contains("local"));

        let cmd = registry.resolve("local").unwrap().build_request("x", Some("small"));
        assert_eq!(cmd.program, "/usr/bin/my-model");
        assert_eq!(cmd.args, vec!["--model".to_string(), "small".to_string()]);
        assert_eq!(cmd.stdin.as_deref(), Some("x"));
    }
}
