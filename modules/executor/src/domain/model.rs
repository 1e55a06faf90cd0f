use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Environment kind a module declares; selects the executor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    Inline,
    Subprocess,
    NamedEnv,
    Container,
}

impl EnvKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Subprocess => "subprocess",
            Self::NamedEnv => "named_env",
            Self::Container => "container",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(Self::Inline),
            "subprocess" => Some(Self::Subprocess),
            "named_env" => Some(Self::NamedEnv),
            "container" => Some(Self::Container),
            _ => None,
        }
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single execution request: module name plus the JSON input object.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub module: String,
    pub input: Value,
}

/// Outcome of one execution attempt.
///
/// A non-zero exit code is the module's own fault, not a platform error;
/// callers receive it as a normal result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub result: Value,
    pub exit_code: i32,
    pub stderr: String,
    pub stdout: String,
    pub duration_seconds: f64,
}

impl ExecResult {
    /// Synthesize a failed result with no captured output.
    #[must_use]
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            result: Value::Object(serde_json::Map::new()),
            exit_code: 1,
            stderr: stderr.into(),
            stdout: String::new(),
            duration_seconds: 0.0,
        }
    }
}

/// Snapshot of a module's active deployment, as seen by the executors.
#[derive(Debug, Clone)]
pub struct ActiveModule {
    pub id: i32,
    pub name: String,
    pub env_kind: EnvKind,
    pub version_label: String,
    /// Inline source; present iff `env_kind == Inline`.
    pub code: Option<String>,
    /// Stored container image tag, when one was recorded at provision time.
    pub image_tag: Option<String>,
}

impl ActiveModule {
    /// Image a `container` module runs under: the stored tag, or the
    /// conventional `mod_<id>:latest` built by the provisioner.
    #[must_use]
    pub fn container_image(&self) -> String {
        self.image_tag
            .clone()
            .unwrap_or_else(|| format!("mod_{}:latest", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_kind_round_trips_through_strings() {
        for kind in [
            EnvKind::Inline,
            EnvKind::Subprocess,
            EnvKind::NamedEnv,
            EnvKind::Container,
        ] {
            assert_eq!(EnvKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EnvKind::parse("docker"), None);
    }

    #[test]
    fn failure_result_has_exit_code_one_and_empty_object() {
        let r = ExecResult::failure("boom");
        assert_eq!(r.exit_code, 1);
        assert_eq!(r.stderr, "boom");
        assert!(r.result.as_object().unwrap().is_empty());
    }

    #[test]
    fn container_image_falls_back_to_conventional_tag() {
        let module = ActiveModule {
            id: 7,
            name: "imgmod".to_owned(),
            env_kind: EnvKind::Container,
            version_label: "1.0".to_owned(),
            code: None,
            image_tag: None,
        };
        assert_eq!(module.container_image(), "mod_7:latest");
    }
}
