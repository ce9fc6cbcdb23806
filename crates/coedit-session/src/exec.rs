//! Code execution contract and the Piston-style HTTP executor.
//!
//! The session never runs code itself. The UI calls an [`ExecutionService`],
//! renders the result, and hands the string to
//! [`RoomSession::publish_output`](crate::session::RoomSession::publish_output).

use std::time::Duration;

use async_trait::async_trait;
use coedit_common::CoeditError;
use coedit_config::ExecutionConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rendered in place of a result when execution could not complete.
pub const EXECUTION_FAILED: &str = "Error: Failed to execute code";

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Java,
    Cpp,
    C,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Javascript,
        Language::Java,
        Language::Cpp,
        Language::C,
    ];

    /// Runtime name understood by the executor.
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
        }
    }

    pub fn default_version(self) -> &'static str {
        match self {
            Self::Python => "3.10.0",
            Self::Javascript => "18.15.0",
            Self::Java => "15.0.2",
            Self::Cpp | Self::C => "10.2.0",
        }
    }

    /// Starter program for a fresh document.
    pub fn template(self) -> &'static str {
        match self {
            Self::Python => "print(\"Hello World!\")\n",
            Self::Javascript => "console.log(\"Hello World!\");\n",
            Self::Java => {
                "public class Main {\n    public static void main(String[] args) {\n        System.out.println(\"Hello World!\");\n    }\n}\n"
            }
            Self::Cpp => {
                "#include <iostream>\n\nint main() {\n    std::cout << \"Hello World!\" << std::endl;\n    return 0;\n}\n"
            }
            Self::C => {
                "#include <stdio.h>\n\nint main() {\n    printf(\"Hello World!\\n\");\n    return 0;\n}\n"
            }
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.id() == id)
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: String,
    pub version: String,
    pub source: String,
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    /// A request for `language` at its default version.
    pub fn new(language: Language, source: impl Into<String>) -> Self {
        Self {
            language: language.id().to_string(),
            version: language.default_version().to_string(),
            source: source.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        let stdin = stdin.into();
        self.stdin = (!stdin.is_empty()).then_some(stdin);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Interleaved stdout and stderr, as the runtime saw them.
    #[serde(default)]
    pub output: String,
}

impl ExecutionResult {
    /// The text shown in every participant's output pane.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if !self.output.is_empty() {
            lines.push(format!("Output: {}", self.output));
        }
        if !self.stderr.is_empty() {
            lines.push(format!("Error: {}", self.stderr));
        }
        if lines.is_empty() {
            return "No output".to_string();
        }
        lines.join("\n")
    }
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, CoeditError>;
}

// ---------------------------------------------------------------------------
// Piston executor
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PistonFile<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct PistonRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<PistonFile<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<&'a str>,
}

#[derive(Deserialize)]
struct PistonResponse {
    run: Option<ExecutionResult>,
    message: Option<String>,
}

/// [`ExecutionService`] backed by a Piston-compatible HTTP API.
pub struct PistonExecutor {
    endpoint: String,
    http: reqwest::Client,
}

impl PistonExecutor {
    pub fn new(config: &ExecutionConfig) -> Result<Self, CoeditError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(u64::from(config.timeout_secs)))
            .build()
            .map_err(|e| CoeditError::Execution(e.to_string()))?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self) -> String {
        format!("{}/execute", self.endpoint)
    }
}

#[async_trait]
impl ExecutionService for PistonExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, CoeditError> {
        debug!(
            language = %request.language,
            version = %request.version,
            size = request.source.len(),
            "Execution request"
        );

        let body = PistonRequest {
            language: &request.language,
            version: &request.version,
            files: vec![PistonFile {
                content: &request.source,
            }],
            stdin: request.stdin.as_deref(),
        };

        let response = self
            .http
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(|e| CoeditError::Execution(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoeditError::Execution(format!("HTTP {status}: {text}")));
        }

        let parsed: PistonResponse = response
            .json()
            .await
            .map_err(|e| CoeditError::Execution(e.to_string()))?;

        parsed.run.ok_or_else(|| {
            CoeditError::Execution(
                parsed
                    .message
                    .unwrap_or_else(|| "response has no run section".to_string()),
            )
        })
    }
}

/// Run `request` and render whatever came back, failures included.
pub async fn execute_and_render(service: &dyn ExecutionService, request: ExecutionRequest) -> String {
    match service.execute(request).await {
        Ok(result) => result.render(),
        Err(e) => {
            tracing::warn!(error = %e, "Execution failed");
            EXECUTION_FAILED.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_shows_output_and_errors() {
        let result = ExecutionResult {
            stdout: "3\n".into(),
            stderr: "warning\n".into(),
            output: "3\nwarning\n".into(),
        };
        assert_eq!(result.render(), "Output: 3\nwarning\n\nError: warning\n");
    }

    #[test]
    fn render_empty_is_no_output() {
        assert_eq!(ExecutionResult::default().render(), "No output");
    }

    #[test]
    fn render_stderr_only() {
        let result = ExecutionResult {
            stderr: "Traceback".into(),
            ..Default::default()
        };
        assert_eq!(result.render(), "Error: Traceback");
    }

    #[test]
    fn language_table() {
        assert_eq!(Language::from_id("python"), Some(Language::Python));
        assert_eq!(Language::from_id("rust"), None);
        assert_eq!(Language::Javascript.default_version(), "18.15.0");
        assert_eq!(Language::Java.default_version(), "15.0.2");
        assert_eq!(Language::C.default_version(), "10.2.0");
        assert!(Language::Java.template().contains("class Main"));
        for language in Language::ALL {
            assert!(language.template().contains("Hello World!"));
        }
    }

    #[test]
    fn request_body_matches_piston() {
        let request = ExecutionRequest::new(Language::Python, "print(input())").with_stdin("5");
        let body = PistonRequest {
            language: &request.language,
            version: &request.version,
            files: vec![PistonFile {
                content: &request.source,
            }],
            stdin: request.stdin.as_deref(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "language": "python",
                "version": "3.10.0",
                "files": [{"content": "print(input())"}],
                "stdin": "5",
            })
        );
    }

    #[test]
    fn empty_stdin_is_omitted() {
        let request = ExecutionRequest::new(Language::C, "int main(){}").with_stdin("");
        assert_eq!(request.stdin, None);
    }

    #[test]
    fn piston_response_without_run_is_detected() {
        let parsed: PistonResponse =
            serde_json::from_str(r#"{"message": "runtime is unknown"}"#).unwrap();
        assert!(parsed.run.is_none());
        assert_eq!(parsed.message.as_deref(), Some("runtime is unknown"));

        let parsed: PistonResponse = serde_json::from_str(
            r#"{"language":"python","version":"3.10.0","run":{"stdout":"hi\n","stderr":"","output":"hi\n","code":0}}"#,
        )
        .unwrap();
        assert_eq!(parsed.run.unwrap().render(), "Output: hi\n");
    }

    struct Broken;

    #[async_trait]
    impl ExecutionService for Broken {
        async fn execute(&self, _request: ExecutionRequest) -> Result<ExecutionResult, CoeditError> {
            Err(CoeditError::Execution("down".into()))
        }
    }

    #[tokio::test]
    async fn failures_render_as_error_line() {
        let rendered = execute_and_render(&Broken, ExecutionRequest::new(Language::Python, "x")).await;
        assert_eq!(rendered, EXECUTION_FAILED);
    }
}
