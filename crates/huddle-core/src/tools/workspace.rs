//! File and shell tools confined to an agent workspace directory

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ToolContext, ToolHandler, ToolRegistry, json_schema, str_arg};

const MAX_READ_BYTES: usize = 100_000;
const MAX_COMMAND_LENGTH: usize = 1000;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// First words an `exec` call may start with
const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "wc", "echo", "date", "pwd", "file", "stat", "du", "grep", "find",
    "sort", "uniq", "cut", "awk", "sed", "tr", "basename", "dirname", "mkdir", "cp", "touch",
    "tar", "gzip", "git", "cargo", "npm", "npx", "go", "make", "cmake",
];

/// Read, write, edit, list and exec tools rooted at `root`
pub fn workspace_tools(root: impl Into<PathBuf>) -> ToolRegistry {
    let root = Arc::new(root.into());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool { root: root.clone() }));
    registry.register(Arc::new(WriteFileTool { root: root.clone() }));
    registry.register(Arc::new(EditFileTool { root: root.clone() }));
    registry.register(Arc::new(ListDirTool { root: root.clone() }));
    registry.register(Arc::new(ExecTool { root }));
    registry
}

/// Resolve `path` inside `root`, rejecting anything that escapes it
fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let relative = relative.strip_prefix(root).unwrap_or(relative);
    if relative.is_absolute() {
        return Err(anyhow!("Access denied: '{}' is outside the workspace", path));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(anyhow!("Path '{}' is not allowed", path)),
        }
    }
    Ok(root.join(relative))
}

pub struct ReadFileTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "path": { "type": "string", "description": "File path relative to the workspace" }
            }),
            vec!["path"],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<String> {
        let path = resolve(&self.root, str_arg(&input, "path")?)?;
        debug!("Reading file: {}", path.display());
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if content.len() > MAX_READ_BYTES {
            let mut end = MAX_READ_BYTES;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            return Ok(format!("{}\n\n[truncated at {} bytes]", &content[..end], end));
        }
        Ok(content)
    }
}

pub struct WriteFileTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file in the workspace, creating parent directories as needed."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "path": { "type": "string", "description": "File path relative to the workspace" },
                "content": { "type": "string", "description": "Full file content" }
            }),
            vec!["path", "content"],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<String> {
        let path = resolve(&self.root, str_arg(&input, "path")?)?;
        let content = input
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'content' parameter"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", path.display()))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}

/// Replaces one exact occurrence of a snippet
pub struct EditFileTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a workspace file. The snippet must occur exactly once."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "path": { "type": "string", "description": "File path relative to the workspace" },
                "old_text": { "type": "string", "description": "Text to replace" },
                "new_text": { "type": "string", "description": "Replacement text" }
            }),
            vec!["path", "old_text", "new_text"],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<String> {
        let path = resolve(&self.root, str_arg(&input, "path")?)?;
        let old_text = str_arg(&input, "old_text")?;
        let new_text = input
            .get("new_text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'new_text' parameter"))?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        match content.matches(old_text).count() {
            0 => Err(anyhow!("Text not found in {}", path.display())),
            1 => {
                tokio::fs::write(&path, content.replacen(old_text, new_text, 1))
                    .await
                    .with_context(|| format!("Failed to write file: {}", path.display()))?;
                Ok(format!("Edited {}", path.display()))
            }
            n => Err(anyhow!("Text occurs {} times in {}; make it unique", n, path.display())),
        }
    }
}

pub struct ListDirTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List files and directories in the workspace."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "path": { "type": "string", "description": "Directory relative to the workspace (default: root)" }
            }),
            vec![],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<String> {
        let path_str = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let dir = resolve(&self.root, path_str)?;
        debug!("Listing directory: {}", dir.display());

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                entries.push(format!("{}/", name));
            } else {
                entries.push(name);
            }
        }
        entries.sort();

        if entries.is_empty() {
            return Ok("Directory is empty.".to_string());
        }
        Ok(entries.join("\n"))
    }
}

/// Runs an allowlisted shell command inside the workspace
pub struct ExecTool {
    root: Arc<PathBuf>,
}

impl ExecTool {
    fn check(command: &str) -> Result<()> {
        if command.len() > MAX_COMMAND_LENGTH {
            return Err(anyhow!(
                "Command exceeds maximum length of {} characters",
                MAX_COMMAND_LENGTH
            ));
        }
        for op in ["`", "$(", ">>", ">", "<(", ">("] {
            if command.contains(op) {
                warn!("Blocked command containing shell operator '{}': {}", op, command);
                return Err(anyhow!("Command blocked: shell operator '{}' is not allowed", op));
            }
        }
        let segments: Vec<&str> = command
            .split(['|', ';', '&', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(anyhow!("Empty command"));
        }
        for segment in segments {
            let first = segment.split_whitespace().next().unwrap_or_default();
            if !ALLOWED_COMMANDS.contains(&first) {
                warn!("Blocked command not in allowlist: '{}'", first);
                return Err(anyhow!("Command '{}' is not in the allowlist", first));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ToolHandler for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run an allowlisted shell command in the workspace directory."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "command": { "type": "string", "description": "Shell command to execute" }
            }),
            vec!["command"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let command = str_arg(&input, "command")?;
        Self::check(command)?;
        debug!("{} running command: {}", ctx.agent_name, command);

        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(self.root.as_path())
                .output(),
        )
        .await
        .map_err(|_| anyhow!("Command timed out after {} seconds", COMMAND_TIMEOUT.as_secs()))?
        .context("Failed to execute command")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str("STDOUT:\n");
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push_str("\n\n");
            }
            result.push_str("STDERR:\n");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            result.push_str(&format!("\n\nExit code: {}", output.status.code().unwrap_or(-1)));
        }
        if result.is_empty() {
            result.push_str("(no output)");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/work");
        assert_eq!(resolve(root, "a/b.txt").unwrap(), PathBuf::from("/work/a/b.txt"));
        assert_eq!(resolve(root, "/work/a.txt").unwrap(), PathBuf::from("/work/a.txt"));
        assert!(resolve(root, "../etc/passwd").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_write_edit_read_list() {
        let temp = TempDir::new().unwrap();
        let tools = workspace_tools(temp.path());

        tools
            .execute("write_file", &ctx(), serde_json::json!({"path": "src/lib.txt", "content": "hello world"}))
            .await
            .unwrap();
        tools
            .execute(
                "edit_file",
                &ctx(),
                serde_json::json!({"path": "src/lib.txt", "old_text": "world", "new_text": "team"}),
            )
            .await
            .unwrap();
        let content = tools
            .execute("read_file", &ctx(), serde_json::json!({"path": "src/lib.txt"}))
            .await
            .unwrap();
        assert_eq!(content, "hello team");

        let listing = tools
            .execute("list_dir", &ctx(), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(listing, "src/");
    }

    #[tokio::test]
    async fn test_edit_requires_unique_match() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "x x").unwrap();
        let tools = workspace_tools(temp.path());
        let result = tools
            .execute("edit_file", &ctx(), serde_json::json!({"path": "a.txt", "old_text": "x", "new_text": "y"}))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_exec_allowlist() {
        assert!(ExecTool::check("ls -la | grep rs").is_ok());
        assert!(ExecTool::check("rm -rf /").is_err());
        assert!(ExecTool::check("echo hi > out.txt").is_err());
        assert!(ExecTool::check("ls; curl example.com").is_err());
    }

    #[tokio::test]
    async fn test_exec_runs_in_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "").unwrap();
        let tools = workspace_tools(temp.path());
        let out = tools
            .execute("exec", &ctx(), serde_json::json!({"command": "ls"}))
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }
}
