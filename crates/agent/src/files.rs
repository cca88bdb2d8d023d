//! File tools confined to a workspace root.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::tools::{
    ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolOutput, ToolSpec,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Relative roots are anchored at the current directory.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let absolute = if root.is_absolute() { root } else { std::env::current_dir()?.join(root) };
        Ok(Self { root: resolve_links(&normalize(&absolute))? })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `requested` against the root, refusing anything that lands outside it.
    /// Symlinks are followed before the containment check.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, String> {
        let candidate = Path::new(requested);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let resolved = resolve_links(&normalize(&joined))
            .map_err(|err| format!("path `{requested}` cannot be resolved: {err}"))?;

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(format!("path `{requested}` escapes the workspace root"))
        }
    }
}

/// Canonicalizes the deepest existing ancestor of `path` and re-appends the rest.
///
/// The missing tail cannot contain links. A dangling link is an error.
fn resolve_links(path: &Path) -> std::io::Result<PathBuf> {
    let mut missing = Vec::new();
    let mut cursor = path;
    loop {
        match std::fs::canonicalize(cursor) {
            Ok(mut real) => {
                real.extend(missing.into_iter().rev());
                return Ok(real);
            }
            Err(err) if err.kind() != ErrorKind::NotFound => return Err(err),
            Err(_) if std::fs::symlink_metadata(cursor).is_ok() => {
                return Err(std::io::Error::other(format!(
                    "`{}` is a dangling link",
                    cursor.display()
                )));
            }
            Err(_) => {}
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                cursor = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Simplified unified-diff application.
///
/// Header lines are skipped, `-line` removes the first occurrence of the trimmed text,
/// `+line` appends the trimmed text at the end. Context lines are ignored.
pub fn apply_simple_patch(original: &str, patch: &str) -> String {
    let mut updated = original.to_string();

    for line in patch.trim().lines() {
        if line.starts_with("---") || line.starts_with("+++") || line.starts_with("@@") {
            continue;
        }
        if let Some(removed) = line.strip_prefix('-') {
            let removed = removed.trim();
            if removed.is_empty() {
                continue;
            }
            let with_newline = format!("{removed}\n");
            if let Some(index) = updated.find(&with_newline) {
                updated.replace_range(index..index + with_newline.len(), "");
            } else if let Some(index) = updated.find(removed) {
                updated.replace_range(index..index + removed.len(), "");
            }
        } else if let Some(added) = line.strip_prefix('+') {
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(added.trim());
            updated.push('\n');
        }
    }

    updated
}

pub struct ReadFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec {
                name: "read_file",
                description: "Read the contents of a file.",
                params: vec![ParamSpec::required(
                    "file_path",
                    ParamKind::String,
                    "path of the file to read",
                )],
            },
            workspace,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let requested = args.str("file_path")?;
        let path = self
            .workspace
            .resolve(requested)
            .map_err(|err| ToolError::execution("read_file", err))?;

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(content) => format!("File content from {requested}:\n\n{content}"),
            Err(err) if err.kind() == ErrorKind::NotFound => format!("File not found: {requested}"),
            Err(err) => format!("Error reading file {requested}: {err}"),
        };
        Ok(ToolOutput::text(text))
    }
}

pub struct EditFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl EditFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec {
                name: "edit_file",
                description: "Edit a file by replacing old_string with new_string.",
                params: vec![
                    ParamSpec::required("file_path", ParamKind::String, "path of the file to edit"),
                    ParamSpec::required("old_string", ParamKind::String, "exact text to replace"),
                    ParamSpec::required("new_string", ParamKind::String, "replacement text"),
                ],
            },
            workspace,
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let requested = args.str("file_path")?;
        let old_string = args.str("old_string")?;
        let new_string = args.str("new_string")?;
        let path = self
            .workspace
            .resolve(requested)
            .map_err(|err| ToolError::execution("edit_file", err))?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ToolOutput::text(format!("File not found: {requested}")))
            }
            Err(err) => {
                return Ok(ToolOutput::text(format!("Error editing file {requested}: {err}")))
            }
        };

        if !content.contains(old_string) {
            return Ok(ToolOutput::text(format!(
                "Error: The string '{old_string}' was not found in {requested}"
            )));
        }

        let updated = content.replacen(old_string, new_string, 1);
        if let Err(err) = tokio::fs::write(&path, updated).await {
            return Ok(ToolOutput::text(format!("Error editing file {requested}: {err}")));
        }
        Ok(ToolOutput::text(format!("Successfully edited {requested}")))
    }
}

pub struct ApplyPatchTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl ApplyPatchTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec {
                name: "apply_patch",
                description: "Apply a patch/diff to a file.",
                params: vec![
                    ParamSpec::required(
                        "file_path",
                        ParamKind::String,
                        "path of the file to patch",
                    ),
                    ParamSpec::required(
                        "patch_content",
                        ParamKind::String,
                        "unified diff to apply",
                    ),
                ],
            },
            workspace,
        }
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let requested = args.str("file_path")?;
        let patch = args.str("patch_content")?;
        if patch.trim().is_empty() {
            return Ok(ToolOutput::text("Error: Empty patch content"));
        }
        let path = self
            .workspace
            .resolve(requested)
            .map_err(|err| ToolError::execution("apply_patch", err))?;

        let original = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ToolOutput::text(format!("File not found: {requested}")))
            }
            Err(err) => {
                return Ok(ToolOutput::text(format!("Error applying patch to {requested}: {err}")))
            }
        };

        let updated = apply_simple_patch(&original, patch);
        if let Err(err) = tokio::fs::write(&path, updated).await {
            return Ok(ToolOutput::text(format!("Error applying patch to {requested}: {err}")));
        }
        Ok(ToolOutput::text(format!("Successfully applied patch to {requested}")))
    }
}
