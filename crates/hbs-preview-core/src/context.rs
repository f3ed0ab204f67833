use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-render value handed to every companion factory and text hook.
///
/// Created fresh for each render and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingContext {
    /// Absolute path of the template being previewed.
    pub template_path: PathBuf,
    /// Absolute path of the companion module. May not exist on disk.
    pub module_path: PathBuf,
    /// Workspace folder containing the template, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<PathBuf>,
}

impl ProcessingContext {
    #[must_use]
    pub fn new(template_path: impl Into<PathBuf>, module_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            module_path: module_path.into(),
            workspace_folder: None,
        }
    }

    #[must_use]
    pub fn with_workspace_folder(mut self, folder: Option<PathBuf>) -> Self {
        self.workspace_folder = folder;
        self
    }

    /// Directory of the companion module; relative recipe paths resolve here.
    #[must_use]
    pub fn module_dir(&self) -> PathBuf {
        crate::paths::parent_dir(&self.module_path)
    }

    #[must_use]
    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// The JSON form passed into scripts.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_serializes_camel_case() {
        let ctx = ProcessingContext::new("/t/card.hbs", "/t/card.hbs.js")
            .with_workspace_folder(Some(PathBuf::from("/t")));
        let json = ctx.to_json();
        assert_eq!(json["templatePath"], "/t/card.hbs");
        assert_eq!(json["modulePath"], "/t/card.hbs.js");
        assert_eq!(json["workspaceFolder"], "/t");
    }

    #[test]
    fn test_context_omits_missing_workspace() {
        let ctx = ProcessingContext::new("/t/card.hbs", "/t/card.hbs.ts");
        let json = ctx.to_json();
        assert!(json.get("workspaceFolder").is_none());
        assert_eq!(ctx.module_dir(), PathBuf::from("/t"));
    }
}
