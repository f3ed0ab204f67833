//! Host ops backing the bootstrap script: logging, the builtin `fs` shim,
//! `process.env` and CommonJS `require`.

use deno_core::error::AnyError;
use deno_core::{extension, op2, OpState};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use hbs_preview_core::paths::to_slash;
use hbs_preview_core::{LoadFrame, ModuleServices};

use crate::builtins;

extension!(
    hbs_preview_ops,
    ops = [
        op_preview_log,
        op_preview_read_text_file,
        op_preview_file_exists,
        op_preview_read_dir,
        op_preview_env_get,
        op_preview_platform,
        op_preview_cwd,
        op_preview_require_resolve,
        op_preview_require_source,
    ],
);

fn frame(state: &OpState) -> Rc<LoadFrame> {
    state.borrow::<Rc<LoadFrame>>().clone()
}

fn services(state: &OpState) -> Arc<ModuleServices> {
    state.borrow::<Arc<ModuleServices>>().clone()
}

/// `console.*` from scripts.
#[op2(fast)]
fn op_preview_log(#[string] level: &str, #[string] message: &str) {
    match level {
        "error" => tracing::error!(target: "hbs_preview::script", "{message}"),
        "warn" => tracing::warn!(target: "hbs_preview::script", "{message}"),
        "debug" => tracing::debug!(target: "hbs_preview::script", "{message}"),
        _ => tracing::info!(target: "hbs_preview::script", "{message}"),
    }
}

/// Read a text file, preferring an in-memory buffer for the same path.
#[op2]
#[string]
fn op_preview_read_text_file(state: &mut OpState, #[string] path: String) -> Result<String, AnyError> {
    let path = PathBuf::from(path);
    if let Some(text) = frame(state).source_override(&path) {
        return Ok(text.to_string());
    }
    std::fs::read_to_string(&path).map_err(|e| AnyError::msg(format!("{}: {e}", path.display())))
}

#[op2(fast)]
fn op_preview_file_exists(state: &mut OpState, #[string] path: String) -> bool {
    let path = Path::new(&path);
    frame(state).source_override(path).is_some() || path.exists()
}

#[op2]
#[serde]
fn op_preview_read_dir(#[string] path: String) -> Result<Vec<String>, AnyError> {
    let mut names = std::fs::read_dir(&path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

#[op2]
#[string]
fn op_preview_env_get(#[string] key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// `process.platform`, spelled the way Node spells it.
#[op2]
#[string]
fn op_preview_platform() -> String {
    node_platform(std::env::consts::OS).to_string()
}

fn node_platform(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

#[op2]
#[string]
fn op_preview_cwd() -> Result<String, AnyError> {
    Ok(to_slash(&std::env::current_dir()?))
}

/// Resolve a `require()` specifier. Builtins come back as `node:<name>`.
#[op2]
#[string]
fn op_preview_require_resolve(
    state: &mut OpState,
    #[string] specifier: String,
    #[string] referrer: String,
) -> Result<String, AnyError> {
    if let Some(name) = builtins::builtin_name(&specifier) {
        return Ok(format!("node:{name}"));
    }
    let frame = frame(state);
    let path = services(state).resolve(&specifier, Path::new(&referrer), &frame)?;
    Ok(to_slash(&path))
}

/// Executable text of a resolved `require()` target. TypeScript comes back
/// compiled to CommonJS.
#[op2]
#[string]
fn op_preview_require_source(state: &mut OpState, #[string] path: String) -> Result<String, AnyError> {
    let frame = frame(state);
    let services = services(state);
    let path = Path::new(&path);
    let source = services.read_source(path, &frame)?;
    Ok(services.compile_commonjs(path, &source, &frame)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_platform_names() {
        assert_eq!(node_platform("macos"), "darwin");
        assert_eq!(node_platform("windows"), "win32");
        assert_eq!(node_platform("linux"), "linux");
    }
}
