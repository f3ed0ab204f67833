//! Normalized preview recipes and the parts of recipe loading that do not
//! need a script engine: partial sources and the watch set.

use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::ProcessingContext;
use crate::error::{Error, Result};
use crate::paths::absolutize;
use crate::tracker::SourceOverrides;

/// Arguments of one helper invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperCall {
    pub name: String,
    pub params: Vec<Value>,
    pub hash: Map<String, Value>,
    /// `this` at the call site.
    pub context: Value,
    /// Present when invoked as `{{#name}}...{{/name}}`.
    pub block: Option<BlockState>,
}

/// Block bodies already rendered for the current block helper invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    pub has_inverse: bool,
    pub rendered: Vec<RenderedBlock>,
}

/// The output of `options.fn(context)` or `options.inverse(context)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedBlock {
    pub inverse: bool,
    /// Identifies the context the body was rendered against.
    pub key: String,
    pub output: String,
}

/// What a helper invocation produced.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HelperOutcome {
    Value(Value),
    /// The helper asked for a block body it has not seen yet. The caller
    /// renders it, records it in [`BlockState::rendered`] and calls again.
    RenderBlock { inverse: bool, key: String, context: Value },
}

/// A template helper. Helpers are synchronous and exchange JSON values.
pub trait TemplateHelper: Send + Sync {
    fn call(&self, call: &HelperCall) -> Result<HelperOutcome, String>;
}

impl<F> TemplateHelper for F
where
    F: Fn(&HelperCall) -> Result<Value, String> + Send + Sync,
{
    fn call(&self, call: &HelperCall) -> Result<HelperOutcome, String> {
        self(call).map(HelperOutcome::Value)
    }
}

/// A `preprocess` / `postprocess` text transform.
pub trait TextHook: Send + Sync {
    fn apply<'a>(&'a self, text: String, context: &'a ProcessingContext) -> BoxFuture<'a, Result<String, String>>;
}

/// Adapts a synchronous closure into a [`TextHook`].
pub struct FnHook<F>(pub F);

impl<F> TextHook for FnHook<F>
where
    F: Fn(String, &ProcessingContext) -> Result<String, String> + Send + Sync,
{
    fn apply<'a>(&'a self, text: String, context: &'a ProcessingContext) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(future::ready((self.0)(text, context)))
    }
}

/// Fully resolved recipe, ready for rendering.
#[derive(Clone, Default)]
pub struct ResolvedTemplatePreviewRecipe {
    pub title: Option<String>,
    pub data: Value,
    pub helpers: BTreeMap<String, Arc<dyn TemplateHelper>>,
    pub partials: BTreeMap<String, String>,
    /// File-backed partials only; every key is also in `partials`.
    pub partial_files: BTreeMap<String, PathBuf>,
    pub preprocess: Option<Arc<dyn TextHook>>,
    pub postprocess: Option<Arc<dyn TextHook>>,
    /// Absolute, normalized and deduplicated.
    pub watch_files: Vec<PathBuf>,
    pub module_dependencies: Vec<PathBuf>,
}

impl fmt::Debug for ResolvedTemplatePreviewRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTemplatePreviewRecipe")
            .field("title", &self.title)
            .field("data", &self.data)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .field("partial_files", &self.partial_files)
            .field("preprocess", &self.preprocess.is_some())
            .field("postprocess", &self.postprocess.is_some())
            .field("watch_files", &self.watch_files)
            .field("module_dependencies", &self.module_dependencies)
            .finish()
    }
}

impl ResolvedTemplatePreviewRecipe {
    /// The recipe used when a template has no companion module.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: Value::Object(Map::new()),
            ..Self::default()
        }
    }
}

/// A partial as declared by the companion module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialSource {
    Inline(String),
    File {
        file: String,
        encoding: Option<String>,
    },
}

impl PartialSource {
    /// Interpret one entry of a `partials` mapping.
    pub fn from_json(name: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(Self::Inline(text.clone())),
            Value::Object(map) => {
                let file = map
                    .get("file")
                    .and_then(Value::as_str)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| Error::PartialFileMissing { name: name.to_string() })?;
                Ok(Self::File {
                    file: file.to_string(),
                    encoding: map.get("encoding").and_then(Value::as_str).map(str::to_string),
                })
            }
            _ => Err(Error::PartialFileMissing { name: name.to_string() }),
        }
    }
}

/// Parse a whole `partials` mapping; `null` means none.
pub fn partial_sources_from_json(value: &Value) -> Result<BTreeMap<String, PartialSource>> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => map
            .iter()
            .map(|(name, v)| Ok((name.clone(), PartialSource::from_json(name, v)?)))
            .collect(),
        other => Err(Error::other(format!(
            "'partials' must be an object, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Partial text by name and file-backed partial paths by name.
pub type ResolvedPartials = (BTreeMap<String, String>, BTreeMap<String, PathBuf>);

/// Turn declared partials into text. File partials resolve against
/// `module_dir` and consult `overrides` before disk.
pub fn resolve_partials(
    sources: BTreeMap<String, PartialSource>,
    module_dir: &Path,
    overrides: &SourceOverrides,
) -> Result<ResolvedPartials> {
    let mut partials = BTreeMap::new();
    let mut files = BTreeMap::new();

    for (name, source) in sources {
        match source {
            PartialSource::Inline(text) => {
                partials.insert(name, text);
            }
            PartialSource::File { file, encoding } => {
                let path = absolutize(Path::new(&file), module_dir);
                let text = match overrides.lookup(&path) {
                    Some(text) => text.to_string(),
                    None => {
                        let bytes = std::fs::read(&path).map_err(|source| Error::PartialSource {
                            name: name.clone(),
                            path: path.clone(),
                            source,
                        })?;
                        decode(&name, &bytes, encoding.as_deref())?
                    }
                };
                partials.insert(name.clone(), text);
                files.insert(name, path);
            }
        }
    }
    Ok((partials, files))
}

/// Decode partial bytes with a Node-style encoding name.
pub fn decode(name: &str, bytes: &[u8], encoding: Option<&str>) -> Result<String> {
    let encoding = encoding.unwrap_or("utf8").to_ascii_lowercase();
    match encoding.as_str() {
        "utf8" | "utf-8" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "latin1" | "binary" => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        "ascii" => Ok(bytes.iter().map(|&b| char::from(b & 0x7f)).collect()),
        "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Ok(String::from_utf16_lossy(&units))
        }
        "hex" => Ok(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        _ => Err(Error::PartialEncoding {
            name: name.to_string(),
            encoding,
        }),
    }
}

/// Union of watch list, partial files and module dependencies, made
/// absolute against `module_dir`, normalized and deduplicated in order.
#[must_use]
pub fn compute_watch_set(
    watch_files: &[String],
    partial_files: &BTreeMap<String, PathBuf>,
    module_dependencies: &[PathBuf],
    module_dir: &Path,
) -> Vec<PathBuf> {
    let mut set: Vec<PathBuf> = Vec::new();
    let candidates = watch_files
        .iter()
        .map(PathBuf::from)
        .chain(partial_files.values().cloned())
        .chain(module_dependencies.iter().cloned());

    for path in candidates {
        let path = absolutize(&path, module_dir);
        if !set.contains(&path) {
            set.push(path);
        }
    }
    set
}

/// Interpret a resolved `watchFiles` value: a list of strings, a single
/// string, or nothing.
#[must_use]
pub fn watch_files_from_json(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
