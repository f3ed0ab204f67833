//! Script realms.
//!
//! Every recipe load runs in a fresh realm: its own V8 isolate with its own
//! module map, owned by a dedicated thread with a current-thread tokio
//! runtime. After the load the thread stays up serving helper and hook
//! calls until the last [`RealmHandle`] is dropped.

use deno_core::error::AnyError;
use deno_core::futures::future::LocalBoxFuture;
use deno_core::futures::FutureExt;
use deno_core::{v8, JsRuntime, ModuleSpecifier, PollEventLoopOptions, RuntimeOptions};
use serde_json::{Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use hbs_preview_core::recipe::watch_files_from_json;
use hbs_preview_core::{Error, HelperCall, HelperOutcome, LoadFrame, ModuleServices, Result, SourceOverrides};

use crate::loader::{self, PreviewModuleLoader, ENTRY_SPECIFIER};
use crate::ops::hbs_preview_ops;
use crate::shape::{merge, ExportShape, RecipeFields, ValueKind, MAX_RECIPE_DEPTH};

const BOOTSTRAP_JS: &str = include_str!("js/bootstrap.js");

/// Everything a realm thread needs to run one load.
pub(crate) struct LoadJob {
    pub module_path: PathBuf,
    pub module_source: Option<String>,
    pub dependency_sources: SourceOverrides,
    pub workspace_root: Option<PathBuf>,
    pub context: Value,
    pub services: Arc<ModuleServices>,
}

/// Raw recipe parts produced inside the realm.
#[derive(Debug, Default)]
pub(crate) struct LoadedRecipe {
    pub title: Option<String>,
    pub data: Value,
    pub helpers: Vec<(String, u32)>,
    pub partials: Value,
    pub watch_files: Vec<String>,
    pub preprocess: Option<u32>,
    pub postprocess: Option<u32>,
    pub dependencies: Vec<PathBuf>,
}

pub(crate) enum Call {
    Helper {
        id: u32,
        call: HelperCall,
        reply: oneshot::Sender<Result<HelperOutcome, String>>,
    },
    Hook {
        id: u32,
        name: &'static str,
        text: String,
        context: Value,
        reply: oneshot::Sender<Result<String, String>>,
    },
}

/// Sending half of a live realm.
#[derive(Debug)]
pub(crate) struct RealmHandle {
    calls: mpsc::UnboundedSender<Call>,
}

impl RealmHandle {
    pub fn send(&self, call: Call) -> Result<(), String> {
        self.calls.send(call).map_err(|_| Error::RealmUnavailable.to_string())
    }
}

/// Run `job` on a new realm thread.
pub(crate) async fn spawn_load(job: LoadJob) -> Result<(Arc<RealmHandle>, LoadedRecipe)> {
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("hbs-preview-realm".to_string())
        .spawn(move || run_realm(job, calls_rx, done_tx))?;

    let loaded = done_rx.await.map_err(|_| Error::RealmUnavailable)??;
    Ok((Arc::new(RealmHandle { calls: calls_tx }), loaded))
}

fn run_realm(job: LoadJob, calls: mpsc::UnboundedReceiver<Call>, done: oneshot::Sender<Result<LoadedRecipe>>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = done.send(Err(Error::Io(e)));
            return;
        }
    };

    rt.block_on(async move {
        let frame = Rc::new(LoadFrame::new(
            job.module_path,
            job.module_source,
            job.dependency_sources,
            job.workspace_root,
        ));
        let mut realm = match Realm::new(frame, job.services) {
            Ok(realm) => realm,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };

        let result = realm.load(&job.context).await;
        let loaded = result.is_ok();
        if done.send(result).is_err() || !loaded {
            return;
        }
        realm.serve(calls).await;
        trace!("realm closed");
    });
}

struct Realm {
    runtime: JsRuntime,
    loader: Rc<PreviewModuleLoader>,
    frame: Rc<LoadFrame>,
}

impl Realm {
    fn new(frame: Rc<LoadFrame>, services: Arc<ModuleServices>) -> Result<Self> {
        let loader = Rc::new(PreviewModuleLoader::new(frame.clone(), services.clone()));
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![hbs_preview_ops::init_ops()],
            module_loader: Some(loader.clone()),
            ..Default::default()
        });

        {
            let state = runtime.op_state();
            let mut state = state.borrow_mut();
            state.put(frame.clone());
            state.put(services);
        }

        runtime
            .execute_script("<hbs-preview:bootstrap>", BOOTSTRAP_JS.to_string())
            .map_err(|e| Error::Script(format!("Bootstrap failed: {e}")))?;

        Ok(Self { runtime, loader, frame })
    }

    /// Prefer the loader's typed error over the engine's text.
    fn fail(&self, e: AnyError) -> Error {
        self.loader.take_failure().unwrap_or_else(|| Error::Script(e.to_string()))
    }

    fn exec(&mut self, code: String) -> Result<v8::Global<v8::Value>> {
        match self.runtime.execute_script("<hbs-preview:eval>", code) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn stringify(&mut self, value: v8::Global<v8::Value>) -> String {
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        local.to_rust_string_lossy(scope)
    }

    fn eval_string(&mut self, code: String) -> Result<String> {
        let value = self.exec(code)?;
        Ok(self.stringify(value))
    }

    async fn eval_async_string(&mut self, code: String) -> Result<String> {
        let promise = self.exec(code)?;
        let resolve = self.runtime.resolve(promise);
        let value = self.drive(resolve).await?;
        Ok(self.stringify(value))
    }

    async fn eval_handle(&mut self, code: String) -> Result<u32> {
        parse_handle(&self.eval_async_string(code).await?)
    }

    /// Poll `fut` while driving the event loop. A future still pending
    /// once the loop goes idle can never settle.
    async fn drive<T, F>(&mut self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T, AnyError>>,
    {
        tokio::pin!(fut);
        let step = tokio::select! {
            biased;

            result = &mut fut => Step::Settled(result),
            result = self.runtime.run_event_loop(PollEventLoopOptions::default()) => Step::Idle(result),
        };

        match step {
            Step::Settled(result) => result.map_err(|e| self.fail(e)),
            Step::Idle(result) => {
                result.map_err(|e| self.fail(e))?;
                match fut.as_mut().now_or_never() {
                    Some(result) => result.map_err(|e| self.fail(e)),
                    None => Err(Error::Script(
                        "Script promise never settled (event loop went idle)".to_string(),
                    )),
                }
            }
        }
    }

    async fn load(&mut self, context: &Value) -> Result<LoadedRecipe> {
        self.exec(format!("globalThis.__hbsPreview.context = {context};"))?;

        let root_url = loader::path_to_url(self.frame.root())?;
        let entry = format!(
            "import * as ns from {};\nglobalThis.__hbsPreview.root = ns;\n",
            serde_json::to_string(root_url.as_str())?
        );
        let entry_url = ModuleSpecifier::parse(ENTRY_SPECIFIER).map_err(|e| Error::other(e.to_string()))?;

        debug!(module = %self.frame.root().display(), "evaluating companion module");
        let module_id = match self.runtime.load_main_es_module_from_code(&entry_url, entry).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail(e)),
        };
        let evaluation = self.runtime.mod_evaluate(module_id);
        self.drive(evaluation).await?;

        let root = parse_handle(&self.eval_string("globalThis.__hbsPreview.holdRoot()".to_string())?)?;
        let fields = self.resolve_shape(root, 0).await?;
        trace!(fields = ?fields.keys().collect::<Vec<_>>(), "resolved recipe shape");

        let mut loaded = LoadedRecipe {
            data: Value::Object(Map::new()),
            partials: Value::Null,
            ..LoadedRecipe::default()
        };

        for (field, id) in fields {
            match field.as_str() {
                "title" => {
                    let id = self.settle_field(id).await?;
                    loaded.title = match self.to_json(id)? {
                        Value::Null => None,
                        Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    };
                }
                "data" => {
                    let id = self.settle_field(id).await?;
                    let data = self.to_json(id)?;
                    if !data.is_null() {
                        loaded.data = data;
                    }
                }
                "helpers" => {
                    let id = self.settle_field(id).await?;
                    let entries = self.eval_string(format!("globalThis.__hbsPreview.functionEntries({id})"))?;
                    let entries: Map<String, Value> = serde_json::from_str(&entries)?;
                    loaded.helpers = entries
                        .into_iter()
                        .filter_map(|(name, id)| id.as_u64().and_then(|id| u32::try_from(id).ok()).map(|id| (name, id)))
                        .collect();
                }
                "partials" => {
                    let id = self.settle_field(id).await?;
                    loaded.partials = self.to_json(id)?;
                }
                "watchFiles" => {
                    let id = self.settle_field(id).await?;
                    loaded.watch_files = watch_files_from_json(&self.to_json(id)?);
                }
                "preprocess" | "postprocess" => {
                    if self.kind_of(id)? != "function" {
                        return Err(Error::Script(format!("'{field}' must be a function")));
                    }
                    if field == "preprocess" {
                        loaded.preprocess = Some(id);
                    } else {
                        loaded.postprocess = Some(id);
                    }
                }
                other => warn!(field = other, "ignoring unknown recipe field"),
            }
        }

        loaded.dependencies = self.frame.dependencies();
        Ok(loaded)
    }

    fn resolve_shape(&mut self, id: u32, depth: usize) -> LocalBoxFuture<'_, Result<RecipeFields>> {
        async move {
            if depth > MAX_RECIPE_DEPTH {
                return Err(Error::RecipeTooDeep {
                    limit: MAX_RECIPE_DEPTH,
                });
            }

            let mut id = id;
            let mut kind = self.describe(id)?;
            if kind == ValueKind::Promise {
                id = self.eval_handle(format!("globalThis.__hbsPreview.settle({id})")).await?;
                kind = self.describe(id)?;
            }

            match ExportShape::from(kind) {
                ExportShape::Factory => {
                    let produced = self.eval_handle(format!("globalThis.__hbsPreview.invoke({id})")).await?;
                    self.resolve_shape(produced, depth + 1).await
                }
                ExportShape::Nested { mut fields, nested } => {
                    for (key, nested_id) in nested {
                        trace!(key = %key, depth, "resolving nested recipe");
                        let sub = self.resolve_shape(nested_id, depth + 1).await?;
                        merge(&mut fields, sub);
                    }
                    Ok(fields)
                }
                ExportShape::Plain(fields) => Ok(fields),
                ExportShape::Empty => Ok(RecipeFields::new()),
            }
        }
        .boxed_local()
    }

    /// Call a factory or await a promise; other values pass through.
    async fn settle_field(&mut self, id: u32) -> Result<u32> {
        match self.kind_of(id)?.as_str() {
            "function" => self.eval_handle(format!("globalThis.__hbsPreview.invoke({id})")).await,
            "promise" => self.eval_handle(format!("globalThis.__hbsPreview.settle({id})")).await,
            _ => Ok(id),
        }
    }

    fn kind_of(&mut self, id: u32) -> Result<String> {
        self.eval_string(format!("globalThis.__hbsPreview.kindOf({id})"))
    }

    fn describe(&mut self, id: u32) -> Result<ValueKind> {
        let text = self.eval_string(format!("globalThis.__hbsPreview.describe({id})"))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn to_json(&mut self, id: u32) -> Result<Value> {
        let text = self.eval_string(format!("globalThis.__hbsPreview.toJson({id})"))?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn serve(&mut self, mut calls: mpsc::UnboundedReceiver<Call>) {
        while let Some(call) = calls.recv().await {
            match call {
                Call::Helper { id, call, reply } => {
                    let _ = reply.send(self.call_helper(id, &call).map_err(|e| e.to_string()));
                }
                Call::Hook {
                    id,
                    name,
                    text,
                    context,
                    reply,
                } => {
                    let result = self.call_hook(id, name, &text, &context).await;
                    let _ = reply.send(result.map_err(|e| e.to_string()));
                }
            }
        }
    }

    fn call_helper(&mut self, id: u32, call: &HelperCall) -> Result<HelperOutcome> {
        let args = serde_json::to_string(&serde_json::to_string(call)?)?;
        let out = self.eval_string(format!("globalThis.__hbsPreview.callHelper({id}, {args})"))?;
        Ok(serde_json::from_str(&out)?)
    }

    async fn call_hook(&mut self, id: u32, name: &str, text: &str, context: &Value) -> Result<String> {
        let name_lit = serde_json::to_string(name)?;
        let text_lit = serde_json::to_string(text)?;
        self.eval_async_string(format!(
            "globalThis.__hbsPreview.callHook({id}, {name_lit}, {text_lit}, {context})"
        ))
        .await
    }
}

enum Step<T> {
    Settled(Result<T, AnyError>),
    Idle(Result<(), AnyError>),
}

fn parse_handle(text: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|_| Error::Script(format!("expected a value handle, got '{text}'")))
}
