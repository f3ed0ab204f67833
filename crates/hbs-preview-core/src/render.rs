//! Template rendering: recipe + template text -> HTML.

use handlebars::{
    BlockContext, Context, Handlebars, Helper, HelperDef, HelperResult, JsonRender, Output, RenderContext,
    RenderError, RenderErrorReason, Renderable, ScopedJson, StringOutput, Template,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::context::ProcessingContext;
use crate::error::{Error, Result};
use crate::recipe::{
    BlockState, HelperCall, HelperOutcome, RenderedBlock, ResolvedTemplatePreviewRecipe, TemplateHelper,
};

/// Block bodies a single block helper invocation may request.
const MAX_BLOCK_RENDERS: usize = 256;

/// Bridges a recipe helper into the template engine.
///
/// Block helpers are driven by replay: a helper that calls `options.fn`
/// with a context it has no output for yet reports
/// [`HelperOutcome::RenderBlock`], the body is rendered here and the helper
/// is called again with every body rendered so far.
struct HelperBridge(Arc<dyn TemplateHelper>);

impl HelperBridge {
    fn invoke(&self, call: &HelperCall) -> Result<HelperOutcome, RenderError> {
        self.0.call(call).map_err(|message| helper_error(&call.name, &message))
    }
}

impl HelperDef for HelperBridge {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let call = helper_call(h, ctx, rc);
        match self.invoke(&call)? {
            HelperOutcome::Value(value) => Ok(ScopedJson::Derived(value)),
            HelperOutcome::RenderBlock { .. } => Err(helper_error(&call.name, "no block to render outside {{#...}}")),
        }
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if !h.is_block() {
            let value = self.call_inner(h, r, ctx, rc)?;
            let text = value.as_json().render();
            let text = if rc.is_disable_escape() {
                text
            } else {
                r.get_escape_fn()(&text)
            };
            out.write(&text)?;
            return Ok(());
        }

        let mut call = helper_call(h, ctx, rc);
        let mut state = BlockState {
            has_inverse: h.inverse().is_some(),
            rendered: Vec::new(),
        };
        for _ in 0..=MAX_BLOCK_RENDERS {
            call.block = Some(state.clone());
            match self.invoke(&call)? {
                HelperOutcome::Value(value) => {
                    out.write(&value.render())?;
                    return Ok(());
                }
                HelperOutcome::RenderBlock { inverse, key, context } => {
                    let body = if inverse { h.inverse() } else { h.template() };
                    let output = match body {
                        Some(body) => render_block(body, r, ctx, rc, context)?,
                        None => String::new(),
                    };
                    state.rendered.push(RenderedBlock { inverse, key, output });
                }
            }
        }
        Err(helper_error(
            &call.name,
            &format!("requested more than {MAX_BLOCK_RENDERS} block renders"),
        ))
    }
}

fn helper_error(name: &str, message: &str) -> RenderError {
    RenderErrorReason::Other(format!("helper '{name}': {message}")).into()
}

fn helper_call(h: &Helper<'_>, ctx: &Context, rc: &RenderContext<'_, '_>) -> HelperCall {
    HelperCall {
        name: h.name().to_string(),
        params: h.params().iter().map(|p| p.value().clone()).collect(),
        hash: h
            .hash()
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.value().clone()))
            .collect::<Map<String, Value>>(),
        context: current_this(ctx, rc),
        block: None,
    }
}

/// The value `{{this}}` refers to at the helper's call site.
fn current_this(ctx: &Context, rc: &RenderContext<'_, '_>) -> Value {
    let scoped = rc.context();
    let root = scoped.as_deref().map_or_else(|| ctx.data(), Context::data);
    let Some(block) = rc.block() else {
        return root.clone();
    };
    if let Some(value) = block.base_value() {
        return value.clone();
    }
    block
        .base_path()
        .iter()
        .try_fold(root, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Render a block body with `context` as `this`.
fn render_block<'reg: 'rc, 'rc>(
    body: &'rc Template,
    r: &'reg Handlebars<'reg>,
    ctx: &'rc Context,
    rc: &RenderContext<'reg, 'rc>,
    context: Value,
) -> Result<String, RenderError> {
    let mut scoped = rc.clone();
    let mut block = BlockContext::new();
    block.set_base_value(context);
    scoped.push_block(block);

    let mut buf = StringOutput::new();
    body.render(r, ctx, &mut scoped, &mut buf)?;
    buf.into_string()
        .map_err(|e| RenderErrorReason::Other(e.to_string()).into())
}

/// Render `template_text` with `recipe`.
///
/// Runs `preprocess`, renders on a fresh engine instance with the recipe's
/// helpers and partials, then runs `postprocess`. The engine work happens on
/// the blocking pool because script-backed helpers block on their realm.
#[instrument(skip_all, fields(template = %context.template_path.display()))]
pub async fn render_template(
    template_text: &str,
    recipe: &ResolvedTemplatePreviewRecipe,
    context: &ProcessingContext,
) -> Result<String> {
    let text = match &recipe.preprocess {
        Some(hook) => hook
            .apply(template_text.to_string(), context)
            .await
            .map_err(|message| Error::Hook {
                hook: "preprocess",
                message,
            })?,
        None => template_text.to_string(),
    };

    let helpers = recipe.helpers.clone();
    let partials = recipe.partials.clone();
    let data = recipe.data.clone();

    let rendered = tokio::task::spawn_blocking(move || -> Result<String> {
        let mut engine = Handlebars::new();
        for (name, text) in &partials {
            engine
                .register_partial(name, text)
                .map_err(|e| Error::Render(format!("partial '{name}': {e}")))?;
        }
        for (name, helper) in helpers {
            engine.register_helper(&name, Box::new(HelperBridge(helper)));
        }
        engine
            .render_template(&text, &data)
            .map_err(|e| Error::Render(e.to_string()))
    })
    .await
    .map_err(|e| Error::other(format!("render task failed: {e}")))??;

    debug!(bytes = rendered.len(), "rendered");

    match &recipe.postprocess {
        Some(hook) => hook
            .apply(rendered, context)
            .await
            .map_err(|message| Error::Hook {
                hook: "postprocess",
                message,
            }),
        None => Ok(rendered),
    }
}

const PAGE_STYLE: &str = "body{font-family:system-ui,sans-serif;margin:1.5rem;color:#333}\
pre{white-space:pre-wrap;background:#f6f6f6;padding:1rem;border-radius:4px}\
h1{font-size:1.1rem}";

/// The page shown when rendering `template` fails.
#[must_use]
pub fn error_page(template: &Path, message: &str) -> String {
    let name = display_name(template);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{name}</title><style>{PAGE_STYLE}</style></head>\
<body><h1>Failed to render {name}</h1><pre>{}</pre></body></html>\n",
        handlebars::html_escape(message)
    )
}

/// The page shown while a newly opened preview renders for the first time.
#[must_use]
pub fn placeholder_page(template: &Path) -> String {
    let name = display_name(template);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{name}</title><style>{PAGE_STYLE}</style></head>\
<body><p>Rendering {name}\u{2026}</p></body></html>\n"
    )
}

fn display_name(template: &Path) -> String {
    let name = template
        .file_name()
        .map_or_else(|| template.display().to_string(), |n| n.to_string_lossy().into_owned());
    handlebars::html_escape(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::FnHook;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn ctx() -> ProcessingContext {
        ProcessingContext::new("/site/card.hbs", "/site/card.hbs.js")
    }

    fn recipe(data: Value) -> ResolvedTemplatePreviewRecipe {
        ResolvedTemplatePreviewRecipe {
            data,
            ..ResolvedTemplatePreviewRecipe::empty()
        }
    }

    #[tokio::test]
    async fn test_renders_data() {
        let out = render_template("<h1>{{title}}</h1>", &recipe(json!({"title": "Welcome"})), &ctx())
            .await
            .unwrap();
        assert_eq!(out, "<h1>Welcome</h1>");
    }

    #[tokio::test]
    async fn test_escaping_follows_handlebars_defaults() {
        let r = recipe(json!({"x": "<b>&</b>"}));
        let out = render_template("{{x}}|{{{x}}}", &r, &ctx()).await.unwrap();
        assert_eq!(out, "&lt;b&gt;&amp;&lt;/b&gt;|<b>&</b>");
    }

    #[tokio::test]
    async fn test_helpers_receive_params_and_hash() {
        let mut r = recipe(json!({"name": "ada"}));
        let shout: Arc<dyn TemplateHelper> = Arc::new(|call: &HelperCall| -> Result<Value, String> {
            let word = call.params.first().and_then(Value::as_str).unwrap_or_default();
            let bang = call.hash.get("bang").and_then(Value::as_str).unwrap_or("");
            Ok(Value::String(format!("{}{bang}", word.to_uppercase())))
        });
        r.helpers.insert("shout".into(), shout);

        let out = render_template("{{shout name bang=\"!\"}}", &r, &ctx()).await.unwrap();
        assert_eq!(out, "ADA!");
    }

    #[tokio::test]
    async fn test_helper_error_fails_render() {
        let mut r = recipe(json!({}));
        let broken: Arc<dyn TemplateHelper> =
            Arc::new(|_: &HelperCall| -> Result<Value, String> { Err("boom".to_string()) });
        r.helpers.insert("broken".into(), broken);

        let err = render_template("{{broken}}", &r, &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Render(_)));
        assert!(err.to_string().contains("boom"));
    }

    /// Wraps its block body, or the inverse body when `flag` is false.
    struct Wrap;

    impl TemplateHelper for Wrap {
        fn call(&self, call: &HelperCall) -> Result<HelperOutcome, String> {
            let Some(block) = &call.block else {
                return Err("block only".to_string());
            };
            let inverse = call.hash.get("flag") == Some(&Value::Bool(false));
            match block.rendered.iter().find(|b| b.inverse == inverse) {
                Some(done) => Ok(HelperOutcome::Value(Value::String(format!("<b>{}</b>", done.output)))),
                None => Ok(HelperOutcome::RenderBlock {
                    inverse,
                    key: "this".to_string(),
                    context: call.context.clone(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_block_helper_renders_body_unescaped() {
        let mut r = recipe(json!({"n": "<1>"}));
        r.helpers.insert("wrap".into(), Arc::new(Wrap));

        let out = render_template("{{#wrap}}{{n}}{{/wrap}}", &r, &ctx()).await.unwrap();
        assert_eq!(out, "<b>&lt;1&gt;</b>");

        let out = render_template("{{#wrap flag=false}}yes{{else}}no{{/wrap}}", &r, &ctx())
            .await
            .unwrap();
        assert_eq!(out, "<b>no</b>");
    }

    #[tokio::test]
    async fn test_helpers_see_current_context() {
        let mut r = recipe(json!({"people": [{"name": "Ada"}, {"name": "Grace"}]}));
        let name_of_this: Arc<dyn TemplateHelper> = Arc::new(|call: &HelperCall| -> Result<Value, String> {
            Ok(call.context.get("name").cloned().unwrap_or(Value::Null))
        });
        r.helpers.insert("me".into(), name_of_this);
        r.helpers.insert("wrap".into(), Arc::new(Wrap));

        let out = render_template("{{#each people}}[{{me}}]{{/each}}", &r, &ctx()).await.unwrap();
        assert_eq!(out, "[Ada][Grace]");

        let out = render_template("{{#each people}}{{#wrap}}{{name}}{{/wrap}}{{/each}}", &r, &ctx())
            .await
            .unwrap();
        assert_eq!(out, "<b>Ada</b><b>Grace</b>");
    }

    #[tokio::test]
    async fn test_block_helper_that_never_finishes() {
        let mut r = recipe(json!({}));
        let greedy: Arc<dyn TemplateHelper> = Arc::new(Greedy);
        r.helpers.insert("greedy".into(), greedy);

        let err = render_template("{{#greedy}}x{{/greedy}}", &r, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("block renders"), "{err}");
    }

    struct Greedy;

    impl TemplateHelper for Greedy {
        fn call(&self, call: &HelperCall) -> Result<HelperOutcome, String> {
            let seen = call.block.as_ref().map_or(0, |b| b.rendered.len());
            Ok(HelperOutcome::RenderBlock {
                inverse: false,
                key: seen.to_string(),
                context: Value::Null,
            })
        }
    }

    #[tokio::test]
    async fn test_partials() {
        let mut r = recipe(json!({"user": {"name": "Grace"}}));
        r.partials = BTreeMap::from([("badge".to_string(), "[{{name}}]".to_string())]);
        let out = render_template("Hi {{> badge user}}", &r, &ctx()).await.unwrap();
        assert_eq!(out, "Hi [Grace]");
    }

    #[tokio::test]
    async fn test_pre_and_post_process_order() {
        let mut r = recipe(json!({"who": "world"}));
        r.preprocess = Some(Arc::new(FnHook(|text: String, _: &ProcessingContext| -> Result<String, String> {
            Ok(text.replace("NAME", "{{who}}"))
        })));
        r.postprocess = Some(Arc::new(FnHook(|text: String, c: &ProcessingContext| -> Result<String, String> {
            Ok(format!("{text} ({})", c.template_path.display()))
        })));

        let out = render_template("hello NAME", &r, &ctx()).await.unwrap();
        assert_eq!(out, "hello world (/site/card.hbs)");
    }

    #[tokio::test]
    async fn test_hook_failure_names_the_hook() {
        let mut r = recipe(json!({}));
        r.postprocess = Some(Arc::new(FnHook(|_: String, _: &ProcessingContext| -> Result<String, String> {
            Err("nope".to_string())
        })));
        let err = render_template("x", &r, &ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "postprocess failed: nope");
    }

    #[tokio::test]
    async fn test_template_syntax_error() {
        let err = render_template("{{#if}}", &recipe(json!({})), &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn test_error_page_escapes_message() {
        let page = error_page(Path::new("/site/card.hbs"), "<script>alert(1)</script>");
        assert!(page.contains("card.hbs"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_placeholder_page_names_template() {
        assert!(placeholder_page(Path::new("/site/a&b.hbs")).contains("a&amp;b.hbs"));
    }
}
