use hbs_preview_core::{render_template, FnHook, HelperCall, ProcessingContext, ResolvedTemplatePreviewRecipe};
use serde_json::{json, Value};
use std::sync::Arc;

const PREFIX: &str = "<!--wrapped-->";

fn context() -> ProcessingContext {
    ProcessingContext::new("/site/page.hbs", "/site/page.hbs.ts")
}

fn recipe(data: Value) -> ResolvedTemplatePreviewRecipe {
    ResolvedTemplatePreviewRecipe {
        data,
        ..ResolvedTemplatePreviewRecipe::empty()
    }
}

#[tokio::test]
async fn test_welcome_example() {
    let out = render_template("<h1>{{title}}</h1>", &recipe(json!({"title": "Welcome"})), &context())
        .await
        .unwrap();
    assert_eq!(out, "<h1>Welcome</h1>");
}

#[tokio::test]
async fn test_wrapping_hooks_round_trip() {
    let template = "<ul>{{#each items}}<li>{{shout this}}</li>{{/each}}</ul>{{> tail}}";
    let mut plain = recipe(json!({"items": ["a", "b"]}));
    plain.helpers.insert(
        "shout".to_string(),
        Arc::new(|call: &HelperCall| -> Result<Value, String> {
            Ok(json!(call.params[0].as_str().unwrap_or_default().to_uppercase()))
        }),
    );
    plain.partials.insert("tail".to_string(), "<p>end</p>".to_string());

    let mut wrapped = plain.clone();
    wrapped.preprocess = Some(Arc::new(FnHook(|text: String, _: &ProcessingContext| -> Result<String, String> {
        Ok(format!("{PREFIX}{text}"))
    })));
    wrapped.postprocess = Some(Arc::new(FnHook(|text: String, _: &ProcessingContext| -> Result<String, String> {
        text.strip_prefix(PREFIX)
            .map(str::to_string)
            .ok_or_else(|| "prefix missing".to_string())
    })));

    let without = render_template(template, &plain, &context()).await.unwrap();
    let with = render_template(template, &wrapped, &context()).await.unwrap();
    assert_eq!(without, "<ul><li>A</li><li>B</li></ul><p>end</p>");
    assert_eq!(with, without);
}

#[tokio::test]
async fn test_renders_do_not_share_helpers() {
    let mut first = recipe(json!({}));
    first
        .helpers
        .insert("greet".to_string(), Arc::new(|_: &HelperCall| -> Result<Value, String> { Ok(json!("hi")) }));
    assert_eq!(render_template("{{greet}}", &first, &context()).await.unwrap(), "hi");

    let second = recipe(json!({}));
    assert_eq!(render_template("{{greet}}", &second, &context()).await.unwrap(), "");
}
