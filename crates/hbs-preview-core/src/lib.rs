#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod module_cache;
pub mod paths;
pub mod project;
pub mod recipe;
pub mod render;
pub mod resolver;
pub mod services;
pub mod tracker;
pub mod version;

pub use config::Config;
pub use context::ProcessingContext;
pub use error::{Error, Result};
pub use recipe::{
    compute_watch_set, resolve_partials, BlockState, FnHook, HelperCall, HelperOutcome, PartialSource,
    RenderedBlock, ResolvedTemplatePreviewRecipe, TemplateHelper, TextHook,
};
pub use render::{error_page, placeholder_page, render_template};
pub use resolver::{ResolveReasonCode, ResolveResult, ResolveStatus};
pub use services::ModuleServices;
pub use tracker::{DependencyTracker, LoadFrame, SourceOverrides};
pub use version::VERSION;
