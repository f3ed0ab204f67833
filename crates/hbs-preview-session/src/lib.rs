#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]

//! Live preview sessions for Handlebars templates.
//!
//! A [`PreviewManager`] keeps one session per opened template, watches the
//! template, its companion module candidates and every file the last recipe
//! depended on, and re-renders into a [`PreviewPanel`] when any of them
//! change. Unsaved editor buffers live in a [`DocumentStore`] and win over
//! disk for every file a render reads.

pub mod documents;
pub mod index;
pub mod manager;
pub mod panel;
pub mod pipeline;
pub mod session;
pub mod watch;

pub use documents::{Document, DocumentStore};
pub use index::ReverseIndex;
pub use manager::{ManagerError, ManagerSnapshot, PreviewManager};
pub use panel::{MemoryPanel, MemoryPanelHost, PanelHost, PanelState, PreviewPanel};
pub use pipeline::{render_preview, render_with, resolve_recipe, RenderRequest};
pub use session::{RenderReason, SessionSnapshot, WatchOrigin};
pub use watch::{Subscription, WatchError, WatchHub};
