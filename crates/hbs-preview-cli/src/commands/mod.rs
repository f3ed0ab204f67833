pub mod inspect;
pub mod render;
pub mod version;
pub mod watch;

use hbs_preview_core::paths::{absolutize, canonical_key, companion_candidates};
use hbs_preview_core::Config;
use hbs_preview_session::RenderRequest;
use std::path::Path;

/// Render request for a template named on the command line.
pub(crate) fn request_for(config: &Config, template: &Path) -> RenderRequest {
    let template = canonical_key(&absolutize(template, &config.cwd));
    RenderRequest {
        candidates: companion_candidates(&template, &config.companion_extensions),
        workspace_folder: config.workspace_folder_for(&template),
        template,
    }
}
