//! Version command

use anyhow::Result;

use crate::output::{HumanRenderer, JsonRenderer, OutputContext};

/// Run the version command. Works without a config file.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn run(ctx: &OutputContext, json: bool) -> Result<i32> {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        JsonRenderer.render_version(version)?;
    } else {
        HumanRenderer::new(ctx).render_version(version);
    }
    Ok(0)
}
