// src/render/mod.rs

//! Configuration rendering
//!
//! Pure functions from a [`Site`] plus its [`ResolvedPaths`] to configuration
//! text. Nothing here touches the filesystem or the clock, so the same input
//! always renders byte-identical output.

pub mod pool;
pub mod proxy;

pub use pool::render_pool_config;
pub use proxy::render_proxy_config;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::Result;
use crate::platform::ResolvedPaths;
use crate::site::Site;

/// Kind of configuration artifact
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactKind {
    /// nginx virtual host
    Proxy,
    /// PHP-FPM pool
    Pool,
}

/// Rendered text of one configuration file and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub content: String,
}

/// Render the proxy config and pair it with its "available" path
pub fn proxy_artifact(site: &Site, paths: &ResolvedPaths) -> Result<RenderedArtifact> {
    Ok(RenderedArtifact {
        kind: ArtifactKind::Proxy,
        path: paths.proxy_available.clone(),
        content: render_proxy_config(site, paths)?,
    })
}

/// Render the pool config and pair it with its pool directory path
pub fn pool_artifact(site: &Site, paths: &ResolvedPaths) -> Result<RenderedArtifact> {
    Ok(RenderedArtifact {
        kind: ArtifactKind::Pool,
        path: paths.pool()?.config_path.clone(),
        content: render_pool_config(site, paths)?,
    })
}

/// Line-oriented text builder with brace-block indentation
#[derive(Debug, Default)]
pub(crate) struct ConfigWriter {
    out: String,
    depth: usize,
}

impl ConfigWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indentation
    pub(crate) fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
        self
    }

    pub(crate) fn blank(&mut self) -> &mut Self {
        self.out.push('\n');
        self
    }

    /// Open a `header {` block
    pub(crate) fn open(&mut self, header: impl AsRef<str>) -> &mut Self {
        self.line(format!("{} {{", header.as_ref()));
        self.depth += 1;
        self
    }

    /// Close the innermost block
    pub(crate) fn close(&mut self) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self.line("}")
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_writer_indents_blocks() {
        let mut w = ConfigWriter::new();
        w.open("server").line("listen 80;").open("location /").line("deny all;");
        w.close().close();

        assert_eq!(
            w.finish(),
            "server {\n    listen 80;\n    location / {\n        deny all;\n    }\n}\n"
        );
    }
}
