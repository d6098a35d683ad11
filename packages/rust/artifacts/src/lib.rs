//! Archival copies of what a research session read and wrote.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<session-id>/
//! ├── sources/<sha256(url)>.md   one per visited page
//! └── report.md
//! ```
//!
//! Nothing here is read back by the pipeline; callers log write failures
//! and carry on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use deepdive_shared::{DeepDiveError, Depth, Result, SessionId};

/// Writes derived files for research sessions.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

/// Header fields for a saved report.
#[derive(Debug, Clone)]
pub struct ReportMeta<'a> {
    pub topic: &'a str,
    pub depth: Depth,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub source_count: usize,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding everything for one session.
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Save the extracted text of a visited page.
    #[instrument(skip(self, text), fields(session_id = %id))]
    pub fn write_source(
        &self,
        id: &SessionId,
        url: &str,
        title: &str,
        text: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let path = self
            .session_dir(id)
            .join("sources")
            .join(format!("{}.md", url_hash(url)));

        let header = frontmatter(&[
            ("url", url.to_string()),
            ("title", title.to_string()),
            ("fetched_at", fetched_at.to_rfc3339()),
        ]);
        write_atomic(&path, &format!("{header}\n{text}\n"))?;
        debug!(path = %path.display(), "source saved");
        Ok(path)
    }

    /// Save the final report.
    #[instrument(skip(self, report, meta), fields(session_id = %meta.session_id))]
    pub fn write_report(&self, meta: &ReportMeta<'_>, report: &str) -> Result<PathBuf> {
        let path = self.session_dir(&meta.session_id).join("report.md");

        let header = frontmatter(&[
            ("topic", meta.topic.to_string()),
            ("depth", meta.depth.to_string()),
            ("session_id", meta.session_id.to_string()),
            ("created_at", meta.created_at.to_rfc3339()),
            ("source_count", meta.source_count.to_string()),
        ]);
        write_atomic(&path, &format!("{header}\n{report}\n"))?;
        debug!(path = %path.display(), "report saved");
        Ok(path)
    }
}

/// Hex SHA-256 of a URL, used as a stable file name.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn frontmatter(fields: &[(&str, String)]) -> String {
    let mut fm = String::from("---\n");
    for (key, value) in fields {
        fm.push_str(&format!("{key}: \"{}\"\n", escape_yaml_string(value)));
    }
    fm.push_str("---\n");
    fm
}

fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")
}

/// Write to a dot-prefixed temp file, then rename into place.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DeepDiveError::validation(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| DeepDiveError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| DeepDiveError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| DeepDiveError::io(path, e))?;
    Ok(())
}
