use crate::error::{Error, ErrorKind};
use dropsite_archive::ExtractStats;
use serde::Serialize;

/// How a file was (or would have been) handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Written into the workspace as-is.
    Placed,
    /// Unpacked into the workspace.
    Extracted,
}

/// Why a single file failed; safe to send to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
}
impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        let kind: &ErrorKind = err;
        Self { kind: kind.name(), message: kind.to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Status {
    Ok {
        /// Workspace-relative location of a placed file.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<ExtractStats>,
    },
    Failed {
        error: Failure,
    },
}

/// Result of ingesting one uploaded file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    /// Position in the upload, so results can be put back in order.
    #[serde(skip)]
    pub(crate) index: usize,
    pub name: String,
    pub route: Route,
    #[serde(flatten)]
    pub status: Status,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok { .. })
    }
}

/// Per-file results of one upload, in upload order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files: Vec<FileOutcome>,
}

impl IngestReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    /// `true` when every file made it (and there was at least one).
    pub fn is_complete(&self) -> bool {
        !self.files.is_empty() && self.failed() == 0
    }
}
