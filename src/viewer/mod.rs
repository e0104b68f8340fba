//! Opening source documents in an external viewer.

use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::presentation::ViewerCommand;

/// Placeholder replaced by the page number in the page argument.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Evince's physical page index argument. Page numbers in the index are
/// positions in the file, not the printed labels.
pub const DEFAULT_PAGE_ARG: &str = "--page-index={page}";

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ViewerResult<T> = Result<T, ViewerError>;

/// Something that can act on a [`ViewerCommand`].
pub trait DocumentViewer: Send + Sync {
    fn execute(&self, command: &ViewerCommand) -> ViewerResult<()>;
}

/// Launches a viewer program as a detached child process.
#[derive(Debug, Clone)]
pub struct ExternalViewer {
    program: String,
    page_arg: String,
}

impl Default for ExternalViewer {
    fn default() -> Self {
        Self::new("evince", DEFAULT_PAGE_ARG)
    }
}

impl ExternalViewer {
    /// `page_arg` may contain `{page}`; an empty template passes no page.
    pub fn new(program: impl Into<String>, page_arg: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            page_arg: page_arg.into(),
        }
    }

    /// Arguments passed to the program for `command`.
    pub fn args(&self, command: &ViewerCommand) -> Vec<String> {
        match command {
            ViewerCommand::OpenAtPage { path, page } => {
                let mut args = Vec::with_capacity(2);
                if !self.page_arg.is_empty() {
                    args.push(self.page_arg.replace(PAGE_PLACEHOLDER, &page.to_string()));
                }
                args.push(path.display().to_string());
                args
            }
        }
    }
}

impl DocumentViewer for ExternalViewer {
    fn execute(&self, command: &ViewerCommand) -> ViewerResult<()> {
        let ViewerCommand::OpenAtPage { path, page } = command;
        if !Path::new(path).exists() {
            return Err(ViewerError::NotFound(path.display().to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(self.args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ViewerError::Launch {
                program: self.program.clone(),
                source,
            })?;

        // Reap the viewer when it exits so long sessions leave no zombies
        let program = self.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) => debug!(program = %program, %status, "Viewer exited"),
            Err(e) => debug!(program = %program, error = %e, "Could not wait for viewer"),
        });

        info!(program = %self.program, path = %path.display(), page, "Opened document");
        Ok(())
    }
}

/// Execute `command`, logging a failure instead of returning it.
pub fn open_or_log(viewer: &dyn DocumentViewer, command: &ViewerCommand) -> bool {
    match viewer.execute(command) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Could not open document");
            false
        }
    }
}
