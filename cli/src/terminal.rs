//! [`Host`] implementation for a terminal session.

use std::path::{Path, PathBuf};

use remote_sync_core::host::{Host, Report, WorkspaceRoot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Prompts on stderr, reads answers from stdin and opens files in `$EDITOR`.
pub struct TerminalHost {
    roots: Vec<WorkspaceRoot>,
    editor: Option<String>,
}

impl TerminalHost {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().map(WorkspaceRoot::from_path).collect(),
            editor: std::env::var("VISUAL")
                .or_else(|_| std::env::var("EDITOR"))
                .ok()
                .filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Parse a 1-based menu answer. Empty or out-of-range input cancels.
fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let n: usize = answer.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

#[async_trait::async_trait]
impl Host for TerminalHost {
    async fn workspace_roots(&self) -> Vec<WorkspaceRoot> {
        self.roots.clone()
    }

    async fn pick_root(&self, roots: &[WorkspaceRoot]) -> Option<WorkspaceRoot> {
        eprintln!("Select a workspace folder:");
        for (i, root) in roots.iter().enumerate() {
            eprintln!("  {}) {} ({})", i + 1, root.name, root.path.display());
        }
        eprint!("> ");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        if stdin.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        parse_choice(&line, roots.len()).map(|i| roots[i].clone())
    }

    async fn open_for_editing(&self, path: &Path) -> std::io::Result<()> {
        let Some(editor) = &self.editor else {
            println!("{}", path.display());
            return Ok(());
        };
        debug!(editor = %editor, path = %path.display(), "opening editor");
        let status = tokio::process::Command::new(editor).arg(path).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("{editor} exited with {status}")))
        }
    }

    async fn report(&self, report: Report) {
        match report {
            Report::Info(message) => eprintln!("{message}"),
            Report::Error(message) => eprintln!("error: {message}"),
        }
    }
}
