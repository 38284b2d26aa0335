//! Container-exec runner delegating to the `docker compose` CLI.
//!
//! `argv[0]` names the compose service, the rest is the command executed
//! inside its running container. The compose project (directory, optional
//! compose files, resolved service list) loads lazily on the first run and
//! is reused for the lifetime of the runner; a load failure is cached and
//! reported on every subsequent run.
//!
//! Empty stdin is explicitly not attached (`--interactive=false`): feeding
//! an empty stream into a container attach can close the stream early and
//! truncate stdout/stderr.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::info;

use crate::runner::{spawn_and_stream, CommandRunner, RunRequest, EXIT_NOT_FOUND};

pub struct ComposeRunner {
    dir: Option<PathBuf>,
    files: Vec<String>,
    project: OnceCell<Result<ComposeProject, String>>,
}

#[derive(Debug, Clone)]
struct ComposeProject {
    dir: PathBuf,
    services: Vec<String>,
}

impl ComposeRunner {
    /// `dir` defaults to the current working directory; `files` are extra
    /// `-f` compose files passed through verbatim.
    pub fn new(dir: Option<PathBuf>, files: Vec<String>) -> Self {
        Self {
            dir,
            files,
            project: OnceCell::new(),
        }
    }

    async fn project(&self) -> &Result<ComposeProject, String> {
        self.project
            .get_or_init(|| load_project(self.dir.clone(), self.files.clone()))
            .await
    }

    fn base_command(&self, dir: &PathBuf) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose");
        for file in &self.files {
            cmd.args(["-f", file]);
        }
        cmd.current_dir(dir);
        cmd
    }
}

async fn load_project(dir: Option<PathBuf>, files: Vec<String>) -> Result<ComposeProject, String> {
    let dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| e.to_string())?,
    };
    let mut cmd = Command::new("docker");
    cmd.arg("compose");
    for file in &files {
        cmd.args(["-f", file]);
    }
    cmd.args(["config", "--services"]).current_dir(&dir);

    let output = cmd
        .output()
        .await
        .map_err(|e| format!("docker compose unavailable: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "failed to load compose project: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    let services: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    info!(dir = %dir.display(), services = services.len(), "compose project loaded");
    Ok(ComposeProject { dir, services })
}

#[async_trait]
impl CommandRunner for ComposeRunner {
    async fn run(&self, req: RunRequest<'_>) -> i32 {
        let project = match self.project().await {
            Ok(project) => project,
            Err(e) => {
                req.stderr.write(e.as_bytes()).await;
                return EXIT_NOT_FOUND;
            }
        };

        let service = &req.argv[0];
        if !project.services.iter().any(|s| s == service) {
            req.stderr
                .write(format!("Error: unknown compose service '{service}'").as_bytes())
                .await;
            return EXIT_NOT_FOUND;
        }

        let mut cmd = self.base_command(&project.dir);
        cmd.args(["exec", "-T"]);
        if req.stdin.is_empty() {
            cmd.arg("--interactive=false");
        }
        cmd.arg(service);
        cmd.args(&req.argv[1..]);

        spawn_and_stream(cmd, req).await
    }
}

#[cfg(test)]
mod tests {
    use bosun_types::ReplyRef;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::output::OutputWriter;

    // Without a docker daemon (or a compose file at all) the lazy load must
    // fail cleanly: 127 and the load error on stderr, on every run.
    #[tokio::test]
    async fn missing_project_reports_127_each_run() {
        let dir = std::env::temp_dir().join("bosun-compose-test-empty");
        let _ = std::fs::create_dir_all(&dir);

        let (tx, mut rx) = mpsc::channel(100);
        let reply = ReplyRef::Message {
            channel: "C1".into(),
            ts: "1.2".into(),
        };
        let stdout = OutputWriter::stdout(tx.clone(), reply.clone(), None);
        let stderr = OutputWriter::stderr(tx, reply, None);
        let runner = ComposeRunner::new(Some(dir.clone()), Vec::new());
        let argv: Vec<String> = vec!["web".into(), "ls".into()];

        for _ in 0..2 {
            let code = runner
                .run(RunRequest {
                    argv: &argv,
                    stdin: "",
                    stdout: &stdout,
                    stderr: &stderr,
                    timeout: None,
                    cancel: CancellationToken::new(),
                })
                .await;
            assert_eq!(code, EXIT_NOT_FOUND);
        }
        stderr.flush().await;
        let mut err_text = String::new();
        while let Ok(o) = rx.try_recv() {
            if let Some(t) = o.text {
                err_text.push_str(&t);
            }
        }
        assert!(!err_text.is_empty());
    }
}
