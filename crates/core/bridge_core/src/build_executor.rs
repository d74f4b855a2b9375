//! The build executor: allowlist check, subprocess spawn with a
//! wall-clock timeout, chunked stdout/stderr streaming, and inline
//! error/warning parsing capped at 50 of each.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use cloud_client::BuildDiagnostic;
use cloud_client::BuildRecordUpdate;
use cloud_client::CloudApi;
use cloud_client::PendingBuild;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Allowed command prefixes, matched against the trimmed, lowercased
/// command.
const ALLOWED_PREFIXES: &[&str] = &[
    "npm run",
    "npm test",
    "npm exec",
    "npx ",
    "yarn ",
    "pnpm ",
    "bun ",
    "flutter ",
    "dart ",
    "cargo ",
    "go ",
    "make ",
    "tsc",
    "eslint",
    "prettier",
    "vitest",
    "jest",
    "pytest",
];

const CHUNK_FLUSH_THRESHOLD: usize = 4096;
const MAX_DIAGNOSTICS: usize = 50;
const BUILD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub fn is_command_allowed(command: &str) -> bool {
    let normalized = command.trim().to_lowercase();
    ALLOWED_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string()
}

/// Runs one build record to completion, driving every cloud update it
/// produces (`running`, chunked output, the final `success`/`failed`).
pub async fn run_build(
    client: &dyn CloudApi,
    project_root: &Path,
    build: &PendingBuild,
) {
    if !is_command_allowed(&build.command) {
        let update = BuildRecordUpdate {
            build_id: build.build_id.clone(),
            status: "failed".to_string(),
            started_at: None,
            completed_at: Some(now_rfc3339()),
            exit_code: Some(-1),
            errors: vec![BuildDiagnostic {
                message: format!("Command not allowed: {}", build.command),
                file: None,
                line: None,
                column: None,
            }],
            warnings: Vec::new(),
            duration_ms: Some(0),
        };
        if let Err(err) = client.update_build_record(&update).await {
            tracing::warn!(build_id = %build.build_id, error = %err, "updateBuildRecord failed");
        }
        return;
    }

    let started_at = Instant::now();
    let running = BuildRecordUpdate {
        build_id: build.build_id.clone(),
        status: "running".to_string(),
        started_at: Some(now_rfc3339()),
        completed_at: None,
        exit_code: None,
        errors: Vec::new(),
        warnings: Vec::new(),
        duration_ms: None,
    };
    if let Err(err) = client.update_build_record(&running).await {
        tracing::warn!(build_id = %build.build_id, error = %err, "updateBuildRecord(running) failed");
    }

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&build.command)
        .current_dir(project_root)
        .envs(&build.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            let update = BuildRecordUpdate {
                build_id: build.build_id.clone(),
                status: "failed".to_string(),
                started_at: None,
                completed_at: Some(now_rfc3339()),
                exit_code: Some(-1),
                errors: vec![BuildDiagnostic {
                    message: err.to_string(),
                    file: None,
                    line: None,
                    column: None,
                }],
                warnings: Vec::new(),
                duration_ms: Some(started_at.elapsed().as_millis() as u64),
            };
            if let Err(err) = client.update_build_record(&update).await {
                tracing::warn!(build_id = %build.build_id, error = %err, "updateBuildRecord failed");
            }
            return;
        }
    };

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let mut stdout_collector = DiagnosticCollector::new();
    let mut stderr_collector = DiagnosticCollector::new();
    let chunk_counter = std::sync::atomic::AtomicU32::new(0);

    let stream_result = tokio::time::timeout(BUILD_TIMEOUT, async {
        tokio::join!(
            stream_output(client, &build.build_id, "stdout", stdout, &chunk_counter, &mut stdout_collector),
            stream_output(client, &build.build_id, "stderr", stderr, &chunk_counter, &mut stderr_collector),
        )
    })
    .await;

    let mut collector = stdout_collector;
    collector.errors.extend(stderr_collector.errors);
    collector.warnings.extend(stderr_collector.warnings);
    collector.errors.truncate(MAX_DIAGNOSTICS);
    collector.warnings.truncate(MAX_DIAGNOSTICS);

    let exit_status = if stream_result.is_err() {
        let _ = child.start_kill();
        None
    } else {
        match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => {
                let _ = child.start_kill();
                None
            }
        }
    };

    let duration_ms = started_at.elapsed().as_millis() as u64;
    let (status, exit_code) = match exit_status {
        Some(0) => ("success".to_string(), Some(0)),
        Some(code) => ("failed".to_string(), Some(code)),
        None => ("failed".to_string(), Some(-1)),
    };

    let final_update = BuildRecordUpdate {
        build_id: build.build_id.clone(),
        status,
        started_at: None,
        completed_at: Some(now_rfc3339()),
        exit_code,
        errors: collector.errors,
        warnings: collector.warnings,
        duration_ms: Some(duration_ms),
    };
    if let Err(err) = client.update_build_record(&final_update).await {
        tracing::warn!(build_id = %build.build_id, error = %err, "updateBuildRecord(final) failed");
    }
}

struct DiagnosticCollector {
    errors: Vec<BuildDiagnostic>,
    warnings: Vec<BuildDiagnostic>,
}

impl DiagnosticCollector {
    fn new() -> Self {
        DiagnosticCollector {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn ingest(&mut self, chunk: &str) {
        for line in chunk.lines() {
            if let Some(diagnostic) = parse_diagnostic(line) {
                let is_warning = line.to_lowercase().contains("warning");
                let target = if is_warning {
                    &mut self.warnings
                } else {
                    &mut self.errors
                };
                if target.len() < MAX_DIAGNOSTICS {
                    target.push(diagnostic);
                }
            }
        }
    }
}

fn diagnostic_patterns() -> &'static [Regex] {
    static PATTERNS: once_cell::sync::Lazy<Vec<Regex>> = once_cell::sync::Lazy::new(|| {
        vec![
            // TypeScript diagnostic: path(line,col): error TSxxxx: msg
            Regex::new(r"^(?P<file>[^():]+)\((?P<line>\d+),(?P<col>\d+)\):\s*(error|warning)\s+TS\d+:\s*(?P<msg>.+)$").unwrap(),
            // Linter: line:col error msg rule
            Regex::new(r"^(?P<line>\d+):(?P<col>\d+)\s+(error|warning)\s+(?P<msg>.+)$").unwrap(),
            // Generic: Error:|ERROR: msg (also matches "Warning:"/"WARNING:")
            Regex::new(r"(?i)^(error|warning):\s*(?P<msg>.+)$").unwrap(),
            // Vite/Rollup: [vite] ... Error: msg
            Regex::new(r"(?i)^\[vite\].*(error|warning):\s*(?P<msg>.+)$").unwrap(),
        ]
    });
    &PATTERNS
}

fn parse_diagnostic(line: &str) -> Option<BuildDiagnostic> {
    for pattern in diagnostic_patterns() {
        if let Some(captures) = pattern.captures(line) {
            let file = captures.name("file").map(|m| m.as_str().to_string());
            let line_no = captures
                .name("line")
                .and_then(|m| m.as_str().parse::<u32>().ok());
            let column = captures
                .name("col")
                .and_then(|m| m.as_str().parse::<u32>().ok());
            let message = captures
                .name("msg")
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| line.to_string());
            return Some(BuildDiagnostic {
                message,
                file,
                line: line_no,
                column,
            });
        }
    }
    None
}

async fn stream_output(
    client: &dyn CloudApi,
    build_id: &str,
    stream_name: &str,
    mut reader: impl tokio::io::AsyncRead + Unpin,
    chunk_counter: &std::sync::atomic::AtomicU32,
    collector: &mut DiagnosticCollector,
) {
    let mut buffer = Vec::with_capacity(CHUNK_FLUSH_THRESHOLD * 2);
    let mut read_buf = [0u8; 8192];

    loop {
        let read = match reader.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(build_id, stream = stream_name, error = %err, "build output read failed");
                break;
            }
        };
        buffer.extend_from_slice(&read_buf[..read]);

        if buffer.len() >= CHUNK_FLUSH_THRESHOLD {
            flush_chunk(client, build_id, stream_name, &mut buffer, chunk_counter, collector).await;
        }
    }

    if !buffer.is_empty() {
        flush_chunk(client, build_id, stream_name, &mut buffer, chunk_counter, collector).await;
    }
}

async fn flush_chunk(
    client: &dyn CloudApi,
    build_id: &str,
    stream_name: &str,
    buffer: &mut Vec<u8>,
    chunk_counter: &std::sync::atomic::AtomicU32,
    collector: &mut DiagnosticCollector,
) {
    use std::sync::atomic::Ordering;

    let text = String::from_utf8_lossy(buffer).into_owned();
    collector.ingest(&text);

    let chunk_index = chunk_counter.fetch_add(1, Ordering::SeqCst);
    if let Err(err) = client
        .write_build_output_chunk(build_id, chunk_index, stream_name, buffer)
        .await
    {
        tracing::debug!(build_id, stream = stream_name, chunk_index, error = %err, "writeBuildOutputChunk failed");
    }
    buffer.clear();
}

/// Unused outside tests; kept so the per-build env map type stays visible
/// at the module boundary for callers constructing a [`PendingBuild`].
pub type BuildEnv = HashMap<String, String>;
