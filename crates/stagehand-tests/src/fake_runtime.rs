//! In-memory container runtime for engine tests.
//!
//! Containers are plain records. The injected script is read back out of the
//! tar archive and interpreted line by line with a tiny subset of `sh`:
//! `echo`, `printf`, `true`, `false`, `exit N` and stderr redirection.
//! Anything else is "not found" and exits 127.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use stagehand_core::{
    ContainerRuntime, ContainerSpec, ContainerState, Error, ExecOutput, OutputChunk, PullStream,
    Result,
};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Knobs for the failure paths a test wants to exercise.
#[derive(Debug, Clone, Default)]
pub struct FakeBehaviour {
    /// Report every image as absent until it is pulled.
    pub image_missing: bool,
    pub fail_pull: bool,
    pub fail_create: bool,
    pub fail_start: bool,
    /// Started containers stay in `created` forever.
    pub never_running: bool,
    /// Started containers exit immediately.
    pub exit_on_start: bool,
    pub fail_copy: bool,
    /// The output stream breaks after its first frame.
    pub fail_attach_stream: bool,
    pub fail_remove: bool,
    /// Delay before every output frame.
    pub exec_delay: Option<Duration>,
    /// Split output into frames of at most this many bytes.
    pub chunk_size: Option<usize>,
}

/// Observable runtime calls, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    ImagePulled(String),
    Created {
        id: String,
        name: String,
        image: String,
        stage: String,
        job: String,
    },
    Started(String),
    ScriptCopied { id: String, path: String },
    ExecStarted { id: String, argv: Vec<String> },
    Removed(String),
    RemoveFailed(String),
}

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerSpec,
    status: &'static str,
    files: HashMap<String, (u32, Vec<u8>)>,
}

#[derive(Debug)]
struct FakeExec {
    container: String,
    argv: Vec<String>,
    exit_code: Option<i64>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    pulled: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    removed: HashMap<String, FakeContainer>,
    execs: HashMap<String, FakeExec>,
    events: Vec<RuntimeEvent>,
    live: usize,
    peak_live: usize,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    behaviour: FakeBehaviour,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.state().events.clone()
    }

    pub fn created_count(&self) -> usize {
        self.count(|e| matches!(e, RuntimeEvent::Created { .. }))
    }

    pub fn removed_count(&self) -> usize {
        self.count(|e| matches!(e, RuntimeEvent::Removed(_)))
    }

    pub fn remove_attempts(&self) -> usize {
        self.count(|e| matches!(e, RuntimeEvent::Removed(_) | RuntimeEvent::RemoveFailed(_)))
    }

    /// Containers that exist right now.
    pub fn live_containers(&self) -> usize {
        self.state().containers.len()
    }

    /// Highest number of containers alive at the same time.
    pub fn peak_live_containers(&self) -> usize {
        self.state().peak_live
    }

    /// Names of created containers, in creation order.
    pub fn created_names(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::Created { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ids of created containers, in creation order.
    pub fn created_ids(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::Created { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// The `ContainerSpec` a container was created with, removed or not.
    pub fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        let state = self.state();
        state
            .containers
            .get(id)
            .or_else(|| state.removed.get(id))
            .map(|c| c.spec.clone())
    }

    /// Mode and contents of a file copied into a container, removed or not.
    pub fn file(&self, id: &str, path: &str) -> Option<(u32, Vec<u8>)> {
        let state = self.state();
        state
            .containers
            .get(id)
            .or_else(|| state.removed.get(id))
            .and_then(|c| c.files.get(path).cloned())
    }

    fn count(&self, pred: impl Fn(&RuntimeEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| pred(e)).count()
    }

    fn frames(&self, chunks: Vec<OutputChunk>) -> Vec<OutputChunk> {
        let Some(size) = self.behaviour.chunk_size.filter(|s| *s > 0) else {
            return chunks;
        };

        chunks
            .into_iter()
            .flat_map(|chunk| {
                let (bytes, stderr) = match chunk {
                    OutputChunk::Stdout(b) => (b, false),
                    OutputChunk::Stderr(b) => (b, true),
                };
                bytes
                    .chunks(size)
                    .map(|piece| {
                        if stderr {
                            OutputChunk::Stderr(piece.to_vec())
                        } else {
                            OutputChunk::Stdout(piece.to_vec())
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(!self.behaviour.image_missing || self.state().pulled.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<PullStream> {
        if self.behaviour.fail_pull {
            let err = Error::ImagePull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            };
            return Ok(Box::pin(stream::iter(vec![
                Ok(format!("Pulling from {}", image)),
                Err(err),
            ])));
        }

        let mut state = self.state();
        state.pulled.insert(image.to_string());
        state.events.push(RuntimeEvent::ImagePulled(image.to_string()));

        Ok(Box::pin(stream::iter(vec![
            Ok(format!("Pulling from {}", image)),
            Ok("Download complete".to_string()),
        ])))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        if self.behaviour.fail_create {
            return Err(Error::ContainerCreate("no space left on device".to_string()));
        }

        let mut state = self.state();
        state.next_id += 1;
        let id = format!("fake-{:04}", state.next_id);

        let label = |key: &str| spec.labels.get(key).cloned().unwrap_or_default();
        state.events.push(RuntimeEvent::Created {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            stage: label("stagehand.stage"),
            job: label("stagehand.job"),
        });
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                status: "created",
                files: HashMap::new(),
            },
        );
        state.live += 1;
        state.peak_live = state.peak_live.max(state.live);

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        if self.behaviour.fail_start {
            return Err(Error::ContainerStart("executable file not found".to_string()));
        }

        let status = if self.behaviour.exit_on_start {
            "exited"
        } else if self.behaviour.never_running {
            "created"
        } else {
            "running"
        };

        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerStart(format!("no such container: {}", id)))?;
        container.status = status;
        state.events.push(RuntimeEvent::Started(id.to_string()));
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| Error::Internal(format!("no such container: {}", id)))?;

        Ok(ContainerState {
            running: container.status == "running",
            status: container.status.to_string(),
            exit_code: (container.status == "exited").then_some(0),
        })
    }

    async fn copy_archive_into(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        if self.behaviour.fail_copy {
            return Err(Error::ScriptInjection("read-only file system".to_string()));
        }

        let mut files = Vec::new();
        let mut reader = tar::Archive::new(archive.as_slice());
        let entries = reader
            .entries()
            .map_err(|e| Error::ScriptInjection(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::ScriptInjection(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| Error::ScriptInjection(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let mode = entry
                .header()
                .mode()
                .map_err(|e| Error::ScriptInjection(e.to_string()))?;
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            files.push((format!("{}/{}", path.trim_end_matches('/'), name), mode, contents));
        }

        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::ScriptInjection(format!("no such container: {}", id)))?;
        for (file, mode, contents) in files {
            container.files.insert(file, (mode, contents));
        }
        state.events.push(RuntimeEvent::ScriptCopied {
            id: id.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    async fn create_exec(&self, id: &str, argv: &[String]) -> Result<String> {
        let mut state = self.state();
        match state.containers.get(id) {
            Some(c) if c.status == "running" => {}
            Some(_) => return Err(Error::Exec(format!("container {} is not running", id))),
            None => return Err(Error::Exec(format!("no such container: {}", id))),
        }

        state.next_id += 1;
        let exec_id = format!("exec-{:04}", state.next_id);
        state.execs.insert(
            exec_id.clone(),
            FakeExec {
                container: id.to_string(),
                argv: argv.to_vec(),
                exit_code: None,
            },
        );
        Ok(exec_id)
    }

    async fn attach_exec(&self, exec_id: &str) -> Result<ExecOutput> {
        let (chunks, exit_code) = {
            let mut state = self.state();
            let exec = state
                .execs
                .get(exec_id)
                .ok_or_else(|| Error::Exec(format!("no such exec: {}", exec_id)))?;
            let container_id = exec.container.clone();
            let argv = exec.argv.clone();

            let script_path = argv.last().cloned().unwrap_or_default();
            let script = state
                .containers
                .get(&container_id)
                .and_then(|c| c.files.get(&script_path))
                .map(|(_, contents)| String::from_utf8_lossy(contents).into_owned());

            let (chunks, exit_code) = match script {
                Some(script) => interpret(&script),
                None => (
                    vec![OutputChunk::Stderr(
                        format!("sh: 1: {}: not found\n", script_path).into_bytes(),
                    )],
                    127,
                ),
            };

            if let Some(exec) = state.execs.get_mut(exec_id) {
                exec.exit_code = Some(exit_code);
            }
            state.events.push(RuntimeEvent::ExecStarted {
                id: container_id,
                argv,
            });
            (chunks, exit_code)
        };

        let mut items: Vec<Result<OutputChunk>> = self.frames(chunks).into_iter().map(Ok).collect();
        if self.behaviour.fail_attach_stream {
            items.truncate(1);
            items.push(Err(Error::OutputStream("connection reset by peer".to_string())));
        }
        tracing::debug!(exec_id, exit_code, frames = items.len(), "Fake exec attached");

        let delay = self.behaviour.exec_delay;
        let output = stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(output))
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>> {
        self.state()
            .execs
            .get(exec_id)
            .map(|e| e.exit_code)
            .ok_or_else(|| Error::Exec(format!("no such exec: {}", exec_id)))
    }

    async fn remove_container(&self, id: &str, _force: bool, _with_volumes: bool) -> Result<()> {
        let mut state = self.state();
        if self.behaviour.fail_remove {
            state.events.push(RuntimeEvent::RemoveFailed(id.to_string()));
            return Err(Error::ContainerRemove {
                container: id.to_string(),
                message: "device or resource busy".to_string(),
            });
        }

        let Some(container) = state.containers.remove(id) else {
            state.events.push(RuntimeEvent::RemoveFailed(id.to_string()));
            return Err(Error::ContainerRemove {
                container: id.to_string(),
                message: "no such container".to_string(),
            });
        };
        state.removed.insert(id.to_string(), container);
        state.live -= 1;
        state.events.push(RuntimeEvent::Removed(id.to_string()));
        Ok(())
    }
}

/// Run a script through the mini shell, returning its output and exit code.
pub fn interpret(script: &str) -> (Vec<OutputChunk>, i64) {
    let mut chunks = Vec::new();

    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("set ") {
            continue;
        }

        let (command, to_stderr) = strip_stderr_redirect(line);
        let words = split_words(command);
        let Some((program, args)) = words.split_first() else {
            continue;
        };

        let emit = |chunks: &mut Vec<OutputChunk>, text: String| {
            let bytes = text.into_bytes();
            chunks.push(if to_stderr {
                OutputChunk::Stderr(bytes)
            } else {
                OutputChunk::Stdout(bytes)
            });
        };

        match program.as_str() {
            "echo" => emit(&mut chunks, format!("{}\n", args.join(" "))),
            "printf" => emit(
                &mut chunks,
                args.first()
                    .map(|f| f.replace("\\n", "\n"))
                    .unwrap_or_default(),
            ),
            "true" | ":" => {}
            "false" => return (chunks, 1),
            "exit" => {
                let code = args.first().and_then(|c| c.parse().ok()).unwrap_or(0);
                return (chunks, code);
            }
            other => {
                chunks.push(OutputChunk::Stderr(
                    format!("sh: 1: {}: not found\n", other).into_bytes(),
                ));
                return (chunks, 127);
            }
        }
    }

    (chunks, 0)
}

fn strip_stderr_redirect(line: &str) -> (&str, bool) {
    for suffix in ["1>&2", ">&2", ">> /dev/stderr", "> /dev/stderr"] {
        if let Some(command) = line.strip_suffix(suffix) {
            return (command.trim_end(), true);
        }
    }
    (line, false)
}

fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
