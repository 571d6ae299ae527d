//! In-memory daemon for lifecycle and controller tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::container::{ContainerSpec, ContainerSummary, Daemon, ExecOutput, ExecTransport};
use crate::error::{Error, Result};
use crate::protocol::HELPER_PATH;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub builds: usize,
    pub creates: usize,
    pub starts: usize,
    pub image_removals: usize,
    pub helper_execs: usize,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    image: String,
    running: bool,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    next_id: usize,
    calls: Calls,
    events: Vec<String>,
    specs: Vec<ContainerSpec>,
    uploads: Vec<(String, String, Vec<u8>)>,
    execs: Vec<Vec<String>>,
    exec_responses: VecDeque<ExecOutput>,
    helper_responses: VecDeque<Result<ExecOutput>>,
    fail_next_start: bool,
    fail_builds: bool,
    unreachable: bool,
}

/// Stateful stand-in for the container daemon
#[derive(Default)]
pub struct FakeDaemon {
    state: Mutex<State>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn check_reachable(state: &State) -> Result<()> {
        if state.unreachable {
            return Err(Error::DaemonUnreachable("connection refused".to_string()));
        }
        Ok(())
    }

    pub fn calls(&self) -> Calls {
        self.with(|s| s.calls)
    }

    pub fn event_log(&self) -> Vec<String> {
        self.with(|s| s.events.clone())
    }

    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.with(|s| s.execs.clone())
    }

    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.with(|s| s.uploads.clone())
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.with(|s| s.specs.last().cloned())
    }

    pub fn add_image(&self, image: &str) {
        self.with(|s| s.images.insert(image.to_string()));
    }

    pub fn add_container(&self, name: &str, image: &str, running: bool) {
        self.with(|s| {
            s.next_id += 1;
            let id = format!("fake{:04}", s.next_id);
            s.containers.insert(
                name.to_string(),
                FakeContainer {
                    id,
                    image: image.to_string(),
                    running,
                },
            );
        });
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.with(|s| s.containers.contains_key(name))
    }

    pub fn set_running(&self, name: &str, running: bool) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.running = running;
            }
        });
    }

    /// Remove a container behind the manager's back
    pub fn forget_container(&self, name: &str) {
        self.with(|s| s.containers.remove(name));
    }

    pub fn fail_next_start(&self) {
        self.with(|s| s.fail_next_start = true);
    }

    pub fn fail_builds(&self) {
        self.with(|s| s.fail_builds = true);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.with(|s| s.unreachable = unreachable);
    }

    /// Queue the output of the next non-helper exec call
    pub fn push_exec_response(&self, raw: Vec<u8>, exit_code: Option<i64>) {
        self.with(|s| s.exec_responses.push_back(ExecOutput { raw, exit_code }));
    }

    /// Queue the raw output of the next helper invocation
    pub fn push_helper_output(&self, raw: impl Into<Vec<u8>>) {
        self.with(|s| {
            s.helper_responses.push_back(Ok(ExecOutput {
                raw: raw.into(),
                exit_code: Some(0),
            }))
        });
    }

    /// Make the next helper invocation fail
    pub fn push_helper_error(&self, error: Error) {
        self.with(|s| s.helper_responses.push_back(Err(error)));
    }
}

#[async_trait]
impl Daemon for FakeDaemon {
    async fn list_containers(&self, name_filter: &str) -> Result<Vec<ContainerSummary>> {
        self.with(|s| {
            Self::check_reachable(s)?;
            Ok(s.containers
                .iter()
                .filter(|(name, _)| name.contains(name_filter))
                .map(|(name, c)| ContainerSummary {
                    id: c.id.clone(),
                    names: vec![name.clone()],
                    image: Some(c.image.clone()),
                    running: c.running,
                })
                .collect())
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.with(|s| {
            Self::check_reachable(s)?;
            Ok(s.images.contains(image))
        })
    }

    async fn build_image(&self, image: &str, context: Vec<u8>) -> Result<()> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.calls.builds += 1;
            s.events.push("build_image".to_string());
            if s.fail_builds || !context.starts_with(b"Dockerfile") {
                return Err(Error::ImageBuildFailed {
                    image: image.to_string(),
                    message: "step 2/3 failed".to_string(),
                });
            }
            s.images.insert(image.to_string());
            Ok(())
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.calls.creates += 1;
            s.events.push("create_container".to_string());
            s.specs.push(spec.clone());
            if s.containers.contains_key(&spec.name) {
                return Err(Error::ContainerNameConflict(spec.name.clone()));
            }
            if !s.images.contains(&spec.image) {
                return Err(Error::ImageNotFound(spec.image.clone()));
            }
            s.next_id += 1;
            let id = format!("fake{:04}", s.next_id);
            s.containers.insert(
                spec.name.clone(),
                FakeContainer {
                    id: id.clone(),
                    image: spec.image.clone(),
                    running: false,
                },
            );
            Ok(id)
        })
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.calls.starts += 1;
            s.events.push("start_container".to_string());
            if std::mem::take(&mut s.fail_next_start) {
                return Err(Error::Daemon {
                    status: Some(500),
                    message: "OCI runtime create failed".to_string(),
                });
            }
            match s.containers.get_mut(name) {
                Some(c) => {
                    c.running = true;
                    Ok(())
                }
                None => Err(Error::ContainerNotFound(name.to_string())),
            }
        })
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.events.push("stop_container".to_string());
            match s.containers.get_mut(name) {
                Some(c) => {
                    c.running = false;
                    Ok(())
                }
                None => Err(Error::ContainerNotFound(name.to_string())),
            }
        })
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.events.push("remove_container".to_string());
            match s.containers.remove(name) {
                Some(_) => Ok(()),
                None => Err(Error::ContainerNotFound(name.to_string())),
            }
        })
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.events.push("remove_image".to_string());
            if s.containers.values().any(|c| c.image == image) {
                return Err(Error::Daemon {
                    status: Some(409),
                    message: "image is being used by a container".to_string(),
                });
            }
            if s.images.remove(image) {
                s.calls.image_removals += 1;
                Ok(())
            } else {
                Err(Error::ImageNotFound(image.to_string()))
            }
        })
    }

    async fn upload_archive(&self, name: &str, dest: &str, archive: Vec<u8>) -> Result<()> {
        self.with(|s| {
            Self::check_reachable(s)?;
            if !s.containers.contains_key(name) {
                return Err(Error::ContainerNotFound(name.to_string()));
            }
            s.uploads.push((name.to_string(), dest.to_string(), archive));
            Ok(())
        })
    }
}

#[async_trait]
impl ExecTransport for FakeDaemon {
    async fn exec(&self, container: &str, argv: &[String]) -> Result<ExecOutput> {
        self.with(|s| {
            Self::check_reachable(s)?;
            s.execs.push(argv.to_vec());
            match s.containers.get(container) {
                None => return Err(Error::ContainerNotFound(container.to_string())),
                Some(c) if !c.running => {
                    return Err(Error::ExecutionTransportFailed(format!(
                        "container {container} is not running"
                    )))
                }
                Some(_) => {}
            }

            if argv.iter().any(|arg| arg == HELPER_PATH) {
                s.calls.helper_execs += 1;
                return s.helper_responses.pop_front().unwrap_or_else(|| {
                    Ok(ExecOutput {
                        raw: br#"{"status": "ok", "output": "", "error": ""}"#.to_vec(),
                        exit_code: Some(0),
                    })
                });
            }

            Ok(s.exec_responses.pop_front().unwrap_or(ExecOutput {
                raw: Vec::new(),
                exit_code: Some(0),
            }))
        })
    }
}
