// ABOUTME: Scripted executor for integration tests, with a tiny in-memory container engine
// Records every command, upload, script and tunnel so tests can assert on order and effects

#![allow(dead_code)]

use async_trait::async_trait;
use dev_swap::config::{Config, RuntimeConfig, Selection};
use dev_swap::executor::{ExecError, Executor, OutputStream, StreamSession, TunnelCloser};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub running: bool,
    pub owned: bool,
}

/// Output of one streaming session.
#[derive(Debug, Clone)]
pub enum ScriptedStream {
    /// Yields the lines, then ends.
    Ends(Vec<String>),
    /// Yields the lines, then stays open until closed.
    Holds(Vec<String>),
}

struct Rule {
    pattern: String,
    response: Result<String, (i32, String)>,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    log: Vec<String>,
    rules: Vec<Rule>,
    containers: HashMap<String, FakeContainer>,
    services: HashMap<String, bool>,
    streams: VecDeque<ScriptedStream>,
    scripts: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct FakeExecutor {
    state: Arc<Mutex<State>>,
    remote: bool,
}

impl FakeExecutor {
    pub fn new(remote: bool) -> Self {
        Self {
            state: Arc::default(),
            remote,
        }
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(&self, pattern: &str, output: &str) {
        self.push_rule(pattern, Ok(output.to_string()), None);
    }

    /// Fail commands containing `pattern` with exit status `status`.
    pub fn fail(&self, pattern: &str, status: i32, output: &str) {
        self.push_rule(pattern, Err((status, output.to_string())), None);
    }

    pub fn respond_once(&self, pattern: &str, output: &str) {
        self.push_rule(pattern, Ok(output.to_string()), Some(1));
    }

    /// Fail only the next command containing `pattern`.
    pub fn fail_once(&self, pattern: &str, status: i32, output: &str) {
        self.push_rule(pattern, Err((status, output.to_string())), Some(1));
    }

    fn push_rule(
        &self,
        pattern: &str,
        response: Result<String, (i32, String)>,
        remaining: Option<usize>,
    ) {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            response,
            remaining,
        });
    }

    pub fn add_container(&self, name: &str, running: bool, owned: bool) {
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(name.to_string(), FakeContainer { running, owned });
    }

    pub fn set_service_running(&self, service: &str, running: bool) {
        self.state
            .lock()
            .unwrap()
            .services
            .insert(service.to_string(), running);
    }

    pub fn service_running(&self, service: &str) -> Option<bool> {
        self.state.lock().unwrap().services.get(service).copied()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn push_stream(&self, stream: ScriptedStream) {
        self.state.lock().unwrap().streams.push_back(stream);
    }

    pub fn script(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().scripts.get(path).cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Index of the first log entry containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.log().iter().position(|entry| entry.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.log().iter().filter(|entry| entry.contains(needle)).count()
    }

    /// Wait until some log entry contains `needle`, or panic after a while.
    pub async fn wait_for(&self, needle: &str) {
        for _ in 0..500 {
            if self.position(needle).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {needle:?}; log: {:#?}", self.log());
    }

    /// Wait until `count(needle)` reaches `expected`, or panic after a while.
    pub async fn wait_for_count(&self, needle: &str, expected: usize) {
        for _ in 0..500 {
            if self.count(needle) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {expected} x {needle:?}; log: {:#?}",
            self.log()
        );
    }

    fn record(&self, entry: String) {
        self.state.lock().unwrap().log.push(entry);
    }
}

fn last_token(command: &str) -> String {
    command
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .trim_matches('\'')
        .to_string()
}

fn filtered_name(command: &str) -> Option<String> {
    let start = command.find("name=^/")? + "name=^/".len();
    let end = command[start..].find('$')? + start;
    Some(command[start..end].to_string())
}

impl State {
    fn apply_rules(&mut self, command: &str) -> Option<Result<String, (i32, String)>> {
        let rule = self.rules.iter_mut().find(|rule| {
            command.contains(&rule.pattern) && rule.remaining != Some(0)
        })?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.response.clone())
    }

    /// Minimal engine behavior for the commands the container manager issues.
    fn engine(&mut self, command: &str) -> Result<String, (i32, String)> {
        if command.contains(" compose stop ") {
            self.services.insert(last_token(command), false);
            return Ok(String::new());
        }
        if command.contains(" compose start ") {
            self.services.insert(last_token(command), true);
            return Ok(String::new());
        }
        if command.contains(" ps -a -q --filter ") {
            let name = filtered_name(command).unwrap_or_default();
            return Ok(if self.containers.contains_key(&name) {
                format!("{name}\n")
            } else {
                String::new()
            });
        }
        if command.contains("index .Config.Labels") {
            let name = last_token(command);
            return match self.containers.get(&name) {
                Some(c) if c.owned => Ok("true\n".to_string()),
                Some(_) => Ok("<no value>\n".to_string()),
                None => Err((1, format!("Error: No such object: {name}"))),
            };
        }
        if command.contains("{{.State.Running}}") {
            let name = last_token(command);
            return match self.containers.get(&name) {
                Some(c) => Ok(format!("{}\n", c.running)),
                None => Err((1, format!("Error: No such object: {name}"))),
            };
        }
        if let Some(rest) = command.strip_prefix("docker create --name ") {
            let name = rest.split_whitespace().next().unwrap_or_default().to_string();
            let owned = command.contains("-l dev-swap=true");
            self.containers.insert(name.clone(), FakeContainer { running: false, owned });
            return Ok(format!("{name}-id\n"));
        }
        if let Some(name) = command.strip_prefix("docker start ") {
            return match self.containers.get_mut(name.trim()) {
                Some(c) => {
                    c.running = true;
                    Ok(String::new())
                }
                None => Err((1, format!("Error: No such container: {name}"))),
            };
        }
        if let Some(name) = command.strip_prefix("docker restart ") {
            return match self.containers.get_mut(name.trim()) {
                Some(c) => {
                    c.running = true;
                    Ok(String::new())
                }
                None => Err((1, format!("Error: No such container: {name}"))),
            };
        }
        if let Some(name) = command.strip_prefix("docker rm -f ") {
            self.containers.remove(name.trim());
            return Ok(String::new());
        }
        Ok(String::new())
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, command: &str) -> Result<String, ExecError> {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.log.push(command.to_string());
            match state.apply_rules(command) {
                Some(response) => response,
                None => state.engine(command),
            }
        };
        response.map_err(|(status, output)| ExecError::CommandFailed {
            command: command.to_string(),
            status: Some(status),
            output,
        })
    }

    async fn create_session(&self) -> Result<Box<dyn StreamSession>, ExecError> {
        Ok(Box::new(FakeSession {
            executor: self.clone(),
            output: None,
            writer: None,
        }))
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        if !local_path.exists() {
            return Err(ExecError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", local_path.display()),
            )));
        }
        self.record(format!("upload {remote_path}"));
        Ok(())
    }

    async fn create_script(&self, content: &str, path: &str) -> Result<(), ExecError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("script {path}"));
        state.scripts.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn create_tunnel(
        &self,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelCloser>, ExecError> {
        self.record(format!("tunnel open {local_port}:{remote_port}"));
        Ok(Box::new(FakeTunnel {
            executor: self.clone(),
        }))
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.record("close".to_string());
        Ok(())
    }
}

struct FakeTunnel {
    executor: FakeExecutor,
}

impl TunnelCloser for FakeTunnel {
    fn close(&self) -> Result<(), ExecError> {
        self.executor.record("tunnel closed".to_string());
        Ok(())
    }
}

struct FakeSession {
    executor: FakeExecutor,
    output: Option<DuplexStream>,
    writer: Option<DuplexStream>,
}

#[async_trait]
impl StreamSession for FakeSession {
    async fn start(&mut self, command: &str) -> Result<(), ExecError> {
        let stream = {
            let mut state = self.executor.state.lock().unwrap();
            state.log.push(format!("session {command}"));
            state.streams.pop_front()
        };

        let (reader, mut writer) = tokio::io::duplex(64 * 1024);
        let (lines, holds) = match stream {
            Some(ScriptedStream::Ends(lines)) => (lines, false),
            Some(ScriptedStream::Holds(lines)) => (lines, true),
            None => (Vec::new(), true),
        };
        for line in lines {
            writer.write_all(format!("{line}\n").as_bytes()).await?;
        }

        self.output = Some(reader);
        if holds {
            self.writer = Some(writer);
        }
        Ok(())
    }

    fn take_output(&mut self) -> Result<OutputStream, ExecError> {
        self.output
            .take()
            .map(|reader| Box::new(reader) as OutputStream)
            .ok_or(ExecError::SessionNotStarted)
    }

    async fn wait(&mut self) -> Result<(), ExecError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.writer = None;
        self.output = None;
        self.executor.record("session closed".to_string());
        Ok(())
    }
}

pub const INSPECT_API: &str = r#"[{
    "Id": "abc123",
    "Config": {
        "Image": "shop/api:1.4",
        "Env": ["A=1"],
        "Cmd": ["/app/api"],
        "WorkingDir": "/app",
        "Labels": {"com.docker.compose.project": "shop", "com.docker.compose.service": "api"}
    },
    "Mounts": [{"Type": "bind", "Source": "/host", "Destination": "/ctr", "RW": true}],
    "NetworkSettings": {"Networks": {"shop_default": {}}}
}]"#;

/// Fake with a running compose service `api` backed by container `abc123`.
pub fn compose_fake(remote: bool) -> FakeExecutor {
    let fake = FakeExecutor::new(remote);
    fake.respond("docker compose ps -a -q api", "abc123\n");
    fake.respond("docker inspect abc123", INSPECT_API);
    fake.set_service_running("api", true);
    fake
}

/// Runtime config for component `api` with its binary at `binary`.
pub fn runtime_config(binary: &Path, debugger_enabled: bool) -> RuntimeConfig {
    let toml = format!(
        r#"
        [defaults]
        debounce_ms = 50
        reconnect_delay_ms = 50

        [components.api]
        local_binary = "{}"
        target_service = "api"
        container_binary_path = "/app/api"
        extra_ports = [8080]

        [components.api.debugger]
        enabled = {}

        [projects.shop]
        compose_dir = "/srv/shop"
        "#,
        binary.display(),
        debugger_enabled
    );
    Config::parse(&toml)
        .expect("test config parses")
        .resolve(&Selection::default())
        .expect("test config resolves")
}
