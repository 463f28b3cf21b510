//! In-memory remote hosts for tests: scripted command responses plus a
//! shared fake remote filesystem that `copy_to`/`copy_from` and the
//! built-in handlers operate on. Everything the provisioner and auditor do
//! over SSH can run against this without a network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use scs_core::error::{Result, ScsError};

use crate::host::{Connector, ExecResult, RemoteHost};

/// Shared fake remote filesystem: absolute path -> content.
pub type RemoteFs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// One scripted response: the first rule whose pattern is contained in the
/// command wins. A rule may carry a sequence of responses; the last one
/// sticks once the sequence is exhausted.
struct Rule {
    pattern: String,
    responses: Vec<ExecResult>,
    used: usize,
}

impl Rule {
    fn next(&mut self) -> ExecResult {
        let i = self.used.min(self.responses.len() - 1);
        self.used += 1;
        self.responses[i].clone()
    }
}

/// A scriptable stand-in for one SSH-reachable host.
pub struct MockRemote {
    name: String,
    rules: Mutex<Vec<Rule>>,
    fs: RemoteFs,
    calls: Mutex<Vec<String>>,
    alive: Mutex<bool>,
}

impl MockRemote {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            rules: Mutex::new(Vec::new()),
            fs: Arc::new(Mutex::new(HashMap::new())),
            calls: Mutex::new(Vec::new()),
            alive: Mutex::new(true),
        })
    }

    /// Respond to any command containing `pattern` with `result`.
    /// Later rules are consulted after earlier ones.
    pub fn on(self: &Arc<Self>, pattern: &str, result: ExecResult) -> Arc<Self> {
        self.on_seq(pattern, vec![result])
    }

    /// Respond with each result in turn; the final one repeats.
    pub fn on_seq(self: &Arc<Self>, pattern: &str, responses: Vec<ExecResult>) -> Arc<Self> {
        assert!(!responses.is_empty(), "a rule needs at least one response");
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses,
            used: 0,
        });
        self.clone()
    }

    /// Pre-populate a file on the fake remote.
    pub fn with_file(self: &Arc<Self>, path: &str, content: &[u8]) -> Arc<Self> {
        self.fs.lock().unwrap().insert(path.to_string(), content.to_vec());
        self.clone()
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.lock().unwrap() = alive;
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any executed command contained `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c.contains(needle))
    }

    /// Direct access to the fake filesystem.
    pub fn fs(&self) -> RemoteFs {
        self.fs.clone()
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.lock().unwrap().get(path).cloned()
    }

    /// Built-in handling for the handful of shell idioms the layers above
    /// rely on, so most tests only script the interesting commands.
    fn builtin(&self, cmd: &str) -> Option<ExecResult> {
        let fs = self.fs.lock().unwrap();
        if let Some(rest) = cmd.strip_prefix("cat ") {
            let path = rest.trim();
            if !path.contains(' ') {
                return match fs.get(path) {
                    Some(content) => {
                        Some(ExecResult::ok(&String::from_utf8_lossy(content)))
                    }
                    None => Some(ExecResult::failed(1, "No such file or directory")),
                };
            }
        }
        if let Some(rest) = cmd.strip_prefix("test -f ") {
            let path = rest.trim();
            if !path.contains(' ') {
                let code = if fs.contains_key(path) { 0 } else { 1 };
                return Some(ExecResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    code,
                });
            }
        }
        if let Some(rest) = cmd.strip_prefix("rm -f ") {
            let path = rest.trim();
            if !path.contains(' ') {
                drop(fs);
                self.fs.lock().unwrap().remove(path);
                return Some(ExecResult::ok(""));
            }
        }
        None
    }
}

impl RemoteHost for MockRemote {
    fn name(&self) -> &str {
        &self.name
    }

    fn exec(&self, cmd: &str) -> Result<ExecResult> {
        self.calls.lock().unwrap().push(cmd.to_string());
        if !*self.alive.lock().unwrap() {
            return Err(ScsError::remote(format!("{}: host unreachable", self.name)));
        }
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| cmd.contains(&r.pattern)) {
            return Ok(rule.next());
        }
        drop(rules);
        Ok(self.builtin(cmd).unwrap_or_else(|| ExecResult::ok("")))
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        if !*self.alive.lock().unwrap() {
            return Err(ScsError::remote(format!("{}: host unreachable", self.name)));
        }
        let content = std::fs::read(local)?;
        self.calls
            .lock()
            .unwrap()
            .push(format!("scp-to {}", remote));
        self.fs.lock().unwrap().insert(remote.to_string(), content);
        Ok(())
    }

    fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        if !*self.alive.lock().unwrap() {
            return Err(ScsError::remote(format!("{}: host unreachable", self.name)));
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("scp-from {}", remote));
        let content = self
            .fs
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .ok_or_else(|| {
                ScsError::remote(format!("{}: {}: no such file", self.name, remote))
            })?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local, content)?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        *self.alive.lock().unwrap()
    }
}

/// Connector over a fixed set of mock hosts.
#[derive(Default)]
pub struct MockConnector {
    hosts: Mutex<HashMap<String, Arc<MockRemote>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host; subsequent `connect` calls for its name return it.
    pub fn add(&self, host: Arc<MockRemote>) {
        self.hosts.lock().unwrap().insert(host.name.clone(), host);
    }

    pub fn host(&self, name: &str) -> Option<Arc<MockRemote>> {
        self.hosts.lock().unwrap().get(name).cloned()
    }
}

impl Connector for MockConnector {
    fn connect(&self, host: &str) -> Result<Arc<dyn RemoteHost>> {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .map(|h| h as Arc<dyn RemoteHost>)
            .ok_or_else(|| ScsError::remote(format!("no route to host '{}'", host)))
    }
}
