//! Common test utilities: fakes for every seam the updater talks through.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use node_updater::config::{AuthConfig, Timeouts, Transport};
use node_updater::error::{ProcessError, ProviderError};
use node_updater::process::ProcessRunner;
use node_updater::provider::{NodeProvider, NodeTags};
use node_updater::runner::{CommandRunner, CommandRunnerArgs, RunOptions, build_command_runner};
use node_updater::status::TAG_NODE_STATUS;
use node_updater::{UpdateError, UpdateRequest};

/// Timeouts shrunk so deadline paths finish in well under a second.
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        node_start_wait: Duration::from_millis(300),
        ip_poll_interval: Duration::from_millis(10),
        ready_check_interval: Duration::from_millis(10),
        ready_check_timeout: Duration::from_millis(50),
        command: Duration::from_secs(1),
        rsync: Duration::from_secs(1),
    }
}

pub fn auth() -> AuthConfig {
    AuthConfig {
        ssh_user: "ubuntu".to_string(),
        ssh_private_key: "/keys/cluster.pem".to_string(),
    }
}

pub fn request(runtime_hash: &str) -> UpdateRequest {
    UpdateRequest {
        cluster_name: "test-cluster".to_string(),
        runtime_hash: runtime_hash.to_string(),
        auth: auth(),
        use_internal_ip: false,
        docker: None,
        file_mounts: BTreeMap::new(),
        initialization_commands: vec!["init-1".to_string()],
        setup_commands: vec!["setup-1".to_string(), "setup-2".to_string()],
        start_commands: vec!["start-1".to_string()],
    }
}

// ---------------------------------------------------------------------------
// FakeProcessRunner
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Response {
    Fail(i32),
    Output(String),
    Delay(Duration),
}

/// Records every argument vector and answers from scripted rules.
///
/// A rule applies when the space-joined argv contains its needle; the first
/// matching rule wins and unmatched calls succeed with empty output.
#[derive(Default)]
pub struct FakeProcessRunner {
    calls: Mutex<Vec<Vec<String>>>,
    rules: Mutex<Vec<(String, Response)>>,
}

impl FakeProcessRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_when(&self, needle: &str, exit_code: i32) {
        self.rules
            .lock()
            .push((needle.to_string(), Response::Fail(exit_code)));
    }

    pub fn output_when(&self, needle: &str, output: &str) {
        self.rules
            .lock()
            .push((needle.to_string(), Response::Output(output.to_string())));
    }

    /// Make matching calls take `delay` before succeeding.
    pub fn delay_when(&self, needle: &str, delay: Duration) {
        self.rules
            .lock()
            .push((needle.to_string(), Response::Delay(delay)));
    }

    pub fn clear_rules(&self) {
        self.rules.lock().clear();
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose joined argv contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.joined_calls()
            .iter()
            .filter(|call| call.contains(needle))
            .count()
    }

    pub fn joined_calls(&self) -> Vec<String> {
        self.calls().iter().map(|argv| argv.join(" ")).collect()
    }

    async fn respond(&self, argv: &[String]) -> Result<Vec<u8>, ProcessError> {
        self.calls.lock().push(argv.to_vec());
        let joined = argv.join(" ");
        let response = self
            .rules
            .lock()
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        match response {
            Some(Response::Fail(exit_code)) => Err(ProcessError::Exit {
                argv: argv.to_vec(),
                exit_code,
            }),
            Some(Response::Output(out)) => Ok(out.into_bytes()),
            Some(Response::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn check_call(&self, argv: &[String]) -> Result<(), ProcessError> {
        self.respond(argv).await.map(|_| ())
    }

    async fn check_output(&self, argv: &[String]) -> Result<Vec<u8>, ProcessError> {
        self.respond(argv).await
    }
}

// ---------------------------------------------------------------------------
// FakeCommandRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Call {
    Run { cmd: String, opts: RunOptions },
    RsyncUp { source: String, target: String },
    RsyncDown { source: String, target: String },
}

#[derive(Clone, Copy)]
enum Failure {
    Exit(i32),
    Reported,
}

/// Command runner that records calls instead of reaching a node.
#[derive(Clone, Default)]
pub struct FakeCommandRunner {
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Arc<Mutex<HashMap<String, Failure>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `cmd` exit with `exit_code` every time it runs.
    pub fn fail(&self, cmd: &str, exit_code: i32) -> &Self {
        self.failures
            .lock()
            .insert(cmd.to_string(), Failure::Exit(exit_code));
        self
    }

    /// Make `cmd` fail as an already-reported failure.
    pub fn fail_reported(&self, cmd: &str) -> &Self {
        self.failures
            .lock()
            .insert(cmd.to_string(), Failure::Reported);
        self
    }

    pub fn delay(&self, cmd: &str, delay: Duration) -> &Self {
        self.delays.lock().insert(cmd.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Commands passed to `run`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Run { cmd, .. } => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub fn rsync_ups(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::RsyncUp { source, target } => Some((source, target)),
                _ => None,
            })
            .collect()
    }

    pub fn options_for(&self, wanted: &str) -> Option<RunOptions> {
        self.calls().into_iter().find_map(|call| match call {
            Call::Run { cmd, opts } if cmd == wanted => Some(opts),
            _ => None,
        })
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&mut self, cmd: &str, opts: RunOptions) -> Result<Vec<u8>, UpdateError> {
        self.calls.lock().push(Call::Run {
            cmd: cmd.to_string(),
            opts,
        });
        let delay = self.delays.lock().get(cmd).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().get(cmd).copied();
        match failure {
            Some(Failure::Exit(exit_code)) => Err(UpdateError::CommandFailed {
                command: cmd.to_string(),
                exit_code,
            }),
            Some(Failure::Reported) => Err(UpdateError::Reported {
                command: cmd.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn run_rsync_up(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        self.calls.lock().push(Call::RsyncUp {
            source: source.to_string(),
            target: target.to_string(),
        });
        Ok(())
    }

    async fn run_rsync_down(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        self.calls.lock().push(Call::RsyncDown {
            source: source.to_string(),
            target: target.to_string(),
        });
        Ok(())
    }

    fn remote_shell_command_str(&self) -> String {
        "fake-shell\n".to_string()
    }
}

// ---------------------------------------------------------------------------
// FakeProvider
// ---------------------------------------------------------------------------

/// Node provider that keeps every tag write for later inspection.
///
/// Nodes with an installed [`FakeCommandRunner`] get it; others get a real
/// runner for `transport`.
pub struct FakeProvider {
    tags: Mutex<HashMap<String, NodeTags>>,
    history: Mutex<HashMap<String, Vec<NodeTags>>>,
    ips: Mutex<HashMap<String, String>>,
    terminated: Mutex<HashSet<String>>,
    runners: Mutex<HashMap<String, FakeCommandRunner>>,
    transport: Transport,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Self::with_transport(Transport::Ssh)
    }

    pub fn with_transport(transport: Transport) -> Arc<Self> {
        Arc::new(Self {
            tags: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            ips: Mutex::new(HashMap::new()),
            terminated: Mutex::new(HashSet::new()),
            runners: Mutex::new(HashMap::new()),
            transport,
        })
    }

    pub fn set_ip(&self, node_id: &str, ip: &str) {
        self.ips.lock().insert(node_id.to_string(), ip.to_string());
    }

    pub fn set_tag(&self, node_id: &str, key: &str, value: &str) {
        self.tags
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn terminate(&self, node_id: &str) {
        self.terminated.lock().insert(node_id.to_string());
    }

    pub fn install_runner(&self, node_id: &str, runner: FakeCommandRunner) {
        self.runners.lock().insert(node_id.to_string(), runner);
    }

    pub fn tag(&self, node_id: &str, key: &str) -> Option<String> {
        self.tags
            .lock()
            .get(node_id)
            .and_then(|tags| tags.get(key).cloned())
    }

    /// Every `set_node_tags` call for the node, in order.
    pub fn writes(&self, node_id: &str) -> Vec<NodeTags> {
        self.history
            .lock()
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The sequence of status values written for the node.
    pub fn status_history(&self, node_id: &str) -> Vec<String> {
        self.writes(node_id)
            .into_iter()
            .filter_map(|tags| tags.get(TAG_NODE_STATUS).cloned())
            .collect()
    }
}

#[async_trait]
impl NodeProvider for FakeProvider {
    async fn node_ip(
        &self,
        node_id: &str,
        _internal: bool,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self.ips.lock().get(node_id).cloned())
    }

    async fn is_terminated(&self, node_id: &str) -> Result<bool, ProviderError> {
        Ok(self.terminated.lock().contains(node_id))
    }

    async fn node_tags(&self, node_id: &str) -> Result<NodeTags, ProviderError> {
        Ok(self.tags.lock().get(node_id).cloned().unwrap_or_default())
    }

    async fn set_node_tags(&self, node_id: &str, tags: NodeTags) -> Result<(), ProviderError> {
        self.history
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .push(tags.clone());
        self.tags
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .extend(tags);
        Ok(())
    }

    fn command_runner(&self, args: CommandRunnerArgs) -> Box<dyn CommandRunner> {
        match self.runners.lock().remove(&args.node_id) {
            Some(fake) => Box::new(fake),
            None => build_command_runner(&self.transport, args),
        }
    }
}

/// Arguments for building a runner directly against `provider`.
pub fn runner_args(
    node_id: &str,
    provider: Arc<FakeProvider>,
    process_runner: Arc<FakeProcessRunner>,
) -> CommandRunnerArgs {
    CommandRunnerArgs {
        log_prefix: format!("test: {}: ", node_id),
        node_id: node_id.to_string(),
        auth: auth(),
        cluster_name: "test-cluster".to_string(),
        use_internal_ip: false,
        docker: None,
        provider,
        process_runner,
        timeouts: fast_timeouts(),
    }
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// One recorded tracing event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}

/// Layer keeping every event so tests can inspect what was logged.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Install a capturing subscriber for the current thread.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == Level::ERROR)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
