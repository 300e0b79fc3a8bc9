//! Scripted stand-ins for the task engine and the remote browser.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::lib::{
    automation::types::{AutomationError, ElementId, RemoteSession, SessionConnector},
    config::types::Settings,
    orchestrator::types::Deployer,
    tasks::{
        engine::TaskEngine,
        types::{EngineError, EngineVersion, ExecOutput, ImageBuildSpec, TaskHandle, TaskSpec},
    },
};
use tokio_util::sync::CancellationToken;

pub const FIXTURE_IMAGE: &[u8] = include_bytes!("../../fixtures/ignition.img");
pub const SELENIUM_BOOTED: &str = "12:00:01.123 INFO [Standalone.execute] - Started Selenium Standalone 4.21.0 (revision 79ed462ef4): http://172.17.0.2:4444";
pub const CONVERTER_BOOTED: &str = "\n> fuel-ignition@1.0.0 dev\n> vite --port 3000\n\n  VITE v5.2.0  ready in 412 ms\n\n  ➜  Local:   http://localhost:3000/fuel-ignition/\n";

pub fn single_file_archive(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents).unwrap();
    builder.into_inner().unwrap()
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    logs: HashMap<String, Vec<String>>,
    log_polls: HashMap<String, usize>,
    listings: Vec<ExecOutput>,
    listing_polls: usize,
    archive: Vec<u8>,
    exit_codes: HashMap<String, i64>,
    fail_build: HashSet<String>,
    fail_run: HashSet<String>,
    fail_image_removal: HashSet<String>,
    builds: Vec<ImageBuildSpec>,
    runs: Vec<TaskSpec>,
    live: HashSet<String>,
    teardown: Vec<String>,
    execs: Vec<String>,
    copied: Vec<String>,
    violations: Vec<String>,
}

/// Engine double. Log snapshots and listings are replayed one per poll and
/// the last one repeats. Any call on a stopped task is recorded as a violation.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        FakeEngine::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn script_logs(&self, image: &str, snapshots: &[&str]) {
        self.state().logs.insert(
            image.to_string(),
            snapshots.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn script_listings(&self, listings: Vec<ExecOutput>) {
        self.state().listings = listings;
    }

    pub fn set_archive(&self, archive: Vec<u8>) {
        self.state().archive = archive;
    }

    pub fn set_exit_code(&self, image: &str, code: i64) {
        self.state().exit_codes.insert(image.to_string(), code);
    }

    pub fn fail_build(&self, tag: &str) {
        self.state().fail_build.insert(tag.to_string());
    }

    pub fn fail_run(&self, image: &str) {
        self.state().fail_run.insert(image.to_string());
    }

    pub fn fail_image_removal(&self, image: &str) {
        self.state().fail_image_removal.insert(image.to_string());
    }

    pub fn log_polls(&self, handle: &TaskHandle) -> usize {
        self.state().log_polls.get(&handle.id).copied().unwrap_or(0)
    }

    pub fn listing_polls(&self) -> usize {
        self.state().listing_polls
    }

    pub fn builds(&self) -> Vec<ImageBuildSpec> {
        self.state().builds.clone()
    }

    pub fn runs(&self) -> Vec<TaskSpec> {
        self.state().runs.clone()
    }

    pub fn execs(&self) -> Vec<String> {
        self.state().execs.clone()
    }

    pub fn copied_paths(&self) -> Vec<String> {
        self.state().copied.clone()
    }

    pub fn teardown_log(&self) -> Vec<String> {
        self.state().teardown.clone()
    }

    pub fn live_tasks(&self) -> usize {
        self.state().live.len()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Nothing left running, nothing released twice, nothing touched after release.
    pub fn assert_released_once(&self) {
        let state = self.state();
        assert!(state.live.is_empty(), "leaked tasks: {:?}", state.live);
        assert!(state.violations.is_empty(), "violations: {:?}", state.violations);
        let unique: HashSet<_> = state.teardown.iter().collect();
        assert_eq!(unique.len(), state.teardown.len(), "{:?}", state.teardown);
    }

    fn ensure_live(state: &mut FakeState, handle: &TaskHandle, op: &str) -> Result<(), EngineError> {
        if state.live.contains(&handle.id) {
            Ok(())
        } else {
            state.violations.push(format!("{} on released {}", op, handle.id));
            Err(EngineError::NotFound(handle.id.clone()))
        }
    }
}

#[async_trait]
impl TaskEngine for FakeEngine {
    async fn engine_version(&self) -> Result<EngineVersion, EngineError> {
        Ok(EngineVersion::new(24, 0, 7))
    }

    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<String, EngineError> {
        let mut state = self.state();
        state.builds.push(spec.clone());
        if state.fail_build.contains(&spec.tag) {
            return Err(EngineError::Build(format!("scripted failure for {}", spec.tag)));
        }
        Ok(spec.tag.clone())
    }

    async fn run_task(&self, spec: &TaskSpec) -> Result<TaskHandle, EngineError> {
        let mut state = self.state();
        state.runs.push(spec.clone());
        if state.fail_run.contains(&spec.image) {
            return Err(EngineError::Client(format!("scripted failure for {}", spec.image)));
        }
        let id = format!("task-{}", state.next_id);
        state.next_id += 1;
        state.live.insert(id.clone());
        Ok(TaskHandle::new(id, spec.name.clone(), spec.image.clone()))
    }

    async fn logs(&self, handle: &TaskHandle) -> Result<String, EngineError> {
        let mut state = self.state();
        Self::ensure_live(&mut state, handle, "logs")?;
        let poll = state.log_polls.entry(handle.id.clone()).or_insert(0);
        let index = *poll;
        *poll += 1;
        let text = state
            .logs
            .get(&handle.image)
            .and_then(|snapshots| snapshots.get(index).or(snapshots.last()))
            .cloned()
            .unwrap_or_default();
        Ok(handle.logs.merge(text))
    }

    async fn exec(&self, handle: &TaskHandle, command: &str) -> Result<ExecOutput, EngineError> {
        let mut state = self.state();
        Self::ensure_live(&mut state, handle, "exec")?;
        state.execs.push(command.to_string());
        if !command.starts_with("ls ") {
            return Ok(ExecOutput {
                exit_code: 0,
                output: String::new(),
            });
        }
        let index = state.listing_polls;
        state.listing_polls += 1;
        Ok(state
            .listings
            .get(index)
            .or(state.listings.last())
            .cloned()
            .unwrap_or(ExecOutput {
                exit_code: 2,
                output: "No such file or directory".to_string(),
            }))
    }

    async fn copy_out(&self, handle: &TaskHandle, path: &str) -> Result<Vec<u8>, EngineError> {
        let mut state = self.state();
        Self::ensure_live(&mut state, handle, "copy_out")?;
        state.copied.push(path.to_string());
        Ok(state.archive.clone())
    }

    async fn wait(&self, handle: &TaskHandle) -> Result<i64, EngineError> {
        let mut state = self.state();
        Self::ensure_live(&mut state, handle, "wait")?;
        Ok(state.exit_codes.get(&handle.image).copied().unwrap_or(0))
    }

    async fn stop(&self, handle: &TaskHandle) -> Result<(), EngineError> {
        let mut state = self.state();
        state.teardown.push(format!("stop {}", handle.id));
        if !state.live.remove(&handle.id) {
            state.violations.push(format!("stop on released {}", handle.id));
        }
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.teardown.push(format!("rmi {}", image));
        if state.fail_image_removal.contains(image) {
            return Err(EngineError::Client(format!("scripted removal failure for {}", image)));
        }
        Ok(())
    }
}

/// How the fake converter page behaves.
#[derive(Debug, Clone)]
pub struct FakeUi {
    pub export_groups: usize,
    pub polls_until_visible: usize,
    pub polls_until_enabled: usize,
    pub missing_input: bool,
    pub refuse_connection: bool,
}

impl Default for FakeUi {
    fn default() -> Self {
        FakeUi {
            export_groups: 12,
            polls_until_visible: 0,
            polls_until_enabled: 0,
            missing_input: false,
            refuse_connection: false,
        }
    }
}

pub struct FakeConnector {
    ui: FakeUi,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new(ui: FakeUi) -> Self {
        FakeConnector {
            ui,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, AutomationError> {
        if self.ui.refuse_connection {
            return Err(AutomationError::Session("connection refused".to_string()));
        }
        Ok(Box::new(FakeSession {
            ui: self.ui.clone(),
            events: self.events.clone(),
            labels: Mutex::new(Vec::new()),
            displayed_checks: AtomicUsize::new(0),
            enabled_checks: AtomicUsize::new(0),
        }))
    }
}

struct FakeSession {
    ui: FakeUi,
    events: Arc<Mutex<Vec<String>>>,
    labels: Mutex<Vec<String>>,
    displayed_checks: AtomicUsize,
    enabled_checks: AtomicUsize,
}

impl FakeSession {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn remember(&self, label: String) -> ElementId {
        let mut labels = self.labels.lock().unwrap();
        labels.push(label);
        ElementId(labels.len() - 1)
    }

    fn label(&self, id: ElementId) -> Result<String, AutomationError> {
        self.labels
            .lock()
            .unwrap()
            .get(id.0)
            .cloned()
            .ok_or(AutomationError::UnknownElement(id))
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        self.record(format!("navigate {}", url));
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<ElementId, AutomationError> {
        if self.ui.missing_input {
            return Err(AutomationError::ElementMissing(format!("[name={:?}]", name)));
        }
        Ok(self.remember(name.to_string()))
    }

    async fn find_by_id(&self, id: &str) -> Result<ElementId, AutomationError> {
        if id != "export" {
            return Err(AutomationError::ElementMissing(format!("#{}", id)));
        }
        Ok(self.remember(id.to_string()))
    }

    async fn find_children_by_tag(
        &self,
        parent: ElementId,
        tag: &str,
    ) -> Result<Vec<ElementId>, AutomationError> {
        if self.label(parent)? != "export" {
            return Ok(Vec::new());
        }
        Ok((0..self.ui.export_groups)
            .map(|i| self.remember(format!("{}-{}", tag, i)))
            .collect())
    }

    async fn find_by_tag(&self, parent: ElementId, tag: &str) -> Result<ElementId, AutomationError> {
        let parent = self.label(parent)?;
        let position = parent
            .rsplit('-')
            .next()
            .ok_or_else(|| AutomationError::ElementMissing(tag.to_string()))?;
        Ok(self.remember(format!("{}-{}", tag, position)))
    }

    async fn send_keys(&self, element: ElementId, text: &str) -> Result<(), AutomationError> {
        self.record(format!("keys {} {}", self.label(element)?, text));
        Ok(())
    }

    async fn scroll_into_view(&self, element: ElementId) -> Result<(), AutomationError> {
        self.record(format!("scroll {}", self.label(element)?));
        Ok(())
    }

    async fn is_displayed(&self, _element: ElementId) -> Result<bool, AutomationError> {
        let checks = self.displayed_checks.fetch_add(1, Ordering::SeqCst);
        Ok(checks >= self.ui.polls_until_visible)
    }

    async fn is_enabled(&self, _element: ElementId) -> Result<bool, AutomationError> {
        let checks = self.enabled_checks.fetch_add(1, Ordering::SeqCst);
        Ok(checks >= self.ui.polls_until_enabled)
    }

    async fn click(&self, element: ElementId) -> Result<(), AutomationError> {
        self.record(format!("click {}", self.label(element)?));
        Ok(())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.record("close".to_string());
        Ok(())
    }
}

/// Settings for a project rooted at `root`: fast polls, no checkout sync,
/// the repository's own templates.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.polling.interval_ms = 1;
    settings.polling.ui_poll_ms = 1;
    settings.polling.ui_wait_secs = 1;
    settings.conversion.repository = None;
    settings.paths.template_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates");
    settings.resolve_paths(root);
    settings
}

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub connector: Arc<FakeConnector>,
    pub deployer: Deployer,
    pub root: tempfile::TempDir,
}

impl Harness {
    pub fn new(ui: FakeUi, configure: impl FnOnce(&mut Settings)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut settings = test_settings(root.path());
        configure(&mut settings);

        let engine = Arc::new(FakeEngine::new());
        let connector = Arc::new(FakeConnector::new(ui));
        let deployer = Deployer::new(
            engine.clone(),
            connector.clone(),
            settings,
            CancellationToken::new(),
        );
        Harness {
            engine,
            connector,
            deployer,
            root,
        }
    }

    /// Scripts a conversion that boots, downloads `image` and finishes.
    pub fn script_conversion(&self, image: &[u8]) {
        let conversion = &self.deployer.settings.conversion;
        self.engine
            .script_logs(&conversion.selenium_image, &["booting selenium", SELENIUM_BOOTED]);
        self.engine.script_logs(&conversion.tag, &[CONVERTER_BOOTED]);
        self.engine.script_listings(vec![
            ExecOutput {
                exit_code: 2,
                output: "ls: cannot access '/home/seluser/Downloads': No such file or directory"
                    .to_string(),
            },
            ExecOutput {
                exit_code: 0,
                output: "ignition.img.part\n".to_string(),
            },
            ExecOutput {
                exit_code: 0,
                output: "ignition.img\n".to_string(),
            },
        ]);
        self.engine
            .set_archive(single_file_archive("ignition.img", image));
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }
}
