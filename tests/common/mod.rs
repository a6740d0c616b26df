#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use alicerce::cmd::{Deadline, Shell};
use alicerce::config::VariableStore;
use alicerce::error::{ProvisionError, ProvisionResult};
use alicerce::host::{
    CertificateClient, CertificateRequest, CronJob, Database, DatabaseSpec, FileSystem,
    Firewall, FirewallStatus, Host, PackageManager, ReverseProxy, Scheduler, ServiceManager,
};
use alicerce::report::{Reporter, RunSummary};
use alicerce::source::{self, NonInteractive, Settings};
use alicerce::state::StepResult;
use alicerce::step::{Outcome, Step, StepContext, StepDefinition};

pub const API_KEY: &str = "sk-abcdEFGH12345678WXYZ";
pub const DB_PASSWORD: &str = "correct-horse-battery";

/// Everything the fake host knows about itself.
#[derive(Debug)]
pub struct World {
    pub packages: BTreeMap<String, String>,
    pub last_refresh: Option<SystemTime>,
    pub repositories: Vec<String>,
    /// Version `nodejs` gets when installed.
    pub node_version: String,
    pub units: BTreeMap<String, String>,
    pub enabled_units: BTreeSet<String>,
    pub active_units: BTreeSet<String>,
    pub sites: BTreeMap<String, String>,
    pub enabled_sites: BTreeSet<String>,
    pub default_site: bool,
    pub certificates: BTreeSet<String>,
    pub firewall: FirewallStatus,
    pub cron_running: bool,
    pub jobs: BTreeMap<String, String>,
    pub databases: Vec<DatabaseSpec>,
    pub files: BTreeMap<PathBuf, (String, u32)>,
    pub dirs: BTreeSet<PathBuf>,
    /// Every call that changed the host, in order.
    pub calls: Vec<String>,
    /// Operation name to stderr of an injected failure.
    pub failures: BTreeMap<String, String>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            packages: BTreeMap::new(),
            last_refresh: None,
            repositories: Vec::new(),
            node_version: "20.11.1-1nodesource1".to_string(),
            units: BTreeMap::new(),
            enabled_units: BTreeSet::new(),
            active_units: BTreeSet::new(),
            sites: BTreeMap::new(),
            enabled_sites: BTreeSet::new(),
            default_site: true,
            certificates: BTreeSet::new(),
            firewall: FirewallStatus::default(),
            cron_running: true,
            jobs: BTreeMap::new(),
            databases: Vec::new(),
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            calls: Vec::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl World {
    pub fn fail(&mut self, operation: &str, stderr: &str) {
        self.failures
            .insert(operation.to_string(), stderr.to_string());
    }

    pub fn put_file(&mut self, path: &str, content: &str) {
        self.files
            .insert(PathBuf::from(path), (content.to_string(), 0o644));
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(Path::new(path)).map(|(c, _)| c.as_str())
    }

    #[must_use]
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.files.get(Path::new(path)).map(|(_, m)| *m)
    }
}

#[derive(Clone, Default)]
pub struct FakeHost(pub Rc<RefCell<World>>);

impl FakeHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(&self) -> Host {
        Host {
            packages: Box::new(self.clone()),
            services: Box::new(self.clone()),
            proxy: Box::new(self.clone()),
            certificates: Box::new(self.clone()),
            firewall: Box::new(self.clone()),
            scheduler: Box::new(self.clone()),
            database: Box::new(self.clone()),
            files: Box::new(self.clone()),
            deadline: Deadline::new(),
        }
    }

    pub fn world(&self) -> std::cell::RefMut<'_, World> {
        self.0.borrow_mut()
    }

    fn mutate(&self, operation: &str, call: String) -> ProvisionResult<()> {
        let mut world = self.0.borrow_mut();
        if let Some(stderr) = world.failures.get(operation) {
            return Err(ProvisionError::CommandFailed {
                command: call,
                code: Some(1),
                stderr: stderr.clone(),
            });
        }
        world.calls.push(call);
        Ok(())
    }

    /// Uploaded application builds for the default app name.
    pub fn upload_artifacts(&self) {
        let mut world = self.world();
        world.put_file("/var/www/webapp/backend/server.js", "require('http');");
        world.put_file("/var/www/webapp/frontend/index.html", "<html>app</html>");
    }
}

impl PackageManager for FakeHost {
    fn is_installed(&self, package: &str) -> ProvisionResult<bool> {
        Ok(self.0.borrow().packages.contains_key(package))
    }

    fn installed_version(&self, package: &str) -> ProvisionResult<Option<String>> {
        Ok(self.0.borrow().packages.get(package).cloned())
    }

    fn refresh(&self) -> ProvisionResult<()> {
        self.mutate("refresh", "apt-get update".into())?;
        self.world().last_refresh = Some(SystemTime::now());
        Ok(())
    }

    fn last_refresh(&self) -> ProvisionResult<Option<SystemTime>> {
        Ok(self.0.borrow().last_refresh)
    }

    fn add_repository(&self, setup_script_url: &str) -> ProvisionResult<()> {
        self.mutate("add_repository", format!("add-repository {setup_script_url}"))?;
        self.world().repositories.push(setup_script_url.to_string());
        Ok(())
    }

    fn install(&self, packages: &[&str]) -> ProvisionResult<()> {
        self.mutate("install", format!("apt-get install {}", packages.join(" ")))?;
        let mut world = self.world();
        for package in packages {
            let version = if *package == "nodejs" {
                world.node_version.clone()
            } else {
                "1.0-1".to_string()
            };
            world.packages.insert((*package).to_string(), version);
        }
        Ok(())
    }
}

impl ServiceManager for FakeHost {
    fn unit_file(&self, unit: &str) -> ProvisionResult<Option<String>> {
        Ok(self.0.borrow().units.get(unit).cloned())
    }

    fn install_unit(&self, unit: &str, content: &str) -> ProvisionResult<()> {
        self.mutate("install_unit", format!("install unit {unit}"))?;
        self.world()
            .units
            .insert(unit.to_string(), content.to_string());
        Ok(())
    }

    fn is_enabled(&self, unit: &str) -> ProvisionResult<bool> {
        Ok(self.0.borrow().enabled_units.contains(unit))
    }

    fn is_active(&self, unit: &str) -> ProvisionResult<bool> {
        Ok(self.0.borrow().active_units.contains(unit))
    }

    fn enable(&self, unit: &str) -> ProvisionResult<()> {
        self.mutate("enable", format!("systemctl enable {unit}"))?;
        self.world().enabled_units.insert(unit.to_string());
        Ok(())
    }

    fn restart(&self, unit: &str) -> ProvisionResult<()> {
        self.mutate("restart", format!("systemctl restart {unit}"))?;
        self.world().active_units.insert(unit.to_string());
        Ok(())
    }
}

impl ReverseProxy for FakeHost {
    fn site(&self, name: &str) -> ProvisionResult<Option<String>> {
        Ok(self.0.borrow().sites.get(name).cloned())
    }

    fn is_site_enabled(&self, name: &str) -> ProvisionResult<bool> {
        Ok(self.0.borrow().enabled_sites.contains(name))
    }

    fn default_site_enabled(&self) -> ProvisionResult<bool> {
        Ok(self.0.borrow().default_site)
    }

    fn install_site(&self, name: &str, content: &str) -> ProvisionResult<()> {
        self.mutate("install_site", format!("install site {name}"))?;
        let mut world = self.world();
        world.sites.insert(name.to_string(), content.to_string());
        world.enabled_sites.insert(name.to_string());
        world.default_site = false;
        Ok(())
    }

    fn check_config(&self) -> ProvisionResult<()> {
        if let Some(stderr) = self.0.borrow().failures.get("check_config") {
            return Err(ProvisionError::CommandFailed {
                command: "nginx -t".into(),
                code: Some(1),
                stderr: stderr.clone(),
            });
        }
        Ok(())
    }

    fn reload(&self) -> ProvisionResult<()> {
        self.mutate("reload", "systemctl reload nginx".into())
    }
}

impl CertificateClient for FakeHost {
    fn has_certificate(&self, domain: &str) -> ProvisionResult<bool> {
        Ok(self.0.borrow().certificates.contains(domain))
    }

    fn issue(&self, request: &CertificateRequest) -> ProvisionResult<()> {
        self.mutate("issue", request.command_line())?;
        if let Some(domain) = request.domains.first() {
            self.world().certificates.insert(domain.clone());
        }
        Ok(())
    }
}

impl Firewall for FakeHost {
    fn status(&self) -> ProvisionResult<FirewallStatus> {
        Ok(self.0.borrow().firewall.clone())
    }

    fn allow(&self, rule: &str) -> ProvisionResult<()> {
        self.mutate("allow", format!("ufw allow {rule}"))?;
        self.world().firewall.allowed.push(rule.to_string());
        Ok(())
    }

    fn enable(&self) -> ProvisionResult<()> {
        self.mutate("firewall_enable", "ufw --force enable".into())?;
        self.world().firewall.active = true;
        Ok(())
    }
}

impl Scheduler for FakeHost {
    fn is_available(&self) -> ProvisionResult<bool> {
        Ok(self.0.borrow().cron_running)
    }

    fn job(&self, name: &str) -> ProvisionResult<Option<String>> {
        Ok(self.0.borrow().jobs.get(name).cloned())
    }

    fn register(&self, job: &CronJob) -> ProvisionResult<()> {
        self.mutate("register", format!("register cron job {}", job.name))?;
        self.world().jobs.insert(job.name.clone(), job.render());
        Ok(())
    }
}

impl Database for FakeHost {
    fn is_provisioned(&self, spec: &DatabaseSpec) -> ProvisionResult<bool> {
        Ok(self.0.borrow().databases.contains(spec))
    }

    fn provision(&self, spec: &DatabaseSpec) -> ProvisionResult<()> {
        self.mutate("provision", format!("provision database {}", spec.name))?;
        let mut world = self.world();
        world.databases.retain(|d| d.name != spec.name);
        world.databases.push(spec.clone());
        Ok(())
    }
}

impl FileSystem for FakeHost {
    fn read(&self, path: &Path) -> ProvisionResult<Option<String>> {
        Ok(self.0.borrow().files.get(path).map(|(c, _)| c.clone()))
    }

    fn write(&self, path: &Path, content: &str, mode: u32) -> ProvisionResult<()> {
        self.mutate("write", format!("write {}", path.display()))?;
        self.world()
            .files
            .insert(path.to_path_buf(), (content.to_string(), mode));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let world = self.0.borrow();
        world.files.contains_key(path) || world.dirs.contains(path)
    }

    fn create_dir_all(&self, path: &Path) -> ProvisionResult<()> {
        if self.0.borrow().dirs.contains(path) {
            return Ok(());
        }
        self.mutate("create_dir_all", format!("mkdir -p {}", path.display()))?;
        self.world().dirs.insert(path.to_path_buf());
        Ok(())
    }
}

/// A complete set of values for a run.
#[must_use]
pub fn settings(dns_ready: bool) -> Settings {
    Settings {
        domain: Some("shop.example.com".into()),
        contact_email: Some("ops@example.com".into()),
        database_password: Some(DB_PASSWORD.into()),
        api_key: Some(API_KEY.into()),
        dns_ready: Some(dns_ready),
        ..Settings::default()
    }
}

/// Validated store built the way the binary builds it.
#[must_use]
pub fn config(fake: &FakeHost, dns_ready: bool) -> VariableStore {
    source::collect(&mut NonInteractive, settings(dns_ready), fake).unwrap()
}

pub type Log = Rc<RefCell<Vec<String>>>;

/// How a scripted step behaves when applied.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Apply,
    Fail(String),
    Defer(String),
    Degrade(String),
    /// Apply reports success but the effect does not appear.
    Vanish,
    Sleep(Duration),
    TimeOut,
    /// Run a real command through a shell bound to the step deadline.
    Exec(&'static str, &'static [&'static str]),
}

#[derive(Clone)]
pub struct Handle {
    pub in_place: Rc<Cell<bool>>,
    pub behaviour: Rc<RefCell<Behaviour>>,
}

impl Handle {
    pub fn set(&self, behaviour: Behaviour) {
        *self.behaviour.borrow_mut() = behaviour;
    }
}

struct Scripted {
    id: String,
    log: Log,
    handle: Handle,
    timeout: Option<Duration>,
}

impl Step for Scripted {
    fn precondition(&self, _ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        self.log.borrow_mut().push(format!("check:{}", self.id));
        Ok(self.handle.in_place.get())
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        self.log.borrow_mut().push(format!("apply:{}", self.id));
        let behaviour = self.handle.behaviour.borrow().clone();
        match behaviour {
            Behaviour::Apply => {
                self.handle.in_place.set(true);
                Ok(Outcome::Applied)
            }
            Behaviour::Fail(stderr) => Err(ProvisionError::CommandFailed {
                command: format!("tool {}", self.id),
                code: Some(100),
                stderr,
            }),
            Behaviour::Defer(action) => Ok(Outcome::Deferred {
                notice: format!("{} deferred", self.id),
                action,
            }),
            Behaviour::Degrade(warning) => Ok(Outcome::Degraded { warning }),
            Behaviour::Vanish => Ok(Outcome::Applied),
            Behaviour::Sleep(duration) => {
                std::thread::sleep(duration);
                self.handle.in_place.set(true);
                Ok(Outcome::Applied)
            }
            Behaviour::TimeOut => Err(ProvisionError::CommandTimedOut {
                command: format!("tool {}", self.id),
                after: Duration::from_secs(1),
            }),
            Behaviour::Exec(program, args) => {
                Shell::new(Duration::from_secs(60))
                    .with_deadline(ctx.host.deadline.clone())
                    .run(program, args)?;
                self.handle.in_place.set(true);
                Ok(Outcome::Applied)
            }
        }
    }

    fn remedy(&self, _ctx: &StepContext<'_>) -> Option<String> {
        Some(format!("fix {}", self.id))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Builds scripted steps sharing one call log.
#[derive(Default)]
pub struct Script {
    pub log: Log,
    handles: BTreeMap<String, Handle>,
}

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, id: &str, deps: &[&str]) -> StepDefinition {
        self.step_with_timeout(id, deps, None)
    }

    pub fn step_with_timeout(
        &mut self,
        id: &str,
        deps: &[&str],
        timeout: Option<Duration>,
    ) -> StepDefinition {
        let handle = Handle {
            in_place: Rc::new(Cell::new(false)),
            behaviour: Rc::new(RefCell::new(Behaviour::Apply)),
        };
        self.handles.insert(id.to_string(), handle.clone());
        let action = Scripted {
            id: id.to_string(),
            log: Rc::clone(&self.log),
            handle,
            timeout,
        };
        deps.iter()
            .fold(StepDefinition::new(id, id, action), |def, d| def.after(d))
    }

    #[must_use]
    pub fn handle(&self, id: &str) -> Handle {
        self.handles[id].clone()
    }

    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|e| e.strip_prefix("apply:").map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

/// Reporter that remembers every callback.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<String>,
    pub summary: Option<RunSummary>,
}

impl Reporter for Recorder {
    fn on_step_start(&mut self, definition: &StepDefinition) {
        self.events.push(format!("start:{}", definition.id));
    }

    fn on_step_result(&mut self, result: &StepResult) {
        self.events
            .push(format!("result:{}:{}", result.step_id, result.status));
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        self.events.push(format!("complete:{}", summary.status));
        self.summary = Some(summary.clone());
    }
}
