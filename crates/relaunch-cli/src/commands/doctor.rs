use crate::GlobalOpts;
use relaunch_core::{
    BuildContext, CONFIG_FILE_NAME, RelaunchConfig, RuntimeEnv, StorageLocation,
};
use relaunch_runtime::{DockerClient, GitClient};

pub async fn doctor(opts: &GlobalOpts) -> anyhow::Result<()> {
    let project_dir = std::path::absolute(&opts.project_dir)?;
    let mut report = DoctorReport::default();

    // Config file
    let config_path = opts
        .config
        .clone()
        .unwrap_or_else(|| project_dir.join(CONFIG_FILE_NAME));
    let config = match RelaunchConfig::load_from(&config_path) {
        Ok(c) => {
            report.config_file = if config_path.exists() {
                CheckResult::ok("Found")
            } else {
                CheckResult::ok("Not found — using defaults")
            };
            c
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&e.to_string());
            tracing::warn!(error = %e, "continuing diagnostics with default config");
            RelaunchConfig::default()
        }
    };

    // Docker
    let docker = DockerClient::new();
    report.docker = match docker.client_version().await {
        Ok(v) => CheckResult::ok(&v),
        Err(e) => CheckResult::fail(&e.to_string()),
    };
    report.daemon = match docker.server_version().await {
        Ok(v) => CheckResult::ok(&v),
        Err(e) => CheckResult::fail(&format!("daemon not reachable: {e}")),
    };

    // Git
    let git = GitClient::new(&project_dir, &config.source);
    report.git = match git.version().await {
        Ok(v) => CheckResult::ok(&v),
        Err(e) => CheckResult::fail(&e.to_string()),
    };
    report.work_tree = match git.is_work_tree().await {
        Ok(true) => CheckResult::ok("Inside a git work tree"),
        Ok(false) => CheckResult::fail("not a git work tree"),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    // Runtime configuration
    let env_path = config.env_file_path(&project_dir);
    report.env_file = match RuntimeEnv::validate(&env_path, &config.env.required) {
        Ok(env) => CheckResult::ok(&format!(
            "{} ({} key(s))",
            env_path.display(),
            env.keys.len()
        )),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    // Container definition
    let context = BuildContext::new(&config.context_dir(&project_dir), &config.build.dockerfile);
    report.dockerfile = match context.declares_volume(&config.storage.mount) {
        Ok(true) => CheckResult::ok(&format!("declares VOLUME {}", config.storage.mount)),
        Ok(false) => CheckResult::ok(&format!(
            "Found (no VOLUME {} declaration)",
            config.storage.mount
        )),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    report.storage = storage_check(&config.storage_location(&project_dir));

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed — see above for details");
    }

    Ok(())
}

fn storage_check(location: &StorageLocation) -> CheckResult {
    match location {
        StorageLocation::HostDir(dir) if dir.is_dir() => {
            CheckResult::ok(&format!("{} exists", dir.display()))
        }
        StorageLocation::HostDir(dir) if dir.exists() => {
            CheckResult::fail(&format!("{} exists but is not a directory", dir.display()))
        }
        StorageLocation::HostDir(dir) => CheckResult::ok(&format!(
            "{} will be created on deploy",
            dir.display()
        )),
        StorageLocation::Volume(name) => CheckResult::ok(&format!("volume {name}")),
    }
}

// ── Report types ──

#[derive(Debug, Default)]
pub(crate) struct DoctorReport {
    pub config_file: CheckResult,
    pub docker: CheckResult,
    pub daemon: CheckResult,
    pub git: CheckResult,
    pub work_tree: CheckResult,
    pub env_file: CheckResult,
    pub dockerfile: CheckResult,
    pub storage: CheckResult,
}

impl DoctorReport {
    fn rows(&self) -> [(&'static str, &CheckResult); 8] {
        [
            ("Config file", &self.config_file),
            ("docker CLI", &self.docker),
            ("docker daemon", &self.daemon),
            ("git CLI", &self.git),
            ("Source tree", &self.work_tree),
            ("Env file", &self.env_file),
            ("Dockerfile", &self.dockerfile),
            ("Storage", &self.storage),
        ]
    }

    pub fn all_passed(&self) -> bool {
        self.rows().iter().all(|(_, r)| r.passed)
    }
}

impl std::fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "relaunch doctor")?;
        writeln!(f, "------------------------------")?;
        for (label, result) in self.rows() {
            writeln!(f, "{label:<16}{:<4}{}", result.icon(), result.detail)?;
        }
        write!(f, "------------------------------")
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}
