use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the single JSON line emitted in `--json` mode.
    pub fn json(&self) -> serde_json::Value {
        let line = self
            .stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        serde_json::from_str(line).unwrap_or_else(|err| {
            panic!(
                "stdout is not JSON ({err}); log: {}",
                self.log_path.display()
            )
        })
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_tierconf") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "tierconf.exe"
    } else {
        "tierconf"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve tierconf binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("tierconf-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("TCF_SHARED_DIR")
        .env_remove("TCF_HOSTFILE")
        .env_remove("TCF_OUTPUT_FORMAT");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("execute tierconf command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("envs={envs:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write a config declaring one device per `mounts` entry, each 1 GiB usable.
pub fn write_declared_config(dir: &Path, shared_dir: &Path, mounts: &[&Path]) -> PathBuf {
    let mut text = format!(
        "[dpe]\nram = \"64m\"\n\n[paths]\nshared_dir = {:?}\nconfig_file = {:?}\n",
        shared_dir.display().to_string(),
        dir.join("tierconf.toml").display().to_string(),
    );
    for mount in mounts {
        text.push_str(&format!(
            "\n[[dpe.devices]]\nmount = {:?}\nsize = \"1g\"\n",
            mount.display().to_string()
        ));
    }
    let path = dir.join("tierconf.toml");
    fs::write(&path, text).expect("write test config");
    path
}
