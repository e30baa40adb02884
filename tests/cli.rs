//! Integration tests for the `sop` binary: search verdicts, exit codes,
//! trace artifacts and config layering.
//!
//! Every command runs in a scratch working directory with an isolated user
//! config dir so no host configuration leaks in.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ENV_OVERRIDES: [&str; 7] = [
    "SOP_STEPS",
    "SOP_THREADS",
    "SOP_TIME_BUDGET_MS",
    "SOP_MAX_STATES",
    "SOP_HOSTS",
    "SOP_ENFORCE",
    "SOP_LOG",
];

struct Sandbox {
    work: TempDir,
    config: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            work: TempDir::new().expect("work dir"),
            config: TempDir::new().expect("config dir"),
        }
    }

    fn sop(&self) -> Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("sop");
        cmd.current_dir(self.work.path());
        cmd.env("SOP_CONFIG_DIR", self.config.path());
        cmd.env("SOP_LOG_DIR", self.config.path().join("logs"));
        for key in ENV_OVERRIDES {
            cmd.env_remove(key);
        }
        cmd
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.work.path().join(name)
    }

    fn write_project_config(&self, contents: &str) {
        fs::write(self.path("sop.toml"), contents).expect("write sop.toml");
    }
}

fn json_stdout(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is json")
}

#[test]
fn check_finds_set_domain_counterexample() {
    let sandbox = Sandbox::new();
    sandbox
        .sop()
        .args(["check", "set-domain-keeps-src-host", "--steps", "2"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("counterexample found"))
        .stdout(predicate::str::contains("set_domain"));
}

#[test]
fn run_json_reports_cross_origin_xhr_witness() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .sop()
        .args(["--json", "run", "cross-origin-xhr", "--steps", "2"])
        .output()
        .expect("run sop");
    assert!(output.status.success(), "{output:?}");

    let value = json_stdout(&output.stdout);
    assert_eq!(value["report"]["mode"], "run");
    assert_eq!(value["report"]["verdict"]["outcome"], "witnesses");
    let steps = value["traces"][0]["steps"]
        .as_array()
        .expect("steps array");
    assert_eq!(
        steps.last().and_then(|step| step["kind"].as_str()),
        Some("xml_http_request")
    );
}

#[test]
fn enforced_dom_sop_has_no_counterexample() {
    let sandbox = Sandbox::new();
    sandbox
        .sop()
        .args(["check", "dom-sop", "--enforce", "dom-sop", "--steps", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no counterexample within bound"))
        .stdout(predicate::str::contains("unsat within bound"));

    sandbox
        .sop()
        .args(["check", "dom-sop", "--steps", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no counterexample within bound"));
}

#[test]
fn facts_counts_default_initial_states() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .sop()
        .args(["facts", "--json"])
        .output()
        .expect("run sop");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(json_stdout(&output.stdout)["count"], 72);

    sandbox
        .sop()
        .args(["facts", "--list", "--limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("72 initial state(s)"))
        .stdout(predicate::str::contains("(71 more)"));
}

#[test]
fn trace_artifact_replays() {
    let sandbox = Sandbox::new();
    let trace = sandbox.path("trace.json");
    sandbox
        .sop()
        .args(["check", "set-domain-keeps-src-host", "--steps", "2", "--trace-out"])
        .arg(&trace)
        .assert()
        .code(2);
    assert!(trace.exists());

    sandbox
        .sop()
        .arg("replay")
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("trace valid"));
}

#[test]
fn tampered_trace_is_rejected() {
    let sandbox = Sandbox::new();
    let trace = sandbox.path("trace.json");
    sandbox
        .sop()
        .args(["check", "set-domain-keeps-src-host", "--steps", "2", "--trace-out"])
        .arg(&trace)
        .assert()
        .code(2);
    let original: serde_json::Value =
        serde_json::from_slice(&fs::read(&trace).expect("read trace")).expect("parse trace");

    let tamperings: [(&str, serde_json::Value, &str); 2] = [
        ("before", serde_json::json!(5), "clock"),
        (
            "from",
            serde_json::json!({ "role": "browser", "id": 99 }),
            "browser 99 is outside the universe",
        ),
    ];
    for (field, value, expected) in tamperings {
        let mut tampered = original.clone();
        tampered["records"][0][field] = value;
        let path = sandbox.path(&format!("tampered-{field}.json"));
        fs::write(&path, serde_json::to_vec(&tampered).expect("encode")).expect("write trace");

        sandbox
            .sop()
            .arg("replay")
            .arg(&path)
            .assert()
            .code(1)
            .stderr(predicate::str::contains(expected));
    }
}

#[test]
fn project_config_is_validated() {
    let sandbox = Sandbox::new();
    sandbox.write_project_config("[search]\nsteps = 0\n");
    sandbox
        .sop()
        .args(["check", "dom-sop"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("step bound must be at least 1"));
}

#[test]
fn env_overrides_project_config() {
    let sandbox = Sandbox::new();
    sandbox.write_project_config("enforce = [\"xhr-sop\"]\n\n[search]\nsteps = 4\n");
    let output = sandbox
        .sop()
        .env("SOP_STEPS", "2")
        .args(["config", "show", "--json"])
        .output()
        .expect("run sop");
    assert!(output.status.success(), "{output:?}");

    let value = json_stdout(&output.stdout);
    assert_eq!(value["search"]["steps"], 2);
    assert_eq!(value["enforce"], serde_json::json!(["xhr-sop"]));
}

#[test]
fn invalid_env_override_is_reported() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .sop()
        .env("SOP_STEPS", "many")
        .args(["config", "show", "--json"])
        .output()
        .expect("run sop");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(json_stdout(&output.stdout)["search"]["steps"], 3);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid SOP_STEPS, ignoring"), "{stderr}");
}

#[test]
fn config_init_refuses_to_clobber() {
    let sandbox = Sandbox::new();
    let written = sandbox.config.path().join("config.toml");
    sandbox
        .sop()
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote"));
    assert!(written.exists());

    sandbox
        .sop()
        .args(["config", "init"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("refusing to overwrite"));

    sandbox
        .sop()
        .args(["config", "init", "--force"])
        .assert()
        .success();

    sandbox
        .sop()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(path_str(&written)));
}

#[test]
fn explicit_config_must_exist() {
    let sandbox = Sandbox::new();
    sandbox
        .sop()
        .args(["--config", "missing.toml", "facts"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing.toml"));
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}
