use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn quarantine() -> Command {
    Command::cargo_bin("quarantine").expect("binary exists")
}

#[test]
fn eval_prints_value() {
    quarantine()
        .arg("eval")
        .arg("1 + 2 * 3")
        .assert()
        .success()
        .stdout(predicate::str::contains("7"));
}

#[test]
fn run_reads_stdin_by_default() {
    quarantine()
        .arg("run")
        .write_stdin("name = 'pipe'\nprint('hello from', name)\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from pipe"));
}

#[test]
fn run_accepts_dash_for_stdin() {
    quarantine()
        .args(["run", "-"])
        .write_stdin("import math\nprint(math.floor(math.pi))")
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn run_executes_script_file() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("script.qs");
    fs::write(
        &script,
        "fn square(x) { return x * x }\nprint(square(12))\n",
    )
    .expect("write script");

    quarantine()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("144"));
}

#[test]
fn refused_import_exits_nonzero() {
    quarantine()
        .arg("run")
        .write_stdin("print('before')\nimport os\nprint('after')")
        .assert()
        .failure()
        .stdout(predicate::str::contains("before"))
        .stdout(predicate::str::contains("after").not())
        .stderr(predicate::str::contains("import of module `os` is not allowed"));
}

#[test]
fn private_name_is_rejected_with_position() {
    quarantine()
        .arg("eval")
        .arg("__import('os')")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SecurityViolation"))
        .stderr(predicate::str::contains("line 1, column 1"));
}

#[test]
fn runtime_errors_exit_nonzero() {
    quarantine()
        .args(["eval", "1 / 0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ZeroDivisionError"));
}

#[test]
fn policy_file_extends_allowlist() {
    let dir = tempdir().expect("create temp dir");
    let policy = dir.path().join("policy.toml");
    fs::write(&policy, "allowed_modules = [\"os\"]\n").expect("write policy");

    quarantine()
        .arg("--policy")
        .arg(&policy)
        .arg("run")
        .write_stdin("import os\nprint(os.cwd() != '')")
        .assert()
        .success()
        .stdout(predicate::str::contains("true"));

    quarantine()
        .arg("--policy")
        .arg(&policy)
        .arg("run")
        .write_stdin("import math")
        .assert()
        .failure();
}

#[test]
fn invalid_policy_file_is_reported() {
    let dir = tempdir().expect("create temp dir");
    let policy = dir.path().join("policy.toml");
    fs::write(&policy, "allowed_modules = 3\n").expect("write policy");

    quarantine()
        .arg("--policy")
        .arg(&policy)
        .args(["eval", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid policy"));
}

#[test]
fn repl_keeps_bindings_between_lines() {
    quarantine()
        .arg("repl")
        .write_stdin("x = 20\nfn add(a) {\n  return a + x\n}\nadd(22)\n:quit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}
