use std::io::Write as _;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_binding(dir: &std::path::Path) {
    let path = dir.join("echo.module.yaml");
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(b"bindings:\n  - module_id: echo\n    target: builtin::echo\n").unwrap();
}

#[test]
fn discover_reports_the_registered_module() {
    let dir = tempfile::tempdir().unwrap();
    write_binding(dir.path());

    Command::cargo_bin("relay")
        .unwrap()
        .args(["discover", "--bindings"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("echo"));
}

#[test]
fn call_echoes_inputs() {
    let dir = tempfile::tempdir().unwrap();
    write_binding(dir.path());

    Command::cargo_bin("relay")
        .unwrap()
        .args(["call", "--bindings"])
        .arg(dir.path())
        .args(["echo", "--inputs", "{\"hi\":1}"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hi\": 1"));
}
