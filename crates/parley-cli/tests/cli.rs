//! Tests for the `parley` binary

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use parley_core::ast::{BinOp, Expr, SourceFile, Stmt};
use parley_core::testutil::{call, file, func};
use tempfile::TempDir;

fn parley(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_parley"))
        .args(args)
        .current_dir(dir)
        .env_remove("PARLEY_LOG")
        .output()
        .expect("failed to run parley")
}

fn write_unit(dir: &TempDir, name: &str, source: &SourceFile) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string(source).unwrap()).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn sum_file() -> SourceFile {
    file(
        "sum.pl",
        vec![Stmt::ret(Expr::binary(Expr::int(1), BinOp::Add, Expr::int(2)))],
    )
}

fn recursion_file() -> SourceFile {
    file(
        "deep.pl",
        vec![
            Stmt::func(func("deep", &[], vec![Stmt::ret(call(Expr::var("deep"), vec![]))])),
            Stmt::ret(call(Expr::var("deep"), vec![])),
        ],
    )
}

#[test]
fn test_run_prints_result() {
    let dir = TempDir::new().unwrap();
    write_unit(&dir, "sum.json", &sum_file());

    let output = parley(dir.path(), &["run", "sum.json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "3");
}

#[test]
fn test_run_with_time() {
    let dir = TempDir::new().unwrap();
    write_unit(&dir, "sum.json", &sum_file());

    let output = parley(dir.path(), &["run", "--time", "sum.json"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("elapsed:"));
}

#[test]
fn test_multi_file_unit() {
    let dir = TempDir::new().unwrap();
    write_unit(
        &dir,
        "caller.json",
        &file(
            "caller.pl",
            vec![Stmt::ret(call(Expr::var("seven"), vec![]))],
        ),
    );
    write_unit(
        &dir,
        "seven.json",
        &file(
            "seven.pl",
            vec![Stmt::func(func("seven", &[], vec![Stmt::ret(Expr::int(7))]))],
        ),
    );

    let output = parley(dir.path(), &["run", "caller.json", "seven.json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "7");
}

#[test]
fn test_trap_exits_with_one() {
    let dir = TempDir::new().unwrap();
    write_unit(
        &dir,
        "div.json",
        &file(
            "div.pl",
            vec![Stmt::ret(Expr::binary(Expr::int(1), BinOp::Div, Expr::int(0)))],
        ),
    );

    let output = parley(dir.path(), &["run", "div.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("division by zero"));
}

#[test]
fn test_compile_error_exits_with_two() {
    let dir = TempDir::new().unwrap();
    write_unit(
        &dir,
        "bad.json",
        &file("bad.pl", vec![Stmt::ret(Expr::var("nowhere"))]),
    );

    let run = parley(dir.path(), &["run", "bad.json"]);
    assert_eq!(run.status.code(), Some(2));
    assert!(stderr(&run).contains("unresolved symbol 'nowhere'"));

    let check = parley(dir.path(), &["check", "bad.json"]);
    assert_eq!(check.status.code(), Some(2));
}

#[test]
fn test_missing_input_exits_with_two() {
    let dir = TempDir::new().unwrap();
    let output = parley(dir.path(), &["run", "absent.json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("absent.json"));
}

#[test]
fn test_check_and_disasm() {
    let dir = TempDir::new().unwrap();
    write_unit(&dir, "sum.json", &sum_file());

    let check = parley(dir.path(), &["check", "--module", "app", "sum.json"]);
    assert!(check.status.success());
    assert!(stdout(&check).contains("module 'app'"));

    let disasm = parley(dir.path(), &["disasm", "sum.json"]);
    assert!(disasm.status.success());
    let listing = stdout(&disasm);
    assert!(listing.contains("== <main> =="));
    assert!(listing.contains("ADD"));
    assert!(listing.contains("RETURN"));
}

#[test]
fn test_config_file_limits_frames() {
    let dir = TempDir::new().unwrap();
    write_unit(&dir, "deep.json", &recursion_file());
    std::fs::write(dir.path().join("parley.toml"), "[vm]\nmax_frames = 8\n").unwrap();

    let output = parley(dir.path(), &["run", "deep.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("stack overflow"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    write_unit(&dir, "sum.json", &sum_file());
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, "[vm]\nunknown = true\n").unwrap();

    let output = parley(
        dir.path(),
        &["run", "--config", config.to_str().unwrap(), "sum.json"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("invalid configuration"));
}
