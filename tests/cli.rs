use assert_cmd::Command;
use predicates::str::contains;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_root(tag: &str) -> std::path::PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("impc-cli-{tag}-{unique}"));
    std::fs::create_dir_all(&root).expect("failed to create temp root");
    root
}

#[test]
fn no_args_prints_banner_and_help() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_impc"));
    cmd.assert()
        .success()
        .stdout(contains("impc, version"))
        .stdout(contains("Usage: impc"))
        .stdout(contains("compile"))
        .stdout(contains("run"));
}

#[test]
fn help_flag_prints_help() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_impc"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("register machine"))
        .stdout(contains("Usage: impc"));
}

#[test]
fn compile_then_run_round_trip() {
    let root = temp_root("roundtrip");
    let input = root.join("demo.imp");
    std::fs::write(&input, "PROGRAM IS x, y IN x := 2; y := x * 2; WRITE y; END\n")
        .expect("failed to write input");
    let program_file = root.join("demo.mr");

    let mut compile = Command::new(env!("CARGO_BIN_EXE_impc"));
    compile
        .arg("compile")
        .arg(&input)
        .arg("-o")
        .arg(&program_file)
        .assert()
        .success();
    assert!(program_file.exists());

    let text = std::fs::read_to_string(&program_file).expect("read program");
    assert!(text.trim_end().ends_with("HALT"));

    let mut run = Command::new(env!("CARGO_BIN_EXE_impc"));
    run.arg("run")
        .arg(&program_file)
        .assert()
        .success()
        .stdout("4\n");
}

#[test]
fn default_build_writes_program_beside_the_source() {
    let root = temp_root("build");
    let input = root.join("demo.imp");
    std::fs::write(&input, "PROGRAM IS x IN x := 7; WRITE x; END\n").expect("write input");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_impc"));
    cmd.arg(&input).assert().success();
    assert!(root.join("demo.mr").exists());
}

#[test]
fn run_feeds_stdin_numbers_to_read() {
    let root = temp_root("stdin");
    let input = root.join("echo.imp");
    std::fs::write(
        &input,
        "PROGRAM IS a, b IN READ a; READ b; WRITE b; WRITE a; END\n",
    )
    .expect("write input");

    let mut compile = Command::new(env!("CARGO_BIN_EXE_impc"));
    compile.arg(&input).assert().success();

    let mut run = Command::new(env!("CARGO_BIN_EXE_impc"));
    run.arg("run")
        .arg(root.join("echo.mr"))
        .write_stdin("11 22\n")
        .assert()
        .success()
        .stdout("22\n11\n");
}

#[test]
fn rejects_wrong_input_extension() {
    let root = temp_root("ext");
    let input = root.join("demo.txt");
    std::fs::write(&input, "PROGRAM IS x IN x := 1; END\n").expect("write input");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_impc"));
    cmd.arg(&input)
        .assert()
        .failure()
        .stderr(contains("expected .imp source file"));
}

#[test]
fn compile_errors_are_reported_with_location() {
    let root = temp_root("diag");
    let input = root.join("bad.imp");
    std::fs::write(&input, "PROGRAM IS x IN y := 1; END\n").expect("write input");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_impc"));
    cmd.arg(&input)
        .assert()
        .failure()
        .stderr(contains("undeclared variable 'y'"))
        .stderr(contains("bad.imp"));
}
