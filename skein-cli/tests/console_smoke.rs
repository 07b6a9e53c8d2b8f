use std::process::Command;

fn run_skein(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_skein"))
        .args(args)
        .output()
        .expect("failed to run skein binary")
}

#[test]
fn cli_help_succeeds() {
    let out = run_skein(&["--help"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("skein"));
}

#[test]
fn cli_rejects_unknown_flag() {
    let out = run_skein(&["--not-a-real-flag"]);
    assert!(!out.status.success());
}
