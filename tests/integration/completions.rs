use clap::CommandFactory;
use clap_complete::aot::{generate, Shell};
use std::io::BufWriter;

fn completions_for(shell: Shell) -> String {
    let mut buf = BufWriter::new(Vec::new());
    generate(shell, &mut procrig::cli::Cli::command(), "procrig", &mut buf);
    String::from_utf8(buf.into_inner().unwrap()).unwrap()
}

#[test]
fn completions_bash_generates_output() {
    let output = completions_for(Shell::Bash);
    assert!(!output.is_empty(), "bash completions should not be empty");
    assert!(output.contains("procrig"));
    assert!(output.contains("watch"), "subcommands should be completed");
}

#[test]
fn completions_zsh_generates_output() {
    let output = completions_for(Shell::Zsh);
    assert!(output.contains("procrig"));
}

#[test]
fn completions_command_writes_to_stdout() {
    assert_cmd::Command::cargo_bin("procrig")
        .unwrap()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicates::str::contains("procrig"));
}
