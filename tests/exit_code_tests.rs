use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn exit_code_for_argparse_error() {
    let mut cmd = Command::cargo_bin("loka").expect("binary");
    cmd.arg("not-a-real-command");
    cmd.assert().failure().code(predicate::eq(2));
}

#[test]
fn exit_code_for_missing_config_file() {
    let mut cmd = Command::cargo_bin("loka").expect("binary");
    cmd.args(["--config", "/definitely/missing.yaml", "models"]);
    cmd.assert()
        .failure()
        .code(predicate::eq(1))
        .stderr(predicate::str::contains("missing.yaml"));
}

#[test]
fn models_lists_the_local_worker() {
    let mut cmd = Command::cargo_bin("loka").expect("binary");
    // a keyless environment still has the zero-cost local adapter
    cmd.env_remove("ANTHROPIC_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("GROQ_API_KEY")
        .env_remove("MISTRAL_API_KEY")
        .env_remove("TOGETHER_API_KEY")
        .env_remove("PERPLEXITY_API_KEY")
        .env_remove("COHERE_API_KEY")
        .env_remove("AZURE_OPENAI_API_KEY")
        .arg("models");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("local(http://localhost:11434)"));
}

#[test]
fn help_exits_zero() {
    let mut cmd = Command::cargo_bin("loka").expect("binary");
    cmd.arg("--help");
    cmd.assert().success().stdout(predicate::str::contains("serve"));
}
