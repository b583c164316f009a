use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn write_workspace(dir: &Path, config: &str) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(dir.join("config"))?;
    fs::write(dir.join("config/shared.env"), "DATABRICKS_HOST=https://example.cloud\n")?;
    fs::write(dir.join("deployflow.toml"), config)?;
    Ok(())
}

#[test]
fn test_help_lists_stage_flags() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("deployflow")?;

    cmd.current_dir(dir.path())
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--pipeline"))
        .stdout(predicate::str::contains("--clear-locks"));

    Ok(())
}

#[test]
fn test_unknown_flag_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("deployflow")?;

    cmd.current_dir(dir.path())
        .args(["deploy", "--warp-speed"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--warp-speed"));

    Ok(())
}

#[test]
fn test_missing_environment_file_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("deployflow")?;

    cmd.current_dir(dir.path())
        .args(["deploy", "--validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("shared.env"));

    Ok(())
}

#[test]
fn test_bad_config_names_the_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workspace(dir.path(), "target = \"\"\n")?;
    let mut cmd = Command::cargo_bin("deployflow")?;

    cmd.current_dir(dir.path())
        .args(["deploy", "--validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("target"));

    Ok(())
}

#[cfg(unix)]
#[test]
fn test_validate_with_stub_backend() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workspace(
        dir.path(),
        r#"
[backend]
program = "echo"

[[stages]]
id = "core"
location = "."
"#,
    )?;
    let mut cmd = Command::cargo_bin("deployflow")?;

    cmd.current_dir(dir.path())
        .args(["deploy", "--validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] core: validation passed"));

    Ok(())
}

#[cfg(unix)]
#[test]
fn test_json_report_goes_to_stdout() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workspace(
        dir.path(),
        r#"
[backend]
program = "echo"

[[stages]]
id = "core"
location = "."
"#,
    )?;
    let mut cmd = Command::cargo_bin("deployflow")?;

    cmd.current_dir(dir.path())
        .args(["deploy", "--validate", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mode\": \"validate\""))
        .stderr(predicate::str::contains("[OK] core"));

    Ok(())
}
