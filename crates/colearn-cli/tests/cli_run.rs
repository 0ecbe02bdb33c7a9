use anyhow::Result;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn colearn() -> Command {
    Command::new(env!("CARGO_BIN_EXE_colearn"))
}

#[test]
fn test_offline_run_saves_table_and_recording() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();
    fs::write(
        temp_path.join("colearn.yml"),
        r#"
run:
  num_test_runs: 3
exploration:
  initial: 0.5
  seed: 7
"#,
    )?;

    let output = colearn()
        .current_dir(temp_path)
        .args(["run", "--offline", "--q-table", "q.json", "--record", "run.jsonl"])
        .output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(temp_path.join("q.json").exists());
    let recording = fs::read_to_string(temp_path.join("run.jsonl"))?;
    let summaries = recording
        .lines()
        .filter(|line| line.contains("\"episode.summary\""))
        .count();
    assert_eq!(summaries, 3);
    assert!(recording.contains("run_budget_exhausted"));
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    fs::write(
        temp_dir.path().join("colearn.yml"),
        "learning:\n  learning_rate: 1.5\n",
    )?;

    let output = colearn()
        .current_dir(temp_dir.path())
        .args(["run", "--offline"])
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("learning_rate"));
    Ok(())
}

#[test]
fn test_inspect_prints_every_state() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let table = temp_dir.path().join("q.json");

    let output = colearn()
        .current_dir(temp_dir.path())
        .args(["run", "--offline", "--episodes", "1", "--q-table", "q.json"])
        .output()?;
    assert!(output.status.success());

    let output = colearn().arg("inspect").arg(&table).output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let rows = stdout.lines().skip(2).count();
    assert_eq!(rows, 17);
    assert!(stdout.contains("release"));
    Ok(())
}
