use assert_cmd::Command;
use predicates::str::contains;
use std::error::Error;
use tempfile::tempdir;

fn bestshot_cmd() -> Command {
    let mut cmd = Command::cargo_bin("bestshot").expect("Failed to find bestshot binary");
    cmd.env_remove("BESTSHOT_CONFIG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    bestshot_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("process"))
        .stdout(contains("batch"))
        .stdout(contains("analyze"));
}

#[test]
fn test_process_missing_video_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let missing = dir.path().join("nowhere.mp4");

    bestshot_cmd()
        .arg("process")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(contains("Video not found"));
    Ok(())
}

#[test]
fn test_analyze_missing_video_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;

    bestshot_cmd()
        .arg("analyze")
        .arg(dir.path().join("nowhere.mp4"))
        .assert()
        .failure()
        .stderr(contains("Video not found"));
    Ok(())
}

#[test]
fn test_batch_empty_directory_succeeds() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("notes.txt"), "not a video")?;

    bestshot_cmd()
        .current_dir(dir.path())
        .arg("batch")
        .arg(dir.path())
        .assert()
        .success();
    Ok(())
}

#[test]
fn test_batch_missing_directory_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;

    bestshot_cmd()
        .current_dir(dir.path())
        .arg("batch")
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(contains("Input directory not found"));
    Ok(())
}

#[test]
fn test_invalid_top_k_rejected() {
    bestshot_cmd()
        .args(["process", "tour.mp4", "--top-k", "0"])
        .assert()
        .failure();
}
