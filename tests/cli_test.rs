use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/messages.csv")
        .arg("--batch-size")
        .arg("3")
        .arg("--batch-timeout-ms")
        .arg("0");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "correlation_key,reason,items,total,message_ids",
        ))
        // M3 repeats INSTR-1 and never reaches the batch
        .stdout(predicate::str::contains("BATCH-A,size,3,17.5,M1;M2;M5"))
        // Still open at end of input, flushed on shutdown
        .stdout(predicate::str::contains("BATCH-B,manual,1,1.25,M4"))
        .stdout(predicate::str::contains("M3").not());

    Ok(())
}

#[test]
fn test_cli_config_file_with_flag_override() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{ "aggregation": { "size_threshold": 2, "timeout_ms": 0 } }"#,
    )?;

    // File alone: BATCH-A completes at two items
    let mut cmd = Command::new(cargo_bin!("paybatch"));
    cmd.arg("tests/fixtures/messages.csv")
        .arg("--config")
        .arg(&config_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("BATCH-A,size,2,15,M1;M2"))
        .stdout(predicate::str::contains("BATCH-A,manual,1,2.5,M5"));

    // Flag wins over the file
    let mut cmd = Command::new(cargo_bin!("paybatch"));
    cmd.arg("tests/fixtures/messages.csv")
        .arg("--config")
        .arg(&config_path)
        .arg("--batch-size")
        .arg("10");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("BATCH-A,manual,3,17.5,M1;M2;M5"));

    Ok(())
}

#[test]
fn test_cli_rejects_zero_batch_size() {
    let mut cmd = Command::new(cargo_bin!("paybatch"));
    cmd.arg("tests/fixtures/messages.csv")
        .arg("--batch-size")
        .arg("0");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("size threshold must be greater than zero"));
}
