use std::fs;
use std::path::Path;

use predicates::prelude::*;
use serde_json::Value;

const NOTES: &str = "---\ntitle: Lab Notes\nauthor: Grace\n---\n\
# Method\n\
## Samples\n\
Twelve samples were taken.\n\
\x0c# Results\n\
## Findings\n\
Nothing unexpected.\n";

fn docgraph(data_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docgraph");
    cmd.env_remove("DOCGRAPH_EXTRACTOR")
        .env_remove("DOCGRAPH_EXTRACTOR_URL")
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn stdout_json(output: &std::process::Output) -> anyhow::Result<Value> {
    Ok(serde_json::from_slice(&output.stdout)?)
}

fn ingest(data_dir: &Path, file: &Path) -> anyhow::Result<String> {
    let output = docgraph(data_dir)
        .arg("ingest")
        .arg(file)
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output)?;
    json.pointer("/document/document_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("missing document_id in {json}"))
}

#[test]
fn ingest_list_show_and_delete() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let data_dir = temp.path().join("data");
    let file = temp.path().join("notes.txt");
    fs::write(&file, NOTES)?;

    let id = ingest(&data_dir, &file)?;
    assert!(data_dir.join("graph.json").exists());

    docgraph(&data_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&id))
        .stdout(predicate::str::contains("Lab Notes"))
        .stdout(predicate::str::contains("2 pages"));

    let output = docgraph(&data_dir)
        .args(["show", &id])
        .assert()
        .success()
        .get_output()
        .clone();
    let tree = stdout_json(&output)?;
    assert_eq!(tree["headings"][0]["text"], "Method");
    assert_eq!(tree["headings"][1]["subheadings"][0]["title"], "Findings");

    docgraph(&data_dir)
        .args(["delete", &id])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!("deleted {id}")));

    docgraph(&data_dir)
        .args(["show", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("document not found"));
    Ok(())
}

#[test]
fn enhance_is_persisted_across_invocations() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let data_dir = temp.path().join("data");
    let file = temp.path().join("notes.txt");
    fs::write(&file, NOTES)?;
    let id = ingest(&data_dir, &file)?;

    let output = docgraph(&data_dir)
        .args(["status", &id])
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(stdout_json(&output)?["available"], false);

    let output = docgraph(&data_dir)
        .args(["enhance", &id])
        .assert()
        .success()
        .get_output()
        .clone();
    let enhanced = stdout_json(&output)?;
    assert_eq!(
        enhanced["headings"][0]["subheadings"][0]["context"],
        "Twelve samples were taken."
    );

    let output = docgraph(&data_dir)
        .args(["show", &id, "--version", "enhanced"])
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(stdout_json(&output)?["root"], enhanced["root"]);

    let output = docgraph(&data_dir)
        .args(["enhance", &id, "--force"])
        .assert()
        .success()
        .get_output()
        .clone();
    assert_ne!(stdout_json(&output)?["root"], enhanced["root"]);

    let output = docgraph(&data_dir)
        .arg("sweep")
        .assert()
        .success()
        .get_output()
        .clone();
    let report = stdout_json(&output)?;
    assert!(report["removed"].as_u64().unwrap_or(0) > 0, "{report}");
    Ok(())
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    docgraph(temp.path())
        .env("RUST_LOG", "debug")
        .arg("list")
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
    Ok(())
}

#[test]
fn http_extractor_without_url_is_a_config_error() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    docgraph(temp.path())
        .env("DOCGRAPH_EXTRACTOR", "http")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DOCGRAPH_EXTRACTOR_URL"));
    Ok(())
}
