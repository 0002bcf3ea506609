use anyhow::Result;
use bulkload::failure_log::{FailureLog, read_entries};
use bulkload::model::{FailedInsertEntry, FailureStage, RawRow};
use std::sync::Arc;

#[tokio::test]
async fn creates_parent_directories() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("logs").join("nested").join("failed.log");

    let log = FailureLog::open(&path).await?;

    assert!(path.exists());
    assert_eq!(log.path(), path.as_path());
    assert!(read_entries(&path)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn writes_one_json_object_per_line() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("failed.log");
    let log = FailureLog::open(&path).await?;

    let rows = vec![RawRow::new().with("Name", "Ada")];
    let rejected = FailedInsertEntry::new(rows.clone(), "insert 1 rows: rejected")
        .with_stage(FailureStage::Insert);
    log.append(&rejected).await?;
    let malformed =
        FailedInsertEntry::new(vec![], "malformed message: bad header").with_attempt(Some(2));
    log.append(&malformed).await?;

    let text = std::fs::read_to_string(&path)?;
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0])?;
    assert_eq!(first["rows"][0]["Name"], "Ada");
    assert_eq!(first["stage"], "insert");
    assert!(first["timestamp"].as_str().is_some_and(|t| t.ends_with('Z')));

    let entries = read_entries(&path)?;
    assert_eq!(entries[0].rows, rows);
    assert_eq!(entries[1].attempt, Some(2));
    assert_eq!(entries[1].stage, None);
    Ok(())
}

#[tokio::test]
async fn reopening_appends_instead_of_truncating() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("failed.log");

    FailureLog::open(&path).await?.append(&FailedInsertEntry::new(vec![], "first")).await?;
    FailureLog::open(&path).await?.append(&FailedInsertEntry::new(vec![], "second")).await?;

    let errors: Vec<_> = read_entries(&path)?.into_iter().map(|e| e.error).collect();
    assert_eq!(errors, vec!["first", "second"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_are_not_interleaved() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("failed.log");
    let log = Arc::new(FailureLog::open(&path).await?);

    let mut tasks = Vec::new();
    for task in 0..8 {
        let log = Arc::clone(&log);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                let rows = (0..20)
                    .map(|r| RawRow::new().with("Name", format!("t{task}-e{i}-r{r}")))
                    .collect();
                log.append(&FailedInsertEntry::new(rows, format!("task {task} entry {i}")))
                    .await?;
            }
            anyhow::Ok(())
        }));
    }
    for t in tasks {
        t.await??;
    }

    let entries = read_entries(&path)?;
    assert_eq!(entries.len(), 200);
    assert!(entries.iter().all(|e| e.rows.len() == 20));
    Ok(())
}
