//! Stop and remove transitions on persisted container records.

use std::process::{Child, Command};

use cask::cgroup::CgroupHierarchy;
use cask::runtime::{Runtime, RuntimeConfig};
use cask_common::{CaskError, ContainerId, ContainerRecord, ContainerStatus};
use tempfile::TempDir;

fn runtime(root: &TempDir) -> Runtime {
    Runtime::new(
        RuntimeConfig::default()
            .with_root(root.path())
            .with_hierarchy(CgroupHierarchy::Fixed(root.path().join("cgroup"))),
    )
}

/// A real process standing in for the container init.
fn sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
}

fn running_record(name: &str, child: &Child) -> ContainerRecord {
    ContainerRecord::new(child.id(), ContainerId::generate(), name, &["sleep".to_string()])
}

#[test_log::test(tokio::test)]
async fn stop_then_remove() {
    let root = TempDir::new().unwrap();
    let rt = runtime(&root);
    let mut child = sleeper();
    rt.store().save(&running_record("web", &child)).unwrap();

    rt.stop("web").unwrap();
    let status = child.wait().unwrap();
    assert!(!status.success());

    let record = rt.store().load("web").unwrap();
    assert_eq!(record.status, ContainerStatus::Stopped);
    assert!(record.pid.is_empty());

    rt.remove("web").await.unwrap();
    assert!(!rt.store().exists("web"));
    assert!(rt.list().unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn remove_refuses_running_container() {
    let root = TempDir::new().unwrap();
    let rt = runtime(&root);
    let mut child = sleeper();
    let record = running_record("db", &child);
    rt.store().save(&record).unwrap();

    let result = rt.remove("db").await;
    assert!(matches!(result, Err(CaskError::InvalidState { .. })));
    assert_eq!(rt.store().load("db").unwrap(), record);

    child.kill().unwrap();
    child.wait().unwrap();
}

#[test_log::test]
fn stop_twice_is_refused() {
    let root = TempDir::new().unwrap();
    let rt = runtime(&root);
    let mut child = sleeper();
    rt.store().save(&running_record("web", &child)).unwrap();

    rt.stop("web").unwrap();
    child.wait().unwrap();
    assert!(matches!(rt.stop("web"), Err(CaskError::InvalidState { .. })));
}

#[test_log::test]
fn list_shows_every_record() {
    let root = TempDir::new().unwrap();
    let rt = runtime(&root);
    let mut first = sleeper();
    let mut second = sleeper();
    rt.store().save(&running_record("a", &first)).unwrap();
    rt.store().save(&running_record("b", &second)).unwrap();

    let names: Vec<_> = rt.list().unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["a", "b"]);

    for child in [&mut first, &mut second] {
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
