//! ACL side-file integration tests

use std::fs;
use svrdb::core::entry::EntryReader;
use svrdb::{AttrValue, SaveMode, Server, StateStore, StoreConfig, QSB_SIZE};
use tempfile::TempDir;

fn users(names: &[&str]) -> AttrValue {
    AttrValue::Acl(names.iter().map(|s| s.to_string()).collect())
}

#[test]
fn test_acl_lives_beside_the_server_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::with_home(temp_dir.path());
    let mut store = StateStore::open(config.clone()).unwrap();

    let mut server = Server::new("svr", svrdb::core::schema::server().unwrap());
    server
        .attributes_mut()
        .set_value("max_jobs", AttrValue::Long(100))
        .unwrap();
    server
        .attributes_mut()
        .set_value("acl_users", users(&["alice", "bob"]))
        .unwrap();
    assert!(store
        .save_server(&mut server, SaveMode::Full)
        .unwrap()
        .is_committed());

    // Header followed by exactly one entry
    let bytes = fs::read(config.server_db_path()).unwrap();
    let entries = EntryReader::new(&bytes[QSB_SIZE..], &config.server_db_path())
        .read_all()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "max_jobs");
    assert_eq!(entries[0].value, "100");

    assert_eq!(
        fs::read_to_string(config.acl_file_path("acl_users")).unwrap(),
        "alice,bob"
    );
    assert!(!config.acl_staging_path("acl_users").exists());

    // Back up, lose the server file, restore it and recover
    let snapshot = bytes.clone();
    fs::remove_file(config.server_db_path()).unwrap();
    fs::write(config.server_db_path(), &snapshot).unwrap();

    let back = store.recover_server("svr").unwrap();
    assert_eq!(
        back.attributes().get("max_jobs").unwrap().value(),
        &AttrValue::Long(100)
    );
    assert_eq!(
        back.attributes().get("acl_users").unwrap().value(),
        &users(&["alice", "bob"])
    );
    assert!(!back.attributes().get("acl_users").unwrap().is_modified());
}

#[test]
fn test_unset_acl_removes_side_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::with_home(temp_dir.path());
    let mut store = StateStore::open(config.clone()).unwrap();

    let mut server = Server::new("svr", svrdb::core::schema::server().unwrap());
    server
        .attributes_mut()
        .set_value("managers", users(&["root@head01"]))
        .unwrap();
    store.save_server(&mut server, SaveMode::Full).unwrap();
    assert!(config.acl_file_path("managers").exists());

    server.attributes_mut().unset("managers").unwrap();
    store.save_server(&mut server, SaveMode::Full).unwrap();
    assert!(!config.acl_file_path("managers").exists());

    let back = store.recover_server("svr").unwrap();
    assert!(!back.attributes().get("managers").unwrap().is_set());
}

#[test]
fn test_unmodified_acl_is_not_rewritten() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::with_home(temp_dir.path());
    let store = StateStore::open(config.clone()).unwrap();

    let mut server = Server::new("svr", svrdb::core::schema::server().unwrap());
    server
        .attributes_mut()
        .set_value("operators", users(&["ops"]))
        .unwrap();
    store.save_server(&mut server, SaveMode::Full).unwrap();

    // A hand edit survives a save that has nothing new to say about the ACL
    fs::write(config.acl_file_path("operators"), "ops,night").unwrap();
    store.save_server(&mut server, SaveMode::Full).unwrap();
    assert_eq!(
        fs::read_to_string(config.acl_file_path("operators")).unwrap(),
        "ops,night"
    );
}

#[test]
fn test_quick_save_does_not_touch_acls() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::with_home(temp_dir.path());
    let store = StateStore::open(config.clone()).unwrap();

    let mut server = Server::new("svr", svrdb::core::schema::server().unwrap());
    store.save_server(&mut server, SaveMode::Full).unwrap();

    server
        .attributes_mut()
        .set_value("acl_hosts", users(&["node1", "node2"]))
        .unwrap();
    store.save_server(&mut server, SaveMode::Quick).unwrap();

    assert!(!config.acl_file_path("acl_hosts").exists());
    assert!(server.attributes().get("acl_hosts").unwrap().is_modified());
}

#[test]
fn test_corrupt_acl_file_does_not_block_recovery() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::with_home(temp_dir.path());
    let mut store = StateStore::open(config.clone()).unwrap();

    let mut server = Server::new("svr", svrdb::core::schema::server().unwrap());
    server
        .attributes_mut()
        .set_value("comment", AttrValue::String("ok".into()))
        .unwrap();
    store.save_server(&mut server, SaveMode::Full).unwrap();
    fs::write(config.acl_file_path("acl_roots"), [0xc3, 0x28]).unwrap();

    let back = store.recover_server("svr").unwrap();
    assert_eq!(
        back.attributes().get("comment").unwrap().value(),
        &AttrValue::String("ok".into())
    );
    assert!(!back.attributes().get("acl_roots").unwrap().is_set());
}
