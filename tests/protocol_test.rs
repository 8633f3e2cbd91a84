use jujufs::diff::{self, Transaction};
use jujufs::endpoint::FilesystemInfo;
use jujufs::error::CharmError;
use jujufs::interfaces::mount_info::{MountInfo, MountRequires};
use jujufs::model::{Agent, Bag, Databag, RelationStore};
use jujufs::mounts::{MountOptions, Mounts, MountsManager};
use jujufs::testing::{Call, FakeExecutor, Harness};

fn bag(pairs: &[(&str, &str)]) -> Databag {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn diff_tracks_successive_writes() {
    let mut harness = Harness::new("client", "client/0");
    let relation = harness.add_relation("filesystem", "server");
    let own = Bag::Unit("client/0".into());
    let remote = Bag::App("server".into());

    let steps = vec![
        (bag(&[("endpoint", "nfs://a")]), vec!["endpoint"], vec![], vec![]),
        (bag(&[("endpoint", "nfs://b")]), vec![], vec!["endpoint"], vec![]),
        (bag(&[("endpoint", "")]), vec![], vec![], vec!["endpoint"]),
    ];

    for (write, added, changed, deleted) in steps {
        println!("Testing {:?}", write);
        harness.remote_update(&relation, &remote, write);

        let transaction = diff::diff(&mut harness, &relation, &own, &remote).unwrap();
        let expected = Transaction {
            added: added.into_iter().map(String::from).collect(),
            changed: changed.into_iter().map(String::from).collect(),
            deleted: deleted.into_iter().map(String::from).collect(),
        };
        assert_eq!(transaction, expected);

        // Without intervening writes, there is nothing left to report
        assert!(diff::diff(&mut harness, &relation, &own, &remote)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn diff_on_broken_relation_fails() {
    let mut harness = Harness::new("client", "client/0");
    let relation = harness.add_relation("filesystem", "server");
    harness.break_relation(&relation);

    let result = diff::diff(
        &mut harness,
        &relation,
        &Bag::Unit("client/0".into()),
        &Bag::App("server".into()),
    );

    match result {
        Err(CharmError::RelationBroken(r)) => assert_eq!(r, relation),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn app_scope_requires_leadership() {
    let mut harness = Harness::new("workload", "workload/0");
    let relation = harness.add_relation("mount", "filesystem-client");

    assert!(harness.leadership().unwrap().is_none());

    harness.set_leader(true);
    let token = harness.leadership().unwrap().unwrap();
    let requires = MountRequires::new("mount");
    requires
        .set_mount_info(&mut harness, &token, &relation, &MountInfo::new("/data"))
        .unwrap();

    harness.set_leader(false);
    let result = requires.set_mount_info(&mut harness, &token, &relation, &MountInfo::new("/other"));

    match result {
        Err(CharmError::NotLeader(_)) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(
        harness.bag(&relation, &Bag::App("workload".into()))["mountpoint"],
        "\"/data\""
    );
}

#[test]
fn unit_scope_needs_no_leadership() {
    let mut harness = Harness::new("client", "client/1");
    let relation = harness.add_relation("mount", "workload");

    harness
        .update_unit(&relation, &bag(&[("mounted", "true")]))
        .unwrap();

    assert_eq!(
        harness.bag(&relation, &Bag::Unit("client/1".into()))["mounted"],
        "true"
    );
}

#[test]
fn reconcile_is_idempotent() {
    let info = FilesystemInfo::Lustre {
        mgs_ids: vec!["192.168.227.11@tcp1".into(), "192.168.227.12@tcp1".into()],
        fs_name: "lustre".into(),
    };
    let mut mounts = Mounts::new();
    mounts
        .add(&info, "/lustre", &MountOptions::default())
        .unwrap();

    let mut manager = MountsManager::new(FakeExecutor::default());

    assert!(manager.reconcile(&mounts, false).unwrap());
    assert!(!manager.reconcile(&mounts, false).unwrap());
    assert!(manager.reconcile(&mounts, true).unwrap());

    let fake = manager.executor();
    assert_eq!(fake.count(&Call::WriteTable), 2);
    assert_eq!(fake.count(&Call::CreateMountpoint("/lustre".into())), 2);
    assert_eq!(
        fake.table,
        "/lustre -dev,exec,fstype=lustre,rw,suid 192.168.227.11@tcp1:192.168.227.12@tcp1:/lustre"
    );
}

#[test]
fn endpoint_uri_roundtrip() {
    let records = vec![
        FilesystemInfo::Nfs {
            hostname: "2001:db8::2:1".into(),
            port: Some(2049),
            path: "/srv/data with spaces".into(),
        },
        FilesystemInfo::Lustre {
            mgs_ids: vec!["10.0.0.1@tcp".into()],
            fs_name: "scratch".into(),
        },
        FilesystemInfo::Cephfs {
            fsid: "354ca7c4-f10d-11ee-93f8-1f85f87b7845".into(),
            name: "ceph-fs".into(),
            path: "/".into(),
            monitor_hosts: vec!["10.5.0.80:6789".into(), "10.5.2.23:6789".into()],
            user: "ceph-client".into(),
            key: "AQAPdQldX264KBAAOyaxen/y0XBl1qxlGPTabw==".into(),
        },
    ];

    for info in records {
        let uri = info.to_uri();
        println!("Testing {}", uri);

        assert_eq!(FilesystemInfo::from_uri(&uri).unwrap(), info);
    }
}

#[test]
fn endpoint_uri_rejects_garbage() {
    for uri in &["", "nfs", "smb://?v=1&hostname=a", "nfs://?v=1&path=/srv"] {
        println!("Testing {}", uri);
        assert!(FilesystemInfo::from_uri(uri).is_err());
    }
}
