use crate::{CapturedOffset, FilesystemStore, Offset, OffsetError};
use chrono::Utc;
use std::cmp::Ordering;

#[test]
fn cli_string_round_trip() {
    let offsets = vec![
        Offset::Lsn {
            lsn: "0/16B3748".to_string(),
        },
        Offset::Lsn {
            lsn: "00000029:00000e10:0005".to_string(),
        },
        Offset::BinlogPosition {
            file: "mysql-bin.000003".to_string(),
            position: 4571,
        },
        Offset::Scn { scn: 3842764 },
        Offset::JournalOffset { sequence: 90211 },
    ];

    for offset in offsets {
        let s = offset.to_cli_string();
        let parsed = Offset::from_cli_string(&s).unwrap();
        assert_eq!(parsed, offset, "round trip failed for {s}");
    }
}

#[test]
fn parse_rejects_garbage() {
    assert!(Offset::from_cli_string("nonsense").is_err());
    assert!(Offset::from_cli_string("lsn:").is_err());
    assert!(Offset::from_cli_string("scn:notanumber").is_err());
    assert!(Offset::from_cli_string("binlog:missing-position").is_err());
    assert!(Offset::from_cli_string("wal:0/1").is_err());
}

#[test]
fn postgres_lsn_ordering_is_numeric() {
    let low = Offset::Lsn {
        lsn: "0/FF".to_string(),
    };
    let high = Offset::Lsn {
        lsn: "1/0".to_string(),
    };
    // "1/0" is 2^32; a string comparison would get this wrong
    assert_eq!(
        low.partial_cmp_same_family(&high),
        Some(Ordering::Less)
    );
    assert_eq!(
        high.partial_cmp_same_family(&low),
        Some(Ordering::Greater)
    );
}

#[test]
fn sqlserver_lsn_ordering() {
    let low = Offset::Lsn {
        lsn: "00000029:00000e10:0005".to_string(),
    };
    let high = Offset::Lsn {
        lsn: "0000002a:00000010:0001".to_string(),
    };
    assert_eq!(low.partial_cmp_same_family(&high), Some(Ordering::Less));
}

#[test]
fn binlog_ordering_uses_file_then_position() {
    let a = Offset::BinlogPosition {
        file: "mysql-bin.000003".to_string(),
        position: 9999,
    };
    let b = Offset::BinlogPosition {
        file: "mysql-bin.000004".to_string(),
        position: 4,
    };
    assert_eq!(a.partial_cmp_same_family(&b), Some(Ordering::Less));

    let c = Offset::BinlogPosition {
        file: "mysql-bin.000004".to_string(),
        position: 100,
    };
    assert_eq!(b.partial_cmp_same_family(&c), Some(Ordering::Less));
}

#[test]
fn different_families_are_not_comparable() {
    let lsn = Offset::Lsn {
        lsn: "0/1".to_string(),
    };
    let scn = Offset::Scn { scn: 1 };
    assert_eq!(lsn.partial_cmp_same_family(&scn), None);
}

#[test]
fn filesystem_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemStore::new(dir.path());

    assert!(store.load("orders").unwrap().is_none());

    let captured = CapturedOffset::new(Offset::Scn { scn: 100 }, Utc::now());
    store.save("orders", &captured).unwrap();

    let loaded = store.load("orders").unwrap().unwrap();
    assert_eq!(loaded.offset, captured.offset);
}

#[test]
fn filesystem_store_rejects_rewind() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemStore::new(dir.path());

    store
        .save(
            "orders",
            &CapturedOffset::new(Offset::Scn { scn: 100 }, Utc::now()),
        )
        .unwrap();

    let err = store
        .save(
            "orders",
            &CapturedOffset::new(Offset::Scn { scn: 99 }, Utc::now()),
        )
        .unwrap_err();
    assert!(matches!(err, OffsetError::Regression { .. }));

    // Equal and forward saves are fine
    store
        .save(
            "orders",
            &CapturedOffset::new(Offset::Scn { scn: 100 }, Utc::now()),
        )
        .unwrap();
    store
        .save(
            "orders",
            &CapturedOffset::new(Offset::Scn { scn: 101 }, Utc::now()),
        )
        .unwrap();
}

#[test]
fn filesystem_store_rejects_family_change() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemStore::new(dir.path());

    store
        .save(
            "orders",
            &CapturedOffset::new(Offset::Scn { scn: 100 }, Utc::now()),
        )
        .unwrap();

    let err = store
        .save(
            "orders",
            &CapturedOffset::new(
                Offset::Lsn {
                    lsn: "0/1".to_string(),
                },
                Utc::now(),
            ),
        )
        .unwrap_err();
    assert!(matches!(err, OffsetError::FamilyMismatch { .. }));
}
