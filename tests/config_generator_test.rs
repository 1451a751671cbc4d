//! Configuration generator properties: snapshot-mode decision, topic
//! naming, filter construction, and the sink's topic-to-table mapping.

use chrono::Utc;
use offset_types::{CapturedOffset, Offset};
use pipesync::config::{
    generate_sink_config, generate_source_config, snapshot_mode, topic_name, SnapshotMode,
};
use pipesync::{
    Connection, ConnectionRole, DatabaseFamily, EngineError, FullLoadStatus, Pipeline,
    PipelineMode,
};
use std::collections::BTreeMap;
use uuid::Uuid;

fn connection(
    name: &str,
    role: ConnectionRole,
    family: DatabaseFamily,
    options: &[(&str, &str)],
) -> Connection {
    Connection {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role,
        family,
        host: "db.internal".to_string(),
        port: 5432,
        database: "appdb".to_string(),
        username: "repl".to_string(),
        secret: "secret".to_string(),
        default_schema: Some("public".to_string()),
        options: options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        deleted: false,
    }
}

fn pg_source() -> Connection {
    connection(
        "pg",
        ConnectionRole::Source,
        DatabaseFamily::Postgresql,
        &[
            ("slot_name", "pipesync_slot"),
            ("publication_name", "pipesync_pub"),
        ],
    )
}

fn pipeline(tables: &[&str]) -> Pipeline {
    Pipeline::new(
        "orders",
        "pg",
        "lake",
        "public",
        tables.iter().map(|t| t.to_string()).collect(),
        PipelineMode::FullLoadAndCdc,
    )
}

fn an_offset() -> CapturedOffset {
    CapturedOffset::new(
        Offset::Lsn {
            lsn: "0/16B3748".to_string(),
        },
        Utc::now(),
    )
}

#[test]
fn snapshot_mode_decision_table() {
    let offset = an_offset();

    // never iff COMPLETED and offset captured
    assert_eq!(
        snapshot_mode(FullLoadStatus::Completed, Some(&offset)),
        SnapshotMode::Never
    );

    assert_eq!(
        snapshot_mode(FullLoadStatus::Completed, None),
        SnapshotMode::Initial
    );
    assert_eq!(
        snapshot_mode(FullLoadStatus::NotStarted, None),
        SnapshotMode::Initial
    );
    assert_eq!(
        snapshot_mode(FullLoadStatus::Running, Some(&offset)),
        SnapshotMode::Initial
    );
    assert_eq!(
        snapshot_mode(FullLoadStatus::Failed, Some(&offset)),
        SnapshotMode::Initial
    );
}

/// Regression test for the schema-duplication hazard: the schema must
/// appear exactly once per topic name and only inside the table filter.
#[test]
fn topic_names_contain_schema_exactly_once() {
    let generated = generate_source_config(&pipeline(&["orders", "customers"]), &pg_source())
        .unwrap();

    for topic in &generated.topics {
        let schema_segments = topic
            .split('.')
            .filter(|segment| *segment == "public")
            .count();
        assert_eq!(schema_segments, 1, "schema duplicated in topic '{topic}'");
    }
    assert_eq!(
        generated.topics,
        vec!["orders.public.orders", "orders.public.customers"]
    );

    // table filter carries the schema; no separate schema/database filter
    let config = &generated.config;
    assert_eq!(
        config.get("table.include.list").unwrap(),
        "public.orders,public.customers"
    );
    assert!(!config.contains_key("schema.include.list"));
    assert!(!config.contains_key("database.include.list"));
}

#[test]
fn topic_name_shape() {
    assert_eq!(topic_name("orders", "public", "orders"), "orders.public.orders");
    assert_eq!(topic_name("p1", "SCHEMA", "TBL"), "p1.SCHEMA.TBL");
}

#[test]
fn source_generator_is_deterministic() {
    let p = pipeline(&["orders"]);
    let a = generate_source_config(&p, &pg_source()).unwrap();
    let b = generate_source_config(&p, &pg_source()).unwrap();
    assert_eq!(a.connector_name, b.connector_name);
    assert_eq!(a.config, b.config);
    assert_eq!(a.topics, b.topics);
}

#[test]
fn postgres_source_requires_slot_and_publication() {
    let source = connection(
        "pg",
        ConnectionRole::Source,
        DatabaseFamily::Postgresql,
        &[("publication_name", "pub")],
    );
    let err = generate_source_config(&pipeline(&["orders"]), &source).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(err.to_string().contains("slot_name"));
}

#[test]
fn as400_source_requires_journal_options() {
    let source = connection(
        "iseries",
        ConnectionRole::Source,
        DatabaseFamily::As400,
        &[],
    );
    let err = generate_source_config(&pipeline(&["orders"]), &source).unwrap_err();
    assert!(err.to_string().contains("journal_library"));
}

#[test]
fn snapshot_mode_lands_in_wire_config() {
    let mut p = pipeline(&["orders"]);
    let generated = generate_source_config(&p, &pg_source()).unwrap();
    assert_eq!(generated.config.get("snapshot.mode").unwrap(), "initial");

    p.full_load_status = FullLoadStatus::Completed;
    p.record_offset(an_offset()).unwrap();
    let generated = generate_source_config(&p, &pg_source()).unwrap();
    assert_eq!(generated.config.get("snapshot.mode").unwrap(), "never");
}

/// The sink's topic list and topic-to-table map must use the stored topic
/// strings verbatim, including upper-case segments some sources emit.
#[test]
fn sink_mapping_preserves_topic_case() {
    let mut p = Pipeline::new(
        "orders",
        "ora",
        "warehouse",
        "INVENTORY",
        vec!["ORDERS".to_string()],
        PipelineMode::CdcOnly,
    );
    let source = connection(
        "ora",
        ConnectionRole::Source,
        DatabaseFamily::Oracle,
        &[],
    );
    let generated = generate_source_config(&p, &source).unwrap();
    assert_eq!(generated.topics, vec!["orders.INVENTORY.ORDERS"]);
    p.topics = generated.topics.clone();

    let target = connection(
        "warehouse",
        ConnectionRole::Target,
        DatabaseFamily::Snowflake,
        &[("private_key", "MIIEv...")],
    );
    let sink = generate_sink_config(&p, &target, true).unwrap();

    assert_eq!(sink.config.get("topics").unwrap(), "orders.INVENTORY.ORDERS");
    assert_eq!(
        sink.config.get("snowflake.topic2table.map").unwrap(),
        "orders.INVENTORY.ORDERS:ORDERS"
    );
}

#[test]
fn sink_requires_generated_topics() {
    let p = pipeline(&["orders"]);
    let target = connection(
        "lake",
        ConnectionRole::Target,
        DatabaseFamily::S3,
        &[("region", "eu-central-1")],
    );
    let err = generate_sink_config(&p, &target, true).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

#[test]
fn s3_sink_requires_region() {
    let mut p = pipeline(&["orders"]);
    p.topics = vec!["orders.public.orders".to_string()];
    let target = connection("lake", ConnectionRole::Target, DatabaseFamily::S3, &[]);
    let err = generate_sink_config(&p, &target, true).unwrap_err();
    assert!(err.to_string().contains("region"));
}

/// Flattened delivery must not silently drop deletes.
#[test]
fn jdbc_sink_rewrites_deletes_and_keeps_tombstones() {
    let mut p = pipeline(&["orders"]);
    p.topics = vec!["orders.public.orders".to_string()];
    p.target_schema = Some("dbo".to_string());
    let target = connection(
        "mssql",
        ConnectionRole::Target,
        DatabaseFamily::Sqlserver,
        &[],
    );
    let sink = generate_sink_config(&p, &target, true).unwrap();

    let config = &sink.config;
    assert_eq!(
        config.get("transforms.unwrap.type").unwrap(),
        "io.debezium.transforms.ExtractNewRecordState"
    );
    assert_eq!(
        config.get("transforms.unwrap.delete.handling.mode").unwrap(),
        "rewrite"
    );
    assert_eq!(
        config.get("transforms.unwrap.drop.tombstones").unwrap(),
        "false"
    );
    assert_eq!(config.get("auto.create").unwrap(), "true");
    assert_eq!(config.get("insert.mode").unwrap(), "upsert");
    assert_eq!(
        config.get("transforms.route.replacement").unwrap(),
        "dbo.$1"
    );
}

#[test]
fn mysql_source_uses_qualified_table_filter_only() {
    let source = connection(
        "mysql",
        ConnectionRole::Source,
        DatabaseFamily::Mysql,
        &[("server_id", "184054")],
    );
    let mut p = pipeline(&["orders"]);
    p.source_schema = "appdb".to_string();
    let generated = generate_source_config(&p, &source).unwrap();

    assert_eq!(
        generated.config.get("table.include.list").unwrap(),
        "appdb.orders"
    );
    assert!(!generated.config.contains_key("database.include.list"));
    assert_eq!(
        generated.config.get("connector.class").unwrap(),
        "io.debezium.connector.mysql.MySqlConnector"
    );
}
