//! Packers over a file-backed archive, closed and reopened between writing
//! and reading.

use std::sync::Arc;

use tempfile::TempDir;
use tpk_archive::{Archive, FileArchive};
use tpk_pack::{ColumnPacker, PackerConfig, Reference, RowPacker};
use tpk_types::{ColumnType, Field, Row, Schema, Value};

fn event_schema() -> Schema {
    Schema::new(vec![
        Field::new("seq", ColumnType::U64),
        Field::new("kind", ColumnType::Str),
        Field::new("payload", ColumnType::Bytes),
    ])
    .unwrap()
}

fn event(seq: u64) -> Row {
    vec![
        Value::from(seq),
        Value::from(if seq % 3 == 0 { "tick" } else { "tock" }),
        Value::from(seq.to_le_bytes().repeat((seq % 4) as usize)),
    ]
}

fn write_both(archive: Arc<dyn Archive>, rows: u64) {
    let mut by_row = RowPacker::new(
        event_schema(),
        "events",
        archive.clone(),
        "events",
        "row",
        PackerConfig::row_default().with_buffer_size(512),
    )
    .unwrap();
    let mut by_column = ColumnPacker::new(
        event_schema(),
        "events",
        archive,
        "events",
        "column",
        PackerConfig::column_default().with_buffer_size(128),
    )
    .unwrap();
    for seq in 0..rows {
        assert!(by_row.fill(&event(seq)).unwrap());
        assert!(by_column.fill(&event(seq)).unwrap());
    }
    assert!(by_row.write().unwrap());
    assert!(by_column.write().unwrap());
}

#[test]
fn reopen_read_only_and_read_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.tpk");
    {
        let archive = Arc::new(FileArchive::create(&path).unwrap());
        write_both(archive.clone(), 500);
        archive.sync().unwrap();
    }

    let archive: Arc<dyn Archive> = Arc::new(FileArchive::open_read_only(&path).unwrap());
    assert!(!archive.is_writable());

    let mut rows = Reference::<RowPacker>::open(archive.clone(), "events", "row")
        .unwrap()
        .get(0)
        .unwrap();
    assert_eq!(rows.n_rows(), 500);
    assert!(rows.index().len() > 1);
    for seq in [0, 1, 255, 499] {
        assert_eq!(rows.row(seq).unwrap(), event(seq));
    }

    let mut columns = Reference::<ColumnPacker>::open(archive.clone(), "events", "column")
        .unwrap()
        .get(0)
        .unwrap();
    assert_eq!(columns.n_rows(), 500);
    assert_eq!(columns.fetch_as::<String>(1, 300).unwrap(), "tick");
    let seqs: Vec<u64> = columns
        .column_iter(0)
        .unwrap()
        .map(|v| u64::try_from(v.unwrap()).unwrap())
        .collect();
    assert_eq!(seqs, (0..500).collect::<Vec<_>>());

    // Read-only archives refuse new collections without raising.
    let mut late = RowPacker::new(
        event_schema(),
        "",
        archive,
        "late",
        "row",
        PackerConfig::default(),
    )
    .unwrap();
    assert!(!late.fill(&event(0)).unwrap());
}

#[test]
fn reopen_for_append_adds_an_occurrence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.tpk");
    {
        let archive = Arc::new(FileArchive::create(&path).unwrap());
        write_both(archive, 40);
    }
    {
        let archive = Arc::new(FileArchive::open(&path).unwrap());
        write_both(archive, 70);
    }

    let archive: Arc<dyn Archive> = Arc::new(FileArchive::open_read_only(&path).unwrap());
    let refs = Reference::<RowPacker>::open(archive.clone(), "events", "row").unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs.get(0).unwrap().n_rows(), 40);
    assert_eq!(refs.latest().unwrap().n_rows(), 70);

    let mut first = refs.get(0).unwrap();
    let mut second = refs.get(1).unwrap();
    assert!(!first.content_eq(&mut second).unwrap());
}

#[test]
fn dropped_packer_is_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("implicit.tpk");
    {
        let archive = Arc::new(FileArchive::create(&path).unwrap());
        let mut p = RowPacker::with_default_names(
            &[ColumnType::I32],
            archive,
            "implicit",
            "row",
            PackerConfig::default(),
        )
        .unwrap();
        for i in 0..10 {
            p.fill(&[Value::from(i)]).unwrap();
        }
    }
    let archive: Arc<dyn Archive> = Arc::new(FileArchive::open_read_only(&path).unwrap());
    let mut p = Reference::<RowPacker>::open(archive, "implicit", "row")
        .unwrap()
        .get(0)
        .unwrap();
    assert_eq!(p.n_rows(), 10);
    assert_eq!(p.row(9).unwrap(), vec![Value::from(9)]);
}
