use chrono::{TimeZone, Utc};
use num_bigint::BigInt;
use scrolls::scroll::{MemoryScroll, SectorScroll, SharedScroll};
use scrolls::sector::{
    switch_mode, DirectoryArchive, Section, Sector, SectorError, SectorMode, SECTION_TOKEN,
};
use scrolls::{Duplicate, ObjectExt, Scroll, ScrollError, ScrollExt, ScrollOptions};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use uuid::Uuid;

fn small_sectors() -> ScrollOptions {
    ScrollOptions::from_json(r#"{ "sector_capacity": 24 }"#).unwrap()
}

#[test]
fn test_directory_scroll_mixed_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let id = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
    let at = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
    let big: BigInt = "-123456789012345678901234567890".parse().unwrap();

    {
        let mut scroll = SectorScroll::in_directory(dir.path(), small_sectors()).unwrap();
        scroll.insert_value(7u32).unwrap();
        scroll.insert(&Some(-5i64)).unwrap();
        scroll.insert_str(Some("sectioned")).unwrap();
        scroll.insert_str(None).unwrap();
        scroll.insert_array(Some(&[1.5f64, -2.25][..])).unwrap();
        scroll.insert_value(id).unwrap();
        scroll.insert_value(at).unwrap();
        scroll.insert(&big).unwrap();
        scroll.insert_object(Some(&String::from("boxed"))).unwrap();
        assert!(scroll.sector_count() > 1);
        scroll.close().unwrap();
    }

    let mut scroll = SectorScroll::in_directory(dir.path(), small_sectors()).unwrap();
    assert_eq!(scroll.remove_value::<u32>().unwrap(), 7);
    assert_eq!(scroll.remove::<Option<i64>>().unwrap(), Some(-5));
    assert_eq!(scroll.remove_str().unwrap().as_deref(), Some("sectioned"));
    assert_eq!(scroll.remove_str().unwrap(), None);
    assert_eq!(scroll.remove_array::<f64>().unwrap(), Some(vec![1.5, -2.25]));
    assert_eq!(scroll.remove_value::<Uuid>().unwrap(), id);
    assert_eq!(scroll.remove_value::<chrono::DateTime<Utc>>().unwrap(), at);
    assert_eq!(scroll.remove::<BigInt>().unwrap(), big);
    let boxed = scroll.remove_object().unwrap().unwrap();
    assert_eq!(boxed.downcast_ref::<String>().map(String::as_str), Some("boxed"));
    assert!(scroll.is_empty());
    assert!(matches!(
        scroll.remove_value::<u8>(),
        Err(ScrollError::UnexpectedEnd { needed: 1, available: 0 })
    ));
}

#[test]
fn test_section_file_reattach() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("0.scroll");

    {
        let mut section = Section::create_file(&path, 3, 64).unwrap();
        switch_mode(&mut section, SectorMode::Write).unwrap();
        assert_eq!(section.write(b"persisted bytes").unwrap(), 15);
        section.close().unwrap();
        assert_eq!(section.mode(), SectorMode::Closed);
    }

    let mut section = Section::open_file(&path, 64).unwrap();
    assert_eq!(section.number(), 3);
    assert_eq!(section.len(), 15);
    switch_mode(&mut section, SectorMode::Read).unwrap();
    let mut buf = [0u8; 15];
    assert_eq!(section.read(&mut buf).unwrap(), 15);
    assert_eq!(&buf, b"persisted bytes");
    assert!(matches!(
        section.write(b"x"),
        Err(SectorError::Mode { expected: SectorMode::Write, actual: SectorMode::Read })
    ));
}

#[test]
fn test_foreign_and_corrupted_sections_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("1.scroll");
    drop(Section::create_file(&path, 1, 16).unwrap());

    // flip one checksum-covered byte: token still valid
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(0x10)).unwrap();
    file.write_all(&[0x7f]).unwrap();
    drop(file);
    assert!(matches!(Section::open_file(&path, 16), Err(SectorError::HeaderChecksum)));

    // overwrite the token: authentication is checked first
    let foreign = dir.path().join("2.scroll");
    fs::write(&foreign, [0u8; 32]).unwrap();
    match Section::open_file(&foreign, 16) {
        Err(SectorError::Authentication { found }) => assert_ne!(found, SECTION_TOKEN),
        other => panic!("expected authentication failure, got {other:?}"),
    }
}

#[test]
fn test_directory_archive_scroll() {
    let dir = TempDir::new().unwrap();
    let archive = Arc::new(DirectoryArchive::open(dir.path()).unwrap());
    {
        let mut scroll = SectorScroll::in_archive(Arc::clone(&archive), small_sectors()).unwrap();
        for n in 0..10u64 {
            scroll.insert_value(n).unwrap();
        }
    }
    let mut scroll = SectorScroll::in_archive(archive, small_sectors()).unwrap();
    let mut values = [0u64; 10];
    scroll.remove_span(&mut values).unwrap();
    assert_eq!(values, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn test_pointers_are_bound_to_their_family() {
    let mut a = MemoryScroll::new();
    let mut b = MemoryScroll::new();
    a.insert_value(1u16).unwrap();

    let foreign = a.position();
    assert!(!b.is_valid(&foreign));
    assert!(matches!(b.set_position(foreign), Err(ScrollError::InvalidPointer(_))));

    let mut twin = a.copy().unwrap();
    let shared = a.position();
    assert!(twin.is_valid(&shared));
    twin.set_position(shared).unwrap();
}

#[test]
fn test_parallel_readers_over_shared_storage() {
    let mut writer = SharedScroll::new();
    let start = writer.position();
    for n in 0..256u32 {
        writer.insert_value(n).unwrap();
    }
    writer.set_position(start).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mut reader = writer.copy().unwrap();
            thread::spawn(move || {
                let mut sum = 0u64;
                for _ in 0..256 {
                    sum += reader.remove_value::<u32>().unwrap() as u64;
                }
                sum
            })
        })
        .collect();
    for r in readers {
        assert_eq!(r.join().unwrap(), (0..256u64).sum::<u64>());
    }
}

#[test]
fn test_objects_through_boxed_scroll() {
    let mut scrolls: Vec<Box<dyn Scroll>> = vec![
        Box::new(MemoryScroll::new()),
        Box::new(SharedScroll::new()),
        Box::new(SectorScroll::in_memory(small_sectors())),
    ];
    for scroll in scrolls.iter_mut() {
        let start = scroll.position();
        let words = vec![String::from("a"), String::from("b")];
        scroll.insert_entry(Some(&words)).unwrap();
        scroll.insert_entry(Some(&-1i16)).unwrap();
        scroll.insert_object(None).unwrap();
        scroll.set_position(start).unwrap();

        let value = scroll.remove_entry().unwrap().unwrap();
        assert_eq!(value.into_typed::<Vec<String>>().unwrap(), words);
        let value = scroll.remove_entry().unwrap().unwrap();
        assert_eq!(value.downcast_ref::<i16>(), Some(&-1));
        assert!(scroll.remove_object().unwrap().is_none());
    }
}
