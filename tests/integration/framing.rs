use gpumig_core::config::MigrationConfig;
use gpumig_core::wire::{
    DescriptorRecord, ResourceType, DESCRIPTOR_SIZE, HEADER_SIZE, MIGRATION_MAGIC,
};
use gpumig_stream::fops::{read_raw, write_raw};
use gpumig_stream::sim::{SimDevice, SimLayout};
use gpumig_stream::{MigrationError, Mismatch};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Stream framing
// ══════════════════════════════════════════════════════════════════════════════

/// Headers and bodies tile the stream exactly, descriptor first, then
/// tile-major and type-minor.
#[test]
fn test_stream_is_header_body_sequence() {
    let source = SimDevice::seeded(2, SimLayout::default(), 1);
    let (stream, save) = save_all(source, &MigrationConfig::default(), 1000).unwrap();

    let items = frames(&stream).unwrap();
    let order: Vec<_> = items
        .iter()
        .map(|(h, _)| (h.resource_type().unwrap(), h.tile()))
        .collect();
    let mut expected = vec![(ResourceType::Descriptor, 0)];
    for tile in 0..2 {
        for kind in &ResourceType::ALL[1..] {
            expected.push((*kind, tile));
        }
    }
    assert_eq!(order, expected);

    for (header, body) in &items[1..] {
        assert_eq!(header.offset.get(), 0);
        assert_eq!(header.flags.get(), 0);
        let kind = header.resource_type().unwrap();
        let data = save.device().resource(kind, header.tile()).unwrap();
        assert_eq!(&stream[*body..*body + data.len()], data);
    }
}

#[test]
fn test_descriptor_body_identifies_source() {
    let source = SimDevice::seeded(1, SimLayout::default(), 2);
    let identity = gpumig_stream::MigrationDevice::identity(&source);
    let (stream, _) = save_all(source, &MigrationConfig::default(), 4096).unwrap();

    let (header, body) = frames(&stream).unwrap()[0];
    assert_eq!(header.size(), DESCRIPTOR_SIZE as u64);
    let record = DescriptorRecord::parse(&stream[body..body + DESCRIPTOR_SIZE]).unwrap();
    assert_eq!(record.magic.get(), MIGRATION_MAGIC);
    assert_eq!(record.identity(), identity);
}

/// Absent resources produce no header at all.
#[test]
fn test_absent_resources_are_not_framed() {
    let layout = SimLayout {
        lmem_bytes: 0,
        ccs_bytes: 0,
        ..SimLayout::default()
    };
    let source = SimDevice::seeded(2, layout, 3);
    let target = source.blank_like();
    let (stream, save) = save_all(source, &MigrationConfig::default(), 4096).unwrap();

    let kinds: Vec<_> = frames(&stream)
        .unwrap()
        .iter()
        .map(|(h, _)| h.resource_type().unwrap())
        .collect();
    assert!(!kinds.contains(&ResourceType::Lmem));
    assert!(!kinds.contains(&ResourceType::CcsMetadata));
    assert_eq!(kinds.len(), 1 + 2 * 2);

    let resume = resume_all(target, &MigrationConfig::default(), &stream, 4096).unwrap();
    assert_eq!(resume.device().digest(), save.device().digest());
}

/// A header never splits across read calls.
#[test]
fn test_read_never_splits_header() {
    let mut save = MigrationSession::new(
        SimDevice::seeded(1, SimLayout::default(), 4),
        &MigrationConfig::default(),
    )
    .unwrap();
    save.prepare_save_all().unwrap();

    let mut small = [0u8; HEADER_SIZE - 1];
    assert_eq!(read_raw(&mut save, &mut small), -(libc::EINVAL as isize));
    assert!(matches!(save.read(&mut small), Err(MigrationError::ShortBuffer { .. })));
    assert_eq!(save.stats().header_bytes, 0);
    assert_eq!(save.pending().count(), 5);

    let mut buf = [0u8; HEADER_SIZE + 10];
    assert_eq!(save.read(&mut buf).unwrap(), HEADER_SIZE + 10);
    assert_eq!(save.read(&mut small).unwrap(), DESCRIPTOR_SIZE - 10);
    // Next item starts with a header again.
    assert!(save.read(&mut small).is_err());
}

/// A write without an active item must carry a whole header; nothing is
/// consumed otherwise.
#[test]
fn test_write_requires_whole_header() {
    let source = SimDevice::seeded(1, SimLayout::default(), 5);
    let target = source.blank_like();
    let (stream, _) = save_all(source, &MigrationConfig::default(), 4096).unwrap();

    let mut resume = MigrationSession::new(target, &MigrationConfig::default()).unwrap();
    assert_eq!(write_raw(&mut resume, &stream[..HEADER_SIZE - 1]), -(libc::EINVAL as isize));
    assert!(!resume.resume_in_progress());
    assert_eq!(resume.stats().header_bytes, 0);

    // Exactly one header starts the item without touching the device.
    assert_eq!(write_raw(&mut resume, &stream[..HEADER_SIZE]), HEADER_SIZE as isize);
    assert!(resume.resume_in_progress());
    assert!(!resume.descriptor_accepted());
}

/// One call never crosses an item boundary.
#[test]
fn test_one_item_per_call() {
    let source = SimDevice::seeded(1, SimLayout::default(), 6);
    let target = source.blank_like();
    let (stream, _) = save_all(source, &MigrationConfig::default(), 1 << 20).unwrap();

    let mut resume = MigrationSession::new(target, &MigrationConfig::default()).unwrap();
    let n = resume.write(&stream).unwrap();
    assert_eq!(n, HEADER_SIZE + DESCRIPTOR_SIZE);
    assert!(resume.descriptor_accepted());
    assert!(!resume.resume_in_progress());
}

#[test]
fn test_unknown_type_is_unsupported() {
    let mut resume = MigrationSession::new(
        SimDevice::new(1, SimLayout::default()),
        &MigrationConfig::default(),
    )
    .unwrap();
    let mut header = [0u8; HEADER_SIZE];
    header[0] = 9;
    let err = resume.write(&header).unwrap_err();
    assert!(matches!(err, MigrationError::UnsupportedType(9)));
}

/// Reserved header fields must be zero.
#[test]
fn test_reserved_header_fields_are_checked() {
    let source = SimDevice::seeded(1, SimLayout::default(), 7);
    let (mut stream, _) = save_all(source.clone(), &MigrationConfig::default(), 4096).unwrap();
    // Header offset field starts after kind and tile.
    stream[12] = 1;

    let mut resume =
        MigrationSession::new(source.blank_like(), &MigrationConfig::default()).unwrap();
    assert!(matches!(
        resume.write(&stream),
        Err(MigrationError::ProtocolMismatch(Mismatch::Wire(_)))
    ));
}
