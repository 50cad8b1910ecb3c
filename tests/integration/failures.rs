use gpumig_core::config::{MemoryConfig, MigrationConfig, ProtocolConfig};
use gpumig_core::wire::{DeviceIdentity, ResourceType, DESCRIPTOR_SIZE, HEADER_SIZE};
use gpumig_stream::fops::{read_raw, write_raw};
use gpumig_stream::sim::{CallOp, Fault, SimDevice, SimLayout};
use gpumig_stream::{DeviceError, MigrationError, Mismatch};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Mismatches
// ══════════════════════════════════════════════════════════════════════════════

fn saved(seed: u64) -> (Vec<u8>, SimDevice) {
    let source = SimDevice::seeded(1, SimLayout::default(), seed);
    let (stream, save) = save_all(source, &MigrationConfig::default(), 8192).unwrap();
    (stream, save.into_device())
}

/// A descriptor from another PCI device is rejected before any state is
/// applied, and the stream stays aborted.
#[test]
fn test_vendor_mismatch_aborts_resume() {
    let (stream, source) = saved(1);
    let other = SimDevice::with_identity(
        DeviceIdentity {
            vendor: 0x1002,
            device: 0x744c,
        },
        1,
        source.layout(),
    );

    let mut resume = MigrationSession::new(other, &MigrationConfig::default()).unwrap();
    let err = resume.write(&stream).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("vendor"), "{err}");
    assert!(resume.device().calls().is_empty());

    let rest = &stream[HEADER_SIZE + DESCRIPTOR_SIZE..];
    assert!(matches!(resume.write(rest), Err(MigrationError::Aborted)));
    assert_eq!(write_raw(&mut resume, rest), -(libc::EBADF as isize));
}

#[test]
fn test_version_mismatch_is_protocol_error() {
    let (mut stream, source) = saved(2);
    // Descriptor version follows the 8-byte magic.
    stream[HEADER_SIZE + 8] = 2;

    let mut resume =
        MigrationSession::new(source.blank_like(), &MigrationConfig::default()).unwrap();
    assert!(matches!(
        resume.write(&stream),
        Err(MigrationError::ProtocolMismatch(Mismatch::Wire(_)))
    ));
    assert_eq!(resume.stats().items_discarded, 1);
}

/// Device state ahead of the descriptor is refused unless the check is
/// turned off.
#[test]
fn test_state_before_descriptor() {
    let (stream, source) = saved(3);
    let ggtt = &stream[HEADER_SIZE + DESCRIPTOR_SIZE..];

    let mut strict =
        MigrationSession::new(source.blank_like(), &MigrationConfig::default()).unwrap();
    assert!(matches!(
        strict.write(ggtt),
        Err(MigrationError::ProtocolMismatch(Mismatch::DescriptorNotFirst {
            kind: ResourceType::Ggtt
        }))
    ));

    let relaxed = MigrationConfig {
        protocol: ProtocolConfig {
            require_descriptor_first: false,
        },
        ..MigrationConfig::default()
    };
    let resume = resume_all(source.blank_like(), &relaxed, ggtt, 8192).unwrap();
    assert_eq!(
        resume.device().resource(ResourceType::Ggtt, 0),
        source.resource(ResourceType::Ggtt, 0)
    );
    assert!(!resume.descriptor_accepted());
}

#[test]
fn test_duplicate_descriptor_is_rejected() {
    let (stream, source) = saved(4);
    let descriptor = &stream[..HEADER_SIZE + DESCRIPTOR_SIZE];

    let mut resume =
        MigrationSession::new(source.blank_like(), &MigrationConfig::default()).unwrap();
    resume.write(descriptor).unwrap();
    assert!(matches!(
        resume.write(descriptor),
        Err(MigrationError::ProtocolMismatch(Mismatch::DuplicateDescriptor))
    ));
}

#[test]
fn test_truncated_stream_is_detected() {
    let (stream, source) = saved(5);
    let cut = &stream[..stream.len() - 100];
    let err = resume_all(source.blank_like(), &MigrationConfig::default(), cut, 4096)
        .err()
        .unwrap();
    let err = err.downcast::<MigrationError>().unwrap();
    assert!(matches!(
        err,
        MigrationError::ProtocolMismatch(Mismatch::Truncated { remaining: 100, .. })
    ));
}

// ══════════════════════════════════════════════════════════════════════════════
//  Device failures
// ══════════════════════════════════════════════════════════════════════════════

/// A failed size query aborts prepare and releases everything.
#[test]
fn test_size_query_failure_rolls_back_prepare() {
    let mut source = SimDevice::seeded(2, SimLayout::default(), 6);
    source.inject(Fault::SizeQuery {
        kind: ResourceType::CcsMetadata,
        tile: 1,
    });
    let mut save = MigrationSession::new(source, &MigrationConfig::default()).unwrap();

    let err = save.prepare_save_all().unwrap_err();
    assert!(matches!(
        err,
        MigrationError::SizeQueryFailed {
            source: DeviceError::Failed { .. },
            ..
        }
    ));
    assert_eq!(save.pending().count(), 0);
    assert_eq!(save.allocator().live_bytes(), 0);
    assert_eq!(save.read(&mut [0u8; 64]).unwrap(), 0);
}

/// A save failure costs only the failing item.
#[test]
fn test_save_failure_skips_item() {
    let mut source = SimDevice::seeded(1, SimLayout::default(), 7);
    source.inject(Fault::Save {
        kind: ResourceType::Ggtt,
        tile: 0,
        skip: 0,
    });
    let mut save = MigrationSession::new(source, &MigrationConfig::default()).unwrap();
    save.prepare_save_all().unwrap();

    let mut buf = vec![0u8; 1 << 20];
    save.read(&mut buf).unwrap();
    let err = save.read(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::DeviceOperationFailed {
            kind: ResourceType::Ggtt,
            ..
        }
    ));
    assert_eq!(err.errno(), -(libc::EIO as isize));

    let rest = drain(&mut save, 8192).unwrap();
    let kinds: Vec<_> = frames(&rest)
        .unwrap()
        .iter()
        .map(|(h, _)| h.resource_type().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![ResourceType::Lmem, ResourceType::Firmware, ResourceType::CcsMetadata]
    );
    assert_eq!(save.stats().items_discarded, 1);
}

fn mixed_layout() -> SimLayout {
    SimLayout {
        ggtt_bytes: 512,
        lmem_bytes: 3000,
        firmware_bytes: 256,
        ccs_bytes: 0,
    }
}

/// Push `stream` through `write_raw` in `step`-byte slices the way a
/// migration tool copies a file into the device: advance by the returned
/// count, offer the same slice again after `-EIO`, stop on anything else.
fn feed_raw(session: &mut MigrationSession<SimDevice>, stream: &[u8], step: usize) -> Vec<isize> {
    let mut returns = Vec::new();
    let mut pos = 0;
    while pos < stream.len() {
        let end = (pos + step).min(stream.len());
        let ret = write_raw(session, &stream[pos..end]);
        returns.push(ret);
        match ret {
            n if n > 0 => pos += n as usize,
            n if n == -(libc::EIO as isize) => continue,
            _ => break,
        }
    }
    returns
}

/// A save failure after part of the item was read tears the save stream
/// down instead of emitting a misframed item.
#[test]
fn test_partial_item_save_failure_aborts_stream() {
    let mut source = SimDevice::seeded(1, mixed_layout(), 10);
    source.inject(Fault::Save {
        kind: ResourceType::Lmem,
        tile: 0,
        skip: 1,
    });
    let mut save = MigrationSession::new(source, &config(KIB, KIB)).unwrap();
    save.prepare_save_all().unwrap();

    let mut stream = Vec::new();
    let mut errors = Vec::new();
    let mut buf = [0u8; 512];
    for _ in 0..32 {
        match read_raw(&mut save, &mut buf) {
            0 => break,
            n if n > 0 => stream.extend_from_slice(&buf[..n as usize]),
            e => errors.push(e),
        }
        if errors.len() == 2 {
            break;
        }
    }
    assert_eq!(errors, vec![-(libc::EIO as isize), -(libc::EBADF as isize)]);
    assert_eq!(
        save.stats().header_bytes + save.stats().body_bytes,
        stream.len() as u64
    );

    // The emitted prefix ends inside LMEM and is reported as truncated.
    let items = frames(&stream[..HEADER_SIZE * 2 + DESCRIPTOR_SIZE + 512]).unwrap();
    assert_eq!(items.len(), 2);
    let err = resume_all(save.device().blank_like(), &config(KIB, KIB), &stream, 512)
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast::<MigrationError>().unwrap(),
        MigrationError::ProtocolMismatch(Mismatch::Truncated {
            kind: ResourceType::Lmem,
            ..
        })
    ));
}

/// A save failure before the item's header left the session drops just that
/// item; what was emitted still frames and resumes.
#[test]
fn test_unsent_item_save_failure_keeps_framing() {
    let mut source = SimDevice::seeded(1, mixed_layout(), 11);
    source.inject(Fault::Save {
        kind: ResourceType::Lmem,
        tile: 0,
        skip: 1,
    });
    let mut save = MigrationSession::new(source, &config(KIB, KIB)).unwrap();
    save.prepare_save_all().unwrap();

    let mut stream = Vec::new();
    let mut errors = 0;
    let mut buf = vec![0u8; 64 * KIB as usize];
    loop {
        match read_raw(&mut save, &mut buf) {
            0 => break,
            n if n > 0 => stream.extend_from_slice(&buf[..n as usize]),
            e => {
                assert_eq!(e, -(libc::EIO as isize));
                errors += 1;
            }
        }
    }
    assert_eq!(errors, 1);

    let kinds: Vec<_> = frames(&stream)
        .unwrap()
        .iter()
        .map(|(h, _)| h.resource_type().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![ResourceType::Descriptor, ResourceType::Ggtt, ResourceType::Firmware]
    );

    let source = save.into_device();
    let resume = resume_all(source.blank_like(), &config(KIB, KIB), &stream, 512).unwrap();
    assert_eq!(
        resume.device().resource(ResourceType::Firmware, 0),
        source.resource(ResourceType::Firmware, 0)
    );
}

/// A load failure drops the item, its remaining body is skipped, and later
/// items still apply. The feeder never looks inside the stream.
#[test]
fn test_load_failure_is_not_fatal() {
    let source = SimDevice::seeded(1, mixed_layout(), 8);
    let (stream, _) = save_all(source.clone(), &config(KIB, KIB), 8192).unwrap();
    let mut target = source.blank_like();
    target.inject(Fault::Load {
        kind: ResourceType::Lmem,
        tile: 0,
        skip: 1,
    });

    let mut resume = MigrationSession::new(target, &config(KIB, KIB)).unwrap();
    let returns = feed_raw(&mut resume, &stream, 512);
    let failures: Vec<_> = returns.iter().filter(|&&r| r < 0).collect();
    assert_eq!(failures, vec![&-(libc::EIO as isize)]);
    resume.finish_resume().unwrap();

    for kind in [ResourceType::Ggtt, ResourceType::Firmware] {
        assert_eq!(resume.device().resource(kind, 0), source.resource(kind, 0));
    }
    assert_eq!(
        device_calls(resume.device(), CallOp::Load, ResourceType::Lmem),
        vec![(0, KIB), (KIB, KIB)]
    );
    let stats = resume.stats();
    assert_eq!(stats.items_discarded, 1);
    assert_eq!(stats.items_received, 3);
    assert_eq!(stats.header_bytes + stats.body_bytes, stream.len() as u64);
}

/// Buffers beyond the configured budget fail with out-of-memory.
#[test]
fn test_buffer_budget_is_enforced() {
    let (stream, source) = saved(9);
    let tight = MigrationConfig {
        memory: MemoryConfig {
            buffer_budget_bytes: source.layout().ggtt_bytes - 1,
        },
        ..MigrationConfig::default()
    };

    let mut resume = MigrationSession::new(source.blank_like(), &tight).unwrap();
    let desc_len = HEADER_SIZE + DESCRIPTOR_SIZE;
    assert_eq!(resume.write(&stream[..desc_len]).unwrap(), desc_len);
    assert_eq!(write_raw(&mut resume, &stream[desc_len..]), -(libc::ENOMEM as isize));
    assert!(!resume.resume_in_progress());

    let mut save = MigrationSession::new(source, &tight).unwrap();
    assert!(matches!(
        save.prepare_save_all(),
        Err(MigrationError::OutOfMemory { .. })
    ));
    assert_eq!(save.allocator().live_bytes(), 0);
}

#[test]
fn test_zero_chunk_config_is_rejected() {
    let bad = config(0, KIB);
    let err = MigrationSession::new(SimDevice::new(1, SimLayout::default()), &bad)
        .err()
        .unwrap();
    assert!(matches!(err, MigrationError::Config(_)));
    assert_eq!(err.errno(), -(libc::EINVAL as isize));
}
