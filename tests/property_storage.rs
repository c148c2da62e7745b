//! Property-based tests for buffer and archive contents
//!
//! Uses proptest to check that bytes come back exactly as written across
//! arbitrary write splits, block sizes and staging boundaries.

use proptest::prelude::*;
use solid_archive::{ArchiveConfig, ArchiveWriter, BlockBuffer, HookRegistry};
use std::io::Read;
use std::sync::Arc;

proptest! {
    #[test]
    fn prop_buffer_preserves_bytes(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..600), 0..20),
        shift in 6u32..10
    ) {
        let mut buffer = BlockBuffer::with_block_size(1 << shift).unwrap();
        let early = buffer.open_reader();
        let mut expected = Vec::new();

        for chunk in &chunks {
            buffer.write_range(chunk, 0, chunk.len()).unwrap();
            expected.extend_from_slice(chunk);
        }

        prop_assert_eq!(buffer.size(), expected.len() as u64);
        prop_assert_eq!(buffer.block_count(), expected.len() >> shift);

        for mut reader in [early, buffer.open_reader()] {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            prop_assert_eq!(&out, &expected);
        }
    }

    #[test]
    fn prop_archive_reads_back_entries(
        entries in prop::collection::vec(
            (0usize..4, prop::collection::vec(any::<u8>(), 0..3000), any::<bool>()),
            1..25
        )
    ) {
        let config = ArchiveConfig { staging_capacity: 1024, ..Default::default() };
        let mut writer = ArchiveWriter::with_config(&config, Arc::new(HookRegistry::new())).unwrap();

        let mut expected: Vec<(String, Vec<u8>)> = Vec::new();
        for (name_id, data, streamed) in &entries {
            let name = format!("res/{}.bin", name_id);
            let entry = if *streamed {
                writer.add_reader(&name, &data[..]).unwrap()
            } else {
                writer.add_bytes(&name, data).unwrap()
            };
            prop_assert_eq!(entry.size(), data.len() as u64);
            expected.push((name, data.clone()));
        }
        let archive = writer.finish().unwrap();

        // Same-name entries come back in insertion order
        let mut cursor = std::collections::HashMap::new();
        for (name, data) in &expected {
            let idx = cursor.entry(name.clone()).or_insert(0usize);
            let entry = archive.entry_at(name, *idx).unwrap();
            *idx += 1;

            prop_assert_eq!(&archive.read_entry(&entry).unwrap(), data);

            let mut streamed = Vec::new();
            archive.open_entry(&entry).read_to_end(&mut streamed).unwrap();
            prop_assert_eq!(&streamed, data);

            let url = archive.make_url(name, entry.index()).unwrap();
            prop_assert_eq!(archive.resolve_url(&url).unwrap(), entry);
        }

        let total: usize = expected.iter().map(|(_, d)| d.len()).sum();
        prop_assert_eq!(archive.data_len().unwrap(), total as u64);
        archive.close().unwrap();
    }
}
