#![no_main]
use libfuzzer_sys::{fuzz_target, arbitrary::{Arbitrary, Unstructured}};
use solid_archive::{ArchiveConfig, ArchiveWriter, HookRegistry};
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
struct AddOp {
    name_idx: u8,
    data: Vec<u8>,
    offset: u16,
    len: u16,
    streamed: bool,
}

// Every accepted entry must read back exactly; rejected ranges must not
// move the write cursor.
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let ops: Vec<AddOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let config = ArchiveConfig {
        staging_capacity: 1024,
        ..Default::default()
    };
    let mut writer = match ArchiveWriter::with_config(&config, Arc::new(HookRegistry::new())) {
        Ok(w) => w,
        Err(_) => return,
    };

    let mut expected = Vec::new();
    for op in ops.iter().take(64) {
        let name = format!("f{}", op.name_idx % 8);
        let before = writer.file_position();

        let result = if op.streamed {
            writer.add_reader(&name, &op.data[..])
        } else {
            writer.add_range(&name, &op.data, op.offset as usize, op.len as usize)
        };

        match result {
            Ok(entry) => {
                let start = if op.streamed { 0 } else { op.offset as usize };
                let end = if op.streamed { op.data.len() } else { start + op.len as usize };
                expected.push((entry, op.data[start..end].to_vec()));
            }
            Err(_) => assert_eq!(writer.file_position(), before),
        }
    }

    let archive = writer.finish().unwrap();
    for (entry, data) in &expected {
        assert_eq!(&archive.read_entry(entry).unwrap(), data);
    }
    archive.close().unwrap();
});
