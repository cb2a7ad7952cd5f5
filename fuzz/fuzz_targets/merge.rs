#![no_main]

use dexmerge::{DexFile, DexMerger, MergeOptions};
use libfuzzer_sys::fuzz_target;

// Malformed inputs must surface as errors, never as panics; only validated
// files reach the merger.
fuzz_target!(|data: &[u8]| {
    if let Ok(file) = DexFile::parse(data.to_vec()) {
        let mut merger = DexMerger::new(MergeOptions {
            verify_checksums: false,
            ..MergeOptions::default()
        });
        if merger.add_file(&file).is_ok() {
            let _ = merger.finish();
        }
    }
});
