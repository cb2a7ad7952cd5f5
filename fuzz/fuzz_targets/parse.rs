#![no_main]

use dexmerge::DexFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = DexFile::parse(data.to_vec());
});
