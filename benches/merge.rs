//! Benchmarks for the merge pipeline.
//!
//! Measures the full path over crafted in-memory inputs:
//! - parsing a single input container
//! - merging two files with overlapping constants
//! - the value codec over a scalar-heavy static initializer

extern crate dexmerge;

#[path = "../tests/common/mod.rs"]
mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use common::{ClassSpec, CodeSpec, DexBuilder, ACC_PUBLIC, ACC_STATIC};
use dexmerge::{DexFile, DexMerger, MergeOptions};

/// Two inputs sharing a superclass, a field and the `()V` prototype.
fn sample_inputs() -> (Vec<u8>, Vec<u8>) {
    let mut a = DexBuilder::new();
    let object = a.type_desc("Ljava/lang/Object;");
    let la = a.type_desc("LA;");
    let x = a.field("LA;", "I", "x");
    let mut class_a = ClassSpec::new(la);
    class_a.superclass_idx = object;
    class_a.static_fields = vec![(x, ACC_PUBLIC | ACC_STATIC)];
    class_a.static_values = Some(vec![0x01, 0x04, 0x05]);
    a.class(class_a);

    let mut b = DexBuilder::new();
    let object = b.type_desc("Ljava/lang/Object;");
    let la = b.type_desc("LA;");
    let lb = b.type_desc("LB;");
    let x = b.field("LA;", "I", "x");
    let m = b.method("LB;", "m", "V", "V", &[]);
    let mut class_b = ClassSpec::new(lb);
    class_b.superclass_idx = la;
    class_b.virtual_methods = vec![(
        m,
        ACC_PUBLIC,
        Some(CodeSpec {
            registers: 1,
            ins: 1,
            insns: vec![0x0060, x as u16, 0x000E],
            ..CodeSpec::default()
        }),
    )];
    b.class(class_b);

    (a.build(), b.build())
}

fn bench_parse_input(c: &mut Criterion) {
    let (bytes, _) = sample_inputs();

    c.bench_function("parse_input", |b| {
        b.iter(|| {
            let file = DexFile::parse(black_box(bytes.clone())).unwrap();
            black_box(file.class_defs_size())
        });
    });
}

fn bench_merge_two_files(c: &mut Criterion) {
    let (bytes_a, bytes_b) = sample_inputs();
    let file_a = DexFile::parse(bytes_a).unwrap();
    let file_b = DexFile::parse(bytes_b).unwrap();

    c.bench_function("merge_two_files", |b| {
        b.iter(|| {
            let mut merger = DexMerger::new(MergeOptions::default());
            merger.add_file(black_box(&file_a)).unwrap();
            merger.add_file(black_box(&file_b)).unwrap();
            black_box(merger.finish().unwrap())
        });
    });
}

fn bench_scalar_heavy_initializers(c: &mut Criterion) {
    let mut builder = DexBuilder::new();
    let object = builder.type_desc("Ljava/lang/Object;");
    let lv = builder.type_desc("LV;");

    let mut fields = Vec::new();
    let mut values = vec![64u8]; // element count
    for position in 0..64 {
        let name = format!("f{position:02}");
        fields.push((builder.field("LV;", "I", &name), ACC_PUBLIC | ACC_STATIC));
        values.extend_from_slice(&[0x24, (position as u8), 0x01]); // INT, two bytes
    }

    let mut class = ClassSpec::new(lv);
    class.superclass_idx = object;
    class.static_fields = fields;
    class.static_values = Some(values);
    builder.class(class);

    let bytes = builder.build();
    let file = DexFile::parse(bytes).unwrap();

    c.bench_function("merge_scalar_initializers", |b| {
        b.iter(|| {
            let mut merger = DexMerger::new(MergeOptions::default());
            merger.add_file(black_box(&file)).unwrap();
            black_box(merger.finish().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_parse_input,
    bench_merge_two_files,
    bench_scalar_heavy_initializers
);
criterion_main!(benches);
