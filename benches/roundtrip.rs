use criterion::{criterion_group, criterion_main, Criterion};

use dexlayout::container::DexOutputContainer;
use dexlayout::file::modifiers;
use dexlayout::file::{DexFile, DexLocation};
use dexlayout::ir;
use dexlayout::ir::builder::build_ir;
use dexlayout::options::Options;
use dexlayout::writer::output_dex_file;

fn add_string(c: &mut ir::Collections, value: &str) -> u32 {
    let string_data = c.string_datas.push(ir::StringData {
        offset: 0,
        data: dexlayout::utf::str_to_mutf8(value),
    });
    let index = c.string_ids.items.len() as u32;
    c.string_ids.items.push(ir::StringId {
        offset: 0,
        index,
        string_data,
    });
    index
}

fn add_type(c: &mut ir::Collections, descriptor: &str) -> u32 {
    let descriptor_idx = add_string(c, descriptor);
    let index = c.type_ids.items.len() as u32;
    c.type_ids.items.push(ir::TypeId {
        offset: 0,
        index,
        descriptor_idx,
    });
    index
}

/// Builds a file with `class_count` classes of one method each.
fn synthesize(class_count: u32) -> Vec<u8> {
    let mut header = ir::Header {
        magic: *b"dex\n035\0",
        checksum: 0,
        signature: [0; 20],
        endian_tag: 0x12345678,
        file_size: 0,
        header_size: ir::HEADER_ITEM_SIZE,
        link_size: 0,
        link_offset: 0,
        data_size: 0,
        data_offset: 0,
        support_default_methods: false,
        collections: ir::Collections::default(),
    };
    let c = &mut header.collections;

    let object = add_type(c, "Ljava/lang/Object;");
    let void = add_type(c, "V");
    let shorty = add_string(c, "V");
    c.proto_ids.items.push(ir::ProtoId {
        offset: 0,
        index: 0,
        shorty_idx: shorty,
        return_type_idx: void,
        parameters: None,
    });

    for i in 0..class_count {
        let class_type = add_type(c, &format!("LBench{i};"));
        let name_idx = add_string(c, &format!("method{i}"));
        let method_idx = c.method_ids.items.len() as u32;
        c.method_ids.items.push(ir::MethodId {
            offset: 0,
            index: method_idx,
            class_idx: class_type,
            proto_idx: 0,
            name_idx,
        });
        let code = c.code_items.push(ir::CodeItem {
            offset: 0,
            size: 0,
            registers_size: 1,
            ins_size: 0,
            outs_size: 0,
            debug_info: None,
            insns: vec![0x0012, 0x000e],
            tries: Vec::new(),
            handlers: Vec::new(),
            fixups: None,
        });
        let class_data = c.class_datas.push(ir::ClassData {
            direct_methods: vec![ir::MethodItem {
                access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                method_idx,
                code: Some(code),
            }],
            ..ir::ClassData::default()
        });
        c.class_defs.items.push(ir::ClassDef {
            offset: 0,
            index: i,
            class_idx: class_type,
            access_flags: modifiers::ACC_PUBLIC,
            superclass_idx: Some(object),
            interfaces: None,
            source_file_idx: None,
            annotations: None,
            class_data: Some(class_data),
            static_values: None,
        });
    }

    let mut container = DexOutputContainer::new();
    output_dex_file(&mut header, &Options::default(), true, &mut container).unwrap();
    container.serialize()
}

fn bench_roundtrip(criterion: &mut Criterion) {
    let bytes = synthesize(64);
    criterion.bench_function("parse_and_rebuild", |b| {
        b.iter(|| {
            let dex = DexFile::from_raw_parts(&bytes, DexLocation::InMemory).unwrap();
            let mut header = build_ir(&dex, &Options::default()).unwrap();
            let mut container = DexOutputContainer::new();
            output_dex_file(&mut header, &Options::default(), true, &mut container).unwrap();
            container.serialize().len()
        })
    });
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
