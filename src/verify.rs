//! IR-level comparison of two dex files.
//!
//! Allows differences in layout but not in data: id tables are compared
//! element-wise by semantic content, class defs as a set keyed by their
//! class type index (layout may reorder them), everything below a class
//! def recursively. Neither IR is mutated; the first difference is
//! reported with its location.

use std::collections::HashMap;

use crate::error::DexError;
use crate::ir::*;
use crate::Result;

fn mismatch(message: String) -> DexError {
    DexError::VerificationMismatch(message)
}

pub fn verify_output_dex_file(orig: &Header, output: &Header) -> Result<()> {
    // Id sections have a defined order that layout never changes.
    verify_string_ids(orig, output)?;
    verify_type_ids(orig, output)?;
    verify_proto_ids(orig, output)?;
    verify_field_ids(orig, output)?;
    verify_method_ids(orig, output)?;
    // Class defs may have been reordered.
    verify_class_defs(orig, output)
}

fn check_size(orig: usize, output: usize, section_name: &str) -> Result<()> {
    if orig != output {
        return Err(mismatch(format!(
            "Mismatched size for {section_name} section: {orig} vs {output}."
        )));
    }
    Ok(())
}

fn string_bytes(header: &Header, string_idx: u32) -> &[u8] {
    let string_id = &header.collections.string_ids.items[string_idx as usize];
    &header.collections.string_datas.get(string_id.string_data).data
}

fn verify_string_ids(orig: &Header, output: &Header) -> Result<()> {
    check_size(
        orig.collections.string_ids.len(),
        output.collections.string_ids.len(),
        "string ids",
    )?;
    for i in 0..orig.collections.string_ids.len() as u32 {
        if string_bytes(orig, i) != string_bytes(output, i) {
            return Err(mismatch(format!(
                "Mismatched string data for string id {i}: {:?} vs {:?}.",
                String::from_utf8_lossy(string_bytes(orig, i)),
                String::from_utf8_lossy(string_bytes(output, i)),
            )));
        }
    }
    Ok(())
}

fn verify_type_ids(orig: &Header, output: &Header) -> Result<()> {
    check_size(
        orig.collections.type_ids.len(),
        output.collections.type_ids.len(),
        "type ids",
    )?;
    for (a, b) in orig
        .collections
        .type_ids
        .items
        .iter()
        .zip(&output.collections.type_ids.items)
    {
        if a.descriptor_idx != b.descriptor_idx {
            return Err(mismatch(format!(
                "Mismatched string index for type id {}: {} vs {}.",
                a.index, a.descriptor_idx, b.descriptor_idx
            )));
        }
    }
    Ok(())
}

fn verify_type_list(
    orig: &Header,
    output: &Header,
    orig_list: Option<TypeListRef>,
    output_list: Option<TypeListRef>,
) -> bool {
    match (orig_list, output_list) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            orig.collections.type_lists.get(a).types == output.collections.type_lists.get(b).types
        }
        _ => false,
    }
}

fn verify_proto_ids(orig: &Header, output: &Header) -> Result<()> {
    check_size(
        orig.collections.proto_ids.len(),
        output.collections.proto_ids.len(),
        "proto ids",
    )?;
    for (a, b) in orig
        .collections
        .proto_ids
        .items
        .iter()
        .zip(&output.collections.proto_ids.items)
    {
        if a.shorty_idx != b.shorty_idx {
            return Err(mismatch(format!(
                "Mismatched string index for proto id {}: {} vs {}.",
                a.index, a.shorty_idx, b.shorty_idx
            )));
        }
        if a.return_type_idx != b.return_type_idx {
            return Err(mismatch(format!(
                "Mismatched type index for proto id {}: {} vs {}.",
                a.index, a.return_type_idx, b.return_type_idx
            )));
        }
        if !verify_type_list(orig, output, a.parameters, b.parameters) {
            return Err(mismatch(format!(
                "Mismatched type list for proto id {}.",
                a.index
            )));
        }
    }
    Ok(())
}

fn verify_field_ids(orig: &Header, output: &Header) -> Result<()> {
    check_size(
        orig.collections.field_ids.len(),
        output.collections.field_ids.len(),
        "field ids",
    )?;
    for (a, b) in orig
        .collections
        .field_ids
        .items
        .iter()
        .zip(&output.collections.field_ids.items)
    {
        if a.class_idx != b.class_idx || a.type_idx != b.type_idx || a.name_idx != b.name_idx {
            return Err(mismatch(format!(
                "Mismatched field id {}: ({}, {}, {}) vs ({}, {}, {}).",
                a.index, a.class_idx, a.type_idx, a.name_idx, b.class_idx, b.type_idx, b.name_idx
            )));
        }
    }
    Ok(())
}

fn verify_method_ids(orig: &Header, output: &Header) -> Result<()> {
    check_size(
        orig.collections.method_ids.len(),
        output.collections.method_ids.len(),
        "method ids",
    )?;
    for (a, b) in orig
        .collections
        .method_ids
        .items
        .iter()
        .zip(&output.collections.method_ids.items)
    {
        if a.class_idx != b.class_idx || a.proto_idx != b.proto_idx || a.name_idx != b.name_idx {
            return Err(mismatch(format!(
                "Mismatched method id {}: ({}, {}, {}) vs ({}, {}, {}).",
                a.index, a.class_idx, a.proto_idx, a.name_idx, b.class_idx, b.proto_idx, b.name_idx
            )));
        }
    }
    Ok(())
}

fn verify_class_defs(orig: &Header, output: &Header) -> Result<()> {
    check_size(
        orig.collections.class_defs.len(),
        output.collections.class_defs.len(),
        "class defs",
    )?;
    let mut by_class_idx: HashMap<u32, &ClassDef> = HashMap::new();
    for class_def in &output.collections.class_defs.items {
        if by_class_idx.insert(class_def.class_idx, class_def).is_some() {
            return Err(mismatch(format!(
                "Duplicate class def for class type {} in output.",
                class_def.class_idx
            )));
        }
    }
    for class_def in &orig.collections.class_defs.items {
        let Some(other) = by_class_idx.get(&class_def.class_idx) else {
            return Err(mismatch(format!(
                "Missing class def for class type {}.",
                class_def.class_idx
            )));
        };
        verify_class_def(orig, output, class_def, other)?;
    }
    Ok(())
}

fn verify_class_def(
    orig: &Header,
    output: &Header,
    a: &ClassDef,
    b: &ClassDef,
) -> Result<()> {
    let location = format!("class def for type {}", a.class_idx);
    if a.access_flags != b.access_flags {
        return Err(mismatch(format!(
            "Mismatched access flags for {location}: {:#x} vs {:#x}.",
            a.access_flags, b.access_flags
        )));
    }
    if a.superclass_idx != b.superclass_idx {
        return Err(mismatch(format!(
            "Mismatched superclass for {location}: {:?} vs {:?}.",
            a.superclass_idx, b.superclass_idx
        )));
    }
    if !verify_type_list(orig, output, a.interfaces, b.interfaces) {
        return Err(mismatch(format!("Mismatched interfaces for {location}.")));
    }
    if a.source_file_idx != b.source_file_idx {
        return Err(mismatch(format!(
            "Mismatched source file for {location}: {:?} vs {:?}.",
            a.source_file_idx, b.source_file_idx
        )));
    }
    verify_annotations_directory(orig, output, a.annotations, b.annotations, &location)?;
    verify_class_data(orig, output, a.class_data, b.class_data, &location)?;
    verify_encoded_array_ref(orig, output, a.static_values, b.static_values, &location)
}

fn verify_annotations_directory(
    orig: &Header,
    output: &Header,
    a: Option<AnnotationsDirectoryRef>,
    b: Option<AnnotationsDirectoryRef>,
    location: &str,
) -> Result<()> {
    let (a, b) = match (a, b) {
        (None, None) => return Ok(()),
        (Some(a), Some(b)) => (
            orig.collections.annotations_directory_items.get(a),
            output.collections.annotations_directory_items.get(b),
        ),
        _ => {
            return Err(mismatch(format!(
                "Mismatched annotations directory presence for {location}."
            )))
        }
    };
    verify_annotation_set(orig, output, a.class_annotation, b.class_annotation, location)?;
    check_size(
        a.field_annotations.len(),
        b.field_annotations.len(),
        "field annotations",
    )?;
    for (fa, fb) in a.field_annotations.iter().zip(&b.field_annotations) {
        if fa.field_idx != fb.field_idx {
            return Err(mismatch(format!(
                "Mismatched field annotation index for {location}: {} vs {}.",
                fa.field_idx, fb.field_idx
            )));
        }
        verify_annotation_set(
            orig,
            output,
            Some(fa.annotations),
            Some(fb.annotations),
            location,
        )?;
    }
    check_size(
        a.method_annotations.len(),
        b.method_annotations.len(),
        "method annotations",
    )?;
    for (ma, mb) in a.method_annotations.iter().zip(&b.method_annotations) {
        if ma.method_idx != mb.method_idx {
            return Err(mismatch(format!(
                "Mismatched method annotation index for {location}: {} vs {}.",
                ma.method_idx, mb.method_idx
            )));
        }
        verify_annotation_set(
            orig,
            output,
            Some(ma.annotations),
            Some(mb.annotations),
            location,
        )?;
    }
    check_size(
        a.parameter_annotations.len(),
        b.parameter_annotations.len(),
        "parameter annotations",
    )?;
    for (pa, pb) in a.parameter_annotations.iter().zip(&b.parameter_annotations) {
        if pa.method_idx != pb.method_idx {
            return Err(mismatch(format!(
                "Mismatched parameter annotation index for {location}: {} vs {}.",
                pa.method_idx, pb.method_idx
            )));
        }
        let la = orig.collections.annotation_set_ref_lists.get(pa.annotations);
        let lb = output
            .collections
            .annotation_set_ref_lists
            .get(pb.annotations);
        check_size(la.items.len(), lb.items.len(), "annotation set ref list")?;
        for (sa, sb) in la.items.iter().zip(&lb.items) {
            verify_annotation_set(orig, output, *sa, *sb, location)?;
        }
    }
    Ok(())
}

fn verify_annotation_set(
    orig: &Header,
    output: &Header,
    a: Option<AnnotationSetRef>,
    b: Option<AnnotationSetRef>,
    location: &str,
) -> Result<()> {
    let (a, b) = match (a, b) {
        (None, None) => return Ok(()),
        (Some(a), Some(b)) => (
            orig.collections.annotation_set_items.get(a),
            output.collections.annotation_set_items.get(b),
        ),
        _ => {
            return Err(mismatch(format!(
                "Mismatched annotation set presence for {location}."
            )))
        }
    };
    check_size(a.items.len(), b.items.len(), "annotation set")?;
    for (ia, ib) in a.items.iter().zip(&b.items) {
        let ia = orig.collections.annotation_items.get(*ia);
        let ib = output.collections.annotation_items.get(*ib);
        if ia.visibility != ib.visibility {
            return Err(mismatch(format!(
                "Mismatched annotation visibility for {location}: {} vs {}.",
                ia.visibility, ib.visibility
            )));
        }
        verify_encoded_annotation(&ia.annotation, &ib.annotation, location)?;
    }
    Ok(())
}

fn verify_encoded_annotation(
    a: &EncodedAnnotation,
    b: &EncodedAnnotation,
    location: &str,
) -> Result<()> {
    if a.type_idx != b.type_idx {
        return Err(mismatch(format!(
            "Mismatched annotation type for {location}: {} vs {}.",
            a.type_idx, b.type_idx
        )));
    }
    check_size(a.elements.len(), b.elements.len(), "annotation elements")?;
    for (ea, eb) in a.elements.iter().zip(&b.elements) {
        if ea.name_idx != eb.name_idx {
            return Err(mismatch(format!(
                "Mismatched annotation element name for {location}: {} vs {}.",
                ea.name_idx, eb.name_idx
            )));
        }
        verify_encoded_value(&ea.value, &eb.value, location)?;
    }
    Ok(())
}

fn verify_encoded_value(a: &EncodedValue, b: &EncodedValue, location: &str) -> Result<()> {
    use EncodedValue as EV;
    let matches = match (a, b) {
        (EV::Byte(x), EV::Byte(y)) => x == y,
        (EV::Short(x), EV::Short(y)) => x == y,
        (EV::Char(x), EV::Char(y)) => x == y,
        (EV::Int(x), EV::Int(y)) => x == y,
        (EV::Long(x), EV::Long(y)) => x == y,
        // Compare the bit patterns so NaN payloads stay significant.
        (EV::Float(x), EV::Float(y)) => x.to_bits() == y.to_bits(),
        (EV::Double(x), EV::Double(y)) => x.to_bits() == y.to_bits(),
        (EV::MethodType(x), EV::MethodType(y)) => x == y,
        (EV::MethodHandle(x), EV::MethodHandle(y)) => x == y,
        (EV::String(x), EV::String(y)) => x == y,
        (EV::Type(x), EV::Type(y)) => x == y,
        (EV::Field(x), EV::Field(y)) => x == y,
        (EV::Method(x), EV::Method(y)) => x == y,
        (EV::Enum(x), EV::Enum(y)) => x == y,
        (EV::Array(xs), EV::Array(ys)) => {
            check_size(xs.len(), ys.len(), "encoded array")?;
            for (x, y) in xs.iter().zip(ys) {
                verify_encoded_value(x, y, location)?;
            }
            true
        }
        (EV::Annotation(x), EV::Annotation(y)) => {
            verify_encoded_annotation(x, y, location)?;
            true
        }
        (EV::Null, EV::Null) => true,
        (EV::Boolean(x), EV::Boolean(y)) => x == y,
        _ => false,
    };
    if !matches {
        return Err(mismatch(format!(
            "Mismatched encoded value for {location}: {a:?} vs {b:?}."
        )));
    }
    Ok(())
}

fn verify_encoded_array_ref(
    orig: &Header,
    output: &Header,
    a: Option<EncodedArrayRef>,
    b: Option<EncodedArrayRef>,
    location: &str,
) -> Result<()> {
    match (a, b) {
        (None, None) => Ok(()),
        (Some(a), Some(b)) => {
            let a = orig.collections.encoded_array_items.get(a);
            let b = output.collections.encoded_array_items.get(b);
            check_size(a.values.len(), b.values.len(), "encoded array item")?;
            for (x, y) in a.values.iter().zip(&b.values) {
                verify_encoded_value(x, y, location)?;
            }
            Ok(())
        }
        _ => Err(mismatch(format!(
            "Mismatched static values presence for {location}."
        ))),
    }
}

fn verify_class_data(
    orig: &Header,
    output: &Header,
    a: Option<ClassDataRef>,
    b: Option<ClassDataRef>,
    location: &str,
) -> Result<()> {
    let (a, b) = match (a, b) {
        (None, None) => return Ok(()),
        (Some(a), Some(b)) => (
            orig.collections.class_datas.get(a),
            output.collections.class_datas.get(b),
        ),
        _ => {
            return Err(mismatch(format!(
                "Mismatched class data presence for {location}."
            )))
        }
    };
    verify_fields(&a.static_fields, &b.static_fields, location)?;
    verify_fields(&a.instance_fields, &b.instance_fields, location)?;
    verify_methods(orig, output, &a.direct_methods, &b.direct_methods, location)?;
    verify_methods(orig, output, &a.virtual_methods, &b.virtual_methods, location)
}

fn verify_fields(a: &[FieldItem], b: &[FieldItem], location: &str) -> Result<()> {
    check_size(a.len(), b.len(), "class data fields")?;
    for (fa, fb) in a.iter().zip(b) {
        if fa.field_idx != fb.field_idx || fa.access_flags != fb.access_flags {
            return Err(mismatch(format!(
                "Mismatched class data field for {location}: ({}, {:#x}) vs ({}, {:#x}).",
                fa.field_idx, fa.access_flags, fb.field_idx, fb.access_flags
            )));
        }
    }
    Ok(())
}

fn verify_methods(
    orig: &Header,
    output: &Header,
    a: &[MethodItem],
    b: &[MethodItem],
    location: &str,
) -> Result<()> {
    check_size(a.len(), b.len(), "class data methods")?;
    for (ma, mb) in a.iter().zip(b) {
        if ma.method_idx != mb.method_idx || ma.access_flags != mb.access_flags {
            return Err(mismatch(format!(
                "Mismatched class data method for {location}: ({}, {:#x}) vs ({}, {:#x}).",
                ma.method_idx, ma.access_flags, mb.method_idx, mb.access_flags
            )));
        }
        verify_code_item(orig, output, ma.code, mb.code, ma.method_idx)?;
    }
    Ok(())
}

fn verify_code_item(
    orig: &Header,
    output: &Header,
    a: Option<CodeItemRef>,
    b: Option<CodeItemRef>,
    method_idx: u32,
) -> Result<()> {
    let location = format!("code item of method {method_idx}");
    let (a, b) = match (a, b) {
        (None, None) => return Ok(()),
        (Some(a), Some(b)) => (
            orig.collections.code_items.get(a),
            output.collections.code_items.get(b),
        ),
        _ => {
            return Err(mismatch(format!(
                "Mismatched code item presence for {location}."
            )))
        }
    };
    if a.registers_size != b.registers_size
        || a.ins_size != b.ins_size
        || a.outs_size != b.outs_size
        || a.tries_size() != b.tries_size()
        || a.insns_size() != b.insns_size()
    {
        return Err(mismatch(format!(
            "Mismatched code item header for {location}: ({}, {}, {}, {}, {}) vs ({}, {}, {}, {}, {}).",
            a.registers_size,
            a.ins_size,
            a.outs_size,
            a.tries_size(),
            a.insns_size(),
            b.registers_size,
            b.ins_size,
            b.outs_size,
            b.tries_size(),
            b.insns_size(),
        )));
    }
    if a.insns != b.insns {
        return Err(mismatch(format!(
            "Mismatched instruction bytes for {location}."
        )));
    }
    for (ta, tb) in a.tries.iter().zip(&b.tries) {
        if ta.start_addr != tb.start_addr || ta.insn_count != tb.insn_count {
            return Err(mismatch(format!(
                "Mismatched try item for {location}: ({}, {}) vs ({}, {}).",
                ta.start_addr, ta.insn_count, tb.start_addr, tb.insn_count
            )));
        }
        let ha = &a.handlers[ta.handler_index as usize];
        let hb = &b.handlers[tb.handler_index as usize];
        verify_handler(ha, hb, &location)?;
    }
    check_size(a.handlers.len(), b.handlers.len(), "catch handlers")?;
    verify_debug_info(orig, output, a.debug_info, b.debug_info, &location)
}

fn verify_handler(a: &CatchHandler, b: &CatchHandler, location: &str) -> Result<()> {
    if a.catch_all != b.catch_all {
        return Err(mismatch(format!(
            "Mismatched catch-all flag for {location}: {} vs {}.",
            a.catch_all, b.catch_all
        )));
    }
    check_size(a.handlers.len(), b.handlers.len(), "handler pairs")?;
    for (pa, pb) in a.handlers.iter().zip(&b.handlers) {
        if pa.type_idx != pb.type_idx || pa.address != pb.address {
            return Err(mismatch(format!(
                "Mismatched handler pair for {location}: ({:?}, {}) vs ({:?}, {}).",
                pa.type_idx, pa.address, pb.type_idx, pb.address
            )));
        }
    }
    Ok(())
}

fn verify_debug_info(
    orig: &Header,
    output: &Header,
    a: Option<DebugInfoRef>,
    b: Option<DebugInfoRef>,
    location: &str,
) -> Result<()> {
    match (a, b) {
        (None, None) => Ok(()),
        (Some(a), Some(b)) => {
            let a = orig.collections.debug_info_items.get(a);
            let b = output.collections.debug_info_items.get(b);
            if a.data != b.data {
                return Err(mismatch(format!(
                    "Mismatched debug info bytes for {location}."
                )));
            }
            Ok(())
        }
        _ => Err(mismatch(format!(
            "Mismatched debug info presence for {location}."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::fixtures;

    #[test]
    fn identical_files_verify() {
        let a = fixtures::two_method_class();
        let b = fixtures::two_method_class();
        verify_output_dex_file(&a, &b).unwrap();
    }

    #[test]
    fn reordered_class_defs_still_verify() {
        let a = fixtures::two_class_file();
        let mut b = fixtures::two_class_file();
        b.collections.class_defs.items.swap(0, 1);
        verify_output_dex_file(&a, &b).unwrap();
    }

    #[test]
    fn changed_instruction_bytes_are_reported() {
        let a = fixtures::two_method_class();
        let mut b = fixtures::two_method_class();
        let code = b.collections.class_datas.items[0].direct_methods[1]
            .code
            .unwrap();
        b.collections.code_items.get_mut(code).insns[0] = 0x0000;
        let err = verify_output_dex_file(&a, &b).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("instruction bytes"), "{message}");
    }

    #[test]
    fn changed_string_data_is_reported() {
        let a = fixtures::two_method_class();
        let mut b = fixtures::two_method_class();
        let data_ref = b.collections.string_ids.items[0].string_data;
        b.collections.string_datas.get_mut(data_ref).data = b"Lother;".to_vec();
        assert!(verify_output_dex_file(&a, &b).is_err());
    }

    #[test]
    fn float_values_compare_by_bits() {
        let nan_a = EncodedValue::Float(f32::from_bits(0x7fc00001));
        let nan_b = EncodedValue::Float(f32::from_bits(0x7fc00001));
        verify_encoded_value(&nan_a, &nan_b, "test").unwrap();
        let nan_c = EncodedValue::Float(f32::from_bits(0x7fc00002));
        assert!(verify_encoded_value(&nan_a, &nan_c, "test").is_err());
    }
}
