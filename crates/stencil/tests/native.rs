use hashbrown::HashMap;
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SymbolFlags, SymbolKind, SymbolScope,
    elf,
    write::{Object, Relocation, StandardSection, Symbol, SymbolId, SymbolSection},
};
use copatch_stencil::{
    HoleKind, HoleValue, ObjectFormat,
    reader::native::sections_from_bytes,
    schema::{ElfSection, WrappedSection},
    writer::write_header,
};

fn undefined(obj: &mut Object<'_>, name: &str) -> SymbolId {
    obj.add_symbol(Symbol {
        name: name.as_bytes().to_vec(),
        value: 0,
        size: 0,
        kind: SymbolKind::Unknown,
        scope: SymbolScope::Dynamic,
        weak: false,
        section: SymbolSection::Undefined,
        flags: SymbolFlags::None,
    })
}

fn relocate(obj: &mut Object<'_>, offset: u64, symbol: SymbolId, addend: i64, r_type: u32) {
    let text = obj.section_id(StandardSection::Text);
    obj.add_relocation(text, Relocation {
        offset,
        symbol,
        addend,
        flags: RelocationFlags::Elf { r_type },
    })
    .unwrap();
}

/// `movabs $oparg, %rax; movabs $str, %rdi; jmp continue`.
fn template() -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    let rodata = obj.section_id(StandardSection::ReadOnlyData);

    let mut code = vec![0x48, 0xb8];
    code.extend([0; 8]);
    code.extend([0x48, 0xbf]);
    code.extend([0; 8]);
    code.extend([0xe9, 0, 0, 0, 0]);
    obj.append_section_data(text, &code, 16);
    obj.append_section_data(rodata, b"hello\0", 1);

    obj.add_symbol(Symbol {
        name: b"_JIT_ENTRY".to_vec(),
        value: 0,
        size: code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });
    let oparg = undefined(&mut obj, "_JIT_OPARG");
    let next = undefined(&mut obj, "_JIT_CONTINUE");
    let string = obj.section_symbol(rodata);

    relocate(&mut obj, 2, oparg, 0, elf::R_X86_64_64);
    relocate(&mut obj, 12, string, 1, elf::R_X86_64_64);
    relocate(&mut obj, 21, next, -4, elf::R_X86_64_PLT32);
    obj.write().unwrap()
}

#[test]
fn native_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("_LOAD_STRING.o");
    std::fs::write(&path, template()).unwrap();

    let mut group = ObjectFormat::Elf.read_object("", &path).unwrap();
    group.process_relocations(1).unwrap();

    assert_eq!(group.code.body.len(), 25);
    assert_eq!(group.data.body, b"hello\0\0\0");
    let holes: Vec<_> = group
        .code
        .holes
        .iter()
        .map(|x| (x.offset, x.kind, x.value, x.symbol.as_deref(), x.addend))
        .collect();
    assert_eq!(
        holes,
        [
            (2, HoleKind::R_X86_64_64, HoleValue::Oparg, None, 0),
            (12, HoleKind::R_X86_64_64, HoleValue::Data, None, 1),
            (21, HoleKind::R_X86_64_PLT32, HoleValue::Continue, None, -4),
        ]
    );
    assert!(group.global_offset_table.is_empty());

    let mut groups = HashMap::new();
    groups.insert("_LOAD_STRING".to_string(), group);
    let header = write_header(&groups);
    assert!(header.contains("    {0xc, HoleKind_R_X86_64_64, HoleValue_DATA, NULL, 0x1},\n"));
    assert!(header.contains("static const unsigned char _LOAD_STRING_data_body[9] = {\n"));
}

#[test]
fn agrees_with_readobj_listing() {
    let sections = sections_from_bytes(&template()).unwrap();
    let wrapped: Vec<_> = sections
        .iter()
        .cloned()
        .map(|section| WrappedSection { section })
        .collect();
    let output = format!(
        "[\n  {{\"FileSummary\": {{}}, \"Sections\": {}}}\n]\n",
        serde_json::to_string_pretty(&wrapped).unwrap()
    );

    let listed = copatch_stencil::schema::parse_sections::<ElfSection>(&output).unwrap();
    assert_eq!(listed, sections);

    let mut native = copatch_stencil::read_group(&copatch_stencil::Elf::new(""), sections).unwrap();
    let mut readobj = ObjectFormat::Elf.read_readobj("", &output).unwrap();
    native.process_relocations(1).unwrap();
    readobj.process_relocations(1).unwrap();
    assert_eq!(native, readobj);
}
