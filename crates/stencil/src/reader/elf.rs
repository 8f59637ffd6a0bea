use crate::{
    ReadError,
    hole::Hole,
    reader::{Format, GroupBuilder, parse_kind, read_addend, strip_prefix},
    schema::{ElfRelocation, ElfSection},
};

/// Sections which never end up in a stencil.
const IGNORED: &[&str] = &[
    "SHT_GROUP",
    "SHT_LLVM_ADDRSIG",
    "SHT_NULL",
    "SHT_STRTAB",
    "SHT_SYMTAB",
    "SHT_X86_64_UNWIND",
];

pub struct Elf {
    prefix: String,
}

impl Elf {
    pub fn new(prefix: &str) -> Self {
        Elf {
            prefix: prefix.to_string(),
        }
    }
}

impl Format for Elf {
    type Section = ElfSection;
    type Relocation = ElfRelocation;

    fn handle_section(
        &self,
        section: ElfSection,
        builder: &mut GroupBuilder<ElfRelocation>,
    ) -> Result<(), ReadError> {
        let name = section.name.value;
        let kind = section.kind.value;
        let flags = section.flags;
        tracing::trace!(section.index, %name, %kind, "elf section");

        match kind.as_str() {
            "SHT_RELA" | "SHT_REL" => {
                if !flags.contains("SHF_INFO_LINK") || !section.symbols.is_empty() {
                    return Err(ReadError::InvalidRelocationSection(name));
                }
                builder.relocate(
                    section.info,
                    section.relocations.into_iter().map(|x| x.relocation),
                );
            }
            "SHT_PROGBITS" | "SHT_NOBITS" if flags.contains("SHF_ALLOC") => {
                let bytes = if kind == "SHT_NOBITS" {
                    vec![0; section.size as usize]
                } else {
                    section
                        .section_data
                        .ok_or_else(|| ReadError::MissingSectionData(name.clone()))?
                        .bytes
                };
                let stencil = if flags.contains("SHF_EXECINSTR") {
                    &mut builder.group.code
                } else {
                    &mut builder.group.data
                };
                let base = stencil.body.len();
                stencil.sections.insert(section.index, base);
                for symbol in section.symbols {
                    let symbol = symbol.symbol;
                    let name = strip_prefix(&self.prefix, &symbol.name.value);
                    stencil.define(name, base + symbol.value as usize)?;
                }
                stencil.body.extend(bytes);
            }
            "SHT_PROGBITS" => builder.ignore(section.index),
            x if IGNORED.contains(&x) => builder.ignore(section.index),
            _ => return Err(ReadError::UnexpectedSection { name, kind }),
        }
        Ok(())
    }

    fn handle_relocation(
        &self,
        base: usize,
        relocation: ElfRelocation,
        raw: &[u8],
    ) -> Result<Hole, ReadError> {
        let (offset, kind, symbol, addend) = match relocation {
            ElfRelocation::Explicit {
                offset,
                kind,
                symbol,
                addend,
            } => (offset, kind, symbol, Some(addend)),
            ElfRelocation::Implicit {
                offset,
                kind,
                symbol,
            } => (offset, kind, symbol, None),
            ElfRelocation::Other(x) => return Err(ReadError::UnsupportedRelocation(x.to_string())),
        };
        let offset = base + offset as usize;
        let kind = parse_kind(&kind.value)?;
        let addend = match addend {
            Some(x) => x,
            None => read_addend(raw, offset, 4, true)?,
        };
        let symbol = strip_prefix(&self.prefix, &symbol.value);
        if kind.is_got() {
            Ok(Hole::got(offset, kind, symbol, addend))
        } else {
            Ok(Hole::new(offset, kind, symbol, addend))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        HoleKind, HoleValue,
        reader::read_group,
        schema::{Flags, Named, SectionData, WrappedRelocation, WrappedSymbol, ElfSymbol},
    };

    fn section(index: usize, name: &str, kind: &str, flags: &[&str]) -> ElfSection {
        ElfSection {
            index,
            name: Named::new(name),
            kind: Named::new(kind),
            flags: Flags::from_names(flags.iter().copied()),
            size: 0,
            info: 0,
            relocations: Vec::new(),
            symbols: Vec::new(),
            section_data: None,
        }
    }

    fn symbol(name: &str, value: u64) -> WrappedSymbol<ElfSymbol> {
        WrappedSymbol {
            symbol: ElfSymbol {
                name: Named::new(name),
                value,
            },
        }
    }

    fn rela(offset: u64, kind: &str, symbol: &str, addend: Option<i64>) -> WrappedRelocation<ElfRelocation> {
        let (kind, symbol) = (Named::new(kind), Named::new(symbol));
        WrappedRelocation {
            relocation: match addend {
                Some(addend) => ElfRelocation::Explicit {
                    offset,
                    kind,
                    symbol,
                    addend,
                },
                None => ElfRelocation::Implicit {
                    offset,
                    kind,
                    symbol,
                },
            },
        }
    }

    fn text(bytes: Vec<u8>) -> ElfSection {
        let mut text = section(2, ".text", "SHT_PROGBITS", &["SHF_ALLOC", "SHF_EXECINSTR"]);
        text.symbols = vec![symbol("_JIT_ENTRY", 0)];
        text.section_data = Some(SectionData { bytes });
        text
    }

    #[test]
    fn relocations_before_their_section() {
        let mut relocations = section(1, ".rela.text", "SHT_RELA", &["SHF_INFO_LINK"]);
        relocations.info = 2;
        relocations.relocations = vec![
            rela(2, "R_X86_64_64", "_JIT_OPARG", Some(0)),
            rela(8, "R_X86_64_REX_GOTPCRELX", "PyLong_Type", Some(-4)),
            rela(12, "R_X86_64_PLT32", ".rodata", Some(-4)),
        ];
        let mut rodata = section(3, ".rodata", "SHT_PROGBITS", &["SHF_ALLOC"]);
        rodata.symbols = vec![symbol(".rodata", 0)];
        rodata.section_data = Some(SectionData { bytes: b"abc".to_vec() });
        let notes = section(4, ".note.GNU-stack", "SHT_PROGBITS", &[]);
        let mut bss = section(5, ".bss", "SHT_NOBITS", &["SHF_ALLOC", "SHF_WRITE"]);
        bss.size = 5;

        let sections = vec![relocations, text(vec![0; 16]), rodata, notes, bss];
        let group = read_group(&Elf::new(""), sections).unwrap();

        assert_eq!(group.data.body, b"abc\0\0\0\0\0");
        assert_eq!(group.data.sections[&5], 3);
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
                (8, HoleKind::R_X86_64_REX_GOTPCRELX, HoleValue::Got, Some("PyLong_Type"), -4),
                (12, HoleKind::R_X86_64_PLT32, HoleValue::Zero, Some(".rodata"), -4),
            ]
        );
        assert_eq!(group.data.disassembly, ["0: 'abc\\x00\\x00\\x00\\x00\\x00'"]);
    }

    #[test]
    fn implicit_addends() {
        let mut relocations = section(1, ".rel.text", "SHT_REL", &["SHF_INFO_LINK"]);
        relocations.info = 2;
        relocations.relocations = vec![rela(4, "R_386_PC32", "f", None)];
        let group = read_group(&Elf::new(""), vec![
            text(vec![0, 0, 0, 0, 0xfc, 0xff, 0xff, 0xff]),
            relocations,
        ])
        .unwrap();
        assert_eq!(group.code.holes[0].addend, -4);
    }

    #[test]
    fn rejected_sections() {
        let notes = section(3, ".note", "SHT_NOTE", &["SHF_ALLOC"]);
        assert!(matches!(
            read_group(&Elf::new(""), vec![text(vec![0]), notes]),
            Err(ReadError::UnexpectedSection { kind, .. }) if kind == "SHT_NOTE"
        ));

        let relocations = section(3, ".rela.text", "SHT_RELA", &[]);
        assert!(matches!(
            read_group(&Elf::new(""), vec![text(vec![0]), relocations]),
            Err(ReadError::InvalidRelocationSection(_))
        ));

        let mut relocations = section(3, ".rela.text", "SHT_RELA", &["SHF_INFO_LINK"]);
        relocations.info = 9;
        relocations.relocations = vec![rela(0, "R_X86_64_64", "f", Some(0))];
        assert!(matches!(
            read_group(&Elf::new(""), vec![text(vec![0]), relocations]),
            Err(ReadError::UnknownSection(9))
        ));

        let mut relocations = section(3, ".rela.text", "SHT_RELA", &["SHF_INFO_LINK"]);
        relocations.info = 2;
        relocations.relocations = vec![rela(0, "R_X86_64_TLSGD", "f", Some(0))];
        assert!(matches!(
            read_group(&Elf::new(""), vec![text(vec![0]), relocations]),
            Err(ReadError::UnsupportedRelocation(_))
        ));
    }

    #[test]
    fn entry_and_symbols() {
        let mut code = text(vec![0; 8]);
        code.symbols = vec![symbol("_JIT_ENTRY", 4)];
        assert!(matches!(
            read_group(&Elf::new(""), vec![code]),
            Err(ReadError::BadEntry(_))
        ));

        let mut code = text(vec![0; 8]);
        code.symbols.push(symbol("_JIT_ENTRY", 4));
        assert!(matches!(
            read_group(&Elf::new(""), vec![code]),
            Err(ReadError::DuplicateSymbol(x)) if x == "_JIT_ENTRY"
        ));
    }
}
