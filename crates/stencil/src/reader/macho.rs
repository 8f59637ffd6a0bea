use crate::{
    ReadError,
    hole::{Hole, HoleKind},
    reader::{Format, GroupBuilder, parse_kind, read_addend, strip_prefix},
    schema::{MachORelocation, MachOSection},
};

pub struct MachO {
    prefix: String,
}

impl MachO {
    pub fn new(prefix: &str) -> Self {
        MachO {
            prefix: prefix.to_string(),
        }
    }
}

impl Format for MachO {
    type Section = MachOSection;
    type Relocation = MachORelocation;

    fn handle_section(
        &self,
        section: MachOSection,
        builder: &mut GroupBuilder<MachORelocation>,
    ) -> Result<(), ReadError> {
        let name = strip_prefix(&self.prefix, &section.name.value).to_string();
        tracing::trace!(section.index, %name, section.address, "mach-o section");
        let group = &mut builder.group;
        let address = section.address as usize;
        let used = group.code.body.len() + group.data.body.len();
        if address < used {
            return Err(ReadError::MalformedOutput(format!(
                "section `{name}` at {address:#x} overlaps the previous sections"
            )));
        }
        let data = section
            .section_data
            .ok_or_else(|| ReadError::MissingSectionData(name.clone()))?;

        // Data addresses follow the code in the object file.
        let code_size = group.code.body.len();
        let (stencil, bias) = if section.attributes.contains("SomeInstructions") {
            (&mut group.code, 0)
        } else {
            (&mut group.data, code_size)
        };
        let base = address - bias;
        stencil.sections.insert(section.index, base);
        stencil.symbols.insert(name, base);
        stencil.body.resize(stencil.body.len() + address - used, 0);
        stencil.body.extend(data.bytes);

        for symbol in section.symbols {
            let symbol = symbol.symbol;
            let name = strip_prefix(&self.prefix, &symbol.name.value);
            let offset = (symbol.value as usize).checked_sub(bias).ok_or_else(|| {
                ReadError::MalformedOutput(format!("symbol `{name}` precedes its section"))
            })?;
            stencil.symbols.insert(name.to_string(), offset);
        }
        builder.relocate(
            section.index,
            section.relocations.into_iter().map(|x| x.relocation),
        );
        Ok(())
    }

    fn handle_relocation(
        &self,
        base: usize,
        relocation: MachORelocation,
        raw: &[u8],
    ) -> Result<Hole, ReadError> {
        let (offset, kind, target, length, is_symbol) = match relocation {
            MachORelocation::Symbol {
                offset,
                kind,
                symbol,
                length,
            } => (offset, kind, symbol, length, true),
            MachORelocation::Section {
                offset,
                kind,
                section,
                length,
            } => (offset, kind, section, length, false),
            MachORelocation::Other(x) => {
                return Err(ReadError::UnsupportedRelocation(x.to_string()));
            }
        };
        let offset = base + offset as usize;
        let kind = parse_kind(&kind.value)?;
        let name = strip_prefix(&self.prefix, &target.value);

        if kind.is_got() {
            if !is_symbol {
                return Err(ReadError::UnsupportedRelocation(format!(
                    "`{kind}` against section `{name}`"
                )));
            }
            return Ok(Hole::got(offset, kind, name, 0));
        }

        let addend = match kind {
            HoleKind::X86_64_RELOC_UNSIGNED
            | HoleKind::X86_64_RELOC_SIGNED
            | HoleKind::ARM64_RELOC_UNSIGNED
                if is_symbol =>
            {
                let width = if length == 3 { 8 } else { 4 };
                read_addend(raw, offset, width, true)?
            }
            _ => 0,
        };
        let mut hole = Hole::new(offset, kind, name, addend);
        // Clang emits calls to `__bzero`, which isn't exported.
        if hole.symbol.as_deref() == Some("__bzero") {
            hole.symbol = Some("bzero".to_string());
        }
        Ok(hole)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        HoleValue,
        reader::read_group,
        schema::{Flags, MachOSymbol, Named, SectionData, WrappedRelocation, WrappedSymbol},
    };

    fn section(index: usize, name: &str, address: u64, code: bool, bytes: Vec<u8>) -> MachOSection {
        let flags: &[&str] = if code { &["SomeInstructions"] } else { &[] };
        MachOSection {
            index,
            name: Named::new(name),
            address,
            attributes: Flags::from_names(flags.iter().copied()),
            relocations: Vec::new(),
            symbols: Vec::new(),
            section_data: Some(SectionData { bytes }),
        }
    }

    fn symbol(name: &str, value: u64) -> WrappedSymbol<MachOSymbol> {
        WrappedSymbol {
            symbol: MachOSymbol {
                name: Named::new(name),
                value,
            },
        }
    }

    fn relocation(offset: u64, kind: &str, symbol: &str, length: u8) -> WrappedRelocation<MachORelocation> {
        WrappedRelocation {
            relocation: MachORelocation::Symbol {
                offset,
                kind: Named::new(kind),
                symbol: Named::new(symbol),
                length,
            },
        }
    }

    #[test]
    fn sections_and_relocations() {
        let mut text = section(1, "__text", 0, true, vec![0; 12]);
        text.symbols = vec![symbol("__JIT_ENTRY", 0)];
        text.relocations = vec![
            relocation(0, "ARM64_RELOC_BRANCH26", "___bzero", 2),
            relocation(4, "ARM64_RELOC_GOT_LOAD_PAGE21", "_PyLong_Type", 2),
            WrappedRelocation {
                relocation: MachORelocation::Section {
                    offset: 8,
                    kind: Named::new("ARM64_RELOC_PAGEOFF12"),
                    section: Named::new("__cstring"),
                    length: 2,
                },
            },
        ];
        let mut cstring = section(2, "__cstring", 16, false, b"hi\0".to_vec());
        cstring.symbols = vec![symbol("l_.str", 17)];
        let mut consts = section(3, "__const", 24, false, Vec::new());
        consts.section_data = Some(SectionData {
            bytes: 0x10u64.to_le_bytes().to_vec(),
        });
        consts.relocations = vec![relocation(0, "ARM64_RELOC_UNSIGNED", "_PyFloat_Type", 3)];

        let group = read_group(&MachO::new("_"), vec![text, cstring, consts]).unwrap();
        // Gaps between sections are zero filled.
        assert_eq!(group.code.body.len(), 12);
        assert_eq!(group.data.body[..8], [0, 0, 0, 0, b'h', b'i', 0, 0]);
        assert_eq!(group.data.symbols["_cstring"], 4);
        assert_eq!(group.data.symbols["l_.str"], 5);
        assert_eq!(group.data.sections[&3], 12);

        let holes: Vec<_> = group
            .code
            .holes
            .iter()
            .map(|x| (x.offset, x.value, x.symbol.as_deref(), x.addend))
            .collect();
        assert_eq!(
            holes,
            [
                (0, HoleValue::Zero, Some("bzero"), 0),
                (4, HoleValue::Got, Some("PyLong_Type"), 0),
                (8, HoleValue::Zero, Some("_cstring"), 0),
            ]
        );
        let hole = &group.data.holes[0];
        assert_eq!((hole.offset, hole.addend), (12, 0x10));
    }

    #[test]
    fn overlapping_sections() {
        let text = section(1, "__text", 0, true, vec![0; 8]);
        let data = section(2, "__data", 4, false, vec![0; 8]);
        assert!(matches!(
            read_group(&MachO::new("_"), vec![text, data]),
            Err(ReadError::MalformedOutput(_))
        ));
    }
}
