//! Listing the sections of an ELF object with the `object` crate instead of `llvm-readobj`.
use std::{fs::File, io, path::Path};

use hashbrown::HashMap;
use memmap2::Mmap;
use object::{
    Architecture, Object as _, ObjectSection as _, ObjectSymbol as _, RelocationFlags,
    RelocationTarget, SectionIndex, SymbolIndex, SymbolKind, elf,
    read::elf::{ElfFile64, SectionHeader as _},
};

use crate::{
    ReadError,
    hole::HoleKind,
    schema::{
        ElfRelocation, ElfSection, ElfSymbol, Flags, Named, SectionData, WrappedRelocation,
        WrappedSymbol,
    },
};

const SHT_LLVM_ADDRSIG: u32 = 0x6fff_4c03;
const SHT_X86_64_UNWIND: u32 = 0x7000_0001;

fn section_type(sh_type: u32) -> String {
    let name = match sh_type {
        elf::SHT_NULL => "SHT_NULL",
        elf::SHT_PROGBITS => "SHT_PROGBITS",
        elf::SHT_SYMTAB => "SHT_SYMTAB",
        elf::SHT_STRTAB => "SHT_STRTAB",
        elf::SHT_RELA => "SHT_RELA",
        elf::SHT_NOBITS => "SHT_NOBITS",
        elf::SHT_REL => "SHT_REL",
        elf::SHT_NOTE => "SHT_NOTE",
        elf::SHT_GROUP => "SHT_GROUP",
        SHT_LLVM_ADDRSIG => "SHT_LLVM_ADDRSIG",
        SHT_X86_64_UNWIND => "SHT_X86_64_UNWIND",
        x => return format!("{x:#x}"),
    };
    name.to_string()
}

const SECTION_FLAGS: &[(u32, &str)] = &[
    (elf::SHF_WRITE, "SHF_WRITE"),
    (elf::SHF_ALLOC, "SHF_ALLOC"),
    (elf::SHF_EXECINSTR, "SHF_EXECINSTR"),
    (elf::SHF_MERGE, "SHF_MERGE"),
    (elf::SHF_STRINGS, "SHF_STRINGS"),
    (elf::SHF_INFO_LINK, "SHF_INFO_LINK"),
    (elf::SHF_GROUP, "SHF_GROUP"),
];

fn section_flags(sh_flags: u64) -> Flags {
    let mut flags = Flags::from_names(
        SECTION_FLAGS
            .iter()
            .filter(|(bit, _)| sh_flags & u64::from(*bit) != 0)
            .map(|(_, name)| *name),
    );
    flags.raw_flags = sh_flags;
    flags
}

fn relocation_kind(architecture: Architecture, r_type: u32) -> Option<HoleKind> {
    let kind = match (architecture, r_type) {
        (Architecture::X86_64, elf::R_X86_64_32) => HoleKind::R_X86_64_32,
        (Architecture::X86_64, elf::R_X86_64_32S) => HoleKind::R_X86_64_32S,
        (Architecture::X86_64, elf::R_X86_64_64) => HoleKind::R_X86_64_64,
        (Architecture::X86_64, elf::R_X86_64_GOTOFF64) => HoleKind::R_X86_64_GOTOFF64,
        (Architecture::X86_64, elf::R_X86_64_GOTPCREL) => HoleKind::R_X86_64_GOTPCREL,
        (Architecture::X86_64, elf::R_X86_64_GOTPCRELX) => HoleKind::R_X86_64_GOTPCRELX,
        (Architecture::X86_64, elf::R_X86_64_PC32) => HoleKind::R_X86_64_PC32,
        (Architecture::X86_64, elf::R_X86_64_PLT32) => HoleKind::R_X86_64_PLT32,
        (Architecture::X86_64, elf::R_X86_64_REX_GOTPCRELX) => HoleKind::R_X86_64_REX_GOTPCRELX,
        (Architecture::Aarch64, elf::R_AARCH64_ABS64) => HoleKind::R_AARCH64_ABS64,
        (Architecture::Aarch64, elf::R_AARCH64_ADD_ABS_LO12_NC) => {
            HoleKind::R_AARCH64_ADD_ABS_LO12_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_ADR_GOT_PAGE) => HoleKind::R_AARCH64_ADR_GOT_PAGE,
        (Architecture::Aarch64, elf::R_AARCH64_ADR_PREL_PG_HI21) => {
            HoleKind::R_AARCH64_ADR_PREL_PG_HI21
        }
        (Architecture::Aarch64, elf::R_AARCH64_CALL26) => HoleKind::R_AARCH64_CALL26,
        (Architecture::Aarch64, elf::R_AARCH64_JUMP26) => HoleKind::R_AARCH64_JUMP26,
        (Architecture::Aarch64, elf::R_AARCH64_LD64_GOT_LO12_NC) => {
            HoleKind::R_AARCH64_LD64_GOT_LO12_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_LDST8_ABS_LO12_NC) => {
            HoleKind::R_AARCH64_LDST8_ABS_LO12_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_LDST16_ABS_LO12_NC) => {
            HoleKind::R_AARCH64_LDST16_ABS_LO12_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_LDST32_ABS_LO12_NC) => {
            HoleKind::R_AARCH64_LDST32_ABS_LO12_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_LDST64_ABS_LO12_NC) => {
            HoleKind::R_AARCH64_LDST64_ABS_LO12_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_MOVW_UABS_G0_NC) => {
            HoleKind::R_AARCH64_MOVW_UABS_G0_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_MOVW_UABS_G1_NC) => {
            HoleKind::R_AARCH64_MOVW_UABS_G1_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_MOVW_UABS_G2_NC) => {
            HoleKind::R_AARCH64_MOVW_UABS_G2_NC
        }
        (Architecture::Aarch64, elf::R_AARCH64_MOVW_UABS_G3) => HoleKind::R_AARCH64_MOVW_UABS_G3,
        _ => return None,
    };
    Some(kind)
}

/// List the sections of the ELF object at `path`.
pub fn read_sections(path: &Path) -> Result<Vec<ElfSection>, ReadError> {
    let io_error = |source: io::Error| ReadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    // SAFETY: Object files are written once by the compiler and not modified while mapped.
    let map = unsafe { Mmap::map(&file) }.map_err(io_error)?;
    sections_from_bytes(&map)
}

/// List the sections of an ELF object the way `llvm-readobj` does.
pub fn sections_from_bytes(data: &[u8]) -> Result<Vec<ElfSection>, ReadError> {
    let file = ElfFile64::<object::Endianness>::parse(data)?;
    let endian = file.endian();
    let architecture = file.architecture();

    let mut section_names = HashMap::new();
    for section in file.sections() {
        section_names.insert(section.index().0, section.name()?.to_string());
    }
    let symbol_name = |index: SymbolIndex| -> Result<String, ReadError> {
        let symbol = file.symbol_by_index(index)?;
        if symbol.kind() == SymbolKind::Section {
            let section = symbol.section_index().map(|x| x.0).unwrap_or_default();
            return Ok(section_names.get(&section).cloned().unwrap_or_default());
        }
        Ok(symbol.name()?.to_string())
    };

    let mut symbols: HashMap<usize, Vec<WrappedSymbol<ElfSymbol>>> = HashMap::new();
    for symbol in file.symbols() {
        if symbol.kind() == SymbolKind::File {
            continue;
        }
        let Some(section) = symbol.section_index() else {
            continue;
        };
        symbols.entry(section.0).or_default().push(WrappedSymbol {
            symbol: ElfSymbol {
                name: Named::new(symbol_name(symbol.index())?),
                value: symbol.address(),
            },
        });
    }

    let mut sections = Vec::new();
    for section in file.sections() {
        let header = section.elf_section_header();
        let sh_type = header.sh_type(endian);
        let index = section.index().0;
        let info = header.sh_info(endian) as usize;

        let mut relocations = Vec::new();
        if matches!(sh_type, elf::SHT_RELA | elf::SHT_REL) {
            let target = file.section_by_index(SectionIndex(info))?;
            for (offset, relocation) in target.relocations() {
                let RelocationFlags::Elf { r_type } = relocation.flags() else {
                    continue;
                };
                let kind = match relocation_kind(architecture, r_type) {
                    Some(kind) => Named::new(kind.name()),
                    None => Named::new(format!("{r_type:#x}")),
                };
                let relocation = match relocation.target() {
                    RelocationTarget::Symbol(symbol) if relocation.has_implicit_addend() => {
                        ElfRelocation::Implicit {
                            offset,
                            kind,
                            symbol: Named::new(symbol_name(symbol)?),
                        }
                    }
                    RelocationTarget::Symbol(symbol) => ElfRelocation::Explicit {
                        offset,
                        kind,
                        symbol: Named::new(symbol_name(symbol)?),
                        addend: relocation.addend(),
                    },
                    _ => ElfRelocation::Other(serde_json::json!({
                        "Offset": offset,
                        "Type": kind,
                    })),
                };
                relocations.push(WrappedRelocation { relocation });
            }
        }

        let section_data = match sh_type {
            elf::SHT_NULL | elf::SHT_NOBITS => None,
            _ => Some(SectionData {
                bytes: section.data()?.to_vec(),
            }),
        };

        sections.push(ElfSection {
            index,
            name: Named::new(section.name()?),
            kind: Named::new(section_type(sh_type)),
            flags: section_flags(header.sh_flags(endian)),
            size: section.size(),
            info,
            relocations,
            symbols: symbols.remove(&index).unwrap_or_default(),
            section_data,
        });
    }
    tracing::trace!(sections = sections.len(), "read elf object");
    Ok(sections)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(section_type(elf::SHT_RELA), "SHT_RELA");
        assert_eq!(section_type(SHT_LLVM_ADDRSIG), "SHT_LLVM_ADDRSIG");
        assert_eq!(section_type(0x1234), "0x1234");

        let flags = section_flags(u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR));
        assert!(flags.contains("SHF_ALLOC"));
        assert!(flags.contains("SHF_EXECINSTR"));
        assert!(!flags.contains("SHF_WRITE"));

        assert_eq!(
            relocation_kind(Architecture::Aarch64, elf::R_AARCH64_CALL26),
            Some(HoleKind::R_AARCH64_CALL26)
        );
        assert_eq!(relocation_kind(Architecture::X86_64, elf::R_AARCH64_CALL26), None);
    }
}
