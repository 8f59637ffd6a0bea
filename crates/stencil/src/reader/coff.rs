use crate::{
    ReadError,
    hole::{Hole, HoleKind},
    reader::{Format, GroupBuilder, parse_kind, read_addend, strip_prefix},
    schema::{CoffRelocation, CoffSection},
};

pub struct Coff {
    prefix: String,
}

impl Coff {
    pub fn new(prefix: &str) -> Self {
        Coff {
            prefix: prefix.to_string(),
        }
    }
}

impl Format for Coff {
    type Section = CoffSection;
    type Relocation = CoffRelocation;

    fn handle_section(
        &self,
        section: CoffSection,
        builder: &mut GroupBuilder<CoffRelocation>,
    ) -> Result<(), ReadError> {
        let flags = &section.characteristics;
        tracing::trace!(section.number, name = %section.name.value, "coff section");
        let stencil = if flags.contains("IMAGE_SCN_MEM_EXECUTE") {
            &mut builder.group.code
        } else if flags.contains("IMAGE_SCN_MEM_READ") {
            &mut builder.group.data
        } else {
            builder.ignore(section.number);
            return Ok(());
        };

        // Zeroed data without contents in the file.
        let bytes = match section.section_data {
            Some(data) => data.bytes,
            None => vec![0; section.raw_data_size],
        };
        let base = stencil.body.len();
        stencil.sections.insert(section.number, base);
        stencil.body.extend(bytes);
        for symbol in section.symbols {
            let name = strip_prefix(&self.prefix, &symbol.symbol.name);
            stencil
                .symbols
                .insert(name.to_string(), base + symbol.symbol.value as usize);
        }
        builder.relocate(
            section.number,
            section.relocations.into_iter().map(|x| x.relocation),
        );
        Ok(())
    }

    fn handle_relocation(
        &self,
        base: usize,
        relocation: CoffRelocation,
        raw: &[u8],
    ) -> Result<Hole, ReadError> {
        let (offset, kind, symbol) = match relocation {
            CoffRelocation::Symbol {
                offset,
                kind,
                symbol,
            } => (offset, kind, symbol),
            CoffRelocation::Other(x) => return Err(ReadError::UnsupportedRelocation(x.to_string())),
        };
        let offset = base + offset as usize;
        let kind = parse_kind(&kind.value)?;
        let addend = match kind {
            HoleKind::IMAGE_REL_AMD64_ADDR64 => read_addend(raw, offset, 8, false)?,
            HoleKind::IMAGE_REL_I386_DIR32 => read_addend(raw, offset, 4, false)?,
            HoleKind::IMAGE_REL_AMD64_REL32 | HoleKind::IMAGE_REL_I386_REL32 => {
                read_addend(raw, offset, 4, true)?
            }
            _ => return Err(ReadError::UnsupportedRelocation(format!("of kind `{kind}`"))),
        };
        let symbol = strip_prefix(&self.prefix, &symbol);
        Ok(Hole::new(offset, kind, symbol, addend))
    }
}
