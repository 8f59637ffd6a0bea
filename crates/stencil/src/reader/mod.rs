//! Turning the sections of a compiled template into a [`StencilGroup`].
use std::path::Path;

use hashbrown::HashSet;
use serde::de::DeserializeOwned;

use crate::{
    ReadError,
    hole::{Hole, HoleKind},
    schema,
    stencil::StencilGroup,
};

mod coff;
mod elf;
mod macho;
pub mod native;

pub use coff::Coff;
pub use elf::Elf;
pub use macho::MachO;

/// An object file format as listed by `llvm-readobj`.
pub trait Format {
    type Section: DeserializeOwned;
    type Relocation;

    /// Copy a section into the group, queueing its relocations.
    fn handle_section(
        &self,
        section: Self::Section,
        builder: &mut GroupBuilder<Self::Relocation>,
    ) -> Result<(), ReadError>;

    /// Turn a relocation into a hole, `base` is the offset of its section in the stencil and
    /// `raw` the stencil body for formats storing addends in place.
    fn handle_relocation(
        &self,
        base: usize,
        relocation: Self::Relocation,
        raw: &[u8],
    ) -> Result<Hole, ReadError>;
}

/// A group under construction.
pub struct GroupBuilder<R> {
    pub group: StencilGroup,
    pending: Vec<(usize, R)>,
    ignored: HashSet<usize>,
}

impl<R> Default for GroupBuilder<R> {
    fn default() -> Self {
        GroupBuilder {
            group: StencilGroup::default(),
            pending: Vec::new(),
            ignored: HashSet::new(),
        }
    }
}

impl<R> GroupBuilder<R> {
    /// Queue relocations applying to the section with the given index.
    ///
    /// They are resolved once every section is read as the section might come later.
    pub fn relocate(&mut self, section: usize, relocations: impl IntoIterator<Item = R>) {
        self.pending
            .extend(relocations.into_iter().map(|relocation| (section, relocation)));
    }

    /// Mark a section as not copied, relocations applying to it are dropped.
    pub fn ignore(&mut self, section: usize) {
        self.ignored.insert(section);
    }

    fn finish<F>(self, format: &F) -> Result<StencilGroup, ReadError>
    where
        F: Format<Relocation = R> + ?Sized,
    {
        let GroupBuilder {
            mut group,
            pending,
            ignored,
        } = self;

        for (section, relocation) in pending {
            let (stencil, base) = if let Some(base) = group.code.sections.get(&section) {
                let base = *base;
                (&mut group.code, base)
            } else if let Some(base) = group.data.sections.get(&section) {
                let base = *base;
                (&mut group.data, base)
            } else if ignored.contains(&section) {
                tracing::trace!(section, "dropping relocation of ignored section");
                continue;
            } else {
                return Err(ReadError::UnknownSection(section));
            };
            let hole = format.handle_relocation(base, relocation, &stencil.body)?;
            stencil.holes.push(hole);
        }

        match ["_JIT_ENTRY", "_JIT_TRAMPOLINE"]
            .iter()
            .find_map(|name| group.code.symbols.get(*name).map(|x| (name, *x)))
        {
            Some((_, 0)) => {}
            Some((name, offset)) => {
                return Err(ReadError::BadEntry(format!("`{name}` at {offset:#x}")));
            }
            None => return Err(ReadError::BadEntry("no `_JIT_ENTRY` symbol".to_string())),
        }

        if !group.data.body.is_empty() {
            let line = format!("0: '{}'", group.data.body.escape_ascii());
            group.data.disassembly.push(line);
        }
        Ok(group)
    }
}

/// Build the group from already parsed sections.
pub fn read_group<F: Format + ?Sized>(
    format: &F,
    sections: Vec<F::Section>,
) -> Result<StencilGroup, ReadError> {
    let mut builder = GroupBuilder::default();
    for section in sections {
        format.handle_section(section, &mut builder)?;
    }
    builder.finish(format)
}

/// Build the group from the JSON output of `llvm-readobj`.
pub fn read_readobj<F: Format + ?Sized>(
    format: &F,
    output: &str,
) -> Result<StencilGroup, ReadError> {
    let sections = schema::parse_sections(output)?;
    read_group(format, sections)
}

/// The object file formats templates are compiled to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    Coff,
    MachO,
}

impl ObjectFormat {
    pub fn read_readobj(self, prefix: &str, output: &str) -> Result<StencilGroup, ReadError> {
        match self {
            ObjectFormat::Elf => read_readobj(&Elf::new(prefix), output),
            ObjectFormat::Coff => read_readobj(&Coff::new(prefix), output),
            ObjectFormat::MachO => read_readobj(&MachO::new(prefix), output),
        }
    }

    /// Read the object file directly, only ELF is supported.
    pub fn read_object(self, prefix: &str, path: &Path) -> Result<StencilGroup, ReadError> {
        match self {
            ObjectFormat::Elf => read_group(&Elf::new(prefix), native::read_sections(path)?),
            ObjectFormat::Coff | ObjectFormat::MachO => Err(ReadError::MalformedOutput(format!(
                "no native reader for {self:?} objects"
            ))),
        }
    }
}

pub(crate) fn strip_prefix<'a>(prefix: &str, name: &'a str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

pub(crate) fn parse_kind(name: &str) -> Result<HoleKind, ReadError> {
    HoleKind::from_name(name)
        .ok_or_else(|| ReadError::UnsupportedRelocation(format!("of kind `{name}`")))
}

/// Read a little-endian addend of `width` bytes stored at `offset`, sign extending it when
/// `signed`.
pub(crate) fn read_addend(
    raw: &[u8],
    offset: usize,
    width: usize,
    signed: bool,
) -> Result<i64, ReadError> {
    let bytes = raw
        .get(offset..offset + width)
        .ok_or(ReadError::HoleOutOfBounds {
            offset,
            size: raw.len(),
        })?;
    let value = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    let addend = match (width, signed) {
        (4, true) => i64::from(value as u32 as i32),
        _ => value as i64,
    };
    Ok(addend)
}
