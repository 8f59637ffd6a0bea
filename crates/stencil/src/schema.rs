//! The section listings `llvm-readobj --elf-output-style=JSON` prints, per object format.
//!
//! Relocations are matched by shape, any shape not listed here deserializes to `Other` and is
//! rejected by the reader.
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::ReadError;

/// An enumerated field, `{"Value": "SHT_PROGBITS", "RawValue": 1}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Named {
    pub value: String,
    #[serde(default)]
    pub raw_value: u64,
}

impl Named {
    pub fn new(value: impl Into<String>) -> Self {
        Named {
            value: value.into(),
            raw_value: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Flag {
    pub name: String,
    #[serde(default)]
    pub value: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Flags {
    #[serde(default)]
    pub raw_flags: u64,
    pub flags: Vec<Flag>,
}

impl Flags {
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Flags {
            raw_flags: 0,
            flags: names
                .into_iter()
                .map(|name| Flag {
                    name: name.to_string(),
                    value: 0,
                })
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flags.iter().any(|x| x.name == name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SectionData {
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WrappedSection<S> {
    #[serde(rename = "Section")]
    pub section: S,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WrappedRelocation<R> {
    #[serde(rename = "Relocation")]
    pub relocation: R,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WrappedSymbol<S> {
    #[serde(rename = "Symbol")]
    pub symbol: S,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ElfSymbol {
    pub name: Named,
    pub value: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ElfRelocation {
    /// `SHT_RELA` entries.
    #[serde(rename_all = "PascalCase")]
    Explicit {
        offset: u64,
        #[serde(rename = "Type")]
        kind: Named,
        symbol: Named,
        addend: i64,
    },
    /// `SHT_REL` entries, the addend is stored in the patched bytes.
    #[serde(rename_all = "PascalCase")]
    Implicit {
        offset: u64,
        #[serde(rename = "Type")]
        kind: Named,
        symbol: Named,
    },
    Other(serde_json::Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ElfSection {
    pub index: usize,
    pub name: Named,
    #[serde(rename = "Type")]
    pub kind: Named,
    pub flags: Flags,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub info: usize,
    #[serde(default)]
    pub relocations: Vec<WrappedRelocation<ElfRelocation>>,
    #[serde(default)]
    pub symbols: Vec<WrappedSymbol<ElfSymbol>>,
    #[serde(default)]
    pub section_data: Option<SectionData>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CoffSymbol {
    pub name: String,
    pub value: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum CoffRelocation {
    #[serde(rename_all = "PascalCase")]
    Symbol {
        offset: u64,
        #[serde(rename = "Type")]
        kind: Named,
        symbol: String,
    },
    Other(serde_json::Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CoffSection {
    pub number: usize,
    pub name: Named,
    #[serde(default)]
    pub raw_data_size: usize,
    pub characteristics: Flags,
    #[serde(default)]
    pub relocations: Vec<WrappedRelocation<CoffRelocation>>,
    #[serde(default)]
    pub symbols: Vec<WrappedSymbol<CoffSymbol>>,
    #[serde(default)]
    pub section_data: Option<SectionData>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MachOSymbol {
    pub name: Named,
    pub value: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MachORelocation {
    #[serde(rename_all = "PascalCase")]
    Symbol {
        offset: u64,
        #[serde(rename = "Type")]
        kind: Named,
        symbol: Named,
        /// Log2 of the patched width.
        #[serde(default)]
        length: u8,
    },
    #[serde(rename_all = "PascalCase")]
    Section {
        offset: u64,
        #[serde(rename = "Type")]
        kind: Named,
        section: Named,
        #[serde(default)]
        length: u8,
    },
    Other(serde_json::Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MachOSection {
    pub index: usize,
    pub name: Named,
    pub address: u64,
    pub attributes: Flags,
    #[serde(default)]
    pub relocations: Vec<WrappedRelocation<MachORelocation>>,
    #[serde(default)]
    pub symbols: Vec<WrappedSymbol<MachOSymbol>>,
    #[serde(default)]
    pub section_data: Option<SectionData>,
}

/// Cut the section list out of the tool output.
///
/// Mach-O output carries bare `Extern` and `PrivateExtern` lines and COFF output wraps the list
/// in a header object, neither of which is valid JSON.
pub fn normalize(output: &str) -> Result<String, ReadError> {
    let output = output
        .replace("PrivateExtern\n", "\n")
        .replace("Extern\n", "\n");
    let output = output.trim_end();
    let malformed = || ReadError::MalformedOutput("no section list in readobj output".to_string());

    let start = output
        .get(1..)
        .and_then(|x| x.find('['))
        .map(|x| x + 1)
        .ok_or_else(malformed)?;
    let end = output
        .get(..output.len().saturating_sub(1))
        .and_then(|x| x.rfind(']'))
        .filter(|end| *end >= start)
        .ok_or_else(malformed)?;
    Ok(output[start..=end].to_string())
}

/// Parse the output of `llvm-readobj` into its sections.
pub fn parse_sections<S: DeserializeOwned>(output: &str) -> Result<Vec<S>, ReadError> {
    let json = normalize(output)?;
    let sections: Vec<WrappedSection<S>> = serde_json::from_str(&json)?;
    Ok(sections.into_iter().map(|x| x.section).collect())
}
