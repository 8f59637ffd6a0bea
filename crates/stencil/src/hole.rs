use std::fmt;

macro_rules! hole_kinds {
    ($($kind:ident,)*) => {
        /// Relocation kinds the object readers accept, named as the toolchain spells them.
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum HoleKind {
            $($kind,)*
        }

        impl HoleKind {
            pub const ALL: &'static [HoleKind] = &[$(HoleKind::$kind,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(HoleKind::$kind => stringify!($kind),)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($kind) => Some(HoleKind::$kind),)*
                    _ => None,
                }
            }
        }
    };
}

hole_kinds! {
    ARM64_RELOC_BRANCH26,
    ARM64_RELOC_GOT_LOAD_PAGE21,
    ARM64_RELOC_GOT_LOAD_PAGEOFF12,
    ARM64_RELOC_PAGE21,
    ARM64_RELOC_PAGEOFF12,
    ARM64_RELOC_UNSIGNED,
    IMAGE_REL_AMD64_ADDR64,
    IMAGE_REL_AMD64_REL32,
    IMAGE_REL_I386_DIR32,
    IMAGE_REL_I386_REL32,
    R_386_32,
    R_386_PC32,
    R_AARCH64_ABS64,
    R_AARCH64_ADD_ABS_LO12_NC,
    R_AARCH64_ADR_GOT_PAGE,
    R_AARCH64_ADR_PREL_PG_HI21,
    R_AARCH64_CALL26,
    R_AARCH64_JUMP26,
    R_AARCH64_LD64_GOT_LO12_NC,
    R_AARCH64_LDST16_ABS_LO12_NC,
    R_AARCH64_LDST32_ABS_LO12_NC,
    R_AARCH64_LDST64_ABS_LO12_NC,
    R_AARCH64_LDST8_ABS_LO12_NC,
    R_AARCH64_MOVW_UABS_G0_NC,
    R_AARCH64_MOVW_UABS_G1_NC,
    R_AARCH64_MOVW_UABS_G2_NC,
    R_AARCH64_MOVW_UABS_G3,
    R_X86_64_32,
    R_X86_64_32S,
    R_X86_64_64,
    R_X86_64_GOTOFF64,
    R_X86_64_GOTPCREL,
    R_X86_64_GOTPCRELX,
    R_X86_64_PC32,
    R_X86_64_PLT32,
    R_X86_64_REX_GOTPCRELX,
    X86_64_RELOC_BRANCH,
    X86_64_RELOC_GOT,
    X86_64_RELOC_GOT_LOAD,
    X86_64_RELOC_SIGNED,
    X86_64_RELOC_UNSIGNED,
}

impl HoleKind {
    /// Kinds which load the address of their symbol from a global offset table slot.
    pub fn is_got(self) -> bool {
        matches!(
            self,
            HoleKind::ARM64_RELOC_GOT_LOAD_PAGE21
                | HoleKind::ARM64_RELOC_GOT_LOAD_PAGEOFF12
                | HoleKind::R_AARCH64_ADR_GOT_PAGE
                | HoleKind::R_AARCH64_LD64_GOT_LO12_NC
                | HoleKind::R_X86_64_GOTPCREL
                | HoleKind::R_X86_64_GOTPCRELX
                | HoleKind::R_X86_64_REX_GOTPCRELX
                | HoleKind::X86_64_RELOC_GOT
                | HoleKind::X86_64_RELOC_GOT_LOAD
        )
    }

    /// 26 bit branches, which can't reach an arbitrary symbol.
    pub fn is_short_branch(self) -> bool {
        matches!(
            self,
            HoleKind::R_AARCH64_CALL26 | HoleKind::R_AARCH64_JUMP26 | HoleKind::ARM64_RELOC_BRANCH26
        )
    }
}

impl fmt::Display for HoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The value a hole is patched relative to at run time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HoleValue {
    /// Start of the copied code.
    Code,
    /// The code following this stencil.
    Continue,
    /// Start of the copied data.
    Data,
    Executor,
    /// The global offset table, rewritten to `Data` once slots are assigned.
    Got,
    Oparg,
    Operand,
    Target,
    JumpTarget,
    ErrorTarget,
    ExitIndex,
    Top,
    /// Only the symbol and addend.
    Zero,
}

impl HoleValue {
    pub const ALL: &'static [HoleValue] = &[
        HoleValue::Code,
        HoleValue::Continue,
        HoleValue::Data,
        HoleValue::Executor,
        HoleValue::Got,
        HoleValue::Oparg,
        HoleValue::Operand,
        HoleValue::Target,
        HoleValue::JumpTarget,
        HoleValue::ErrorTarget,
        HoleValue::ExitIndex,
        HoleValue::Top,
        HoleValue::Zero,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HoleValue::Code => "CODE",
            HoleValue::Continue => "CONTINUE",
            HoleValue::Data => "DATA",
            HoleValue::Executor => "EXECUTOR",
            HoleValue::Got => "GOT",
            HoleValue::Oparg => "OPARG",
            HoleValue::Operand => "OPERAND",
            HoleValue::Target => "TARGET",
            HoleValue::JumpTarget => "JUMP_TARGET",
            HoleValue::ErrorTarget => "ERROR_TARGET",
            HoleValue::ExitIndex => "EXIT_INDEX",
            HoleValue::Top => "TOP",
            HoleValue::Zero => "ZERO",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        HoleValue::ALL.iter().copied().find(|x| x.name() == name)
    }
}

impl fmt::Display for HoleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Symbols spelled `_JIT_<VALUE>` are placeholders for a value, everything else is a symbol to
/// patch in.
pub fn symbol_to_value(symbol: &str) -> (HoleValue, Option<String>) {
    match symbol.strip_prefix("_JIT_").and_then(HoleValue::from_name) {
        Some(value) => (value, None),
        None => (HoleValue::Zero, Some(symbol.to_string())),
    }
}

/// A location in a stencil body to patch with `value + symbol + addend`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hole {
    pub offset: usize,
    pub kind: HoleKind,
    pub value: HoleValue,
    pub symbol: Option<String>,
    pub addend: i64,
}

impl Hole {
    pub fn new(offset: usize, kind: HoleKind, symbol: &str, addend: i64) -> Self {
        let (value, symbol) = symbol_to_value(symbol);
        Hole {
            offset,
            kind,
            value,
            symbol,
            addend,
        }
    }

    /// A hole loading `symbol` through the global offset table.
    pub fn got(offset: usize, kind: HoleKind, symbol: &str, addend: i64) -> Self {
        Hole {
            offset,
            kind,
            value: HoleValue::Got,
            symbol: Some(symbol.to_string()),
            addend,
        }
    }
}
