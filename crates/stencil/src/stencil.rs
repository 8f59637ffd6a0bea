//! Stencils and the resolution of their holes.
use hashbrown::HashMap;

use crate::{
    ReadError,
    hole::{Hole, HoleKind, HoleValue, symbol_to_value},
};

/// Copyable code or data with holes to patch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stencil {
    pub body: Vec<u8>,
    pub holes: Vec<Hole>,
    pub disassembly: Vec<String>,
    /// Offsets of the symbols defined in the body.
    pub symbols: HashMap<String, usize>,
    /// Offsets of the object file sections copied into the body, by section index.
    pub sections: HashMap<usize, usize>,
}

/// `movz x8, #0; movk x8, #0, lsl #16; movk x8, #0, lsl #32; movk x8, #0, lsl #48; br x8`.
const AARCH64_TRAMPOLINE: [u32; 5] = [0xD280_0008, 0xF2A0_0008, 0xF2C0_0008, 0xF2E0_0008, 0xD61F_0100];
const AARCH64_TRAMPOLINE_HOLES: [HoleKind; 4] = [
    HoleKind::R_AARCH64_MOVW_UABS_G0_NC,
    HoleKind::R_AARCH64_MOVW_UABS_G1_NC,
    HoleKind::R_AARCH64_MOVW_UABS_G2_NC,
    HoleKind::R_AARCH64_MOVW_UABS_G3,
];

impl Stencil {
    /// Record a symbol defined at `offset`, symbols may only be defined once.
    pub fn define(&mut self, name: &str, offset: usize) -> Result<(), ReadError> {
        if self.symbols.contains_key(name) {
            return Err(ReadError::DuplicateSymbol(name.to_string()));
        }
        self.symbols.insert(name.to_string(), offset);
        Ok(())
    }

    pub fn pad(&mut self, alignment: usize) {
        let offset = self.body.len();
        let padding = offset.next_multiple_of(alignment.max(1)) - offset;
        if padding == 0 {
            return;
        }
        let zeros = vec!["00"; padding].join(" ");
        self.disassembly.push(format!("{offset:x}: {zeros}"));
        self.body.resize(offset + padding, 0);
    }

    /// Point the 26 bit branch at `at` to `target`, which must follow it.
    fn patch_branch(&mut self, at: usize, target: usize) -> Result<(), ReadError> {
        let out_of_bounds = ReadError::HoleOutOfBounds {
            offset: at,
            size: self.body.len(),
        };
        let Some(distance) = target.checked_sub(at) else {
            return Err(out_of_bounds);
        };
        let Some(bytes) = self.body.get_mut(at..at.saturating_add(4)) else {
            return Err(out_of_bounds);
        };
        let mut instruction = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        instruction &= 0xFC00_0000;
        instruction |= ((distance >> 2) & 0x03FF_FFFF) as u32;
        bytes.copy_from_slice(&instruction.to_le_bytes());
        Ok(())
    }

    /// Append a sequence loading the full address of the target of `hole` and jumping to it,
    /// returns the holes of the sequence. The branch at `hole` is redirected to it.
    pub fn emit_aarch64_trampoline(&mut self, hole: &Hole) -> Result<[Hole; 4], ReadError> {
        let base = self.body.len();
        self.patch_branch(hole.offset, base)?;

        let symbol = hole.symbol.as_deref().unwrap_or_default();
        let text = [
            "d2800008      mov     x8, #0x0",
            "f2a00008      movk    x8, #0x0, lsl #16",
            "f2c00008      movk    x8, #0x0, lsl #32",
            "f2e00008      movk    x8, #0x0, lsl #48",
        ];
        for (idx, (line, kind)) in text.iter().zip(AARCH64_TRAMPOLINE_HOLES).enumerate() {
            let at = base + 4 * idx;
            self.disassembly.push(format!("{at:x}: {line}"));
            self.disassembly
                .push(format!("{at:016x}:  {:<28} {symbol}", kind.name()));
        }
        self.disassembly
            .push(format!("{:x}: d61f0100      br      x8", base + 16));
        for code in AARCH64_TRAMPOLINE {
            self.body.extend_from_slice(&code.to_le_bytes());
        }

        Ok(AARCH64_TRAMPOLINE_HOLES.map(|kind| Hole {
            offset: base + 4 * AARCH64_TRAMPOLINE_HOLES.iter().position(|x| *x == kind).unwrap_or(0),
            kind,
            ..hole.clone()
        }))
    }

    fn check_bounds(&self) -> Result<(), ReadError> {
        match self.holes.iter().find(|hole| hole.offset >= self.body.len()) {
            Some(hole) => Err(ReadError::HoleOutOfBounds {
                offset: hole.offset,
                size: self.body.len(),
            }),
            None => Ok(()),
        }
    }
}

/// Symbols accessed through the global offset table, in slot order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalOffsetTable {
    symbols: Vec<String>,
    slots: HashMap<String, usize>,
}

impl GlobalOffsetTable {
    /// The slot of `symbol`, assigning the next one on first use.
    pub fn lookup(&mut self, symbol: &str) -> usize {
        if let Some(slot) = self.slots.get(symbol) {
            return *slot;
        }
        let slot = self.symbols.len();
        self.symbols.push(symbol.to_string());
        self.slots.insert(symbol.to_string(), slot);
        slot
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// The code and data of a single opcode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StencilGroup {
    pub code: Stencil,
    pub data: Stencil,
    pub global_offset_table: GlobalOffsetTable,
}

impl StencilGroup {
    /// Point holes at symbols defined in this group at the code or data instead.
    fn resolve_local(&mut self, in_code: bool) {
        let StencilGroup { code, data, .. } = self;
        let (holes, code_symbols, data_symbols) = if in_code {
            (&mut code.holes, &code.symbols, &data.symbols)
        } else {
            (&mut data.holes, &code.symbols, &data.symbols)
        };
        holes.sort_by_key(|hole| hole.offset);
        for hole in holes.iter_mut() {
            if hole.value == HoleValue::Got {
                continue;
            }
            let Some(symbol) = hole.symbol.as_deref() else {
                continue;
            };
            let (value, offset) = if let Some(offset) = data_symbols.get(symbol) {
                (HoleValue::Data, *offset)
            } else if let Some(offset) = code_symbols.get(symbol) {
                (HoleValue::Code, *offset)
            } else {
                continue;
            };
            hole.value = value;
            hole.symbol = None;
            hole.addend += offset as i64;
        }
    }

    /// Replace 26 bit branches to external symbols with branches to trampolines.
    fn emit_trampolines(&mut self) -> Result<(), ReadError> {
        let holes = std::mem::take(&mut self.code.holes);
        let end = self.code.body.len();
        let mut trampolines: HashMap<(Option<String>, i64), usize> = HashMap::new();
        for hole in holes {
            if !hole.kind.is_short_branch() || hole.value != HoleValue::Zero {
                self.code.holes.push(hole);
                continue;
            }
            // Branches must lie in the compiled code, not in the trampolines after it.
            if hole.offset.saturating_add(4) > end {
                return Err(ReadError::HoleOutOfBounds {
                    offset: hole.offset,
                    size: end,
                });
            }
            let key = (hole.symbol.clone(), hole.addend);
            if let Some(base) = trampolines.get(&key) {
                // Reuse the existing trampoline, only the branch needs patching.
                self.code.patch_branch(hole.offset, *base)?;
                continue;
            }
            trampolines.insert(key, self.code.body.len());
            let holes = self.code.emit_aarch64_trampoline(&hole)?;
            self.code.holes.extend(holes);
        }
        Ok(())
    }

    /// Assign global offset table slots, holes become data relative.
    fn resolve_got(&mut self) {
        let got = self.data.body.len();
        for in_code in [true, false] {
            let stencil = if in_code {
                &mut self.code
            } else {
                &mut self.data
            };
            stencil.holes.sort_by_key(|hole| hole.offset);
            for hole in &mut stencil.holes {
                if hole.value != HoleValue::Got {
                    continue;
                }
                let symbol = hole.symbol.take().unwrap_or_default();
                let slot = self.global_offset_table.lookup(&symbol);
                hole.value = HoleValue::Data;
                hole.addend += (got + 8 * slot) as i64;
            }
        }
    }

    /// Append a slot for every symbol in the global offset table to the data.
    fn emit_global_offset_table(&mut self) {
        let got = self.data.body.len();
        for (slot, symbol) in self.global_offset_table.symbols.iter().enumerate() {
            let offset = got + 8 * slot;
            let (value, symbol, addend) = if let Some(at) = self.data.symbols.get(symbol) {
                (HoleValue::Data, None, *at as i64)
            } else if let Some(at) = self.code.symbols.get(symbol) {
                (HoleValue::Code, None, *at as i64)
            } else {
                let (value, symbol) = symbol_to_value(symbol);
                (value, symbol, 0)
            };

            let mut line = String::new();
            if value != HoleValue::Zero {
                line.push_str(value.name());
            }
            if let Some(symbol) = &symbol {
                if !line.is_empty() {
                    line.push('+');
                }
                line.push('&');
                line.push_str(symbol);
            }
            if addend != 0 {
                line.push_str(&format_addend(addend));
            }
            self.data.disassembly.push(format!("{offset:x}: {line}"));

            self.data.holes.push(Hole {
                offset,
                kind: HoleKind::R_X86_64_64,
                value,
                symbol,
                addend,
            });
        }
        let len = got + 8 * self.global_offset_table.len();
        self.data.body.resize(len, 0);
    }

    /// Resolve every hole read from the object file, pad the code to `alignment` and lay out the
    /// global offset table after the data.
    pub fn process_relocations(&mut self, alignment: usize) -> Result<(), ReadError> {
        self.resolve_local(true);
        self.emit_trampolines()?;
        self.code.pad(alignment);
        self.resolve_local(false);
        self.data.pad(8);
        self.resolve_got();
        self.emit_global_offset_table();

        for stencil in [&mut self.code, &mut self.data] {
            stencil.holes.sort_by_key(|hole| hole.offset);
            stencil.check_bounds()?;
        }
        tracing::trace!(
            code = self.code.body.len(),
            data = self.data.body.len(),
            holes = self.code.holes.len() + self.data.holes.len(),
            got = self.global_offset_table.len(),
            "processed relocations"
        );
        Ok(())
    }
}

/// `+0x10` or `-0x8`.
pub fn format_addend(addend: i64) -> String {
    if addend < 0 {
        format!("-{:#x}", addend.unsigned_abs())
    } else {
        format!("+{addend:#x}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hole(offset: usize, kind: HoleKind, symbol: &str, addend: i64) -> Hole {
        Hole::new(offset, kind, symbol, addend)
    }

    fn group() -> StencilGroup {
        let mut group = StencilGroup::default();
        group.code.body = vec![0x90; 16];
        group.code.symbols.insert("_JIT_ENTRY".to_string(), 0);
        group.code.symbols.insert("helper".to_string(), 12);
        group.data.body = b"hello\0".to_vec();
        group.data.symbols.insert(".rodata.str1.1".to_string(), 0);
        group
    }

    #[test]
    fn local_symbols_become_relative() {
        let mut group = group();
        group.code.holes = vec![
            hole(8, HoleKind::R_X86_64_64, "helper", 2),
            hole(2, HoleKind::R_X86_64_64, ".rodata.str1.1", 1),
            hole(4, HoleKind::R_X86_64_PC32, "PyObject_Free", -4),
            hole(0, HoleKind::R_X86_64_64, "_JIT_OPARG", 0),
        ];
        group.process_relocations(1).unwrap();

        let holes: Vec<_> = group
            .code
            .holes
            .iter()
            .map(|x| (x.offset, x.value, x.symbol.as_deref(), x.addend))
            .collect();
        assert_eq!(
            holes,
            [
                (0, HoleValue::Oparg, None, 0),
                (2, HoleValue::Data, None, 1),
                (4, HoleValue::Zero, Some("PyObject_Free"), -4),
                (8, HoleValue::Code, None, 14),
            ]
        );
        // Data is padded to 8 even without a global offset table.
        assert_eq!(group.data.body.len(), 8);
    }

    #[test]
    fn global_offset_table_slots() {
        let mut group = group();
        group.code.holes = vec![
            Hole::got(10, HoleKind::R_X86_64_REX_GOTPCRELX, "PyFloat_Type", -4),
            Hole::got(3, HoleKind::R_X86_64_REX_GOTPCRELX, "PyLong_Type", -4),
            Hole::got(6, HoleKind::R_X86_64_GOTPCRELX, "PyFloat_Type", -4),
            Hole::got(14, HoleKind::R_X86_64_GOTPCRELX, "helper", -4),
        ];
        group.process_relocations(1).unwrap();

        // First use by offset decides the slot.
        assert_eq!(
            group.global_offset_table.symbols(),
            ["PyLong_Type", "PyFloat_Type", "helper"]
        );
        let addends: Vec<_> = group.code.holes.iter().map(|x| (x.value, x.addend)).collect();
        assert_eq!(
            addends,
            [
                (HoleValue::Data, 8 - 4),
                (HoleValue::Data, 16 - 4),
                (HoleValue::Data, 16 - 4),
                (HoleValue::Data, 24 - 4),
            ]
        );

        assert_eq!(group.data.body.len(), 8 + 3 * 8);
        let slots: Vec<_> = group
            .data
            .holes
            .iter()
            .map(|x| (x.offset, x.kind, x.value, x.symbol.as_deref(), x.addend))
            .collect();
        assert_eq!(
            slots,
            [
                (8, HoleKind::R_X86_64_64, HoleValue::Zero, Some("PyLong_Type"), 0),
                (16, HoleKind::R_X86_64_64, HoleValue::Zero, Some("PyFloat_Type"), 0),
                (24, HoleKind::R_X86_64_64, HoleValue::Code, None, 12),
            ]
        );
        assert_eq!(group.data.disassembly.last().unwrap(), "18: CODE+0xc");
    }

    #[test]
    fn trampolines() {
        let mut group = StencilGroup::default();
        // bl #0, twice to the same symbol and once to another.
        for _ in 0..3 {
            group.code.body.extend_from_slice(&0x9400_0000u32.to_le_bytes());
        }
        group.code.symbols.insert("_JIT_ENTRY".to_string(), 0);
        group.code.holes = vec![
            hole(0, HoleKind::R_AARCH64_CALL26, "PyObject_Free", 0),
            hole(4, HoleKind::R_AARCH64_CALL26, "PyObject_Free", 0),
            hole(8, HoleKind::R_AARCH64_JUMP26, "_JIT_CONTINUE", 0),
        ];
        group.process_relocations(8).unwrap();

        // One trampoline of five instructions, padded to 8.
        assert_eq!(group.code.body.len(), 12 + 20 + 4);
        let word = |at: usize| u32::from_le_bytes(group.code.body[at..at + 4].try_into().unwrap());
        assert_eq!(word(0), 0x9400_0000 | (12 >> 2));
        assert_eq!(word(4), 0x9400_0000 | (8 >> 2));
        assert_eq!(word(12), 0xD280_0008);
        assert_eq!(word(28), 0xD61F_0100);

        let holes: Vec<_> = group.code.holes.iter().map(|x| (x.offset, x.kind)).collect();
        assert_eq!(
            holes,
            [
                (8, HoleKind::R_AARCH64_JUMP26),
                (12, HoleKind::R_AARCH64_MOVW_UABS_G0_NC),
                (16, HoleKind::R_AARCH64_MOVW_UABS_G1_NC),
                (20, HoleKind::R_AARCH64_MOVW_UABS_G2_NC),
                (24, HoleKind::R_AARCH64_MOVW_UABS_G3),
            ]
        );
        assert!(group.code.holes[1..].iter().all(|x| x.symbol.as_deref() == Some("PyObject_Free")));
    }

    #[test]
    fn out_of_bounds() {
        let mut group = group();
        group.code.holes = vec![hole(16, HoleKind::R_X86_64_64, "x", 0)];
        assert!(matches!(
            group.process_relocations(1),
            Err(ReadError::HoleOutOfBounds { offset: 16, size: 16 })
        ));
    }

    #[test]
    fn data_pointing_at_code() {
        let mut group = group();
        group.data.body.resize(16, 0);
        group.data.holes = vec![
            hole(8, HoleKind::R_X86_64_64, "helper", 0),
            hole(0, HoleKind::R_X86_64_64, ".rodata.str1.1", 3),
        ];
        group.process_relocations(1).unwrap();

        let holes: Vec<_> = group
            .data
            .holes
            .iter()
            .map(|x| (x.offset, x.value, x.symbol.as_deref(), x.addend))
            .collect();
        assert_eq!(
            holes,
            [(0, HoleValue::Data, None, 3), (8, HoleValue::Code, None, 12)]
        );
    }

    #[test]
    fn branch_past_the_end() {
        let mut group = StencilGroup::default();
        for _ in 0..2 {
            group.code.body.extend_from_slice(&0x9400_0000u32.to_le_bytes());
        }
        group.code.holes = vec![
            hole(0, HoleKind::R_AARCH64_CALL26, "PyObject_Free", 0),
            hole(6, HoleKind::R_AARCH64_CALL26, "PyObject_Free", 0),
        ];
        assert!(matches!(
            group.process_relocations(8),
            Err(ReadError::HoleOutOfBounds { offset: 6, size: 8 })
        ));

        let mut group = StencilGroup::default();
        group.code.body = vec![0; 6];
        group.code.holes = vec![hole(4, HoleKind::ARM64_RELOC_BRANCH26, "PyObject_Free", 0)];
        assert!(matches!(
            group.process_relocations(8),
            Err(ReadError::HoleOutOfBounds { offset: 4, size: 6 })
        ));
    }

    #[test]
    fn addends() {
        assert_eq!(format_addend(12), "+0xc");
        assert_eq!(format_addend(-4), "-0x4");
        assert_eq!(format_addend(i64::MIN), "-0x8000000000000000");
    }
}
