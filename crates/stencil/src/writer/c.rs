//! The `jit_stencils.h` header consumed by the C JIT.
use std::fmt::Write as _;

use hashbrown::HashMap;

use crate::{
    hole::{Hole, HoleKind, HoleValue},
    stencil::{Stencil, StencilGroup},
    writer::sorted_groups,
};

/// Placeholder the JIT overwrites with the real value of every hole value.
const BAD_PATCH: &str = "(uintptr_t)0xBADBADBADBADBADB";

fn format_addend(addend: i64) -> String {
    if addend < 0 {
        format!("-{:#x}", addend.unsigned_abs())
    } else {
        format!("{addend:#x}")
    }
}

fn hole_as_c(hole: &Hole) -> String {
    let symbol = match &hole.symbol {
        Some(symbol) => format!("&{symbol}"),
        None => "NULL".to_string(),
    };
    format!(
        "{{{:#x}, HoleKind_{}, HoleValue_{}, {symbol}, {}}}",
        hole.offset,
        hole.kind,
        hole.value,
        format_addend(hole.addend)
    )
}

fn write_types(out: &mut String) {
    out.push_str("typedef enum {\n");
    for kind in HoleKind::ALL {
        writeln!(out, "    HoleKind_{kind},").unwrap();
    }
    out.push_str("} HoleKind;\n\n");

    out.push_str("typedef enum {\n");
    for value in HoleValue::ALL {
        writeln!(out, "    HoleValue_{value},").unwrap();
    }
    out.push_str("} HoleValue;\n\n");

    out.push_str(
        "typedef struct {
    const size_t offset;
    const HoleKind kind;
    const HoleValue value;
    const void *symbol;
    const uint64_t addend;
} Hole;

typedef struct {
    const size_t body_size;
    const unsigned char * const body;
    const size_t holes_size;
    const Hole * const holes;
} Stencil;

typedef struct {
    const Stencil code;
    const Stencil data;
} StencilGroup;

",
    );
}

fn write_stencil(out: &mut String, opname: &str, part: &str, stencil: &Stencil) {
    for line in &stencil.disassembly {
        writeln!(out, "// {line}").unwrap();
    }
    if stencil.body.is_empty() {
        writeln!(out, "static const unsigned char {opname}_{part}_body[1];").unwrap();
    } else {
        // `INIT_STENCIL` subtracts the trailing element.
        let size = stencil.body.len() + 1;
        writeln!(out, "static const unsigned char {opname}_{part}_body[{size}] = {{").unwrap();
        for row in stencil.body.chunks(8) {
            let row: Vec<_> = row.iter().map(|byte| format!("{byte:#04x},")).collect();
            writeln!(out, "    {}", row.join(" ")).unwrap();
        }
        out.push_str("};\n");
    }
    if stencil.holes.is_empty() {
        writeln!(out, "static const Hole {opname}_{part}_holes[1];").unwrap();
    } else {
        let size = stencil.holes.len() + 1;
        writeln!(out, "static const Hole {opname}_{part}_holes[{size}] = {{").unwrap();
        for hole in &stencil.holes {
            writeln!(out, "    {},", hole_as_c(hole)).unwrap();
        }
        out.push_str("};\n");
    }
}

fn write_footer(out: &mut String, opnames: &[&str]) {
    out.push_str(
        "#define INIT_STENCIL(STENCIL) {                         \\
    .body_size = Py_ARRAY_LENGTH(STENCIL##_body) - 1,   \\
    .body = STENCIL##_body,                             \\
    .holes_size = Py_ARRAY_LENGTH(STENCIL##_holes) - 1, \\
    .holes = STENCIL##_holes,                           \\
}

#define INIT_STENCIL_GROUP(OP) {     \\
    .code = INIT_STENCIL(OP##_code), \\
    .data = INIT_STENCIL(OP##_data), \\
}

static const StencilGroup trampoline = INIT_STENCIL_GROUP(trampoline);

static const StencilGroup stencil_groups[512] = {
",
    );
    for opname in opnames.iter().filter(|x| **x != "trampoline") {
        writeln!(out, "    [{opname}] = INIT_STENCIL_GROUP({opname}),").unwrap();
    }
    out.push_str("};\n\n#define GET_PATCHES() { \\\n");
    for value in HoleValue::ALL {
        writeln!(out, "    [HoleValue_{value}] = {BAD_PATCH}, \\").unwrap();
    }
    out.push_str("}\n");
}

/// Write the header for every group, ordered by opcode name.
pub fn write_header(groups: &HashMap<String, StencilGroup>) -> String {
    let mut out = String::new();
    write_types(&mut out);
    let groups = sorted_groups(groups);
    for (opname, group) in &groups {
        writeln!(out, "// {opname}").unwrap();
        write_stencil(&mut out, opname, "code", &group.code);
        write_stencil(&mut out, opname, "data", &group.data);
        out.push('\n');
    }
    let opnames: Vec<_> = groups.iter().map(|(name, _)| *name).collect();
    write_footer(&mut out, &opnames);
    out
}
