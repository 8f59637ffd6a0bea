//! The executor cases, `case NAME: { ... }` blocks over an explicit `stack_pointer`.
//!
//! This is the source the stencil builder compiles, one case per opcode.
use hashbrown::HashSet;

use crate::{
    analysis::{Analysis, Instruction},
    cwriter::CWriter,
    emitter::Emitter,
    error::RewriteError,
    parser::StackItem,
    stack::{Stack, StackStyle},
    tier1::header,
};

const PREAMBLE: &str = "
#ifdef TIER_ONE
    #error \"This file is for Tier 2 only\"
#endif
#define TIER_TWO 2
";

/// The C type of the local holding `item` and the value it starts out as.
fn type_and_null(item: &StackItem) -> (&str, &str) {
    if let Some(ty) = &item.type_ {
        (ty.as_str(), "NULL")
    } else if item.is_array() {
        ("_PyStackRef *", "NULL")
    } else {
        ("_PyStackRef", "PyStackRef_NULL")
    }
}

fn declare(out: &mut CWriter, item: &StackItem) {
    let (ty, null) = type_and_null(item);
    let space = if ty.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
        " "
    } else {
        ""
    };
    if item.condition.is_some() {
        out.emit_str(&format!("{ty}{space}{} = {null};\n", item.name));
    } else {
        out.emit_str(&format!("{ty}{space}{};\n", item.name));
    }
}

fn write_case(out: &mut CWriter, inst: &Instruction) -> Result<(), RewriteError> {
    let def = inst.def;
    let props = &inst.properties;
    out.emit_str(&format!("case {}: {{\n", inst.name()));

    let mut declared = HashSet::new();
    for item in def.inputs.iter().rev().chain(def.outputs.iter()) {
        if item.name == "unused" || !declared.insert(item.name.as_str()) {
            continue;
        }
        declare(out, item);
    }

    let mut stack = Stack::new(StackStyle::Executor);
    for input in def.inputs.iter().rev() {
        let code = stack.pop(input);
        if !code.is_empty() {
            out.emit_str(&code);
        }
    }
    let push_outputs = |out: &mut CWriter, stack: &mut Stack| {
        for output in &def.outputs {
            let code = stack.push(output);
            if !code.is_empty() {
                out.emit_str(&code);
            }
        }
    };

    if !props.stores_sp {
        push_outputs(out, &mut stack);
    }
    Emitter::new(out, inst, StackStyle::Executor).emit_tokens(&mut stack)?;
    if props.stores_sp {
        push_outputs(out, &mut stack);
    }

    stack.flush(out);
    if props.ends_with_eval_breaker {
        out.emit_str("CHECK_EVAL_BREAKER();\n");
    }
    if !props.always_exits {
        out.emit_str("break;\n");
    }
    out.emit_str("}\n");
    Ok(())
}

/// Write the executor cases of every instruction, super-instructions have none.
pub fn write_executor(analysis: &Analysis, filename: &str) -> Result<String, RewriteError> {
    let mut out = CWriter::new(2);
    out.emit_text(&header(filename));
    out.emit_text(PREAMBLE);
    for inst in &analysis.instructions {
        out.emit_text("\n");
        write_case(&mut out, inst)?;
    }
    out.emit_text("\n#undef TIER_TWO\n");
    Ok(out.into_string())
}
