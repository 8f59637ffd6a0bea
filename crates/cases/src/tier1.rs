//! The tier 1 dispatch loop, `TARGET(NAME) { ... }` blocks over the `PEEK`/`POKE` macros.
use hashbrown::HashSet;

use crate::{
    analysis::{Analysis, Instruction, Super},
    cwriter::CWriter,
    emitter::Emitter,
    error::RewriteError,
    stack::{Stack, StackStyle, tier1_decl},
};

pub fn header(filename: &str) -> String {
    format!("// This file is generated by copatch cases\n// from:\n//   {filename}\n// Do not edit!\n")
}

/// Stack reads, declarations, the rewritten body and the stack writes of one instruction.
fn write_body(
    out: &mut CWriter,
    inst: &Instruction,
    in_super: bool,
) -> Result<(), RewriteError> {
    let def = inst.def;
    let props = &inst.properties;
    let mut stack = Stack::new(StackStyle::Tier1);

    for input in def.inputs.iter().rev() {
        let code = stack.pop(input);
        if !code.is_empty() {
            out.emit_str(&code);
        }
    }

    let input_names: HashSet<&str> = def.inputs.iter().map(|x| x.name.as_str()).collect();
    for output in &def.outputs {
        if output.name == "unused" || input_names.contains(output.name.as_str()) {
            continue;
        }
        out.emit_str(&format!("{};\n", tier1_decl(output)));
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
    Emitter::new(out, inst, StackStyle::Tier1)
        .strip_predicted(in_super)
        .emit_tokens(&mut stack)?;
    if props.stores_sp {
        push_outputs(out, &mut stack);
    }

    // The stack is adjusted even when the body never reaches the end of the block.
    stack.flush(out);
    if props.ends_with_eval_breaker {
        out.emit_str("CHECK_EVAL_BREAKER();\n");
    }
    Ok(())
}

fn write_instruction(out: &mut CWriter, inst: &Instruction) -> Result<(), RewriteError> {
    out.emit_str(&format!("TARGET({}) {{\n", inst.name()));
    let marker = format!("PREDICTED({})", inst.name());
    if inst.properties.predicted && !inst.def.block.text.contains(&marker) {
        out.emit_str(&format!("PREDICTED({});\n", inst.name()));
    }
    write_body(out, inst, false)?;
    if !inst.properties.always_exits {
        out.emit_str("DISPATCH();\n");
    }
    out.emit_str("}\n");
    Ok(())
}

fn write_super(out: &mut CWriter, analysis: &Analysis, sup: &Super) -> Result<(), RewriteError> {
    out.emit_str(&format!("TARGET({}) {{\n", sup.def.name));
    for (idx, inst) in analysis.components(sup).enumerate() {
        if idx != 0 {
            out.emit_str("NEXTOPARG();\n");
            out.emit_str("next_instr++;\n");
        }
        out.emit_str("{\n");
        write_body(out, inst, true)?;
        out.emit_str("}\n");
    }
    out.emit_str("DISPATCH();\n");
    out.emit_str("}\n");
    Ok(())
}

/// Write the tier 1 cases of every instruction and super-instruction.
pub fn write_tier1(analysis: &Analysis, filename: &str) -> Result<String, RewriteError> {
    let mut out = CWriter::new(2);
    out.emit_text(&header(filename));
    for inst in &analysis.instructions {
        out.emit_text("\n");
        write_instruction(&mut out, inst)?;
    }
    for sup in &analysis.supers {
        out.emit_text("\n");
        write_super(&mut out, analysis, sup)?;
    }
    Ok(out.into_string())
}
