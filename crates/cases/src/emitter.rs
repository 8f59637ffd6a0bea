//! Rewriting of the macros instruction bodies use to talk to the generator.
use std::ops::Range;

use token::{Delimiter, Token, TokenKind};

use crate::{
    analysis::Instruction,
    cwriter::CWriter,
    error::RewriteError,
    stack::{Stack, StackStyle},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PseudoOp {
    DeoptIf,
    ExitIf,
    ErrorIf,
    ErrorNoPop,
    DecrefInputs,
    SyncSp,
    CheckEvalBreaker,
    StackRefNew,
    Predicted,
}

impl PseudoOp {
    pub fn from_ident(name: &str) -> Option<Self> {
        let op = match name {
            "DEOPT_IF" => PseudoOp::DeoptIf,
            "EXIT_IF" => PseudoOp::ExitIf,
            "ERROR_IF" => PseudoOp::ErrorIf,
            "ERROR_NO_POP" => PseudoOp::ErrorNoPop,
            "DECREF_INPUTS" => PseudoOp::DecrefInputs,
            "SYNC_SP" => PseudoOp::SyncSp,
            "CHECK_EVAL_BREAKER" => PseudoOp::CheckEvalBreaker,
            "PyStackRef_FromPyObjectNew" => PseudoOp::StackRefNew,
            "PREDICTED" => PseudoOp::Predicted,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            PseudoOp::DeoptIf => "DEOPT_IF",
            PseudoOp::ExitIf => "EXIT_IF",
            PseudoOp::ErrorIf => "ERROR_IF",
            PseudoOp::ErrorNoPop => "ERROR_NO_POP",
            PseudoOp::DecrefInputs => "DECREF_INPUTS",
            PseudoOp::SyncSp => "SYNC_SP",
            PseudoOp::CheckEvalBreaker => "CHECK_EVAL_BREAKER",
            PseudoOp::StackRefNew => "PyStackRef_FromPyObjectNew",
            PseudoOp::Predicted => "PREDICTED",
        }
    }

    /// Number of arguments of the call form, `None` for forms which are not checked.
    fn arity(self) -> Option<usize> {
        match self {
            PseudoOp::DeoptIf | PseudoOp::ExitIf | PseudoOp::Predicted => Some(1),
            PseudoOp::ErrorIf => Some(2),
            PseudoOp::ErrorNoPop
            | PseudoOp::DecrefInputs
            | PseudoOp::SyncSp
            | PseudoOp::CheckEvalBreaker => Some(0),
            PseudoOp::StackRefNew => None,
        }
    }
}

/// A macro call `NAME(arg, ...);` within the body tokens.
struct Call {
    open: usize,
    /// Token ranges of the arguments, excluding the separating commas.
    args: Vec<Range<usize>>,
    /// Index just past the closing `;`.
    next: usize,
}

fn next_significant(tokens: &[Token], mut idx: usize) -> Option<usize> {
    while idx < tokens.len() {
        if !tokens[idx].is_trivia() {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

pub struct Emitter<'w, 'i> {
    out: &'w mut CWriter,
    inst: &'i Instruction<'i>,
    style: StackStyle,
    /// Drop `PREDICTED(X);` markers, used when inlining into super-instructions.
    strip_predicted: bool,
}

impl<'w, 'i> Emitter<'w, 'i> {
    pub fn new(out: &'w mut CWriter, inst: &'i Instruction<'i>, style: StackStyle) -> Self {
        Emitter {
            out,
            inst,
            style,
            strip_predicted: false,
        }
    }

    pub fn strip_predicted(mut self, strip: bool) -> Self {
        self.strip_predicted = strip;
        self
    }

    fn tokens(&self) -> &'i [Token] {
        &self.inst.def.block.tokens
    }

    fn parse_call(&self, op: PseudoOp, idx: usize) -> Result<Call, RewriteError> {
        let tokens = self.tokens();
        let line = tokens[idx].span.line;
        let instruction = self.inst.name().to_string();

        let open = next_significant(tokens, idx + 1)
            .filter(|x| tokens[*x].kind == TokenKind::Open(Delimiter::Parenthesis))
            .ok_or_else(|| RewriteError::MissingArguments {
                instruction: instruction.clone(),
                op: op.name(),
                line,
            })?;

        let mut depth = 0usize;
        let mut args = Vec::new();
        let mut start = open + 1;
        let mut close = open;
        for (i, t) in tokens.iter().enumerate().skip(open) {
            match t.kind {
                TokenKind::Open(_) => depth += 1,
                TokenKind::Close(_) => {
                    depth -= 1;
                    if depth == 0 {
                        args.push(start..i);
                        close = i;
                        break;
                    }
                }
                TokenKind::Punct if depth == 1 && t.text == "," => {
                    args.push(start..i);
                    start = i + 1;
                }
                _ => {}
            }
        }
        // `()` has no arguments rather than one empty one.
        if args.len() == 1 && tokens[args[0].clone()].iter().all(|t| t.is_trivia()) {
            args.clear();
        }

        if let Some(expected) = op.arity() {
            if args.len() != expected {
                return Err(RewriteError::Arity {
                    instruction,
                    op: op.name(),
                    expected,
                    found: args.len(),
                    line,
                });
            }
        }

        let semi = next_significant(tokens, close + 1)
            .filter(|x| tokens[*x].is_punct(";"))
            .ok_or_else(|| RewriteError::MissingSemicolon {
                instruction: instruction.clone(),
                op: op.name(),
                line,
            })?;

        Ok(Call {
            open,
            args,
            next: semi + 1,
        })
    }

    fn emit_range(&mut self, range: Range<usize>) {
        let tokens = self.tokens();
        for t in &tokens[range] {
            self.out.emit_token(t);
        }
    }

    /// Emit the body of the instruction, rewriting pseudo-ops as they are found.
    pub fn emit_tokens(&mut self, stack: &mut Stack) -> Result<(), RewriteError> {
        let tokens = self.tokens();
        if tokens.is_empty() {
            return Ok(());
        }
        self.out.start_line();
        let mut idx = 0;
        while idx < tokens.len() {
            let tkn = &tokens[idx];
            let op = match tkn.kind {
                TokenKind::Ident => PseudoOp::from_ident(&tkn.text),
                _ => None,
            };
            idx = match op {
                Some(op) => self.rewrite(op, idx, stack)?,
                None => {
                    self.out.emit_token(tkn);
                    idx + 1
                }
            };
        }
        self.out.start_line();
        Ok(())
    }

    /// Rewrite the pseudo-op at `idx`, returns the index to continue from.
    fn rewrite(&mut self, op: PseudoOp, idx: usize, stack: &mut Stack) -> Result<usize, RewriteError> {
        let tokens = self.tokens();
        let tkn = &tokens[idx];
        if op == PseudoOp::StackRefNew {
            return self.stack_ref_new(idx, stack);
        }
        if op == PseudoOp::Predicted && !self.strip_predicted {
            self.out.emit_token(tkn);
            return Ok(idx + 1);
        }

        let call = self.parse_call(op, idx)?;
        match op {
            PseudoOp::DeoptIf | PseudoOp::ExitIf => {
                self.out.emit_at(op.name(), tkn);
                self.out.emit_token(&tokens[call.open]);
                self.emit_range(call.args[0].clone());
                let target = self.inst.deopt_target().to_string();
                self.out.emit_str(&format!(", {target});\n"));
            }
            PseudoOp::ErrorIf => self.error_if(&call, idx, stack)?,
            PseudoOp::ErrorNoPop => self.out.emit_at("goto error;", tkn),
            PseudoOp::DecrefInputs => self.decref_inputs(tkn),
            PseudoOp::SyncSp => stack.flush(self.out),
            PseudoOp::CheckEvalBreaker => {
                if !self.inst.properties.ends_with_eval_breaker {
                    self.out.emit_at("CHECK_EVAL_BREAKER();", tkn);
                }
            }
            // Only reached when stripping.
            PseudoOp::Predicted => {}
            PseudoOp::StackRefNew => unreachable!("rewritten without a call shape"),
        }
        self.out.skip_to(&tokens[call.next - 1]);
        Ok(call.next)
    }

    fn error_if(&mut self, call: &Call, idx: usize, stack: &Stack) -> Result<(), RewriteError> {
        let tokens = self.tokens();
        let label = {
            let mut significant = tokens[call.args[1].clone()].iter().filter(|t| !t.is_trivia());
            match (significant.next(), significant.next()) {
                (Some(t), None) if t.kind == TokenKind::Ident => t.text.clone(),
                _ => {
                    return Err(RewriteError::InvalidLabel {
                        instruction: self.inst.name().to_string(),
                        line: tokens[idx].span.line,
                    });
                }
            }
        };

        self.out.emit_at("if ", &tokens[idx]);
        self.out.emit_token(&tokens[call.open]);
        self.emit_range(call.args[0].clone());

        let offset = stack.peek_offset();
        match self.style {
            StackStyle::Tier1 => {
                // The inputs are still on the stack, the error path removes them.
                let count = stack_count(&offset);
                if count == "0" {
                    self.out.emit_str(&format!(") {{ goto {label}; }}\n"));
                } else {
                    self.out
                        .emit_str(&format!(") {{ STACK_SHRINK({count}); goto {label}; }}\n"));
                }
            }
            StackStyle::Executor => match offset.parse::<i64>() {
                Ok(0) => self.out.emit_str(&format!(") goto {label};\n")),
                Ok(n) if n < 0 => self.out.emit_str(&format!(") goto pop_{}_{label};\n", -n)),
                _ => {
                    self.out.emit_str(") {\n");
                    stack.flush_locally(self.out);
                    self.out.emit_str(&format!("goto {label};\n"));
                    self.out.emit_str("}\n");
                }
            },
        }
        Ok(())
    }

    fn decref_inputs(&mut self, tkn: &Token) {
        let (close, xclose) = match self.style {
            StackStyle::Tier1 => ("Py_DECREF", "Py_XDECREF"),
            StackStyle::Executor => ("PyStackRef_CLOSE", "PyStackRef_XCLOSE"),
        };
        self.out.emit_at("", tkn);
        for var in &self.inst.def.inputs {
            if var.is_placeholder() || var.peek {
                continue;
            }
            if let Some(size) = &var.size {
                self.out
                    .emit_str(&format!("for (int _i = {size}; --_i >= 0;) {{\n"));
                self.out.emit_str(&format!("{close}({}[_i]);\n", var.name));
                self.out.emit_str("}\n");
                continue;
            }
            match var.condition.as_deref() {
                None | Some("1") => self.out.emit_str(&format!("{close}({});\n", var.name)),
                Some("0") => {}
                Some(_) => self.out.emit_str(&format!("{xclose}({});\n", var.name)),
            }
        }
    }

    /// `out = PyStackRef_FromPyObjectNew(...);` also stores `out` in its stack slot.
    fn stack_ref_new(&mut self, idx: usize, stack: &Stack) -> Result<usize, RewriteError> {
        let tokens = self.tokens();
        let mut depth = 0usize;
        let mut end = None;
        for (i, t) in tokens.iter().enumerate().skip(idx) {
            match t.kind {
                TokenKind::Open(_) => depth += 1,
                TokenKind::Close(_) => depth = depth.saturating_sub(1),
                TokenKind::Punct if depth == 0 && t.text == ";" => {
                    end = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| RewriteError::MissingSemicolon {
            instruction: self.inst.name().to_string(),
            op: PseudoOp::StackRefNew.name(),
            line: tokens[idx].span.line,
        })?;

        self.emit_range(idx..end);
        self.out.emit_str(";\n");
        let target = self
            .inst
            .properties
            .deferred_refs
            .get(&tokens[idx].span.start)
            .cloned()
            .flatten();
        if let Some(target) = target {
            stack.flush_single_var(self.out, &target);
        }
        Ok(end + 1)
    }
}

/// The number of slots to drop on a tier 1 error path, the negation of the peek offset.
fn stack_count(peek_offset: &str) -> String {
    match peek_offset.parse::<i64>() {
        Ok(n) => (-n).to_string(),
        Err(_) => match peek_offset.strip_prefix('-') {
            Some(rest) => rest.replace(" - ", " + "),
            None => format!("-({peek_offset})"),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{analysis::analyze, parser::parse_definitions};

    fn rewrite(src: &str, style: StackStyle) -> Result<String, RewriteError> {
        let defs = parse_definitions(src, "t.c").unwrap();
        let analysis = analyze(&defs).unwrap();
        let inst = &analysis.instructions[analysis.instructions.len() - 1];
        let mut stack = Stack::new(style);
        for input in inst.def.inputs.iter().rev() {
            stack.pop(input);
        }
        let mut out = CWriter::new(0);
        Emitter::new(&mut out, inst, style).emit_tokens(&mut stack)?;
        Ok(out.into_string())
    }

    #[test]
    fn deopt_uses_family() {
        let src = "inst(A) {} inst(B, (x --)) { DEOPT_IF(x == 0); } family(A) = { A, B };";
        assert_eq!(
            rewrite(src, StackStyle::Tier1).unwrap(),
            "DEOPT_IF(x == 0, A);\n"
        );
        let src = "inst(B, (x --)) { EXIT_IF(!x); }";
        assert_eq!(rewrite(src, StackStyle::Executor).unwrap(), "EXIT_IF(!x, B);\n");
    }

    #[test]
    fn error_if_tier1() {
        let src = "inst(B, (a, b --)) { ERROR_IF(res == NULL, error); }";
        assert_eq!(
            rewrite(src, StackStyle::Tier1).unwrap(),
            "if (res == NULL) { STACK_SHRINK(2); goto error; }\n"
        );
        let src = "inst(B) { ERROR_IF(res == NULL, error); }";
        assert_eq!(
            rewrite(src, StackStyle::Tier1).unwrap(),
            "if (res == NULL) { goto error; }\n"
        );
    }

    #[test]
    fn error_if_executor() {
        let src = "inst(B, (a, b --)) { ERROR_IF(res == NULL, error); }";
        assert_eq!(
            rewrite(src, StackStyle::Executor).unwrap(),
            "if (res == NULL) goto pop_2_error;\n"
        );
        let src = "inst(B) { ERROR_IF(res == NULL, error); }";
        assert_eq!(
            rewrite(src, StackStyle::Executor).unwrap(),
            "if (res == NULL) goto error;\n"
        );
        let src = "inst(B, (args[oparg] --)) { ERROR_IF(1, error); }";
        assert_eq!(
            rewrite(src, StackStyle::Executor).unwrap(),
            "if (1) {\n    stack_pointer += -oparg;\n    assert(WITHIN_STACK_BOUNDS());\n    goto error;\n}\n"
        );
    }

    #[test]
    fn decref_inputs() {
        let src = "inst(B, (unused, args[oparg], x if (oparg & 1), y if (1), z if (0), w -- w, r)) { DECREF_INPUTS(); }";
        assert_eq!(
            rewrite(src, StackStyle::Executor).unwrap(),
            "for (int _i = oparg; --_i >= 0;) {\n    PyStackRef_CLOSE(args[_i]);\n}\nPyStackRef_XCLOSE(x);\nPyStackRef_CLOSE(y);\nPyStackRef_CLOSE(w);\n"
        );
        let src = "inst(B, (a, b --)) { DECREF_INPUTS(); }";
        assert_eq!(
            rewrite(src, StackStyle::Tier1).unwrap(),
            "Py_DECREF(a);\nPy_DECREF(b);\n"
        );
    }

    #[test]
    fn other_tokens_pass_through() {
        let src = "inst(B) {\n    x = DEOPT_IFX(y);\n    ERROR_NO_POP();\n}";
        assert_eq!(
            rewrite(src, StackStyle::Executor).unwrap(),
            "x = DEOPT_IFX(y);\ngoto error;\n"
        );
    }

    #[test]
    fn eval_breaker_dropped_at_end() {
        let src = "inst(B) { CHECK_EVAL_BREAKER(); f(); }";
        assert_eq!(
            rewrite(src, StackStyle::Tier1).unwrap(),
            "CHECK_EVAL_BREAKER(); f();\n"
        );
        let src = "inst(B) { f(); CHECK_EVAL_BREAKER(); }";
        assert_eq!(rewrite(src, StackStyle::Tier1).unwrap(), "f();\n");
    }

    #[test]
    fn stack_ref_new_flushes_output() {
        let src = "inst(B, (a -- a, res)) {\n    res = PyStackRef_FromPyObjectNew(o);\n}";
        let defs = parse_definitions(src, "t.c").unwrap();
        let analysis = analyze(&defs).unwrap();
        let inst = &analysis.instructions[0];
        let mut stack = Stack::new(StackStyle::Executor);
        stack.pop(&inst.def.inputs[0]);
        for output in &inst.def.outputs {
            stack.push(output);
        }
        let mut out = CWriter::new(0);
        Emitter::new(&mut out, inst, StackStyle::Executor)
            .emit_tokens(&mut stack)
            .unwrap();
        assert_eq!(
            out.into_string(),
            "res = PyStackRef_FromPyObjectNew(o);\nstack_pointer[0] = res;\n"
        );
    }

    #[test]
    fn predicted_markers() {
        let defs = parse_definitions("inst(B) { PREDICTED(B); x(); }", "t.c").unwrap();
        let analysis = analyze(&defs).unwrap();
        let inst = &analysis.instructions[0];
        let mut out = CWriter::new(0);
        Emitter::new(&mut out, inst, StackStyle::Tier1)
            .strip_predicted(true)
            .emit_tokens(&mut Stack::new(StackStyle::Tier1))
            .unwrap();
        assert_eq!(out.into_string(), "x();\n");
    }

    #[test]
    fn wrong_shapes() {
        assert!(matches!(
            rewrite("inst(B) { ERROR_IF(x); }", StackStyle::Tier1),
            Err(RewriteError::Arity { op: "ERROR_IF", expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            rewrite("inst(B) { DEOPT_IF(a, b); }", StackStyle::Tier1),
            Err(RewriteError::Arity { op: "DEOPT_IF", found: 2, .. })
        ));
        assert!(matches!(
            rewrite("inst(B) { SYNC_SP() }", StackStyle::Executor),
            Err(RewriteError::MissingSemicolon { op: "SYNC_SP", .. })
        ));
        assert!(matches!(
            rewrite("inst(B) { x = DECREF_INPUTS; }", StackStyle::Executor),
            Err(RewriteError::MissingArguments { .. })
        ));
        assert!(matches!(
            rewrite("inst(B) { ERROR_IF(x, a + b); }", StackStyle::Executor),
            Err(RewriteError::InvalidLabel { .. })
        ));
    }
}
