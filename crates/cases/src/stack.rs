//! A model of the operand stack while an instruction is emitted.
//!
//! Inputs are read relative to the stack pointer as it was when the instruction started,
//! outputs are buffered and only written out when the stack is flushed.
use std::fmt::Write as _;

use hashbrown::HashSet;

use crate::{cwriter::CWriter, parser::StackItem};

/// Which flavor of stack access to generate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackStyle {
    /// `PEEK`, `POKE`, `STACK_GROW` and `STACK_SHRINK` macros.
    Tier1,
    /// Direct `stack_pointer` indexing.
    Executor,
}

/// Number of slots taken by `item`, as a C expression.
fn var_size(item: &StackItem) -> String {
    let size = item.size.as_deref().unwrap_or("1");
    match item.condition.as_deref() {
        None | Some("1") => size.to_string(),
        Some("0") => "0".to_string(),
        Some(cond) => format!("(({cond}) ? {size} : 0)"),
    }
}

fn is_wrapped(expr: &str) -> bool {
    if !expr.starts_with('(') {
        return false;
    }
    let mut depth = 0usize;
    for (idx, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx == expr.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn parenthesize(expr: &str) -> String {
    if expr.chars().all(|c| c.is_alphanumeric() || c == '_') || is_wrapped(expr) {
        expr.to_string()
    } else {
        format!("({expr})")
    }
}

/// A symbolic stack offset, the sizes of the items popped and pushed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackOffset {
    popped: Vec<String>,
    pushed: Vec<String>,
}

impl StackOffset {
    pub fn pop(&mut self, item: &StackItem) {
        self.popped.push(var_size(item));
    }

    pub fn push(&mut self, item: &StackItem) {
        self.pushed.push(var_size(item));
    }

    pub fn clear(&mut self) {
        self.popped.clear();
        self.pushed.clear();
    }

    pub fn negated(&self) -> StackOffset {
        StackOffset {
            popped: self.pushed.clone(),
            pushed: self.popped.clone(),
        }
    }

    /// Cancel sizes which were both popped and pushed.
    fn simplify(&mut self) {
        let popped = std::mem::take(&mut self.popped);
        for item in popped {
            match self.pushed.iter().position(|x| *x == item) {
                Some(idx) => {
                    self.pushed.remove(idx);
                }
                None => self.popped.push(item),
            }
        }
    }

    /// The constant part and the symbolic terms popped and pushed.
    fn split(&self) -> (i64, Vec<&str>, Vec<&str>) {
        let mut int = 0;
        let mut popped = Vec::new();
        let mut pushed = Vec::new();
        for item in &self.popped {
            match item.parse::<i64>() {
                Ok(x) => int -= x,
                Err(_) => popped.push(item.as_str()),
            }
        }
        for item in &self.pushed {
            match item.parse::<i64>() {
                Ok(x) => int += x,
                Err(_) => pushed.push(item.as_str()),
            }
        }
        (int, popped, pushed)
    }

    /// Render as a C expression, e.g. `0`, `-2` or `-1 - oparg`.
    pub fn to_c(&self) -> String {
        let mut this = self.clone();
        this.simplify();
        let (int, popped, pushed) = this.split();

        let mut symbols = String::new();
        for item in popped {
            write!(symbols, " - {}", parenthesize(item)).ok();
        }
        for item in pushed {
            write!(symbols, " + {}", parenthesize(item)).ok();
        }

        let res = if !symbols.is_empty() && int == 0 {
            symbols
        } else {
            format!("{int}{symbols}")
        };
        if let Some(rest) = res.strip_prefix(" + ") {
            rest.to_string()
        } else if let Some(rest) = res.strip_prefix(" - ") {
            format!("-{rest}")
        } else {
            res
        }
    }

    /// The net change split into an amount to shrink by and an amount to grow by.
    fn shrink_grow(&self) -> (Option<String>, Option<String>) {
        let mut this = self.clone();
        this.simplify();
        let (int, popped, pushed) = this.split();

        let render = |int: i64, symbols: Vec<&str>| {
            let mut terms = Vec::new();
            if int > 0 {
                terms.push(int.to_string());
            }
            terms.extend(symbols.into_iter().map(parenthesize));
            (!terms.is_empty()).then(|| terms.join(" + "))
        };
        (render(-int, popped), render(int, pushed))
    }
}

#[derive(Clone, Debug)]
pub struct Stack {
    style: StackStyle,
    /// Offset of the lowest unflushed slot from the stack pointer.
    base_offset: StackOffset,
    /// Offset of the logical top of the stack from the stack pointer.
    top_offset: StackOffset,
    /// Inputs consumed so far, peeked items excluded.
    peek_offset: StackOffset,
    /// Outputs not yet written to the stack.
    variables: Vec<StackItem>,
    defined: HashSet<String>,
}

/// Declaration of a tier 1 local for `item`.
pub fn tier1_decl(item: &StackItem) -> String {
    let mut ty = item
        .type_
        .clone()
        .unwrap_or_else(|| "PyObject *".to_string());
    if item.is_array() {
        if !ty.ends_with('*') {
            ty.push(' ');
        }
        ty.push('*');
    }
    if ty.ends_with('*') {
        format!("{ty}{}", item.name)
    } else {
        format!("{ty} {}", item.name)
    }
}

impl Stack {
    pub fn new(style: StackStyle) -> Self {
        Stack {
            style,
            base_offset: StackOffset::default(),
            top_offset: StackOffset::default(),
            peek_offset: StackOffset::default(),
            variables: Vec::new(),
            defined: HashSet::new(),
        }
    }

    pub fn style(&self) -> StackStyle {
        self.style
    }

    /// A stack slot as an lvalue in the current style.
    fn slot(&self, offset: &StackOffset) -> String {
        match self.style {
            StackStyle::Executor => format!("stack_pointer[{}]", offset.to_c()),
            StackStyle::Tier1 => format!("PEEK({})", offset.negated().to_c()),
        }
    }

    /// Pop an input, returns the code reading it into its local.
    pub fn pop(&mut self, var: &StackItem) -> String {
        self.top_offset.pop(var);
        if !var.peek {
            self.peek_offset.pop(var);
        }
        self.base_offset.pop(var);
        if var.name == "unused" {
            return String::new();
        }
        self.defined.insert(var.name.clone());

        let indirect = if var.is_array() { "&" } else { "" };
        let value = format!("{indirect}{}", self.slot(&self.base_offset));
        match self.style {
            StackStyle::Tier1 => {
                let decl = tier1_decl(var);
                match var.condition.as_deref() {
                    None | Some("1") => format!("{decl} = {value};\n"),
                    Some("0") => format!("{decl} = NULL;\n"),
                    Some(cond) => format!("{decl} = ({cond}) ? {value} : NULL;\n"),
                }
            }
            StackStyle::Executor => {
                let cast = match &var.type_ {
                    Some(ty) if !var.is_array() => format!("({ty})"),
                    _ => String::new(),
                };
                let assign = format!("{} = {cast}{value};", var.name);
                match var.condition.as_deref() {
                    None | Some("1") => format!("{assign}\n"),
                    Some("0") => String::new(),
                    Some(cond) => format!("if ({cond}) {{ {assign} }}\n"),
                }
            }
        }
    }

    /// Push an output, returns code binding array outputs to their slots.
    pub fn push(&mut self, var: &StackItem) -> String {
        let offset = self.top_offset.clone();
        self.top_offset.push(var);
        self.variables.push(var.clone());
        if var.is_array() && var.name != "unused" && self.defined.insert(var.name.clone()) {
            return format!("{} = &{};\n", var.name, self.slot(&offset));
        }
        String::new()
    }

    /// Amount the error path has to unwind, as a C expression.
    pub fn peek_offset(&self) -> String {
        self.peek_offset.to_c()
    }

    /// Write out the buffered outputs and move the stack pointer.
    pub fn flush(&mut self, out: &mut CWriter) {
        out.start_line();
        match self.style {
            StackStyle::Executor => {
                for var in &self.variables {
                    if !var.peek && var.name != "unused" && !var.is_array() {
                        let guard = match var.condition.as_deref() {
                            None | Some("1") => String::new(),
                            Some("0") => {
                                self.base_offset.push(var);
                                continue;
                            }
                            Some(cond) => format!("if ({cond}) "),
                        };
                        out.emit_str(&format!(
                            "{guard}stack_pointer[{}] = {};\n",
                            self.base_offset.to_c(),
                            var.name
                        ));
                    }
                    self.base_offset.push(var);
                }
                let net = self.base_offset.to_c();
                if net != "0" {
                    out.emit_str(&format!("stack_pointer += {net};\n"));
                    out.emit_str("assert(WITHIN_STACK_BOUNDS());\n");
                }
            }
            StackStyle::Tier1 => {
                for var in &self.variables {
                    self.base_offset.push(var);
                }
                let (shrink, grow) = self.base_offset.shrink_grow();
                if let Some(shrink) = shrink {
                    out.emit_str(&format!("STACK_SHRINK({shrink});\n"));
                }
                if let Some(grow) = grow {
                    out.emit_str(&format!("STACK_GROW({grow});\n"));
                }
                // Relative to the adjusted top, the last output sits at 1.
                let mut depth = StackOffset::default();
                for var in self.variables.iter().rev() {
                    depth.push(var);
                    if var.peek || var.name == "unused" || var.is_array() {
                        continue;
                    }
                    let guard = match var.condition.as_deref() {
                        None | Some("1") => String::new(),
                        Some("0") => continue,
                        Some(cond) => format!("if ({cond}) "),
                    };
                    out.emit_str(&format!("{guard}POKE({}, {});\n", depth.to_c(), var.name));
                }
            }
        }
        self.variables.clear();
        self.base_offset.clear();
        self.top_offset.clear();
        self.peek_offset.clear();
        out.start_line();
    }

    /// Flush a copy as an error path sees it: inputs consumed, outputs not produced yet.
    /// Leaves this model untouched.
    pub fn flush_locally(&self, out: &mut CWriter) {
        let mut copy = self.clone();
        copy.variables.retain(|var| var.peek);
        copy.flush(out);
    }

    /// Store the output `name` in its slot without moving the stack pointer.
    pub fn flush_single_var(&self, out: &mut CWriter, name: &str) {
        let mut offset = self.base_offset.clone();
        for var in &self.variables {
            if var.name == name {
                let store = match self.style {
                    StackStyle::Executor => format!("stack_pointer[{}] = {name};\n", offset.to_c()),
                    StackStyle::Tier1 => format!("POKE({}, {name});\n", offset.negated().to_c()),
                };
                out.emit_str(&store);
                return;
            }
            offset.push(var);
        }
    }
}
