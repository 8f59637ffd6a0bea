//! Parser for the instruction definition language.
//!
//! ```text
//! inst(NAME, (in1, in2 -- out1)) { ... }
//! inst(NAME) { ... }
//! super(NAME) = OP1 + OP2;
//! family(NAME) = { OP1, OP2, };
//! ```
use std::{fmt, ops::Range};

use hashbrown::HashMap;
use token::{
    Delimiter, Lex, Peek, Span, Spanned, T, Token, TokenBuffer, TokenSlice,
    token::{Bracket, Ident, MinusMinus},
};

use crate::error::SyntaxError;

pub type Result<T> = std::result::Result<T, SyntaxError>;

/// A single stack slot consumed or produced by an instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackItem {
    pub name: String,
    pub type_: Option<String>,
    pub condition: Option<String>,
    pub size: Option<String>,
    /// Present with the same name at the same depth on both sides of the effect, the value is
    /// only looked at.
    pub peek: bool,
}

impl StackItem {
    pub fn is_array(&self) -> bool {
        self.size.is_some()
    }

    /// `unused` and `null` only reserve a slot.
    pub fn is_placeholder(&self) -> bool {
        self.name == "unused" || self.name == "null"
    }
}

/// The braced body of an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Source text including the outer braces.
    pub text: String,
    /// Tokens between the outer braces, comments and directives included.
    pub tokens: Vec<Token>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstructionDef {
    pub name: String,
    pub inputs: Vec<StackItem>,
    pub outputs: Vec<StackItem>,
    pub block: Block,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperInstruction {
    pub name: String,
    pub ops: Vec<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Family {
    pub name: String,
    pub members: Vec<String>,
    pub span: Span,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Definitions {
    pub instructions: Vec<InstructionDef>,
    pub supers: Vec<SuperInstruction>,
    pub families: Vec<Family>,
}

pub trait Parse: Sized {
    fn parse(parser: &mut Parser) -> Result<Self>;
}

impl<T: Lex> Parse for T {
    fn parse(parser: &mut Parser) -> Result<Self> {
        if let Some(t) = T::lex(&parser.slice) {
            Ok(t)
        } else {
            Err(parser.error(format_args!(
                "Unexpected token {} expected {}",
                parser.slice.format_cur(),
                T::NAME
            )))
        }
    }
}

pub struct Parser<'a> {
    slice: TokenSlice<'a>,
    src: &'a str,
    filename: &'a str,
}

impl<'a> Parser<'a> {
    pub fn error<M: fmt::Display>(&self, message: M) -> SyntaxError {
        self.error_at(self.slice.span(), message)
    }

    pub fn error_at<M: fmt::Display>(&self, span: Span, message: M) -> SyntaxError {
        SyntaxError::new(self.src, self.filename, span, message)
    }

    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    pub fn span(&self) -> Span {
        self.slice.span()
    }

    pub fn parse<P: Parse>(&mut self) -> Result<P> {
        P::parse(self)
    }

    pub fn peek<T: Peek>(&self) -> bool {
        T::peek(&self.slice)
    }

    pub fn eat<T: Lex>(&self) -> Option<T> {
        T::lex(&self.slice)
    }

    /// Parse the contents of the group at the cursor with `f`, which must consume all of it.
    pub fn parse_delimiter<F, R>(&mut self, delim: Delimiter, f: F) -> Result<R>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<R>,
    {
        let Some((found, slice)) = self.slice.group() else {
            return Err(self.error(format_args!(
                "Unexpected token {} expected `{}`",
                self.slice.format_cur(),
                delim.open()
            )));
        };
        if found != delim {
            return Err(self.error(format_args!(
                "invalid delimiter, expected `{}`",
                delim.open()
            )));
        }

        let mut parser = Parser {
            slice,
            src: self.src,
            filename: self.filename,
        };
        let res = f(&mut parser)?;
        if !parser.is_empty() {
            return Err(parser.error(format_args!(
                "Unexpected token {}",
                parser.slice.format_cur()
            )));
        }
        self.slice.advance_group();
        Ok(res)
    }

    pub fn parse_parenthesized<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<R>,
    {
        self.parse_delimiter(Delimiter::Parenthesis, f)
    }

    pub fn parse_bracketed<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<R>,
    {
        self.parse_delimiter(Delimiter::Bracket, f)
    }

    pub fn parse_braced<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<R>,
    {
        self.parse_delimiter(Delimiter::Brace, f)
    }

    /// Parse `P`s separated by `D`, allowing a trailing separator.
    pub fn parse_terminated<P: Parse, D: Parse>(&mut self) -> Result<Vec<P>> {
        let mut res = Vec::new();
        while !self.is_empty() {
            res.push(self.parse()?);
            if self.is_empty() {
                break;
            }
            self.parse::<D>()?;
        }
        Ok(res)
    }

    /// Consume the rest of the slice and return its source text.
    fn rest_text(&mut self) -> Result<String> {
        let raw = self.slice.raw();
        let first = raw.iter().find(|t| !t.is_trivia());
        let last = raw.iter().rev().find(|t| !t.is_trivia());
        let (Some(first), Some(last)) = (first, last) else {
            return Err(self.error("expected an expression"));
        };
        while !self.slice.is_empty() {
            self.slice.advance_tree();
        }
        Ok(self.src[first.span.start..last.span.end].to_string())
    }

    fn parse_block(&mut self) -> Result<Block> {
        let Some((Delimiter::Brace, inner)) = self.slice.group() else {
            return Err(self.error(format_args!(
                "Unexpected token {} expected `{{`",
                self.slice.format_cur()
            )));
        };
        let open = self.slice.span();
        let tokens = inner.raw().to_vec();
        self.slice.advance_group();
        let span = open.join(self.slice.prev_span());
        Ok(Block {
            text: self.src[span.byte_range()].to_string(),
            tokens,
            span,
        })
    }
}

impl Parse for StackItem {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let name: Ident = parser.parse()?;
        let mut item = StackItem {
            name: name.name,
            ..StackItem::default()
        };
        if parser.eat::<T![:]>().is_some() {
            let ty: Ident = parser.parse()?;
            let mut stars = 0;
            while parser.eat::<T![*]>().is_some() {
                stars += 1;
            }
            item.type_ = Some(if stars == 0 {
                ty.name
            } else {
                format!("{} {}", ty.name, "*".repeat(stars))
            });
        }
        if parser.peek::<Bracket>() {
            item.size = Some(parser.parse_bracketed(|parser| parser.rest_text())?);
        }
        if parser.eat::<T![if]>().is_some() {
            item.condition = Some(parser.parse_parenthesized(|parser| parser.rest_text())?);
        }
        Ok(item)
    }
}

fn parse_items(parser: &mut Parser) -> Result<Vec<StackItem>> {
    let mut items = Vec::new();
    while !parser.is_empty() && !parser.peek::<MinusMinus>() {
        items.push(parser.parse()?);
        if parser.eat::<T![,]>().is_none() {
            break;
        }
    }
    Ok(items)
}

fn parse_stack_effect(parser: &mut Parser) -> Result<(Vec<StackItem>, Vec<StackItem>)> {
    let mut inputs = parse_items(parser)?;
    parser.parse::<MinusMinus>()?;
    let mut outputs = parse_items(parser)?;

    for (input, output) in inputs.iter_mut().zip(outputs.iter_mut()) {
        if input.name != output.name || input.size != output.size {
            break;
        }
        input.peek = true;
        output.peek = true;
    }
    Ok((inputs, outputs))
}

impl Parse for InstructionDef {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let start = parser.parse::<T![inst]>()?.span();
        let (name, (inputs, outputs)) = parser.parse_parenthesized(|parser| {
            let name: Ident = parser.parse()?;
            if parser.eat::<T![,]>().is_none() {
                return Ok((name, Default::default()));
            }
            let effect = parser.parse_parenthesized(parse_stack_effect)?;
            Ok((name, effect))
        })?;
        let block = parser.parse_block()?;
        Ok(InstructionDef {
            span: start.join(block.span),
            name: name.name,
            inputs,
            outputs,
            block,
        })
    }
}

impl Parse for SuperInstruction {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let start = parser.parse::<T![super]>()?.span();
        let name: Ident = parser.parse_parenthesized(|parser| parser.parse())?;
        parser.parse::<T![=]>()?;
        let mut ops = vec![parser.parse::<Ident>()?.name];
        while parser.eat::<T![+]>().is_some() {
            ops.push(parser.parse::<Ident>()?.name);
        }
        let end = parser.parse::<T![;]>()?.span();
        Ok(SuperInstruction {
            name: name.name,
            ops,
            span: start.join(end),
        })
    }
}

impl Parse for Family {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let start = parser.parse::<T![family]>()?.span();
        let name: Ident = parser.parse_parenthesized(|parser| parser.parse())?;
        parser.parse::<T![=]>()?;
        let members: Vec<Ident> = parser.parse_braced(|parser| {
            parser.parse_terminated::<Ident, T![,]>()
        })?;
        let end = parser.parse::<T![;]>()?.span();
        Ok(Family {
            name: name.name,
            members: members.into_iter().map(|x| x.name).collect(),
            span: start.join(end),
        })
    }
}

/// Parse all definitions in `src`.
pub fn parse_definitions(src: &str, filename: &str) -> Result<Definitions> {
    parse_region(src, 0..src.len(), filename)
}

/// Parse the definitions in `range` of `src`, diagnostics point into the whole of `src`.
pub fn parse_region(src: &str, range: Range<usize>, filename: &str) -> Result<Definitions> {
    let buffer = TokenBuffer::from_range(src, range)
        .map_err(|e| SyntaxError::new(src, filename, e.span(), &e))?;
    let mut parser = Parser {
        slice: buffer.as_slice(),
        src,
        filename,
    };

    let mut defs = Definitions::default();
    let mut seen = HashMap::new();
    while !parser.is_empty() {
        if parser.peek::<T![inst]>() {
            let start = parser.span();
            let inst: InstructionDef = parser.parse()?;
            if seen.insert(inst.name.clone(), inst.span).is_some() {
                return Err(parser.error_at(
                    start,
                    format_args!("duplicate definition of instruction `{}`", inst.name),
                ));
            }
            defs.instructions.push(inst);
        } else if parser.peek::<T![super]>() {
            defs.supers.push(parser.parse()?);
        } else if parser.peek::<T![family]>() {
            defs.families.push(parser.parse()?);
        } else {
            return Err(parser.error(format_args!(
                "Unexpected token {}",
                parser.slice.format_cur()
            )));
        }
    }
    Ok(defs)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(src: &str) -> Definitions {
        match parse_definitions(src, "test.c") {
            Ok(x) => x,
            Err(e) => panic!("{}", e.rendered),
        }
    }

    #[test]
    fn instruction_with_effect() {
        let defs = parse("inst(ADD, (a, b -- c)) { c = a + b; }");
        let inst = &defs.instructions[0];
        assert_eq!(inst.name, "ADD");
        let inputs: Vec<_> = inst.inputs.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(inputs, ["a", "b"]);
        assert_eq!(inst.outputs[0].name, "c");
        assert_eq!(inst.block.text, "{ c = a + b; }");
        assert_eq!(inst.block.tokens.len(), 6);
    }

    #[test]
    fn instruction_without_effect() {
        let defs = parse("inst(NOP) {\n}\n");
        assert!(defs.instructions[0].inputs.is_empty());
        assert!(defs.instructions[0].outputs.is_empty());
    }

    #[test]
    fn stack_item_forms() {
        let defs = parse(
            "inst(X, (unused, self: PyObject *, args[oparg*2], x if (oparg & 1) -- res: PyObject **)) {}",
        );
        let inputs = &defs.instructions[0].inputs;
        assert!(inputs[0].is_placeholder());
        assert_eq!(inputs[1].type_.as_deref(), Some("PyObject *"));
        assert_eq!(inputs[2].size.as_deref(), Some("oparg*2"));
        assert!(inputs[2].is_array());
        assert_eq!(inputs[3].condition.as_deref(), Some("oparg & 1"));
        assert_eq!(
            defs.instructions[0].outputs[0].type_.as_deref(),
            Some("PyObject **")
        );
    }

    #[test]
    fn peek_items() {
        let defs = parse("inst(X, (value, other -- value, res)) {}");
        let inst = &defs.instructions[0];
        assert!(inst.inputs[0].peek && inst.outputs[0].peek);
        assert!(!inst.inputs[1].peek && !inst.outputs[1].peek);

        let defs = parse("inst(Y, (a, b -- b, a)) {}");
        assert!(defs.instructions[0].inputs.iter().all(|x| !x.peek));
    }

    #[test]
    fn blocks_tolerate_literals_and_comments() {
        let src = r#"
inst(A) {
    /* } */
    char *s = "}";
    if (x) { y = '{'; } // }
}
super(A_A) = A + A;
"#;
        let defs = parse(src);
        assert_eq!(defs.instructions.len(), 1);
        assert_eq!(defs.supers[0].ops, ["A", "A"]);
    }

    #[test]
    fn families_and_supers() {
        let defs = parse(
            "inst(A) {} inst(B) {} family(a) = { A, B, }; family(b) = { A }; super(AB) = A + B + A;",
        );
        assert_eq!(defs.families[0].members, ["A", "B"]);
        assert_eq!(defs.families[1].members, ["A"]);
        assert_eq!(defs.supers[0].ops, ["A", "B", "A"]);
    }

    #[test]
    fn syntax_error_position() {
        let err = parse_definitions("inst(A) {}\n\n  oops(B) {}", "bytecodes.c").unwrap_err();
        assert_eq!((err.line, err.column), (3, 3));
        assert_eq!(err.filename, "bytecodes.c");
        assert!(err.rendered.contains("--> bytecodes.c:3:3"));
        assert!(err.message.contains("oops"));
    }

    #[test]
    fn missing_separator() {
        let err = parse_definitions("inst(A, (a b -- c)) {}", "x.c").unwrap_err();
        assert_eq!((err.line, err.column), (1, 12));
    }

    #[test]
    fn duplicate_instruction() {
        let err = parse_definitions("inst(A) {}\ninst(A) {}", "x.c").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn unbalanced_block() {
        let err = parse_definitions("inst(A) {\n  if (x) {\n}\n", "x.c").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unmatched"));
    }

    #[test]
    fn region_keeps_file_lines() {
        let src = "int x;\n// BEGIN\ninst(A) {}\n  ?";
        let start = src.find("inst").unwrap();
        let err = parse_region(src, start..src.len(), "f.c").unwrap_err();
        assert_eq!((err.line, err.column), (4, 3));
    }
}
