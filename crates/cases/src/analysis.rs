//! Properties of instruction bodies and cross references between definitions.
use hashbrown::{HashMap, HashSet};
use token::{Delimiter, Token, TokenKind};

use crate::{
    error::GenerateError,
    parser::{Definitions, Family, InstructionDef, SuperInstruction},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    /// The last statement leaves the instruction, no dispatch may follow it.
    pub always_exits: bool,
    pub ends_with_eval_breaker: bool,
    /// The body syncs the stack pointer itself, outputs are pushed after it.
    pub stores_sp: bool,
    /// Some instruction jumps here through `PREDICT` or `GO_TO_INSTRUCTION`.
    pub predicted: bool,
    /// Byte offset of every `PyStackRef_FromPyObjectNew` to the output it initializes.
    pub deferred_refs: HashMap<usize, Option<String>>,
}

#[derive(Debug)]
pub struct Instruction<'a> {
    pub def: &'a InstructionDef,
    pub properties: Properties,
    /// Name passed to deopt macros, the family or the instruction itself.
    pub family: Option<&'a str>,
}

impl Instruction<'_> {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn deopt_target(&self) -> &str {
        self.family.unwrap_or(&self.def.name)
    }
}

#[derive(Debug)]
pub struct Super<'a> {
    pub def: &'a SuperInstruction,
    /// Indices into [`Analysis::instructions`].
    pub components: Vec<usize>,
}

#[derive(Debug)]
pub struct Analysis<'a> {
    pub instructions: Vec<Instruction<'a>>,
    pub supers: Vec<Super<'a>>,
    pub families: &'a [Family],
}

impl<'a> Analysis<'a> {
    pub fn components(&self, sup: &Super<'a>) -> impl Iterator<Item = &Instruction<'a>> {
        sup.components.iter().map(|x| &self.instructions[*x])
    }
}

fn significant(tokens: &[Token]) -> impl Iterator<Item = (usize, &Token)> {
    tokens.iter().enumerate().filter(|(_, t)| !t.is_trivia())
}

/// First token of the last top level statement and whether it ended with `;`.
fn last_statement(tokens: &[Token]) -> Option<(&Token, bool)> {
    let mut depth = 0usize;
    let mut start = None;
    let mut at_start = true;
    let mut ended = false;
    for (_, t) in significant(tokens) {
        if depth == 0 && at_start {
            start = Some(t);
            at_start = false;
        }
        ended = false;
        match t.kind {
            TokenKind::Open(_) => depth += 1,
            TokenKind::Close(d) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && d == Delimiter::Brace {
                    at_start = true;
                }
            }
            TokenKind::Punct if depth == 0 && t.text == ";" => {
                at_start = true;
                ended = true;
            }
            _ => {}
        }
    }
    start.map(|t| (t, ended))
}

fn is_exit(t: &Token) -> bool {
    t.kind == TokenKind::Ident
        && (t.text == "goto"
            || t.text == "return"
            || t.text == "Py_UNREACHABLE"
            || t.text.starts_with("DISPATCH")
            || t.text.starts_with("GO_TO_"))
}

pub fn always_exits(tokens: &[Token]) -> bool {
    last_statement(tokens).is_some_and(|(t, ended)| ended && is_exit(t))
}

pub fn ends_with_eval_breaker(tokens: &[Token]) -> bool {
    last_statement(tokens).is_some_and(|(t, ended)| ended && t.is_ident("CHECK_EVAL_BREAKER"))
}

/// The output assigned by each `out = PyStackRef_FromPyObjectNew(...)`.
fn deferred_refs(inst: &InstructionDef) -> HashMap<usize, Option<String>> {
    let tokens: Vec<&Token> = significant(&inst.block.tokens).map(|x| x.1).collect();
    let mut refs = HashMap::new();
    for (idx, t) in tokens.iter().enumerate() {
        if !t.is_ident("PyStackRef_FromPyObjectNew") {
            continue;
        }
        let target = match idx.checked_sub(2).map(|x| &tokens[x..idx]) {
            Some([lhs, eq]) if eq.is_punct("=") && lhs.kind == TokenKind::Ident => {
                // `*p = `, `s.f = ` and `s->f = ` are not stack slots.
                let indirect = idx
                    .checked_sub(3)
                    .is_some_and(|x| ["*", ".", "->"].iter().any(|p| tokens[x].is_punct(p)));
                let is_output = inst.outputs.iter().any(|o| o.name == lhs.text);
                (!indirect && is_output).then(|| lhs.text.clone())
            }
            _ => None,
        };
        refs.insert(t.span.start, target);
    }
    refs
}

/// Names targeted by `PREDICT(X)` and `GO_TO_INSTRUCTION(X)`.
fn predictions(defs: &Definitions) -> HashSet<&str> {
    let mut res = HashSet::new();
    for inst in &defs.instructions {
        let tokens: Vec<&Token> = significant(&inst.block.tokens).map(|x| x.1).collect();
        for window in tokens.windows(4) {
            let [name, open, target, close] = window else {
                continue;
            };
            if (name.is_ident("PREDICT") || name.is_ident("GO_TO_INSTRUCTION"))
                && open.kind == TokenKind::Open(Delimiter::Parenthesis)
                && target.kind == TokenKind::Ident
                && close.kind == TokenKind::Close(Delimiter::Parenthesis)
            {
                res.insert(target.text.as_str());
            }
        }
    }
    res
}

pub fn properties(inst: &InstructionDef, predicted: bool) -> Properties {
    let tokens = &inst.block.tokens;
    Properties {
        always_exits: always_exits(tokens),
        ends_with_eval_breaker: ends_with_eval_breaker(tokens),
        stores_sp: tokens.iter().any(|t| t.is_ident("SYNC_SP")),
        predicted,
        deferred_refs: deferred_refs(inst),
    }
}

/// Compute instruction properties, resolve families and super-instruction components.
pub fn analyze(defs: &Definitions) -> Result<Analysis<'_>, GenerateError> {
    let index: HashMap<&str, usize> = defs
        .instructions
        .iter()
        .enumerate()
        .map(|(idx, inst)| (inst.name.as_str(), idx))
        .collect();

    let mut family_of: HashMap<&str, &str> = HashMap::new();
    for family in &defs.families {
        for member in &family.members {
            if !index.contains_key(member.as_str()) {
                return Err(GenerateError::UnknownFamilyMember {
                    family: family.name.clone(),
                    member: member.clone(),
                });
            }
            match family_of.insert(member.as_str(), family.name.as_str()) {
                Some(first) if first != family.name => {
                    return Err(GenerateError::MultipleFamilies {
                        inst: member.clone(),
                        first: first.to_string(),
                        second: family.name.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    let predicted = predictions(defs);
    let instructions = defs
        .instructions
        .iter()
        .map(|def| Instruction {
            properties: properties(def, predicted.contains(def.name.as_str())),
            family: family_of.get(def.name.as_str()).copied(),
            def,
        })
        .collect();

    let supers = defs
        .supers
        .iter()
        .map(|def| {
            let components = def
                .ops
                .iter()
                .map(|op| {
                    index
                        .get(op.as_str())
                        .copied()
                        .ok_or_else(|| GenerateError::UnknownInstruction {
                            sup: def.name.clone(),
                            name: op.clone(),
                        })
                })
                .collect::<Result<_, _>>()?;
            Ok(Super { def, components })
        })
        .collect::<Result<_, GenerateError>>()?;

    Ok(Analysis {
        instructions,
        supers,
        families: &defs.families,
    })
}
