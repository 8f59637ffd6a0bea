//! The stencil tables as a Rust module.
use hashbrown::HashMap;
use proc_macro2::{Ident, Literal, TokenStream};
use quote::{format_ident, quote};

use crate::{
    hole::{Hole, HoleKind, HoleValue},
    stencil::{Stencil, StencilGroup},
    writer::sorted_groups,
};

fn value_ident(value: HoleValue) -> Ident {
    format_ident!("{}", format!("{value:?}"))
}

fn expand_hole(hole: &Hole) -> TokenStream {
    let offset = Literal::usize_unsuffixed(hole.offset);
    let kind = format_ident!("{}", hole.kind.name());
    let value = value_ident(hole.value);
    let symbol = match &hole.symbol {
        Some(symbol) => quote! { Some(#symbol) },
        None => quote! { None },
    };
    let addend = hole.addend;
    quote! {
        Hole {
            offset: #offset,
            kind: HoleKind::#kind,
            value: HoleValue::#value,
            symbol: #symbol,
            addend: #addend,
        }
    }
}

fn expand_stencil(stencil: &Stencil) -> TokenStream {
    let bytes = stencil.body.iter().map(|x| Literal::u8_unsuffixed(*x));
    let holes = stencil.holes.iter().map(expand_hole);
    quote! {
        Stencil {
            body: &[#(#bytes),*],
            holes: &[#(#holes),*],
        }
    }
}

fn expand_group(group: &StencilGroup) -> TokenStream {
    let code = expand_stencil(&group.code);
    let data = expand_stencil(&group.data);
    quote! {
        StencilGroup {
            code: #code,
            data: #data,
        }
    }
}

/// Write a module defining `TRAMPOLINE` and the sorted `STENCIL_GROUPS` table.
pub fn write_rust_module(groups: &HashMap<String, StencilGroup>) -> String {
    let kinds = HoleKind::ALL.iter().map(|x| format_ident!("{}", x.name()));
    let values = HoleValue::ALL.iter().copied().map(value_ident);

    let groups = sorted_groups(groups);
    let trampoline = match groups.iter().find(|(name, _)| *name == "trampoline") {
        Some((_, group)) => expand_group(group),
        None => expand_group(&StencilGroup::default()),
    };
    let (names, groups): (Vec<_>, Vec<_>) = groups
        .iter()
        .filter(|(name, _)| *name != "trampoline")
        .map(|(name, group)| (*name, expand_group(group)))
        .unzip();

    let tokens = quote! {
        #![allow(dead_code, non_camel_case_types)]

        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum HoleKind {
            #(#kinds,)*
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum HoleValue {
            #(#values,)*
        }

        #[derive(Clone, Copy, Debug)]
        pub struct Hole {
            pub offset: usize,
            pub kind: HoleKind,
            pub value: HoleValue,
            pub symbol: Option<&'static str>,
            pub addend: i64,
        }

        #[derive(Clone, Copy, Debug)]
        pub struct Stencil {
            pub body: &'static [u8],
            pub holes: &'static [Hole],
        }

        #[derive(Clone, Copy, Debug)]
        pub struct StencilGroup {
            pub code: Stencil,
            pub data: Stencil,
        }

        pub static TRAMPOLINE: StencilGroup = #trampoline;

        pub static STENCIL_GROUPS: &[(&str, StencilGroup)] = &[
            #((#names, #groups)),*
        ];
    };
    tokens.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn groups() -> HashMap<String, StencilGroup> {
        let mut groups = HashMap::new();
        for name in ["_POP_TOP", "trampoline", "_LOAD_CONST"] {
            let mut group = StencilGroup::default();
            group.code.body = vec![0x90, 0xc3];
            group.code.holes = vec![
                Hole::new(0, HoleKind::R_X86_64_64, "_JIT_OPARG", 0),
                Hole::new(1, HoleKind::R_X86_64_PLT32, "PyObject_Free", -4),
            ];
            groups.insert(name.to_string(), group);
        }
        groups
    }

    #[test]
    fn parses_as_rust() {
        let out = write_rust_module(&groups());
        let file = syn::parse_file(&out).unwrap();
        assert_eq!(file.items.len(), 7);

        let statics: Vec<_> = file
            .items
            .iter()
            .filter_map(|item| match item {
                syn::Item::Static(x) => Some(x.ident.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(statics, ["TRAMPOLINE", "STENCIL_GROUPS"]);
    }

    #[test]
    fn sorted_without_trampoline() {
        let out = write_rust_module(&groups());
        let load = out.find("\"_LOAD_CONST\"").unwrap();
        let pop = out.find("\"_POP_TOP\"").unwrap();
        assert!(load < pop);
        assert!(!out.contains("\"trampoline\""));
        let compact: String = out.split_whitespace().collect();
        assert!(compact.contains("value:HoleValue::Oparg"));
        assert!(compact.contains("symbol:Some(\"PyObject_Free\")"));
    }
}
