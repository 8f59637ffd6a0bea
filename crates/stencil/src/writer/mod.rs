//! Serialising stencil groups for consumption by a JIT.
use hashbrown::HashMap;

use crate::stencil::StencilGroup;

pub mod c;
pub mod rust;

pub use c::write_header;
pub use rust::write_rust_module;

/// The output formats of the stencil tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    C,
    Rust,
}

impl OutputFormat {
    pub fn write(self, groups: &HashMap<String, StencilGroup>) -> String {
        match self {
            OutputFormat::C => write_header(groups),
            OutputFormat::Rust => write_rust_module(groups),
        }
    }
}

pub(crate) fn sorted_groups(groups: &HashMap<String, StencilGroup>) -> Vec<(&str, &StencilGroup)> {
    let mut groups: Vec<_> = groups
        .iter()
        .map(|(name, group)| (name.as_str(), group))
        .collect();
    groups.sort_by_key(|(name, _)| *name);
    groups
}
