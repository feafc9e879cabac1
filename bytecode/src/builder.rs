use std::rc::Rc;

use crate::instruction::Instruction;
use crate::op::Op;
use crate::source_map::{MapEntry, SourceMap};

/// Handle to a code section inside a [`CodeBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId(usize);

enum Item {
    Instr {
        op: Op,
        param: u8,
        value: i32,
        entry: Rc<MapEntry>,
    },
    /// Like `Instr`, but the value is the start address of a section,
    /// known only at assembly.
    Ref {
        op: Op,
        param: u8,
        target: SectionId,
        entry: Rc<MapEntry>,
    },
    Child(SectionId),
}

#[derive(Default)]
struct Section {
    items: Vec<Item>,
    placed: bool,
    address: Option<usize>,
}

/// Builds code as a tree of sections whose addresses resolve at assembly.
///
/// Control flow references sections, never raw addresses: a jump to a
/// section that has not been laid out yet needs no placeholder patching.
/// [`assemble`](CodeBuilder::assemble) runs two passes — a DFS that
/// assigns every placed section its start address, then the emission
/// walk that materialises instructions and the source map.
pub struct CodeBuilder {
    sections: Vec<Section>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self {
            sections: vec![Section::default()],
        }
    }

    /// The root section; assembly starts here at address 0.
    pub fn root(&self) -> SectionId {
        SectionId(0)
    }

    /// Create a new, unplaced section.
    pub fn section(&mut self) -> SectionId {
        self.sections.push(Section::default());
        SectionId(self.sections.len() - 1)
    }

    /// Append `child` into `parent` at its current end. Every section is
    /// placed at most once.
    pub fn place(&mut self, parent: SectionId, child: SectionId) {
        debug_assert!(!self.sections[child.0].placed, "section placed twice");
        debug_assert_ne!(parent, child);
        self.sections[child.0].placed = true;
        self.sections[parent.0].items.push(Item::Child(child));
    }

    /// Append an instruction with an immediate operand.
    pub fn emit(
        &mut self,
        section: SectionId,
        op: Op,
        param: u8,
        value: i32,
        entry: Rc<MapEntry>,
    ) {
        self.sections[section.0].items.push(Item::Instr {
            op,
            param,
            value,
            entry,
        });
    }

    /// Append an instruction whose operand is the start address of
    /// `target`.
    pub fn emit_ref(
        &mut self,
        section: SectionId,
        op: Op,
        param: u8,
        target: SectionId,
        entry: Rc<MapEntry>,
    ) {
        self.sections[section.0].items.push(Item::Ref {
            op,
            param,
            target,
            entry,
        });
    }

    /// Resolve addresses and emit. Returns the instruction sequence and
    /// its source map.
    pub fn assemble(mut self) -> (Vec<Instruction>, SourceMap) {
        let mut cursor = 0;
        self.layout(SectionId(0), &mut cursor);

        let mut code = Vec::with_capacity(cursor);
        let mut map = SourceMap::new();
        self.write(SectionId(0), &mut code, &mut map);
        (code, map)
    }

    fn layout(&mut self, section: SectionId, cursor: &mut usize) {
        self.sections[section.0].address = Some(*cursor);
        let shape: Vec<Option<SectionId>> = self.sections[section.0]
            .items
            .iter()
            .map(|item| match item {
                Item::Child(id) => Some(*id),
                _ => None,
            })
            .collect();
        for item in shape {
            match item {
                Some(child) => self.layout(child, cursor),
                None => *cursor += 1,
            }
        }
    }

    fn write(
        &self,
        section: SectionId,
        code: &mut Vec<Instruction>,
        map: &mut SourceMap,
    ) {
        for item in &self.sections[section.0].items {
            match item {
                Item::Instr {
                    op,
                    param,
                    value,
                    entry,
                } => {
                    code.push(Instruction::new(*op, *param, *value));
                    map.push(entry.clone());
                }
                Item::Ref {
                    op,
                    param,
                    target,
                    entry,
                } => {
                    let address = self.sections[target.0]
                        .address
                        .unwrap_or_default();
                    debug_assert!(
                        self.sections[target.0].address.is_some(),
                        "reference to unplaced section"
                    );
                    code.push(Instruction::new(*op, *param, address as i32));
                    map.push(entry.clone());
                }
                Item::Child(id) => self.write(*id, code, map),
            }
        }
    }
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
