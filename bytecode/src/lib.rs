mod builder;
mod instruction;
mod op;
mod source_map;

pub use builder::{CodeBuilder, SectionId};
pub use instruction::{disassemble, Instruction};
pub use op::{Op, Operand};
pub use source_map::{MapEntry, SourceMap, VariableInfo};

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn entry() -> Rc<MapEntry> {
        Rc::new(MapEntry {
            row: 1,
            column: 1,
            function: "main".into(),
            parameters: Rc::from(vec![]),
            variables: Rc::from(vec![]),
            globals: Rc::from(vec![]),
        })
    }

    // ── Packed word ────────────────────────────────────────────────

    #[test]
    fn field_round_trip() {
        let i = Instruction::new(Op::LoadVariable, 3, -5);
        assert_eq!(i.opcode(), Some(Op::LoadVariable));
        assert_eq!(i.param(), 3);
        assert_eq!(i.value(), -5);
    }

    #[test]
    fn value_sign_extension() {
        for v in [
            0,
            1,
            -1,
            1000,
            -1000,
            Instruction::VALUE_MAX,
            Instruction::VALUE_MIN,
        ] {
            let i = Instruction::new(Op::Number, 0, v);
            assert_eq!(i.value(), v, "value {v}");
        }
    }

    #[test]
    fn out_of_range_value_clamps() {
        let high = Instruction::new(Op::Number, 0, i32::MAX);
        assert_eq!(high.value(), Instruction::VALUE_MAX);
        let low = Instruction::new(Op::Number, 0, i32::MIN);
        assert_eq!(low.value(), Instruction::VALUE_MIN);
    }

    #[test]
    fn out_of_range_param_clamps() {
        let i = Instruction::new(Op::LoadVariable, 200, 0);
        assert_eq!(i.param(), Instruction::PARAM_MAX);
    }

    #[test]
    fn word_layout() {
        // value[21:0] | param[25:22] | opcode[31:26]
        let i = Instruction::new(Op::Null, 0, 0);
        assert_eq!(i.raw(), 0);

        let i = Instruction::new(Op::Boolean, 0, 1);
        assert_eq!(i.raw(), (Op::Boolean as u32) << 26 | 1);

        let i = Instruction::new(Op::LoadVariable, 2, 3);
        assert_eq!(
            i.raw(),
            (Op::LoadVariable as u32) << 26 | 2 << 22 | 3
        );
    }

    #[test]
    fn negative_value_masks_into_22_bits() {
        let i = Instruction::new(Op::Number, 0, -1);
        assert_eq!(i.raw() & 0x3F_FFFF, 0x3F_FFFF);
        assert_eq!(i.value(), -1);
    }

    #[test]
    fn invalid_opcode_decodes_to_none() {
        let i = Instruction::from_raw(0xFFFF_FFFF);
        assert_eq!(i.opcode(), None);
    }

    #[test]
    fn every_produced_instruction_is_in_range() {
        for raw_op in 0..Op::COUNT as u8 {
            let op = Op::try_from(raw_op).unwrap();
            let i = Instruction::new(op, 9, 123_456);
            assert!(i.param() <= 15);
            assert!(
                (Instruction::VALUE_MIN..=Instruction::VALUE_MAX)
                    .contains(&i.value())
            );
            assert!(i.opcode().is_some());
        }
    }

    // ── Mnemonics ──────────────────────────────────────────────────

    #[test]
    fn mnemonic_round_trip() {
        for raw in 0..Op::COUNT as u8 {
            let op = Op::try_from(raw).unwrap();
            assert_eq!(Op::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Op::from_mnemonic("NoSuchOp"), None);
    }

    #[test]
    fn display_follows_operand_rules() {
        assert_eq!(Instruction::new(Op::Null, 0, 0).to_string(), "Null");
        assert_eq!(
            Instruction::new(Op::Number, 0, 42).to_string(),
            "Number 42"
        );
        assert_eq!(
            Instruction::new(Op::LoadVariable, 1, 3).to_string(),
            "LoadVariable 1 3"
        );
        assert_eq!(
            Instruction::new(Op::Jump, 0, 7).to_string(),
            "Jump @7"
        );
    }

    // ── Section builder ────────────────────────────────────────────

    #[test]
    fn linear_emission() {
        let mut b = CodeBuilder::new();
        let root = b.root();
        b.emit(root, Op::Number, 0, 1, entry());
        b.emit(root, Op::Return, 0, 0, entry());
        let (code, map) = b.assemble();
        assert_eq!(code.len(), 2);
        assert_eq!(map.len(), 2);
        assert_eq!(code[0], Instruction::new(Op::Number, 0, 1));
        assert_eq!(code[1], Instruction::new(Op::Return, 0, 0));
    }

    #[test]
    fn forward_reference_resolves() {
        // Jump over a Null to the end section.
        let mut b = CodeBuilder::new();
        let root = b.root();
        let body = b.section();
        let end = b.section();
        b.place(root, body);
        b.place(root, end);
        b.emit_ref(body, Op::Jump, 0, end, entry());
        b.emit(body, Op::Null, 0, 0, entry());
        b.emit(end, Op::Return, 0, 0, entry());

        let (code, _) = b.assemble();
        assert_eq!(code[0], Instruction::new(Op::Jump, 0, 2));
    }

    #[test]
    fn backward_reference_resolves() {
        let mut b = CodeBuilder::new();
        let root = b.root();
        let top = b.section();
        b.place(root, top);
        b.emit(top, Op::Null, 0, 0, entry());
        b.emit_ref(top, Op::Jump, 0, top, entry());

        let (code, _) = b.assemble();
        assert_eq!(code[1], Instruction::new(Op::Jump, 0, 0));
    }

    #[test]
    fn nested_sections_lay_out_depth_first() {
        let mut b = CodeBuilder::new();
        let root = b.root();
        let outer = b.section();
        let inner = b.section();
        b.emit(root, Op::Null, 0, 0, entry());
        b.place(root, outer);
        b.emit(outer, Op::Boolean, 0, 1, entry());
        b.place(outer, inner);
        b.emit(inner, Op::Number, 0, 7, entry());
        b.emit(outer, Op::Return, 0, 0, entry());
        b.emit(root, Op::Throw, 0, 0, entry());

        let (code, _) = b.assemble();
        let ops: Vec<Option<Op>> =
            code.iter().map(|i| i.opcode()).collect();
        assert_eq!(
            ops,
            vec![
                Some(Op::Null),
                Some(Op::Boolean),
                Some(Op::Number),
                Some(Op::Return),
                Some(Op::Throw),
            ]
        );
    }

    #[test]
    fn disassembly_listing() {
        let mut b = CodeBuilder::new();
        let root = b.root();
        b.emit(root, Op::Number, 0, 3, entry());
        b.emit(root, Op::Return, 0, 0, entry());
        let (code, _) = b.assemble();
        let listing = disassemble(&code);
        assert!(listing.contains("0  Number 3"));
        assert!(listing.contains("1  Return"));
    }
}
