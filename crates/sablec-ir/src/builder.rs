//! Function construction with an explicit block cursor.
//!
//! Expression lowering returns the [`ValueId`] it produced and the builder
//! threads the insertion point; there is no shared "last value" slot.

use sablec_util::{IndexVec, Symbol};

use crate::ir::{Block, BlockId, Function, Instr, IrType, Terminator, ValueDef, ValueId};

/// Incremental function builder.
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
    param_values: Vec<ValueId>,
}

impl FunctionBuilder {
    /// Start a function; the entry block is created and parameters are
    /// materialized as the first values.
    pub fn new(name: Symbol, params: Vec<IrType>, ret: IrType) -> Self {
        let mut values = IndexVec::new();
        let mut blocks = IndexVec::new();
        let entry = blocks.push(Block {
            label: "entry".to_owned(),
            instrs: Vec::new(),
            terminator: None,
        });
        let mut param_values = Vec::new();
        for (i, &ty) in params.iter().enumerate() {
            let v = values.push(ValueDef {
                instr: Instr::Param { index: i as u32 },
                ty,
            });
            blocks[entry].instrs.push(v);
            param_values.push(v);
        }
        Self {
            func: Function {
                name,
                params,
                ret,
                values,
                blocks,
                entry,
            },
            current: entry,
            param_values,
        }
    }

    /// The value of the n-th parameter.
    pub fn param(&self, index: usize) -> ValueId {
        self.param_values[index]
    }

    /// The block the cursor points at.
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Create a new block without moving the cursor.
    pub fn new_block(&mut self, label: &str) -> BlockId {
        let n = self.func.blocks.len();
        self.func.blocks.push(Block {
            label: format!("{}{}", label, n),
            instrs: Vec::new(),
            terminator: None,
        })
    }

    /// Move the cursor.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// True when the current block already has a terminator.
    pub fn is_terminated(&self) -> bool {
        self.func.blocks[self.current].terminator.is_some()
    }

    /// Append an instruction to the current block. Code after a
    /// terminator (e.g. statements following a `return`) lands in a fresh
    /// unreachable block so lowering can proceed without special cases.
    pub fn push(&mut self, instr: Instr, ty: IrType) -> ValueId {
        if self.is_terminated() {
            let dead = self.new_block("dead");
            self.current = dead;
        }
        let v = self.func.values.push(ValueDef { instr, ty });
        self.func.blocks[self.current].instrs.push(v);
        v
    }

    /// Append an instruction to the entry block, regardless of the
    /// cursor. Stack slots live here so their values dominate every
    /// block.
    pub fn push_entry(&mut self, instr: Instr, ty: IrType) -> ValueId {
        let v = self.func.values.push(ValueDef { instr, ty });
        let entry = self.func.entry;
        self.func.blocks[entry].instrs.push(v);
        v
    }

    /// Terminate the current block; a second terminator is ignored (the
    /// first one wins, matching source-order dead code).
    pub fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.func.blocks[self.current];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    /// The type of a value.
    pub fn value_ty(&self, v: ValueId) -> IrType {
        self.func.values[v].ty
    }

    /// Finish: unterminated blocks fall back to `ret void` (for void
    /// functions) or `unreachable`.
    pub fn finish(mut self) -> Function {
        for block in self.func.blocks.iter_mut() {
            if block.terminator.is_none() {
                block.terminator = Some(if self.func.ret == IrType::Void {
                    Terminator::Ret { value: None }
                } else {
                    Terminator::Unreachable
                });
            }
        }
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_block_and_params() {
        let b = FunctionBuilder::new(
            Symbol::intern("f"),
            vec![IrType::I64, IrType::Ptr],
            IrType::I64,
        );
        assert_eq!(b.value_ty(b.param(0)), IrType::I64);
        assert_eq!(b.value_ty(b.param(1)), IrType::Ptr);
    }

    #[test]
    fn test_push_and_terminate() {
        let mut b = FunctionBuilder::new(Symbol::intern("f"), vec![], IrType::I64);
        let c = b.push(Instr::ConstInt { ty: IrType::I64, value: 7 }, IrType::I64);
        b.terminate(Terminator::Ret { value: Some(c) });
        assert!(b.is_terminated());

        let func = b.finish();
        assert_eq!(func.blocks.len(), 1);
        assert!(matches!(
            func.blocks[func.entry].terminator,
            Some(Terminator::Ret { value: Some(_) })
        ));
    }

    #[test]
    fn test_push_after_terminator_goes_to_dead_block() {
        let mut b = FunctionBuilder::new(Symbol::intern("f"), vec![], IrType::Void);
        b.terminate(Terminator::Ret { value: None });
        b.push(Instr::ConstInt { ty: IrType::I64, value: 1 }, IrType::I64);
        let func = b.finish();
        assert_eq!(func.blocks.len(), 2);
    }

    #[test]
    fn test_finish_terminates_open_blocks() {
        let mut b = FunctionBuilder::new(Symbol::intern("f"), vec![], IrType::Void);
        let extra = b.new_block("merge");
        b.terminate(Terminator::Br { target: extra });
        b.switch_to(extra);
        let func = b.finish();
        assert!(func.blocks.iter().all(|bb| bb.terminator.is_some()));
    }
}
