//! The IR data model: the ABI contract between the middle-end and any
//! back-end.
//!
//! A module contains named functions, external declarations, global
//! variables, and struct layouts. A function holds typed parameters, a
//! return type, and basic blocks; a block is a label plus an ordered
//! instruction list ending in a terminator. Instructions are
//! three-address: each produces at most one [`ValueId`], and operands are
//! value ids.
//!
//! All pointers are opaque: [`IrType::Ptr`] carries no pointee. The
//! element or field type travels with each operation instead — loads and
//! stores carry their value type, [`Instr::FieldPtr`] names a struct
//! layout and field index, [`Instr::IndexPtr`] carries the element type.
//! This is deliberate and must not be optimized away by recovering a
//! pointee from a pointer.

use std::fmt;

use indexmap::IndexMap;
use sablec_util::{define_idx, IndexVec, Symbol};

define_idx!(
    /// A value produced by an instruction, unique within its function.
    ValueId
);
define_idx!(
    /// A basic block within a function.
    BlockId
);

/// IR-level types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrType {
    /// No value.
    Void,
    /// 1-bit boolean.
    I1,
    /// 8-bit integer.
    I8,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Opaque pointer.
    Ptr,
}

impl IrType {
    /// Size in bytes for layout computations; booleans and bytes take one
    /// byte, pointers and 64-bit scalars eight.
    pub fn size(self) -> u32 {
        match self {
            IrType::Void => 0,
            IrType::I1 | IrType::I8 => 1,
            IrType::I32 | IrType::F32 => 4,
            IrType::I64 | IrType::F64 | IrType::Ptr => 8,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IrType::Void => "void",
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::F32 => "f32",
            IrType::F64 => "f64",
            IrType::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// A named struct layout. Fields are laid out in order, 8-byte aligned;
/// the byte offset of field `i` is `8 * i`.
#[derive(Clone, Debug)]
pub struct StructLayout {
    pub name: Symbol,
    pub fields: Vec<IrType>,
}

impl StructLayout {
    /// Total allocation size in bytes.
    pub fn size(&self) -> u32 {
        (self.fields.len() as u32).max(1) * 8
    }
}

/// Integer and float arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// Comparisons; the `F`-prefixed variants are float orderings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    FEq,
    FNe,
    FLt,
    FLe,
    FGt,
    FGe,
}

/// Numeric conversions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastKind {
    /// Sign-extending integer widening.
    SExt,
    /// Integer narrowing.
    Trunc,
    /// Signed integer to float.
    IntToFloat,
    /// Float to signed integer.
    FloatToInt,
    /// f32 → f64.
    FloatExt,
    /// f64 → f32.
    FloatTrunc,
}

/// What a call targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    /// A named function or external.
    Direct(Symbol),
    /// An indirect call through a code-pointer value.
    Indirect(ValueId),
}

/// One instruction. Each produces a value of the [`ValueDef`]'s type
/// (void-typed instructions produce an unusable placeholder).
#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    /// Integer constant of the given width.
    ConstInt { ty: IrType, value: i64 },
    /// Float constant of the given width.
    ConstFloat { ty: IrType, value: f64 },
    /// Pointer to an interned global string.
    ConstStr { value: Symbol },
    /// Boolean constant.
    ConstBool { value: bool },
    /// Null pointer.
    ConstNull,
    /// The n-th function parameter.
    Param { index: u32 },
    /// Stack slot for one scalar of `ty`; yields its address.
    Alloc { ty: IrType },
    /// Heap allocation of `size` bytes; yields the pointer.
    Malloc { size: ValueId },
    /// Release a heap allocation.
    Free { ptr: ValueId },
    /// Typed load; the value type travels with the operation.
    Load { ty: IrType, ptr: ValueId },
    /// Typed store.
    Store { ty: IrType, ptr: ValueId, value: ValueId },
    /// Address of field `index` of the named struct layout.
    FieldPtr {
        struct_name: Symbol,
        base: ValueId,
        index: u32,
    },
    /// Address of element `index` in an array of `elem_ty`.
    IndexPtr {
        elem_ty: IrType,
        base: ValueId,
        index: ValueId,
    },
    /// Arithmetic.
    Bin {
        op: BinOp,
        ty: IrType,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Comparison; yields i1.
    Cmp {
        op: CmpOp,
        ty: IrType,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Call; `ty` is the result type.
    Call {
        callee: Callee,
        args: Vec<ValueId>,
        ty: IrType,
    },
    /// Reinterpreting cast (pointer-compatible values).
    Bitcast { value: ValueId, ty: IrType },
    /// Numeric conversion.
    Cast {
        kind: CastKind,
        value: ValueId,
        ty: IrType,
    },
    /// SSA join point for values converging from predecessor blocks.
    Phi {
        ty: IrType,
        incomings: Vec<(BlockId, ValueId)>,
    },
    /// Code pointer of a named function.
    FuncAddr { name: Symbol },
    /// Address of a global variable.
    GlobalAddr { name: Symbol },
}

/// Block terminator; control flow is otherwise structured.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Br { target: BlockId },
    CondBr {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Ret { value: Option<ValueId> },
    Unreachable,
}

/// A value definition: the instruction and its result type.
#[derive(Clone, Debug)]
pub struct ValueDef {
    pub instr: Instr,
    pub ty: IrType,
}

/// A basic block.
#[derive(Clone, Debug)]
pub struct Block {
    pub label: String,
    pub instrs: Vec<ValueId>,
    pub terminator: Option<Terminator>,
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Symbol,
    pub params: Vec<IrType>,
    pub ret: IrType,
    pub values: IndexVec<ValueId, ValueDef>,
    pub blocks: IndexVec<BlockId, Block>,
    pub entry: BlockId,
}

impl Function {
    /// All instructions, in block order.
    pub fn iter_instrs(&self) -> impl Iterator<Item = &Instr> {
        self.blocks
            .iter()
            .flat_map(move |b| b.instrs.iter().map(move |&v| &self.values[v].instr))
    }

    /// Count of direct calls to `name`.
    pub fn calls_to(&self, name: &str) -> usize {
        self.iter_instrs()
            .filter(|i| {
                matches!(i, Instr::Call { callee: Callee::Direct(n), .. } if n.as_str() == name)
            })
            .count()
    }
}

/// An external function declaration (runtime or libc symbol).
#[derive(Clone, Debug)]
pub struct ExternDecl {
    pub name: Symbol,
    pub params: Vec<IrType>,
    pub ret: IrType,
    pub variadic: bool,
}

/// A global variable, zero-initialized; module initialization code stores
/// the real initial values.
#[derive(Clone, Debug)]
pub struct GlobalDef {
    pub name: Symbol,
    pub ty: IrType,
}

/// A whole IR module: the sole exit artifact of the pipeline.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub functions: IndexMap<Symbol, Function>,
    pub externals: IndexMap<Symbol, ExternDecl>,
    pub globals: IndexMap<Symbol, GlobalDef>,
    pub structs: IndexMap<Symbol, StructLayout>,
}

impl Module {
    /// Function lookup by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(&Symbol::intern(name))
    }

    /// True when `name` is declared as an external.
    pub fn has_external(&self, name: &str) -> bool {
        self.externals.contains_key(&Symbol::intern(name))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ext in self.externals.values() {
            let params: Vec<String> = ext.params.iter().map(|t| t.to_string()).collect();
            let variadic = if ext.variadic { ", ..." } else { "" };
            writeln!(
                f,
                "declare {} @{}({}{})",
                ext.ret,
                ext.name,
                params.join(", "),
                variadic
            )?;
        }
        for global in self.globals.values() {
            writeln!(f, "global {} @{}", global.ty, global.name)?;
        }
        for layout in self.structs.values() {
            let fields: Vec<String> = layout.fields.iter().map(|t| t.to_string()).collect();
            writeln!(f, "struct %{} = {{ {} }}", layout.name, fields.join(", "))?;
        }
        for func in self.functions.values() {
            write_function(f, func)?;
        }
        Ok(())
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, func: &Function) -> fmt::Result {
    let params: Vec<String> = func
        .params
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{} %p{}", t, i))
        .collect();
    writeln!(f, "define {} @{}({}) {{", func.ret, func.name, params.join(", "))?;
    for (block_id, block) in func.blocks.iter_enumerated() {
        writeln!(f, "{}:", block.label)?;
        for &value in &block.instrs {
            let def = &func.values[value];
            write!(f, "  %{} = ", value.0)?;
            write_instr(f, &def.instr, def.ty)?;
            writeln!(f)?;
        }
        match &block.terminator {
            Some(Terminator::Br { target }) => {
                writeln!(f, "  br label %{}", func.blocks[*target].label)?
            }
            Some(Terminator::CondBr {
                cond,
                then_bb,
                else_bb,
            }) => writeln!(
                f,
                "  br i1 %{}, label %{}, label %{}",
                cond.0, func.blocks[*then_bb].label, func.blocks[*else_bb].label
            )?,
            Some(Terminator::Ret { value: Some(v) }) => writeln!(f, "  ret %{}", v.0)?,
            Some(Terminator::Ret { value: None }) => writeln!(f, "  ret void")?,
            Some(Terminator::Unreachable) => writeln!(f, "  unreachable")?,
            None => writeln!(f, "  ; missing terminator in block {}", block_id.0)?,
        }
    }
    writeln!(f, "}}")
}

fn write_instr(f: &mut fmt::Formatter<'_>, instr: &Instr, ty: IrType) -> fmt::Result {
    match instr {
        Instr::ConstInt { value, .. } => write!(f, "const {} {}", ty, value),
        Instr::ConstFloat { value, .. } => write!(f, "const {} {}", ty, value),
        Instr::ConstStr { value } => write!(f, "str {:?}", value.as_str()),
        Instr::ConstBool { value } => write!(f, "const i1 {}", value),
        Instr::ConstNull => write!(f, "null"),
        Instr::Param { index } => write!(f, "param {}", index),
        Instr::Alloc { ty } => write!(f, "alloc {}", ty),
        Instr::Malloc { size } => write!(f, "malloc %{}", size.0),
        Instr::Free { ptr } => write!(f, "free %{}", ptr.0),
        Instr::Load { ty, ptr } => write!(f, "load {} %{}", ty, ptr.0),
        Instr::Store { ty, ptr, value } => write!(f, "store {} %{} -> %{}", ty, value.0, ptr.0),
        Instr::FieldPtr {
            struct_name,
            base,
            index,
        } => write!(f, "fieldptr %{} %{} #{}", struct_name, base.0, index),
        Instr::IndexPtr {
            elem_ty,
            base,
            index,
        } => write!(f, "indexptr {} %{} [%{}]", elem_ty, base.0, index.0),
        Instr::Bin { op, ty, lhs, rhs } => {
            write!(f, "{:?} {} %{} %{}", op, ty, lhs.0, rhs.0)
        }
        Instr::Cmp { op, ty, lhs, rhs } => {
            write!(f, "cmp {:?} {} %{} %{}", op, ty, lhs.0, rhs.0)
        }
        Instr::Call { callee, args, ty } => {
            let args: Vec<String> = args.iter().map(|a| format!("%{}", a.0)).collect();
            match callee {
                Callee::Direct(name) => write!(f, "call {} @{}({})", ty, name, args.join(", ")),
                Callee::Indirect(v) => write!(f, "call {} %{}({})", ty, v.0, args.join(", ")),
            }
        }
        Instr::Bitcast { value, ty } => write!(f, "bitcast %{} to {}", value.0, ty),
        Instr::Cast { kind, value, ty } => {
            write!(f, "{:?} %{} to {}", kind, value.0, ty)
        }
        Instr::Phi { ty, incomings } => {
            let inc: Vec<String> = incomings
                .iter()
                .map(|(b, v)| format!("[bb{} %{}]", b.0, v.0))
                .collect();
            write!(f, "phi {} {}", ty, inc.join(" "))
        }
        Instr::FuncAddr { name } => write!(f, "funcaddr @{}", name),
        Instr::GlobalAddr { name } => write!(f, "globaladdr @{}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(IrType::I1.size(), 1);
        assert_eq!(IrType::I32.size(), 4);
        assert_eq!(IrType::I64.size(), 8);
        assert_eq!(IrType::Ptr.size(), 8);
        assert_eq!(IrType::Void.size(), 0);
    }

    #[test]
    fn test_struct_layout_size() {
        let layout = StructLayout {
            name: Symbol::intern("pair"),
            fields: vec![IrType::I64, IrType::Ptr],
        };
        assert_eq!(layout.size(), 16);
        // Even an empty layout allocates one slot.
        let empty = StructLayout {
            name: Symbol::intern("unit"),
            fields: vec![],
        };
        assert_eq!(empty.size(), 8);
    }

    #[test]
    fn test_module_display_contains_externals() {
        let mut module = Module::default();
        module.externals.insert(
            Symbol::intern("malloc"),
            ExternDecl {
                name: Symbol::intern("malloc"),
                params: vec![IrType::I64],
                ret: IrType::Ptr,
                variadic: false,
            },
        );
        let text = module.to_string();
        assert!(text.contains("declare ptr @malloc(i64)"));
    }
}
