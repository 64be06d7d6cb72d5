//! In-memory IR and the [`Builder`] that implements [`Backend`] over it.
//!
//! The module is deliberately close to what an LLVM builder would produce:
//! named structure types, globals with constant initializers, functions made
//! of blocks of typed instructions. Storage is explicit (`Alloca` for the
//! frame, `HeapAlloc` for model instances that escape it), so
//! struct-vs-model semantics are already decided by the time a lowering sees
//! the module.

use crate::backend::{Backend, BackendError, IrType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Int(i64),
    Struct(Vec<Constant>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Param(u32),
    /// Result of the instruction with this id in the current function.
    Inst(u32),
    Const(Constant),
    /// Address of the global with this index.
    Global(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub kind: ValueKind,
    pub ty: IrType,
}

impl Value {
    pub fn constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Const(constant) => Some(constant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Alloca { ty: IrType, name: Option<String> },
    /// Storage for `ty` that outlives the function.
    HeapAlloc { ty: IrType },
    Store { value: Value, ptr: Value },
    Load { ptr: Value },
    Call { callee: FuncId, args: Vec<Value> },
    Add { lhs: Value, rhs: Value },
    Sub { lhs: Value, rhs: Value },
    /// Address of field `index` of the structure at `ptr`.
    FieldAddr { ptr: Value, index: usize },
    /// Structure value from non-constant fields.
    Aggregate { fields: Vec<Value> },
    Ret { value: Option<Value> },
}

impl InstKind {
    /// Values read by the instruction, in evaluation order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::HeapAlloc { .. } | InstKind::Ret { value: None } => {
                Vec::new()
            }
            InstKind::Store { value, ptr } => vec![ptr, value],
            InstKind::Load { ptr } | InstKind::FieldAddr { ptr, .. } => vec![ptr],
            InstKind::Call { args, .. } => args.iter().collect(),
            InstKind::Add { lhs, rhs } | InstKind::Sub { lhs, rhs } => vec![lhs, rhs],
            InstKind::Aggregate { fields } => fields.iter().collect(),
            InstKind::Ret { value: Some(value) } => vec![value],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub id: u32,
    /// Result type; `Void` for stores and returns.
    pub ty: IrType,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<Inst>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    /// Empty until a body has been started.
    pub blocks: Vec<Block>,
}

impl FunctionDef {
    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|block| block.insts.iter())
    }

    fn inst_count(&self) -> u32 {
        self.blocks.iter().map(|block| block.insts.len() as u32).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<IrType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDef {
    pub name: String,
    pub ty: IrType,
    pub init: Constant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub structs: Vec<StructDef>,
    pub globals: Vec<GlobalDef>,
    pub functions: Vec<FunctionDef>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Module::default()
        }
    }

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|def| def.name == name)
    }

    pub fn function(&self, id: FuncId) -> Option<&FunctionDef> {
        self.functions.get(id.0)
    }

    /// Type of field `index` behind a pointer to a named structure.
    pub fn field_type(&self, ptr: &IrType, index: usize) -> Option<&IrType> {
        match ptr.pointee()? {
            IrType::Struct(name) => self.struct_def(name)?.fields.get(index),
            _ => None,
        }
    }
}

/// Builds a [`Module`] one instruction at a time.
///
/// Misuse that the [`Backend`] signatures cannot report (an instruction
/// outside a function, a load through a non-pointer) is recorded and
/// surfaces from [`Backend::verify`].
/// Lengths of the module tables when [`Backend::checkpoint`] was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    structs: usize,
    globals: usize,
    functions: usize,
    problems: usize,
}

#[derive(Debug, Default)]
pub struct Builder {
    module: Module,
    current: Option<FuncId>,
    problems: Vec<BackendError>,
}

impl Builder {
    pub fn new(module_name: impl Into<String>) -> Self {
        Builder {
            module: Module::new(module_name),
            current: None,
            problems: Vec::new(),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn finish(self) -> Module {
        self.module
    }

    fn problem(&mut self, message: impl Into<String>) {
        let error = match self.current.and_then(|id| self.module.function(id)) {
            Some(function) => BackendError::in_function(&function.name, message),
            None => BackendError::module(message),
        };
        self.problems.push(error);
    }

    fn poison(ty: IrType) -> Value {
        Value {
            kind: ValueKind::Const(Constant::Int(0)),
            ty,
        }
    }

    fn push(&mut self, ty: IrType, kind: InstKind) -> Value {
        let Some(function) = self
            .current
            .and_then(|id| self.module.functions.get_mut(id.0))
        else {
            self.problem("instruction emitted outside of a function");
            return Builder::poison(ty);
        };
        let id = function.inst_count();
        let Some(block) = function.blocks.last_mut() else {
            self.problem("instruction emitted before the entry block");
            return Builder::poison(ty);
        };
        block.insts.push(Inst {
            id,
            ty: ty.clone(),
            kind,
        });
        Value {
            kind: ValueKind::Inst(id),
            ty,
        }
    }
}

impl Backend for Builder {
    type Value = Value;
    type Function = FuncId;
    type Checkpoint = Checkpoint;

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            structs: self.module.structs.len(),
            globals: self.module.globals.len(),
            functions: self.module.functions.len(),
            problems: self.problems.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.module.structs.truncate(checkpoint.structs);
        self.module.globals.truncate(checkpoint.globals);
        self.module.functions.truncate(checkpoint.functions);
        self.problems.truncate(checkpoint.problems);
        self.current = None;
    }

    fn declare_struct(&mut self, name: &str, fields: &[IrType]) {
        self.module.structs.push(StructDef {
            name: name.to_string(),
            fields: fields.to_vec(),
        });
    }

    fn declare_function(&mut self, name: &str, params: &[IrType], ret: &IrType) -> FuncId {
        self.module.functions.push(FunctionDef {
            name: name.to_string(),
            params: params.to_vec(),
            ret: ret.clone(),
            blocks: Vec::new(),
        });
        FuncId(self.module.functions.len() - 1)
    }

    fn append_entry_block(&mut self, function: &FuncId) {
        match self.module.functions.get_mut(function.0) {
            Some(def) => {
                def.blocks.push(Block {
                    name: "entry".to_string(),
                    insts: Vec::new(),
                });
                self.current = Some(*function);
            }
            None => self.problem(format!("unknown function #{}", function.0)),
        }
    }

    fn param(&self, function: &FuncId, index: usize) -> Value {
        let ty = self
            .module
            .function(*function)
            .and_then(|def| def.params.get(index))
            .cloned()
            .unwrap_or(IrType::Void);
        Value {
            kind: ValueKind::Param(index as u32),
            ty,
        }
    }

    fn const_int(&mut self, ty: &IrType, value: i64) -> Value {
        Value {
            kind: ValueKind::Const(Constant::Int(value)),
            ty: ty.clone(),
        }
    }

    fn build_alloca(&mut self, ty: &IrType, name: Option<&str>) -> Value {
        self.push(
            ty.clone().pointer_to(),
            InstKind::Alloca {
                ty: ty.clone(),
                name: name.map(str::to_string),
            },
        )
    }

    fn build_heap_alloc(&mut self, ty: &IrType) -> Value {
        self.push(ty.clone().pointer_to(), InstKind::HeapAlloc { ty: ty.clone() })
    }

    fn build_store(&mut self, value: Value, ptr: Value) {
        self.push(IrType::Void, InstKind::Store { value, ptr });
    }

    fn build_load(&mut self, ptr: Value) -> Value {
        let Some(ty) = ptr.ty.pointee().cloned() else {
            self.problem(format!("load through non-pointer `{}`", ptr.ty));
            return Builder::poison(IrType::Void);
        };
        self.push(ty, InstKind::Load { ptr })
    }

    fn build_call(&mut self, function: &FuncId, args: Vec<Value>) -> Value {
        let ret = match self.module.function(*function) {
            Some(def) => def.ret.clone(),
            None => {
                self.problem(format!("call to unknown function #{}", function.0));
                return Builder::poison(IrType::Void);
            }
        };
        self.push(
            ret,
            InstKind::Call {
                callee: *function,
                args,
            },
        )
    }

    fn build_add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.push(lhs.ty.clone(), InstKind::Add { lhs, rhs })
    }

    fn build_sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.push(lhs.ty.clone(), InstKind::Sub { lhs, rhs })
    }

    fn build_struct_gep(&mut self, ptr: Value, index: usize) -> Value {
        let Some(field) = self.module.field_type(&ptr.ty, index).cloned() else {
            self.problem(format!("no field {index} behind `{}`", ptr.ty));
            return Builder::poison(IrType::Void.pointer_to());
        };
        self.push(field.pointer_to(), InstKind::FieldAddr { ptr, index })
    }

    fn build_struct(&mut self, ty: &IrType, fields: Vec<Value>) -> Value {
        let constants: Option<Vec<Constant>> =
            fields.iter().map(|field| field.constant().cloned()).collect();
        match constants {
            Some(constants) => Value {
                kind: ValueKind::Const(Constant::Struct(constants)),
                ty: ty.clone(),
            },
            None => self.push(ty.clone(), InstKind::Aggregate { fields }),
        }
    }

    fn add_global(&mut self, name: &str, initializer: Value) -> Value {
        let Some(init) = initializer.constant().cloned() else {
            self.problem(format!("global `{name}` needs a constant initializer"));
            return Builder::poison(initializer.ty.pointer_to());
        };
        self.module.globals.push(GlobalDef {
            name: name.to_string(),
            ty: initializer.ty.clone(),
            init,
        });
        Value {
            kind: ValueKind::Global(self.module.globals.len() - 1),
            ty: initializer.ty.pointer_to(),
        }
    }

    fn build_ret_void(&mut self) {
        self.push(IrType::Void, InstKind::Ret { value: None });
    }

    fn build_ret(&mut self, value: Value) {
        self.push(IrType::Void, InstKind::Ret { value: Some(value) });
    }

    fn verify(&self) -> Result<(), BackendError> {
        if let Some(problem) = self.problems.first() {
            return Err(problem.clone());
        }
        for global in &self.module.globals {
            check_constant(&self.module, &global.ty, &global.init)
                .map_err(|message| BackendError::module(format!("global `{}`: {message}", global.name)))?;
        }
        for function in &self.module.functions {
            verify_function(&self.module, function)
                .map_err(|message| BackendError::in_function(&function.name, message))?;
        }
        Ok(())
    }
}

fn check_constant(module: &Module, ty: &IrType, constant: &Constant) -> Result<(), String> {
    match (ty, constant) {
        (IrType::Int(_), Constant::Int(_)) => Ok(()),
        (IrType::Struct(name), Constant::Struct(values)) => {
            let def = module
                .struct_def(name)
                .ok_or_else(|| format!("unknown structure `{name}`"))?;
            if def.fields.len() != values.len() {
                return Err(format!("`{name}` takes {} fields", def.fields.len()));
            }
            def.fields
                .iter()
                .zip(values)
                .try_for_each(|(ty, value)| check_constant(module, ty, value))
        }
        _ => Err(format!("constant does not fit `{ty}`")),
    }
}

fn expect_type(found: &IrType, expected: &IrType, what: &str) -> Result<(), String> {
    if found != expected {
        return Err(format!("{what}: expected `{expected}`, found `{found}`"));
    }
    Ok(())
}

fn verify_function(module: &Module, function: &FunctionDef) -> Result<(), String> {
    if function.blocks.is_empty() {
        return Err("declared but never given a body".to_string());
    }

    for block in &function.blocks {
        let Some(last) = block.insts.last() else {
            return Err(format!("block `{}` is empty", block.name));
        };
        if !matches!(last.kind, InstKind::Ret { .. }) {
            return Err(format!("block `{}` has no terminator", block.name));
        }

        for (position, inst) in block.insts.iter().enumerate() {
            if position + 1 < block.insts.len() && matches!(inst.kind, InstKind::Ret { .. }) {
                return Err(format!("instructions after return in `{}`", block.name));
            }
            verify_inst(module, function, inst)?;
        }
    }
    Ok(())
}

fn verify_inst(module: &Module, function: &FunctionDef, inst: &Inst) -> Result<(), String> {
    match &inst.kind {
        InstKind::Alloca { .. }
        | InstKind::HeapAlloc { .. }
        | InstKind::Load { .. }
        | InstKind::FieldAddr { .. } => Ok(()),
        InstKind::Store { value, ptr } => {
            expect_type(&value.ty.clone().pointer_to(), &ptr.ty, "store")
        }
        InstKind::Add { lhs, rhs } | InstKind::Sub { lhs, rhs } => {
            if !matches!(lhs.ty, IrType::Int(_)) {
                return Err(format!("arithmetic on `{}`", lhs.ty));
            }
            expect_type(&rhs.ty, &lhs.ty, "arithmetic")
        }
        InstKind::Call { callee, args } => {
            let target = module
                .function(*callee)
                .ok_or_else(|| format!("call to unknown function #{}", callee.0))?;
            if target.params.len() != args.len() {
                return Err(format!(
                    "`{}` takes {} arguments, {} given",
                    target.name,
                    target.params.len(),
                    args.len()
                ));
            }
            target
                .params
                .iter()
                .zip(args)
                .try_for_each(|(param, arg)| expect_type(&arg.ty, param, "call argument"))
        }
        InstKind::Aggregate { fields } => {
            let IrType::Struct(name) = &inst.ty else {
                return Err(format!("aggregate of non-structure `{}`", inst.ty));
            };
            let def = module
                .struct_def(name)
                .ok_or_else(|| format!("unknown structure `{name}`"))?;
            if def.fields.len() != fields.len() {
                return Err(format!("`{name}` takes {} fields", def.fields.len()));
            }
            def.fields
                .iter()
                .zip(fields)
                .try_for_each(|(ty, field)| expect_type(&field.ty, ty, "field"))
        }
        InstKind::Ret { value } => match value {
            None => expect_type(&IrType::Void, &function.ret, "return"),
            Some(value) => expect_type(&value.ty, &function.ret, "return"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32_ty() -> IrType {
        IrType::Int(32)
    }

    #[test]
    fn builds_and_verifies_a_function() {
        let mut builder = Builder::new("test");
        let add = builder.declare_function("add", &[i32_ty(), i32_ty()], &i32_ty());
        builder.append_entry_block(&add);
        let lhs = builder.param(&add, 0);
        let rhs = builder.param(&add, 1);
        let sum = builder.build_add(lhs, rhs);
        builder.build_ret(sum);

        builder.verify().expect("verify");
        let module = builder.finish();
        let function = module.function(add).expect("add");
        assert_eq!(function.insts().count(), 2);
    }

    #[test]
    fn constant_fields_fold_into_constant_structures() {
        let mut builder = Builder::new("test");
        builder.declare_struct("P", &[i32_ty(), i32_ty()]);
        let point = IrType::Struct("P".to_string());
        let x = builder.const_int(&i32_ty(), 1);
        let y = builder.const_int(&i32_ty(), 2);
        let value = builder.build_struct(&point, vec![x, y]);
        assert_eq!(
            value.constant(),
            Some(&Constant::Struct(vec![Constant::Int(1), Constant::Int(2)]))
        );

        let global = builder.add_global("origin", value);
        assert_eq!(global.ty, point.pointer_to());
        builder.verify().expect("verify");
    }

    #[test]
    fn field_addresses_are_typed_from_the_layout() {
        let mut builder = Builder::new("test");
        builder.declare_struct("P", &[IrType::Int(8), i32_ty()]);
        let point = IrType::Struct("P".to_string());
        let f = builder.declare_function("f", &[], &IrType::Int(8));
        builder.append_entry_block(&f);
        let slot = builder.build_alloca(&point, Some("p"));
        let field = builder.build_struct_gep(slot, 0);
        assert_eq!(field.ty, IrType::Int(8).pointer_to());
        let loaded = builder.build_load(field);
        builder.build_ret(loaded);
        builder.verify().expect("verify");
    }

    #[test]
    fn missing_terminator_fails_verification() {
        let mut builder = Builder::new("test");
        let f = builder.declare_function("f", &[], &IrType::Void);
        builder.append_entry_block(&f);
        builder.build_alloca(&i32_ty(), None);

        let error = builder.verify().unwrap_err();
        assert_eq!(error.function.as_deref(), Some("f"));
        assert!(error.message.contains("terminator"));
    }

    #[test]
    fn mismatched_return_fails_verification() {
        let mut builder = Builder::new("test");
        let f = builder.declare_function("f", &[], &i32_ty());
        builder.append_entry_block(&f);
        builder.build_ret_void();
        assert!(builder.verify().is_err());
    }

    #[test]
    fn bodiless_function_fails_verification() {
        let mut builder = Builder::new("test");
        builder.declare_function("f", &[], &IrType::Void);
        let error = builder.verify().unwrap_err();
        assert!(error.message.contains("never given a body"));
    }

    #[test]
    fn instructions_outside_functions_are_reported() {
        let mut builder = Builder::new("test");
        builder.build_ret_void();
        let error = builder.verify().unwrap_err();
        assert_eq!(error.function, None);
    }

    #[test]
    fn rollback_discards_later_declarations() {
        let mut builder = Builder::new("test");
        let keep = builder.declare_function("keep", &[], &IrType::Void);
        builder.append_entry_block(&keep);
        builder.build_ret_void();
        let checkpoint = builder.checkpoint();

        builder.declare_struct("P", &[i32_ty()]);
        let zero = builder.const_int(&i32_ty(), 0);
        builder.add_global("g", zero);
        let half = builder.declare_function("half", &[], &i32_ty());
        builder.append_entry_block(&half);
        let not_a_pointer = builder.const_int(&i32_ty(), 0);
        builder.build_load(not_a_pointer);
        assert!(builder.verify().is_err());

        builder.rollback(checkpoint);
        builder.verify().expect("verify after rollback");
        let module = builder.finish();
        assert!(module.structs.is_empty());
        assert!(module.globals.is_empty());
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.function(keep).map(|def| def.name.as_str()), Some("keep"));
    }

    #[test]
    fn heap_allocations_are_typed_pointers() {
        let mut builder = Builder::new("test");
        builder.declare_struct("P", &[i32_ty(), i32_ty()]);
        let point = IrType::Struct("P".to_string());
        let f = builder.declare_function("f", &[], &point.clone().pointer_to());
        builder.append_entry_block(&f);
        let address = builder.build_heap_alloc(&point);
        assert_eq!(address.ty, point.clone().pointer_to());
        builder.build_ret(address);
        builder.verify().expect("verify");

        let module = builder.finish();
        let first = module.function(f).and_then(|def| def.insts().next());
        assert_eq!(first.map(|inst| &inst.kind), Some(&InstKind::HeapAlloc { ty: point }));
    }

    #[test]
    fn call_arguments_are_checked() {
        let mut builder = Builder::new("test");
        let callee = builder.declare_function("g", &[i32_ty()], &IrType::Void);
        builder.append_entry_block(&callee);
        builder.build_ret_void();

        let caller = builder.declare_function("f", &[], &IrType::Void);
        builder.append_entry_block(&caller);
        let wide = builder.const_int(&IrType::Int(64), 1);
        builder.build_call(&callee, vec![wide]);
        builder.build_ret_void();

        let error = builder.verify().unwrap_err();
        assert!(error.message.contains("call argument"));
    }
}
