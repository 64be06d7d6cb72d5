//! WASM backend for SLang.
//!
//! Lowers a verified [`ir::Module`](crate::ir::Module) with `wasm-encoder`.
//!
//! Memory model:
//!
//! - Globals and constant structures live in active data segments placed
//!   after a small null guard.
//! - Stack storage lives in a shadow stack above the data, growing down
//!   from `__stack_pointer`. Every function with stack storage reserves one
//!   frame in its prologue and releases it before each return.
//! - Model instances live in a bump heap that starts at the top of the
//!   stack and grows up through `__heap_pointer`. They are never freed;
//!   memory grows a page at a time when the heap runs past its end.
//! - A structure value is the address of its bytes. Loads, aggregates and
//!   call results of structure type are copied into the current frame right
//!   away, so a structure value never aliases storage that may change.

use std::collections::HashMap;

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ExportKind, ExportSection, Function, FunctionSection,
    GlobalSection, GlobalType, Instruction, MemArg, MemorySection, MemoryType, Module,
    TypeSection, ValType,
};

use crate::backend::IrType;
use crate::error::CoreError;
use crate::ir::{self, Constant, FunctionDef, Inst, InstKind, Value, ValueKind};

const PAGE_SIZE: u32 = 65_536;
/// Addresses below this are never handed out.
const NULL_GUARD: u32 = 8;
const FRAME_ALIGN: u32 = 16;
const HEAP_ALIGN: u32 = 8;

const STACK_POINTER: u32 = 0;
const HEAP_POINTER: u32 = 1;

/// Name under which the linear memory is exported.
pub const MEMORY_EXPORT: &str = "memory";

/// Generate a wasm module for the given IR module.
///
/// Every function is exported under its IR name, alongside the memory.
pub fn generate_wasm(module: &ir::Module, stack_pages: u32) -> Result<Vec<u8>, CoreError> {
    let layouts = Layouts::new(module)?;
    let data = DataImage::new(module, &layouts)?;

    let stack_base = align_to(data.end, FRAME_ALIGN);
    let stack_top = stack_pages
        .checked_mul(PAGE_SIZE)
        .and_then(|size| size.checked_add(stack_base))
        .ok_or_else(|| CoreError::Codegen("stack does not fit in 32-bit memory".to_string()))?;
    let pages = stack_top.div_ceil(PAGE_SIZE).max(1);

    let mut wasm = Module::new();

    let mut types = TypeSection::new();
    let mut functions = FunctionSection::new();
    for function in &module.functions {
        let type_index = types.len();
        types.ty().function(
            function.params.iter().map(val_type),
            result_type(&function.ret),
        );
        functions.function(type_index);
    }
    wasm.section(&types);
    wasm.section(&functions);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: u64::from(pages),
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    wasm.section(&memories);

    let mut globals = GlobalSection::new();
    // __stack_pointer, then __heap_pointer; both start at the top of the stack.
    for _ in [STACK_POINTER, HEAP_POINTER] {
        globals.global(
            GlobalType {
                val_type: ValType::I32,
                mutable: true,
                shared: false,
            },
            &ConstExpr::i32_const(stack_top as i32),
        );
    }
    wasm.section(&globals);

    let mut exports = ExportSection::new();
    for (index, function) in module.functions.iter().enumerate() {
        if function.name == MEMORY_EXPORT {
            return Err(CoreError::Codegen(format!(
                "function name `{MEMORY_EXPORT}` is reserved for the memory export"
            )));
        }
        exports.export(&function.name, ExportKind::Func, index as u32);
    }
    exports.export(MEMORY_EXPORT, ExportKind::Memory, 0);
    wasm.section(&exports);

    let mut code = CodeSection::new();
    for function in &module.functions {
        let body = FunctionLowering::new(module, &layouts, &data, function)?.lower()?;
        code.function(&body);
    }
    wasm.section(&code);

    let mut segments = DataSection::new();
    for (offset, bytes) in &data.segments {
        segments.active(0, &ConstExpr::i32_const(*offset as i32), bytes.iter().copied());
    }
    wasm.section(&segments);

    Ok(wasm.finish())
}

fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn val_type(ty: &IrType) -> ValType {
    match ty {
        IrType::Int(64) => ValType::I64,
        _ => ValType::I32,
    }
}

fn result_type(ty: &IrType) -> Vec<ValType> {
    if ty.is_void() {
        Vec::new()
    } else {
        vec![val_type(ty)]
    }
}

fn unsupported(what: impl std::fmt::Display) -> CoreError {
    CoreError::Codegen(format!("cannot lower {what}"))
}

// ---------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StructLayout {
    size: u32,
    align: u32,
    offsets: Vec<u32>,
}

/// Byte layouts of every declared structure, C-style.
struct Layouts {
    structs: HashMap<String, StructLayout>,
}

impl Layouts {
    fn new(module: &ir::Module) -> Result<Self, CoreError> {
        let mut layouts = Layouts {
            structs: HashMap::new(),
        };
        // Fields only ever name structures declared before them.
        for def in &module.structs {
            let mut offset = 0;
            let mut align = 1;
            let mut offsets = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                let (field_size, field_align) = layouts.size_align(field)?;
                offset = align_to(offset, field_align);
                offsets.push(offset);
                offset += field_size;
                align = align.max(field_align);
            }
            let layout = StructLayout {
                size: align_to(offset, align),
                align,
                offsets,
            };
            layouts.structs.insert(def.name.clone(), layout);
        }
        Ok(layouts)
    }

    fn size_align(&self, ty: &IrType) -> Result<(u32, u32), CoreError> {
        match ty {
            IrType::Int(bits) if *bits <= 8 => Ok((1, 1)),
            IrType::Int(16) => Ok((2, 2)),
            IrType::Int(32) | IrType::Ptr(_) => Ok((4, 4)),
            IrType::Int(64) => Ok((8, 8)),
            IrType::Struct(name) => {
                let layout = self.get(name)?;
                Ok((layout.size, layout.align))
            }
            other => Err(unsupported(format_args!("values of type `{other}`"))),
        }
    }

    fn get(&self, name: &str) -> Result<&StructLayout, CoreError> {
        self.structs
            .get(name)
            .ok_or_else(|| unsupported(format_args!("undeclared structure `%{name}`")))
    }

    fn field_offset(&self, ptr: &IrType, index: usize) -> Result<u32, CoreError> {
        let Some(IrType::Struct(name)) = ptr.pointee() else {
            return Err(unsupported(format_args!("field access through `{ptr}`")));
        };
        self.get(name)?
            .offsets
            .get(index)
            .copied()
            .ok_or_else(|| unsupported(format_args!("field {index} of `%{name}`")))
    }

    fn encode(
        &self,
        module: &ir::Module,
        ty: &IrType,
        constant: &Constant,
        out: &mut [u8],
    ) -> Result<(), CoreError> {
        match (ty, constant) {
            (IrType::Int(_), Constant::Int(value)) => {
                let (size, _) = self.size_align(ty)?;
                let bytes = value.to_le_bytes();
                out[..size as usize].copy_from_slice(&bytes[..size as usize]);
                Ok(())
            }
            (IrType::Struct(name), Constant::Struct(values)) => {
                let layout = self.get(name)?;
                let def = module
                    .struct_def(name)
                    .ok_or_else(|| unsupported(format_args!("undeclared structure `%{name}`")))?;
                for ((field, value), offset) in def.fields.iter().zip(values).zip(&layout.offsets) {
                    self.encode(module, field, value, &mut out[*offset as usize..])?;
                }
                Ok(())
            }
            _ => Err(unsupported(format_args!("constant of type `{ty}`"))),
        }
    }
}

// ---------------------------------------------------------------------
// Data segments
// ---------------------------------------------------------------------

/// Static bytes: globals first, then every distinct constant structure the
/// functions refer to.
struct DataImage {
    globals: Vec<u32>,
    constants: Vec<(IrType, Constant, u32)>,
    segments: Vec<(u32, Vec<u8>)>,
    end: u32,
}

impl DataImage {
    fn new(module: &ir::Module, layouts: &Layouts) -> Result<Self, CoreError> {
        let mut image = DataImage {
            globals: Vec::with_capacity(module.globals.len()),
            constants: Vec::new(),
            segments: Vec::new(),
            end: NULL_GUARD,
        };

        for global in &module.globals {
            let offset = image.place(module, layouts, &global.ty, &global.init)?;
            image.globals.push(offset);
        }

        for function in &module.functions {
            for inst in function.insts() {
                for operand in inst.kind.operands() {
                    if let ValueKind::Const(constant @ Constant::Struct(_)) = &operand.kind {
                        if image.constant_address(&operand.ty, constant).is_none() {
                            let offset = image.place(module, layouts, &operand.ty, constant)?;
                            image
                                .constants
                                .push((operand.ty.clone(), constant.clone(), offset));
                        }
                    }
                }
            }
        }
        Ok(image)
    }

    fn place(
        &mut self,
        module: &ir::Module,
        layouts: &Layouts,
        ty: &IrType,
        constant: &Constant,
    ) -> Result<u32, CoreError> {
        let (size, align) = layouts.size_align(ty)?;
        let offset = align_to(self.end, align);
        let mut bytes = vec![0; size as usize];
        layouts.encode(module, ty, constant, &mut bytes)?;
        self.segments.push((offset, bytes));
        self.end = offset + size;
        Ok(offset)
    }

    fn constant_address(&self, ty: &IrType, constant: &Constant) -> Option<u32> {
        self.constants
            .iter()
            .find(|(known_ty, known, _)| known_ty == ty && known == constant)
            .map(|(_, _, offset)| *offset)
    }
}

// ---------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------

struct FunctionLowering<'a> {
    module: &'a ir::Module,
    layouts: &'a Layouts,
    data: &'a DataImage,
    function: &'a FunctionDef,
    /// Local holding each instruction's result.
    results: HashMap<u32, u32>,
    /// Frame offset of each instruction that owns stack storage.
    slots: HashMap<u32, u32>,
    frame_size: u32,
    frame_pointer: u32,
    body: Function,
}

impl<'a> FunctionLowering<'a> {
    fn new(
        module: &'a ir::Module,
        layouts: &'a Layouts,
        data: &'a DataImage,
        function: &'a FunctionDef,
    ) -> Result<Self, CoreError> {
        let mut slots = HashMap::new();
        let mut frame_size = 0;
        for inst in function.insts() {
            let storage = match &inst.kind {
                InstKind::Alloca { ty, .. } => Some(ty),
                InstKind::Load { .. } | InstKind::Call { .. } | InstKind::Aggregate { .. }
                    if matches!(inst.ty, IrType::Struct(_)) =>
                {
                    Some(&inst.ty)
                }
                _ => None,
            };
            if let Some(ty) = storage {
                let (size, align) = layouts.size_align(ty)?;
                frame_size = align_to(frame_size, align);
                slots.insert(inst.id, frame_size);
                frame_size += size;
            }
        }
        let frame_size = align_to(frame_size, FRAME_ALIGN);

        let mut next_local = function.params.len() as u32;
        let mut locals = Vec::new();
        let frame_pointer = next_local;
        if frame_size > 0 {
            locals.push((1, ValType::I32));
            next_local += 1;
        }
        let mut results = HashMap::new();
        for inst in function.insts() {
            if !inst.ty.is_void() {
                locals.push((1, val_type(&inst.ty)));
                results.insert(inst.id, next_local);
                next_local += 1;
            }
        }

        Ok(FunctionLowering {
            module,
            layouts,
            data,
            function,
            results,
            slots,
            frame_size,
            frame_pointer,
            body: Function::new(locals),
        })
    }

    fn lower(mut self) -> Result<Function, CoreError> {
        if self.function.blocks.is_empty() {
            return Err(unsupported(format_args!(
                "`{}` without a body",
                self.function.name
            )));
        }
        if self.frame_size > 0 {
            self.emit(Instruction::GlobalGet(STACK_POINTER));
            self.emit(Instruction::I32Const(self.frame_size as i32));
            self.emit(Instruction::I32Sub);
            self.emit(Instruction::LocalTee(self.frame_pointer));
            self.emit(Instruction::GlobalSet(STACK_POINTER));
        }

        let function = self.function;
        for inst in function.insts() {
            self.lower_inst(inst)?;
        }
        self.emit(Instruction::End);
        Ok(self.body)
    }

    fn emit(&mut self, instruction: Instruction<'_>) {
        self.body.instruction(&instruction);
    }

    fn set_result(&mut self, inst: &Inst) -> Result<(), CoreError> {
        let local = self
            .results
            .get(&inst.id)
            .copied()
            .ok_or_else(|| unsupported(format_args!("result of instruction {}", inst.id)))?;
        self.emit(Instruction::LocalSet(local));
        Ok(())
    }

    fn slot(&self, inst: &Inst) -> Result<u32, CoreError> {
        self.slots
            .get(&inst.id)
            .copied()
            .ok_or_else(|| unsupported(format_args!("storage of instruction {}", inst.id)))
    }

    fn frame_address(&mut self, offset: u32) {
        self.emit(Instruction::LocalGet(self.frame_pointer));
        if offset > 0 {
            self.emit(Instruction::I32Const(offset as i32));
            self.emit(Instruction::I32Add);
        }
    }

    fn push_value(&mut self, value: &Value) -> Result<(), CoreError> {
        match &value.kind {
            ValueKind::Param(index) => self.emit(Instruction::LocalGet(*index)),
            ValueKind::Inst(id) => {
                let local = self
                    .results
                    .get(id)
                    .copied()
                    .ok_or_else(|| unsupported(format_args!("use of instruction {id}")))?;
                self.emit(Instruction::LocalGet(local));
            }
            ValueKind::Const(Constant::Int(number)) => match value.ty {
                IrType::Int(64) => self.emit(Instruction::I64Const(*number)),
                _ => self.emit(Instruction::I32Const(*number as i32)),
            },
            ValueKind::Const(constant) => {
                let address = self
                    .data
                    .constant_address(&value.ty, constant)
                    .ok_or_else(|| unsupported("an unplaced constant"))?;
                self.emit(Instruction::I32Const(address as i32));
            }
            ValueKind::Global(index) => {
                let address = self
                    .data
                    .globals
                    .get(*index)
                    .copied()
                    .ok_or_else(|| unsupported(format_args!("global #{index}")))?;
                self.emit(Instruction::I32Const(address as i32));
            }
        }
        Ok(())
    }

    fn copy_bytes(&mut self, ty: &IrType) -> Result<(), CoreError> {
        let (size, _) = self.layouts.size_align(ty)?;
        self.emit(Instruction::I32Const(size as i32));
        self.emit(Instruction::MemoryCopy {
            src_mem: 0,
            dst_mem: 0,
        });
        Ok(())
    }

    /// Stores `value` at the address already on the stack plus `offset`.
    fn store(&mut self, value: &Value, offset: u32) -> Result<(), CoreError> {
        if matches!(value.ty, IrType::Struct(_)) {
            if offset > 0 {
                self.emit(Instruction::I32Const(offset as i32));
                self.emit(Instruction::I32Add);
            }
            self.push_value(value)?;
            return self.copy_bytes(&value.ty);
        }

        self.push_value(value)?;
        let memarg = |align| MemArg {
            offset: u64::from(offset),
            align,
            memory_index: 0,
        };
        match &value.ty {
            IrType::Int(bits) if *bits <= 8 => self.emit(Instruction::I32Store8(memarg(0))),
            IrType::Int(16) => self.emit(Instruction::I32Store16(memarg(1))),
            IrType::Int(32) | IrType::Ptr(_) => self.emit(Instruction::I32Store(memarg(2))),
            IrType::Int(64) => self.emit(Instruction::I64Store(memarg(3))),
            other => return Err(unsupported(format_args!("store of `{other}`"))),
        }
        Ok(())
    }

    fn load_scalar(&mut self, ty: &IrType) -> Result<(), CoreError> {
        let memarg = |align| MemArg {
            offset: 0,
            align,
            memory_index: 0,
        };
        match ty {
            IrType::Int(1) => self.emit(Instruction::I32Load8U(memarg(0))),
            IrType::Int(8) => self.emit(Instruction::I32Load8S(memarg(0))),
            IrType::Int(16) => self.emit(Instruction::I32Load16S(memarg(1))),
            IrType::Int(32) | IrType::Ptr(_) => self.emit(Instruction::I32Load(memarg(2))),
            IrType::Int(64) => self.emit(Instruction::I64Load(memarg(3))),
            other => return Err(unsupported(format_args!("load of `{other}`"))),
        }
        Ok(())
    }

    /// Wraps an i32 arithmetic result back into a narrower integer.
    fn narrow(&mut self, ty: &IrType) {
        match ty {
            IrType::Int(1) => {
                self.emit(Instruction::I32Const(1));
                self.emit(Instruction::I32And);
            }
            IrType::Int(8) => self.emit(Instruction::I32Extend8S),
            IrType::Int(16) => self.emit(Instruction::I32Extend16S),
            _ => {}
        }
    }

    fn epilogue(&mut self) {
        if self.frame_size > 0 {
            self.emit(Instruction::LocalGet(self.frame_pointer));
            self.emit(Instruction::I32Const(self.frame_size as i32));
            self.emit(Instruction::I32Add);
            self.emit(Instruction::GlobalSet(STACK_POINTER));
        }
    }

    /// Bumps `__heap_pointer` past one `ty` and grows memory when the heap
    /// runs past its end. Traps when memory cannot grow.
    fn heap_alloc(&mut self, inst: &Inst, ty: &IrType) -> Result<(), CoreError> {
        let (size, _) = self.layouts.size_align(ty)?;
        let size = align_to(size.max(1), HEAP_ALIGN);

        self.emit(Instruction::GlobalGet(HEAP_POINTER));
        self.set_result(inst)?;
        self.emit(Instruction::GlobalGet(HEAP_POINTER));
        self.emit(Instruction::I32Const(size as i32));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::GlobalSet(HEAP_POINTER));

        self.emit(Instruction::GlobalGet(HEAP_POINTER));
        self.memory_end();
        self.emit(Instruction::I32GtU);
        self.emit(Instruction::If(BlockType::Empty));
        self.emit(Instruction::GlobalGet(HEAP_POINTER));
        self.memory_end();
        self.emit(Instruction::I32Sub);
        self.emit(Instruction::I32Const((PAGE_SIZE - 1) as i32));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::I32Const(PAGE_SIZE.trailing_zeros() as i32));
        self.emit(Instruction::I32ShrU);
        self.emit(Instruction::MemoryGrow(0));
        self.emit(Instruction::I32Const(-1));
        self.emit(Instruction::I32Eq);
        self.emit(Instruction::If(BlockType::Empty));
        self.emit(Instruction::Unreachable);
        self.emit(Instruction::End);
        self.emit(Instruction::End);
        Ok(())
    }

    /// Pushes the current memory size in bytes.
    fn memory_end(&mut self) {
        self.emit(Instruction::MemorySize(0));
        self.emit(Instruction::I32Const(PAGE_SIZE.trailing_zeros() as i32));
        self.emit(Instruction::I32Shl);
    }

    fn lower_inst(&mut self, inst: &Inst) -> Result<(), CoreError> {
        match &inst.kind {
            InstKind::Alloca { .. } => {
                let offset = self.slot(inst)?;
                self.frame_address(offset);
                self.set_result(inst)?;
            }
            InstKind::HeapAlloc { ty } => self.heap_alloc(inst, ty)?,
            InstKind::Store { value, ptr } => {
                self.push_value(ptr)?;
                self.store(value, 0)?;
            }
            InstKind::Load { ptr } => {
                if matches!(inst.ty, IrType::Struct(_)) {
                    let offset = self.slot(inst)?;
                    self.frame_address(offset);
                    self.push_value(ptr)?;
                    self.copy_bytes(&inst.ty)?;
                    self.frame_address(offset);
                } else {
                    self.push_value(ptr)?;
                    self.load_scalar(&inst.ty)?;
                }
                self.set_result(inst)?;
            }
            InstKind::Call { callee, args } => {
                for arg in args {
                    self.push_value(arg)?;
                }
                self.emit(Instruction::Call(callee.0 as u32));
                if matches!(inst.ty, IrType::Struct(_)) {
                    // Copy out of the callee's released frame before anything
                    // else can reuse it.
                    self.set_result(inst)?;
                    let offset = self.slot(inst)?;
                    self.frame_address(offset);
                    self.push_value(&Value {
                        kind: ValueKind::Inst(inst.id),
                        ty: inst.ty.clone(),
                    })?;
                    self.copy_bytes(&inst.ty)?;
                    self.frame_address(offset);
                    self.set_result(inst)?;
                } else if !inst.ty.is_void() {
                    self.set_result(inst)?;
                }
            }
            InstKind::Add { lhs, rhs } | InstKind::Sub { lhs, rhs } => {
                self.push_value(lhs)?;
                self.push_value(rhs)?;
                let wide = matches!(inst.ty, IrType::Int(64));
                let instruction = match (&inst.kind, wide) {
                    (InstKind::Add { .. }, true) => Instruction::I64Add,
                    (InstKind::Add { .. }, false) => Instruction::I32Add,
                    (_, true) => Instruction::I64Sub,
                    (_, false) => Instruction::I32Sub,
                };
                self.emit(instruction);
                self.narrow(&inst.ty);
                self.set_result(inst)?;
            }
            InstKind::FieldAddr { ptr, index } => {
                let offset = self.layouts.field_offset(&ptr.ty, *index)?;
                self.push_value(ptr)?;
                if offset > 0 {
                    self.emit(Instruction::I32Const(offset as i32));
                    self.emit(Instruction::I32Add);
                }
                self.set_result(inst)?;
            }
            InstKind::Aggregate { fields } => {
                let IrType::Struct(name) = &inst.ty else {
                    return Err(unsupported(format_args!("aggregate of `{}`", inst.ty)));
                };
                let offsets = self.layouts.get(name)?.offsets.clone();
                let slot = self.slot(inst)?;
                for (field, offset) in fields.iter().zip(offsets) {
                    self.frame_address(slot);
                    self.store(field, offset)?;
                }
                self.frame_address(slot);
                self.set_result(inst)?;
            }
            InstKind::Ret { value } => {
                if let Some(value) = value {
                    self.push_value(value)?;
                }
                self.epilogue();
                self.emit(Instruction::Return);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::ir::Builder;

    fn instantiate(wasm: &[u8]) -> (wasmi::Store<()>, wasmi::Instance) {
        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        (store, instance)
    }

    fn point_module() -> Builder {
        let mut builder = Builder::new("test");
        builder.declare_struct("P", &[IrType::Int(8), IrType::Int(32)]);
        builder
    }

    #[test]
    fn output_passes_validation() {
        let mut builder = point_module();
        let f = builder.declare_function("f", &[IrType::Int(64)], &IrType::Int(64));
        builder.append_entry_block(&f);
        let param = builder.param(&f, 0);
        builder.build_ret(param);

        let wasm = generate_wasm(builder.module(), 1).expect("lower");
        wasmparser::Validator::new()
            .validate_all(&wasm)
            .expect("valid wasm");
    }

    #[test]
    fn struct_fields_round_trip_through_the_frame() {
        let mut builder = point_module();
        let point = IrType::Struct("P".to_string());
        let f = builder.declare_function("f", &[IrType::Int(32)], &IrType::Int(32));
        builder.append_entry_block(&f);
        let slot = builder.build_alloca(&point, Some("p"));
        let small = builder.const_int(&IrType::Int(8), 3);
        let n = builder.param(&f, 0);
        let value = builder.build_struct(&point, vec![small, n]);
        builder.build_store(value, slot.clone());
        let y = builder.build_struct_gep(slot, 1);
        let loaded = builder.build_load(y);
        builder.build_ret(loaded);
        builder.verify().expect("verify");

        let wasm = generate_wasm(builder.module(), 1).expect("lower");
        let (mut store, instance) = instantiate(&wasm);
        let f = instance
            .get_typed_func::<i32, i32>(&store, "f")
            .expect("typed func");
        assert_eq!(f.call(&mut store, 41).expect("call"), 41);
    }

    #[test]
    fn globals_are_initialized_from_data() {
        let mut builder = point_module();
        let wide = builder.const_int(&IrType::Int(64), 1 << 40);
        let global = builder.add_global("big", wide);
        let f = builder.declare_function("read", &[], &IrType::Int(64));
        builder.append_entry_block(&f);
        let value = builder.build_load(global);
        builder.build_ret(value);

        let wasm = generate_wasm(builder.module(), 1).expect("lower");
        let (mut store, instance) = instantiate(&wasm);
        let read = instance
            .get_typed_func::<(), i64>(&store, "read")
            .expect("typed func");
        assert_eq!(read.call(&mut store, ()).expect("call"), 1 << 40);
    }

    #[test]
    fn int8_arithmetic_wraps() {
        let mut builder = point_module();
        let f = builder.declare_function("wrap", &[], &IrType::Int(8));
        builder.append_entry_block(&f);
        let lhs = builder.const_int(&IrType::Int(8), 127);
        let rhs = builder.const_int(&IrType::Int(8), 1);
        let sum = builder.build_add(lhs, rhs);
        builder.build_ret(sum);

        let wasm = generate_wasm(builder.module(), 1).expect("lower");
        let (mut store, instance) = instantiate(&wasm);
        let wrap = instance
            .get_typed_func::<(), i32>(&store, "wrap")
            .expect("typed func");
        assert_eq!(wrap.call(&mut store, ()).expect("call"), -128);
    }

    #[test]
    fn heap_grows_memory_and_survives_returns() {
        let mut builder = point_module();
        builder.declare_struct("Big", &vec![IrType::Int(64); 1000]);
        let big = IrType::Struct("Big".to_string());
        let f = builder.declare_function("alloc", &[], &big.clone().pointer_to());
        builder.append_entry_block(&f);
        let address = builder.build_heap_alloc(&big);
        let last = builder.build_struct_gep(address.clone(), 999);
        let seven = builder.const_int(&IrType::Int(64), 7);
        builder.build_store(seven, last);
        builder.build_ret(address);
        builder.verify().expect("verify");

        let wasm = generate_wasm(builder.module(), 1).expect("lower");
        let (mut store, instance) = instantiate(&wasm);
        let alloc = instance
            .get_typed_func::<(), i32>(&store, "alloc")
            .expect("typed func");
        let memory = instance.get_memory(&store, MEMORY_EXPORT).expect("memory");
        let bytes_before = memory.data(&store).len();

        let mut previous = None;
        for _ in 0..20 {
            let address = alloc.call(&mut store, ()).expect("call") as usize;
            if let Some(previous) = previous {
                assert_eq!(address, previous + 8000);
            }
            let field = address + 999 * 8;
            let bytes = &memory.data(&store)[field..field + 8];
            assert_eq!(i64::from_le_bytes(bytes.try_into().expect("8 bytes")), 7);
            previous = Some(address);
        }
        assert!(memory.data(&store).len() > bytes_before);
    }

    #[test]
    fn memory_export_name_is_reserved() {
        let mut builder = point_module();
        let f = builder.declare_function("memory", &[], &IrType::Void);
        builder.append_entry_block(&f);
        builder.build_ret_void();
        assert!(matches!(
            generate_wasm(builder.module(), 1),
            Err(CoreError::Codegen(_))
        ));
    }

    #[test]
    fn layouts_follow_c_rules() {
        let mut builder = point_module();
        builder.declare_struct(
            "Q",
            &[IrType::Struct("P".to_string()), IrType::Int(16), IrType::Int(64)],
        );
        let layouts = Layouts::new(builder.module()).expect("layouts");
        let p = layouts.get("P").expect("P");
        assert_eq!((p.size, p.align, p.offsets.clone()), (8, 4, vec![0, 4]));
        let q = layouts.get("Q").expect("Q");
        assert_eq!((q.size, q.align, q.offsets.clone()), (24, 8, vec![0, 8, 16]));
    }
}
