//! Compilation driver.
//!
//! A [`Project`] owns the registries and the backend. Each source unit is
//! compiled in two phases: phase one registers every declaration and
//! remembers where each body starts, phase two comes back to those offsets
//! and compiles the bodies once every signature of the unit is known.
//!
//! A unit that fails is rolled back: its declarations leave the registries
//! and the backend, so later units and [`Project::finish`] see only units
//! that compiled.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Declaration, Signature, ValueHead};
use crate::backend::{Backend, IrType};
use crate::builtins::find_primitive;
use crate::codegen_llvm::generate_llvm_ir;
use crate::codegen_wasm::generate_wasm;
use crate::error::{CompileError, CompileResult, CoreError};
use crate::ir::{self, Builder};
use crate::lexer::Cursor;
use crate::parser::{self, expression_continues, parse_operator, read_positional};
use crate::registry::Registry;
use crate::scope::{Scope, Storage};
use crate::statements::BodyCompiler;
use crate::types::{Aggregate, AggregateKind, Passing, Type, looks_like_literal};

/// A named source buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        SourceUnit {
            name: name.into(),
            bytes: source.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalRecord<V> {
    pub ty: Type,
    /// Struct and primitive globals are slots; a model global is its address.
    pub storage: Storage<V>,
}

#[derive(Debug, Clone)]
pub struct FunctionRecord<F> {
    pub signature: Signature,
    pub function: F,
    /// Offset just past the body's `{`. Taken when the body is compiled.
    resume: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct InstanceFunctionRecord<F> {
    pub owner: Type,
    pub instance: String,
    pub signature: Signature,
    pub function: F,
    resume: Option<usize>,
}

/// Everything declared so far, shared by all units of a project.
#[derive(Debug)]
pub struct Registries<B: Backend> {
    pub types: Registry<Type>,
    pub globals: Registry<GlobalRecord<B::Value>>,
    pub functions: Registry<FunctionRecord<B::Function>>,
    /// Keyed by `Type.method`.
    pub instance_functions: Registry<InstanceFunctionRecord<B::Function>>,
}

impl<B: Backend> Default for Registries<B> {
    fn default() -> Self {
        Registries {
            types: Registry::new(),
            globals: Registry::new(),
            functions: Registry::new(),
            instance_functions: Registry::new(),
        }
    }
}

impl<B: Backend> Registries<B> {
    fn marks(&self) -> RegistryMarks {
        RegistryMarks {
            types: self.types.len(),
            globals: self.globals.len(),
            functions: self.functions.len(),
            instance_functions: self.instance_functions.len(),
        }
    }

    fn truncate(&mut self, marks: RegistryMarks) {
        self.types.truncate(marks.types);
        self.globals.truncate(marks.globals);
        self.functions.truncate(marks.functions);
        self.instance_functions.truncate(marks.instance_functions);
    }
}

/// Registry lengths before a unit started.
#[derive(Debug, Clone, Copy)]
struct RegistryMarks {
    types: usize,
    globals: usize,
    functions: usize,
    instance_functions: usize,
}

/// Bodies registered by phase one of a unit, in registration order.
#[derive(Debug, Default)]
struct Pending {
    instance_functions: Vec<String>,
    functions: Vec<String>,
}

pub struct Project<B: Backend> {
    name: String,
    backend: B,
    registries: Registries<B>,
}

impl<B: Backend> Project<B> {
    pub fn new(name: impl Into<String>, backend: B) -> Self {
        Project {
            name: name.into(),
            backend,
            registries: Registries::default(),
        }
    }

    pub fn registries(&self) -> &Registries<B> {
        &self.registries
    }

    /// Compiles one unit. Functions of units compiled earlier are visible.
    pub fn compile_unit(&mut self, unit: &SourceUnit) -> Result<(), CoreError> {
        debug!(project = %self.name, unit = %unit.name, bytes = unit.bytes.len(), "compiling unit");
        let marks = self.registries.marks();
        let checkpoint = self.backend.checkpoint();
        let mut cursor = Cursor::new(&unit.bytes);

        let result = match self.forward_declare(&mut cursor) {
            Ok(pending) => self.compile_bodies(&mut cursor, &pending),
            Err(error) => Err(error),
        };
        result.map_err(|error| {
            debug!(unit = %unit.name, %error, "rolling back unit");
            self.registries.truncate(marks);
            self.backend.rollback(checkpoint);
            CoreError::Compile {
                unit: unit.name.clone(),
                position: cursor.position(),
                error,
            }
        })
    }

    /// Verifies the module and hands the backend back.
    pub fn finish(self) -> Result<B, CoreError> {
        self.backend.verify()?;
        Ok(self.backend)
    }

    fn forward_declare(&mut self, cursor: &mut Cursor<'_>) -> CompileResult<Pending> {
        debug!("phase 1: forward declarations");
        let mut pending = Pending::default();

        loop {
            cursor.skip_whitespace(true);
            if cursor.is_at_end() {
                return Ok(pending);
            }

            let declaration = parser::classify_declaration(cursor, &self.registries.types)?;
            trace!(name = declaration.name(), "declaration");
            match declaration {
                Declaration::Type { name, kind } => self.declare_type(cursor, name, kind)?,
                Declaration::Global { name, ty } => self.declare_global(cursor, name, ty)?,
                Declaration::Function { name, signature } => {
                    if self.registries.functions.contains(&name) {
                        return Err(CompileError::RedundantDefinitionOfGlobal(name));
                    }
                    let params: Vec<IrType> =
                        signature.arguments.iter().map(|(_, ty)| ty.ir_type()).collect();
                    let function = self.backend.declare_function(
                        &name,
                        &params,
                        &signature.return_type.ir_type(),
                    );
                    let resume = enter_and_skip_body(cursor)?;

                    self.registries.functions.append(
                        name.clone(),
                        FunctionRecord {
                            signature,
                            function,
                            resume: Some(resume),
                        },
                    )?;
                    pending.functions.push(name);
                }
                Declaration::InstanceFunction {
                    name,
                    instance,
                    owner,
                    signature,
                } => {
                    let key = format!("{}.{name}", owner.name());
                    if self.registries.instance_functions.contains(&key) {
                        return Err(CompileError::RedundantDefinitionOfGlobal(key));
                    }
                    let params: Vec<IrType> = std::iter::once(owner.ir_type())
                        .chain(signature.arguments.iter().map(|(_, ty)| ty.ir_type()))
                        .collect();
                    let function = self.backend.declare_function(
                        &key,
                        &params,
                        &signature.return_type.ir_type(),
                    );
                    let resume = enter_and_skip_body(cursor)?;

                    self.registries.instance_functions.append(
                        key.clone(),
                        InstanceFunctionRecord {
                            owner,
                            instance,
                            signature,
                            function,
                            resume: Some(resume),
                        },
                    )?;
                    pending.instance_functions.push(key);
                }
            }
        }
    }

    fn declare_type(
        &mut self,
        cursor: &mut Cursor<'_>,
        name: String,
        kind: AggregateKind,
    ) -> CompileResult<()> {
        if self.registries.types.contains(&name) || find_primitive(&name).is_some() {
            return Err(CompileError::RedundantDefinitionOfGlobal(name));
        }
        let fields = parser::scan_type_definition(cursor, &name, kind, &self.registries.types)?;

        let layout: Vec<IrType> = fields.iter().map(|(_, ty)| ty.ir_type()).collect();
        self.backend.declare_struct(&name, &layout);

        let ty = Type::Aggregate(Rc::new(Aggregate {
            name: name.clone(),
            kind,
            fields,
        }));
        self.registries.types.append(name, ty)
    }

    fn declare_global(&mut self, cursor: &mut Cursor<'_>, name: String, ty: Type) -> CompileResult<()> {
        if self.registries.globals.contains(&name) {
            return Err(CompileError::RedundantDefinitionOfGlobal(name));
        }
        cursor.skip_to_content()?;
        cursor.consume(b'=')?;
        cursor.skip_to_content()?;

        let initializer =
            read_constant(cursor, &mut self.backend, &self.registries.types, &ty, false)?;
        if expression_continues(cursor) {
            let operator = parse_operator(cursor)?;
            return Err(CompileError::UnknownOperation(operator.symbol()));
        }

        let address = self.backend.add_global(&name, initializer);
        let storage = match ty.passing() {
            Passing::ByValue => Storage::Slot(address),
            Passing::ByAddress => Storage::Direct(address),
        };
        self.registries
            .globals
            .append(name, GlobalRecord { ty, storage })
    }

    fn compile_bodies(&mut self, cursor: &mut Cursor<'_>, pending: &Pending) -> CompileResult<()> {
        debug!(
            instance_functions = pending.instance_functions.len(),
            functions = pending.functions.len(),
            "phase 2: function bodies"
        );

        for key in &pending.instance_functions {
            let resume = self
                .registries
                .instance_functions
                .get_mut(key)
                .and_then(|record| record.resume.take());
            let (Some(resume), Some(record)) =
                (resume, self.registries.instance_functions.get(key))
            else {
                continue;
            };

            trace!(function = %key, resume, "compiling body");
            cursor.set_position(resume);
            compile_body(
                &self.registries,
                &mut self.backend,
                cursor,
                key,
                &record.function,
                Some((&record.instance, &record.owner)),
                &record.signature,
            )?;
        }

        for name in &pending.functions {
            let resume = self
                .registries
                .functions
                .get_mut(name)
                .and_then(|record| record.resume.take());
            let (Some(resume), Some(record)) = (resume, self.registries.functions.get(name))
            else {
                continue;
            };

            trace!(function = %name, resume, "compiling body");
            cursor.set_position(resume);
            compile_body(
                &self.registries,
                &mut self.backend,
                cursor,
                name,
                &record.function,
                None,
                &record.signature,
            )?;
        }
        Ok(())
    }
}

/// Consumes `= {`, skips the body and returns the offset just inside it.
fn enter_and_skip_body(cursor: &mut Cursor<'_>) -> CompileResult<usize> {
    parser::enter_code_block(cursor)?;
    let resume = cursor.position();
    parser::skip_block_contents(cursor)?;
    Ok(resume)
}

fn compile_body<B: Backend>(
    registries: &Registries<B>,
    backend: &mut B,
    cursor: &mut Cursor<'_>,
    name: &str,
    function: &B::Function,
    instance: Option<(&String, &Type)>,
    signature: &Signature,
) -> CompileResult<()> {
    backend.append_entry_block(function);

    let mut parameters = Scope::new();
    let bindings = instance
        .into_iter()
        .chain(signature.arguments.iter().map(|(binding, ty)| (binding, ty)));
    for (index, (binding, ty)) in bindings.enumerate() {
        let value = backend.param(function, index);
        let storage = match (ty.passing(), ty.aggregate()) {
            (Passing::ByValue, Some(_)) => {
                let slot = backend.build_alloca(&ty.ir_type(), Some(binding.as_str()));
                backend.build_store(value, slot.clone());
                Storage::Slot(slot)
            }
            _ => Storage::Direct(value),
        };
        parameters.declare(binding.clone(), ty.clone(), storage);
    }

    let mut body = Scope::with_parent(&parameters);
    BodyCompiler::new(registries, backend, name, &signature.return_type)
        .compile_block(cursor, &mut body)
}

/// Reads a global initializer: a literal, or a structure literal whose
/// fields are constants.
fn read_constant<B: Backend>(
    cursor: &mut Cursor<'_>,
    backend: &mut B,
    types: &Registry<Type>,
    expected: &Type,
    nested: bool,
) -> CompileResult<B::Value> {
    match parser::parse_value_head(cursor)? {
        ValueHead::Plain(word) => {
            if let Some(literal) = expected.make_value(&word) {
                return Ok(backend.const_int(&expected.ir_type(), literal));
            }
            if looks_like_literal(&word) {
                return Err(CompileError::TypeMismatch {
                    expected: expected.name().to_string(),
                    found: format!("literal `{word}`"),
                });
            }
            Err(CompileError::UnknownVariable(word))
        }
        ValueHead::Call(name) => {
            let ty = types
                .get(&name)
                .ok_or_else(|| CompileError::UnknownFunction(name.clone()))?;
            if ty != expected {
                return Err(CompileError::TypeMismatch {
                    expected: expected.name().to_string(),
                    found: ty.name().to_string(),
                });
            }
            // A model inside a constant would need an address of its own.
            if nested && ty.passing() == Passing::ByAddress {
                return Err(CompileError::TypeMismatch {
                    expected: name,
                    found: "constant".to_string(),
                });
            }

            let field_types: Vec<Type> = ty
                .aggregate()
                .map(|aggregate| aggregate.fields.iter().map(|(_, ty)| ty.clone()).collect())
                .unwrap_or_default();
            let fields = read_positional(cursor, &field_types, |cursor, ty| {
                read_constant(cursor, backend, types, ty, true)
            })?;
            Ok(backend.build_struct(&ty.layout_type(), fields))
        }
        ValueHead::Field { target, .. } | ValueHead::MethodCall { target, .. } => {
            Err(CompileError::UnknownVariable(target))
        }
    }
}

/// Options shared by the compile entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Module name used in emitted output.
    pub project_name: String,
    /// 64 KiB pages reserved for the wasm shadow stack.
    pub stack_pages: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            project_name: "main".to_string(),
            stack_pages: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub wasm: Vec<u8>,
    pub ir: String,
}

/// Compiles `units` in order and lowers the result to wasm. The textual IR
/// of the same module is included.
pub fn compile_wasm(
    units: &[SourceUnit],
    options: &CompileOptions,
) -> Result<CompilationArtifact, CoreError> {
    let module = build_module(units, options)?;
    let wasm = generate_wasm(&module, options.stack_pages)?;
    Ok(CompilationArtifact {
        wasm,
        ir: generate_llvm_ir(&module),
    })
}

pub fn emit_llvm_ir(units: &[SourceUnit], options: &CompileOptions) -> Result<String, CoreError> {
    let module = build_module(units, options)?;
    Ok(generate_llvm_ir(&module))
}

fn build_module(units: &[SourceUnit], options: &CompileOptions) -> Result<ir::Module, CoreError> {
    let mut project = Project::new(
        options.project_name.clone(),
        Builder::new(options.project_name.clone()),
    );
    for unit in units {
        project.compile_unit(unit)?;
    }
    Ok(project.finish()?.finish())
}
