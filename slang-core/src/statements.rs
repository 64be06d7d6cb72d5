//! Statement and expression compiler.
//!
//! Reads a function body straight off the cursor and emits IR through the
//! [`Backend`] as it goes. Grammar decisions come from [`crate::parser`];
//! symbols come from the project registries and the scope chain.

use tracing::warn;

use crate::ast::{Operator, StatementHead, ValueHead};
use crate::backend::Backend;
use crate::builtins::ReservedWord;
use crate::compiler::Registries;
use crate::error::{CompileError, CompileResult};
use crate::lexer::Cursor;
use crate::parser::{self, expression_continues, parse_operator, read_positional};
use crate::scope::{Scope, Storage};
use crate::types::{Passing, Type, looks_like_literal};

/// Compiles the body of one function.
pub struct BodyCompiler<'p, B: Backend> {
    registries: &'p Registries<B>,
    backend: &'p mut B,
    function_name: &'p str,
    return_type: &'p Type,
}

impl<'p, B: Backend> BodyCompiler<'p, B> {
    pub fn new(
        registries: &'p Registries<B>,
        backend: &'p mut B,
        function_name: &'p str,
        return_type: &'p Type,
    ) -> Self {
        BodyCompiler {
            registries,
            backend,
            function_name,
            return_type,
        }
    }

    /// Compiles statements up to and including the closing `}`.
    ///
    /// The block has to return explicitly. Statements after the return are
    /// unreachable; they are checked syntactically and dropped.
    pub fn compile_block(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &mut Scope<'_, B::Value>,
    ) -> CompileResult<()> {
        let mut returned = false;
        loop {
            cursor.skip_to_content()?;
            if cursor.at(b'}') {
                cursor.advance();
                if !returned {
                    return Err(CompileError::MissingReturn(self.function_name.to_string()));
                }
                return Ok(());
            }

            if returned {
                let start = cursor.position();
                parser::skip_statement(cursor)?;
                warn!(
                    function = self.function_name,
                    position = start,
                    "unreachable statement after return"
                );
                continue;
            }
            returned = self.compile_statement(cursor, scope)?;
        }
    }

    /// Compiles one statement; returns whether it was a `return`.
    pub fn compile_statement(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &mut Scope<'_, B::Value>,
    ) -> CompileResult<bool> {
        match parser::parse_statement_head(cursor)? {
            StatementHead::Reserved(ReservedWord::Return) => {
                self.compile_return(cursor, scope)?;
                return Ok(true);
            }
            StatementHead::Reserved(ReservedWord::If) => {
                return Err(CompileError::UnsupportedStatement(
                    ReservedWord::If.as_str().to_string(),
                ));
            }
            StatementHead::Call(name) => {
                self.call_function(cursor, scope, &name, None)?;
            }
            StatementHead::MethodCall { target, member } => {
                self.call_method(cursor, scope, &target, &member, None)?;
            }
            StatementHead::FieldAssign { target, member } => {
                let (ty, storage) = self
                    .lookup(scope, &target)
                    .ok_or_else(|| CompileError::UnknownVariable(target.clone()))?;
                let (index, field_ty) = field_of(&ty, &member)?;
                let base = self.instance_address(&ty, storage);

                cursor.skip_to_content()?;
                cursor.consume(b'=')?;
                cursor.skip_to_content()?;
                let value = self.read_value_expression(cursor, scope, &field_ty)?;
                let address = self.backend.build_struct_gep(base, index);
                self.backend.build_store(value, address);
            }
            StatementHead::Declare(name) => {
                cursor.skip_to_content()?;
                let ty = parser::scan_type(cursor, &self.registries.types)?;
                ty.require_storable(&name)?;

                let slot = self.backend.build_alloca(&ty.ir_type(), Some(name.as_str()));
                cursor.skip_to_content()?;
                cursor.consume(b'=')?;
                cursor.skip_to_content()?;
                // The new name is only visible after its initializer.
                let value = self.read_value_expression(cursor, scope, &ty)?;
                self.backend.build_store(value, slot.clone());
                scope.declare(name, ty, Storage::Slot(slot));
            }
            StatementHead::Assign(name) => self.compile_assignment(cursor, scope, name)?,
        }
        Ok(false)
    }

    fn compile_assignment(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &mut Scope<'_, B::Value>,
        name: String,
    ) -> CompileResult<()> {
        let (ty, storage) = self
            .lookup(scope, &name)
            .ok_or_else(|| CompileError::UnknownVariable(name.clone()))?;
        let is_local = scope.lookup(&name).is_some();

        cursor.skip_to_content()?;
        let value = self.read_value_expression(cursor, scope, &ty)?;

        match storage {
            Storage::Slot(slot) => self.backend.build_store(value, slot),
            // Parameters live in registers; the first assignment moves the
            // name into a fresh slot that shadows the parameter.
            Storage::Direct(_) if is_local => {
                let slot = self.backend.build_alloca(&ty.ir_type(), Some(name.as_str()));
                self.backend.build_store(value, slot.clone());
                scope.declare(name, ty, Storage::Slot(slot));
            }
            Storage::Direct(_) => return Err(CompileError::InvalidMember(name)),
        }
        Ok(())
    }

    fn compile_return(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
    ) -> CompileResult<()> {
        let has_value = expression_continues(cursor);

        if self.return_type.is_void() {
            if has_value {
                let start = cursor.position();
                parser::skip_value_expression(cursor)?;
                warn!(
                    function = self.function_name,
                    position = start,
                    "ignoring value returned from a Void function"
                );
            }
            self.backend.build_ret_void();
            return Ok(());
        }

        if !has_value {
            return Err(CompileError::TypeMismatch {
                expected: self.return_type.name().to_string(),
                found: "Void".to_string(),
            });
        }
        let value = self.read_value_expression(cursor, scope, self.return_type)?;
        self.backend.build_ret(value);
        Ok(())
    }

    /// One value, then any number of `+ value` / `- value` folded left to
    /// right. There is no precedence and no grouping.
    pub fn read_value_expression(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
        expected: &Type,
    ) -> CompileResult<B::Value> {
        let mut value = self.read_value(cursor, scope, expected)?;
        while expression_continues(cursor) {
            let operator = parse_operator(cursor)?;
            if !expected.is_integer() {
                return Err(CompileError::UnknownOperation(operator.symbol()));
            }
            cursor.skip_to_content()?;
            let rhs = self.read_value(cursor, scope, expected)?;
            value = match operator {
                Operator::Add => self.backend.build_add(value, rhs),
                Operator::Sub => self.backend.build_sub(value, rhs),
            };
        }
        Ok(value)
    }

    pub fn read_value(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
        expected: &Type,
    ) -> CompileResult<B::Value> {
        let registries = self.registries;
        match parser::parse_value_head(cursor)? {
            ValueHead::Call(name) => {
                if let Some(ty) = registries.types.get(&name) {
                    check_type(expected, ty)?;
                    return self.construct(cursor, scope, ty);
                }
                self.call_function(cursor, scope, &name, Some(expected))
            }
            ValueHead::Plain(word) => {
                if let Some(literal) = expected.make_value(&word) {
                    return Ok(self.backend.const_int(&expected.ir_type(), literal));
                }
                if let Some((ty, storage)) = self.lookup(scope, &word) {
                    check_type(expected, &ty)?;
                    return Ok(self.binding_value(storage));
                }
                if looks_like_literal(&word) {
                    return Err(CompileError::TypeMismatch {
                        expected: expected.name().to_string(),
                        found: format!("literal `{word}`"),
                    });
                }
                Err(CompileError::UnknownVariable(word))
            }
            ValueHead::Field { target, member } => {
                let (ty, storage) = self
                    .lookup(scope, &target)
                    .ok_or_else(|| CompileError::UnknownVariable(target.clone()))?;
                let (index, field_ty) = field_of(&ty, &member)?;
                check_type(expected, &field_ty)?;

                let base = self.instance_address(&ty, storage);
                let address = self.backend.build_struct_gep(base, index);
                Ok(self.backend.build_load(address))
            }
            ValueHead::MethodCall { target, member } => {
                self.call_method(cursor, scope, &target, &member, Some(expected))
            }
        }
    }

    /// Reads call arguments against `expected` (the `(` is consumed).
    pub fn read_arguments(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
        expected: &[Type],
    ) -> CompileResult<Vec<B::Value>> {
        read_positional(cursor, expected, |cursor, ty| {
            self.read_value_expression(cursor, scope, ty)
        })
    }

    /// A structure literal `Type(...)`. Models are materialized on the stack
    /// and evaluate to their address.
    fn construct(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
        ty: &Type,
    ) -> CompileResult<B::Value> {
        let field_types: Vec<Type> = ty
            .aggregate()
            .map(|aggregate| aggregate.fields.iter().map(|(_, ty)| ty.clone()).collect())
            .unwrap_or_default();
        let fields = self.read_arguments(cursor, scope, &field_types)?;
        let value = self.backend.build_struct(&ty.layout_type(), fields);

        match ty.passing() {
            Passing::ByValue => Ok(value),
            Passing::ByAddress => {
                let address = self.backend.build_heap_alloc(&ty.layout_type());
                self.backend.build_store(value, address.clone());
                Ok(address)
            }
        }
    }

    fn call_function(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
        name: &str,
        expected: Option<&Type>,
    ) -> CompileResult<B::Value> {
        let registries = self.registries;
        let record = registries
            .functions
            .get(name)
            .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?;
        if let Some(expected) = expected {
            check_type(expected, &record.signature.return_type)?;
        }

        let args = self.read_arguments(cursor, scope, &record.signature.argument_types())?;
        Ok(self.backend.build_call(&record.function, args))
    }

    /// `target.member(...)`: the instance is passed first, copied for
    /// structs and by address for models.
    fn call_method(
        &mut self,
        cursor: &mut Cursor<'_>,
        scope: &Scope<'_, B::Value>,
        target: &str,
        member: &str,
        expected: Option<&Type>,
    ) -> CompileResult<B::Value> {
        let (ty, storage) = self
            .lookup(scope, target)
            .ok_or_else(|| CompileError::UnknownVariable(target.to_string()))?;
        let aggregate = ty
            .aggregate()
            .ok_or_else(|| CompileError::InvalidMember(member.to_string()))?;

        let registries = self.registries;
        let key = format!("{}.{member}", aggregate.name);
        let record = registries
            .instance_functions
            .get(&key)
            .ok_or_else(|| CompileError::InvalidMember(member.to_string()))?;
        if let Some(expected) = expected {
            check_type(expected, &record.signature.return_type)?;
        }

        let instance = self.binding_value(storage);
        let mut args = vec![instance];
        args.extend(self.read_arguments(cursor, scope, &record.signature.argument_types())?);
        Ok(self.backend.build_call(&record.function, args))
    }

    /// A name in scope, or else a global.
    fn lookup(
        &self,
        scope: &Scope<'_, B::Value>,
        name: &str,
    ) -> Option<(Type, Storage<B::Value>)> {
        if let Some(binding) = scope.lookup(name) {
            return Some((binding.ty.clone(), binding.storage.clone()));
        }
        self.registries
            .globals
            .get(name)
            .map(|global| (global.ty.clone(), global.storage.clone()))
    }

    fn binding_value(&mut self, storage: Storage<B::Value>) -> B::Value {
        match storage {
            Storage::Slot(slot) => self.backend.build_load(slot),
            Storage::Direct(value) => value,
        }
    }

    /// Address of an aggregate's fields.
    fn instance_address(&mut self, ty: &Type, storage: Storage<B::Value>) -> B::Value {
        match (ty.passing(), storage) {
            (Passing::ByAddress, Storage::Slot(slot)) => self.backend.build_load(slot),
            (Passing::ByAddress, Storage::Direct(address)) => address,
            (Passing::ByValue, Storage::Slot(slot)) => slot,
            (Passing::ByValue, Storage::Direct(value)) => {
                let slot = self.backend.build_alloca(&ty.ir_type(), None);
                self.backend.build_store(value, slot.clone());
                slot
            }
        }
    }
}

fn check_type(expected: &Type, found: &Type) -> CompileResult<()> {
    if expected != found {
        return Err(CompileError::TypeMismatch {
            expected: expected.name().to_string(),
            found: found.name().to_string(),
        });
    }
    Ok(())
}

fn field_of(ty: &Type, member: &str) -> CompileResult<(usize, Type)> {
    ty.aggregate()
        .and_then(|aggregate| aggregate.field(member))
        .map(|(index, field_ty)| (index, field_ty.clone()))
        .ok_or_else(|| CompileError::InvalidMember(member.to_string()))
}
