//! Lookahead grammar over a [`Cursor`].
//!
//! Parsing functions here only move the cursor and return grammar decisions
//! (see [`crate::ast`]). Code generation lives in `statements`, which calls
//! into this module for every decision it makes. The skip functions walk
//! the same grammar without emitting anything; phase one of the compiler
//! uses them to step over function bodies.

use crate::ast::{Declaration, Operator, Signature, StatementHead, ValueHead};
use crate::builtins::ReservedWord;
use crate::error::{CompileError, CompileResult};
use crate::lexer::Cursor;
use crate::registry::Registry;
use crate::types::{AggregateKind, Type, resolve};

/// Reads a type name and resolves it.
pub fn scan_type(cursor: &mut Cursor<'_>, types: &Registry<Type>) -> CompileResult<Type> {
    let name = cursor.scan_nonempty_word()?;
    resolve(&name, types)
}

/// Recognizes the top-level declaration starting at the cursor.
///
/// Only the header is read. For functions the cursor is left before the
/// body's `=`; for types and globals, before their `=`.
pub fn classify_declaration(
    cursor: &mut Cursor<'_>,
    types: &Registry<Type>,
) -> CompileResult<Declaration> {
    cursor.skip_to_content()?;
    let name = cursor.scan_nonempty_word()?;

    if cursor.at(b'.') {
        cursor.advance();
        return classify_instance_function(cursor, types, name);
    }

    cursor.skip_whitespace(true);
    if !cursor.at(b':') {
        return Err(CompileError::MissingTypeForDeclaration(name));
    }
    cursor.advance();
    cursor.skip_to_content()?;

    if cursor.at(b'(') {
        cursor.advance();
        let signature = scan_signature(cursor, types)?;
        return Ok(Declaration::Function { name, signature });
    }

    let type_name = cursor.scan_nonempty_word()?;
    if let Some(kind) = AggregateKind::from_keyword(&type_name) {
        return Ok(Declaration::Type { name, kind });
    }
    let ty = resolve(&type_name, types)?;
    ty.require_storable(&name)?;
    Ok(Declaration::Global { name, ty })
}

fn classify_instance_function(
    cursor: &mut Cursor<'_>,
    types: &Registry<Type>,
    owner_name: String,
) -> CompileResult<Declaration> {
    let name = cursor.scan_nonempty_word()?;

    cursor.skip_to_content()?;
    cursor.consume(b':')?;
    cursor.skip_to_content()?;
    cursor.consume(b'(')?;
    cursor.skip_to_content()?;
    let instance = cursor.scan_nonempty_word()?;
    cursor.skip_to_content()?;
    cursor.consume(b':')?;
    cursor.skip_to_content()?;
    if cursor.scan_nonempty_word()? != owner_name {
        return Err(CompileError::InvalidMember(name));
    }
    cursor.skip_to_content()?;
    cursor.consume(b')')?;
    cursor.skip_to_content()?;
    cursor.consume_arrow()?;

    let owner = resolve(&owner_name, types)?;
    if owner.aggregate().is_none() {
        return Err(CompileError::InvalidMember(name));
    }

    cursor.skip_to_content()?;
    let signature = if cursor.at(b'(') {
        cursor.advance();
        scan_signature(cursor, types)?
    } else {
        Signature {
            arguments: Vec::new(),
            return_type: scan_type(cursor, types)?,
        }
    };

    Ok(Declaration::InstanceFunction {
        name,
        instance,
        owner,
        signature,
    })
}

/// Reads `name [: value], ...)` with the opening parenthesis already
/// consumed, calling `read` once per element.
///
/// With a label the reader starts after the colon; without one the cursor
/// is rewound so the reader sees the element from its first byte.
pub fn for_each_argument<T>(
    cursor: &mut Cursor<'_>,
    mut read: impl FnMut(&mut Cursor<'_>) -> CompileResult<T>,
) -> CompileResult<Vec<(String, T)>> {
    let mut arguments = Vec::new();
    loop {
        cursor.skip_to_content()?;
        if cursor.at(b')') {
            cursor.advance();
            return Ok(arguments);
        }
        if !arguments.is_empty() {
            cursor.consume(b',')?;
            cursor.skip_to_content()?;
        }

        let before_name = cursor.position();
        let name = cursor.scan_nonempty_word()?;
        cursor.skip_whitespace(true);
        if cursor.at(b':') {
            cursor.advance();
        } else {
            cursor.set_position(before_name);
        }
        arguments.push((name, read(cursor)?));
    }
}

/// Reads an argument list positionally against `expected`.
pub fn read_positional<T>(
    cursor: &mut Cursor<'_>,
    expected: &[Type],
    mut read: impl FnMut(&mut Cursor<'_>, &Type) -> CompileResult<T>,
) -> CompileResult<Vec<T>> {
    let mut parsed = 0;
    let arguments = for_each_argument(cursor, |cursor| {
        let ty = expected.get(parsed).ok_or(CompileError::TooManyArguments {
            expected: expected.len(),
        })?;
        parsed += 1;
        cursor.skip_to_content()?;
        read(cursor, ty)
    })?;

    if arguments.len() < expected.len() {
        return Err(CompileError::TooFewArguments {
            expected: expected.len(),
            found: arguments.len(),
        });
    }
    Ok(arguments.into_iter().map(|(_, value)| value).collect())
}

/// Reads `(name: Type, ...) -> Return` with the `(` already consumed.
pub fn scan_signature(cursor: &mut Cursor<'_>, types: &Registry<Type>) -> CompileResult<Signature> {
    let arguments = for_each_argument(cursor, |cursor| {
        cursor.skip_to_content()?;
        scan_type(cursor, types)
    })?;
    for (name, ty) in &arguments {
        ty.require_storable(name)?;
    }

    cursor.skip_to_content()?;
    cursor.consume_arrow()?;
    cursor.skip_to_content()?;
    let return_type = scan_type(cursor, types)?;

    Ok(Signature {
        arguments,
        return_type,
    })
}

/// Reads `(field: Type, ...)`.
pub fn scan_type_arguments(
    cursor: &mut Cursor<'_>,
    types: &Registry<Type>,
) -> CompileResult<Vec<(String, Type)>> {
    cursor.skip_to_content()?;
    cursor.consume(b'(')?;
    let fields = for_each_argument(cursor, |cursor| {
        cursor.skip_to_content()?;
        scan_type(cursor, types)
    })?;

    for (index, (name, ty)) in fields.iter().enumerate() {
        ty.require_storable(name)?;
        if fields[..index].iter().any(|(other, _)| other == name) {
            return Err(CompileError::InvalidMember(name.clone()));
        }
    }
    Ok(fields)
}

/// Reads the body of a type declaration: `= [kind] (fields)`.
///
/// Repeating the kind keyword after `=` is optional, but if present it has
/// to match the declared kind.
pub fn scan_type_definition(
    cursor: &mut Cursor<'_>,
    name: &str,
    kind: AggregateKind,
    types: &Registry<Type>,
) -> CompileResult<Vec<(String, Type)>> {
    cursor.skip_to_content()?;
    cursor.consume(b'=')?;
    cursor.skip_to_content()?;
    if !cursor.at(b'(') && cursor.scan_word() != kind.keyword() {
        return Err(CompileError::InvalidTypeDefinition(name.to_string()));
    }
    scan_type_arguments(cursor, types)
}

/// Consumes `= {`.
pub fn enter_code_block(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    cursor.skip_to_content()?;
    cursor.consume(b'=')?;
    cursor.skip_to_content()?;
    cursor.consume(b'{')
}

pub fn parse_statement_head(cursor: &mut Cursor<'_>) -> CompileResult<StatementHead> {
    let name = cursor.scan_nonempty_word()?;
    if let Some(reserved) = ReservedWord::from_word(&name) {
        return Ok(StatementHead::Reserved(reserved));
    }

    if cursor.at(b'(') {
        cursor.advance();
        return Ok(StatementHead::Call(name));
    }
    if cursor.at(b'.') {
        cursor.advance();
        let member = cursor.scan_nonempty_word()?;
        if cursor.at(b'(') {
            cursor.advance();
            return Ok(StatementHead::MethodCall {
                target: name,
                member,
            });
        }
        return Ok(StatementHead::FieldAssign {
            target: name,
            member,
        });
    }

    cursor.skip_whitespace(true);
    match cursor.peek() {
        Some(b':') => {
            cursor.advance();
            Ok(StatementHead::Declare(name))
        }
        Some(b'=') => {
            cursor.advance();
            Ok(StatementHead::Assign(name))
        }
        Some(_) => Err(CompileError::UnknownStatement(name)),
        None => Err(CompileError::UnexpectedEof),
    }
}

pub fn parse_value_head(cursor: &mut Cursor<'_>) -> CompileResult<ValueHead> {
    let word = cursor.scan_nonempty_word()?;
    if cursor.at(b'(') {
        cursor.advance();
        return Ok(ValueHead::Call(word));
    }
    if cursor.at(b'.') {
        cursor.advance();
        let member = cursor.scan_nonempty_word()?;
        if cursor.at(b'(') {
            cursor.advance();
            return Ok(ValueHead::MethodCall {
                target: word,
                member,
            });
        }
        return Ok(ValueHead::Field {
            target: word,
            member,
        });
    }
    Ok(ValueHead::Plain(word))
}

pub fn parse_operator(cursor: &mut Cursor<'_>) -> CompileResult<Operator> {
    let operator = match cursor.peek() {
        Some(b'+') => Operator::Add,
        Some(b'-') => Operator::Sub,
        Some(other) => return Err(CompileError::UnknownOperation(other as char)),
        None => return Err(CompileError::UnexpectedEof),
    };
    cursor.advance();
    Ok(operator)
}

/// Whether another operator follows on the current line. A closing
/// delimiter, a comma or an opening `{` also ends the expression.
///
/// Leaves the cursor on the next non-blank byte of the line.
pub fn expression_continues(cursor: &mut Cursor<'_>) -> bool {
    cursor.characters_before_newline()
        && !matches!(cursor.peek(), Some(b'}' | b')' | b',' | b'{'))
}

// ---------------------------------------------------------------------
// Skipping
// ---------------------------------------------------------------------

/// Steps over an argument list whose `(` has been consumed.
pub fn skip_arguments(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    for_each_argument(cursor, |cursor| {
        cursor.skip_to_content()?;
        skip_value_expression(cursor)
    })?;
    Ok(())
}

pub fn skip_value(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    match parse_value_head(cursor)? {
        ValueHead::Call(_) | ValueHead::MethodCall { .. } => skip_arguments(cursor),
        ValueHead::Plain(_) | ValueHead::Field { .. } => Ok(()),
    }
}

pub fn skip_value_expression(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    skip_value(cursor)?;
    while expression_continues(cursor) {
        parse_operator(cursor)?;
        cursor.skip_to_content()?;
        skip_value(cursor)?;
    }
    Ok(())
}

pub fn skip_statement(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    cursor.skip_to_content()?;
    match parse_statement_head(cursor)? {
        StatementHead::Reserved(ReservedWord::Return) => {
            if expression_continues(cursor) {
                skip_value_expression(cursor)?;
            }
        }
        StatementHead::Reserved(ReservedWord::If) => skip_if(cursor)?,
        StatementHead::Call(_) | StatementHead::MethodCall { .. } => skip_arguments(cursor)?,
        StatementHead::FieldAssign { .. } => {
            cursor.skip_to_content()?;
            cursor.consume(b'=')?;
            cursor.skip_to_content()?;
            skip_value_expression(cursor)?;
        }
        StatementHead::Declare(_) => {
            cursor.skip_to_content()?;
            cursor.scan_nonempty_word()?;
            cursor.skip_to_content()?;
            cursor.consume(b'=')?;
            cursor.skip_to_content()?;
            skip_value_expression(cursor)?;
        }
        StatementHead::Assign(_) => {
            cursor.skip_to_content()?;
            skip_value_expression(cursor)?;
        }
    }
    Ok(())
}

/// `if <expr> { ... } [else { ... }]`, after the `if`.
fn skip_if(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    cursor.skip_to_content()?;
    skip_value_expression(cursor)?;
    cursor.skip_to_content()?;
    cursor.consume(b'{')?;
    skip_block_contents(cursor)?;

    let after_then = cursor.position();
    cursor.skip_whitespace(true);
    if cursor.scan_word() == "else" {
        cursor.skip_to_content()?;
        cursor.consume(b'{')?;
        skip_block_contents(cursor)?;
    } else {
        cursor.set_position(after_then);
    }
    Ok(())
}

/// Skips statements up to and including the `}` that closes the current
/// block.
pub fn skip_block_contents(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    loop {
        cursor.skip_to_content()?;
        if cursor.at(b'}') {
            cursor.advance();
            return Ok(());
        }
        skip_statement(cursor)?;
    }
}

pub fn skip_code_block(cursor: &mut Cursor<'_>) -> CompileResult<()> {
    enter_code_block(cursor)?;
    skip_block_contents(cursor)
}
