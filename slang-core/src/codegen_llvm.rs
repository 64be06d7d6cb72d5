//! Textual LLVM-style rendering of a verified IR module.
//!
//! Values are named rather than numbered (`%p0` for parameters, `%t3` for
//! the result of instruction 3), so the output does not depend on LLVM's
//! sequential numbering rules. Heap allocations call `malloc`, which is
//! declared at the end of the module when used.

use crate::backend::IrType;
use crate::ir::{Constant, FunctionDef, Inst, InstKind, Module, Value, ValueKind};

/// Generate LLVM IR text for the whole module.
pub fn generate_llvm_ir(module: &Module) -> String {
    let mut out = String::new();
    out.push_str(&format!("; ModuleID = \"{}\"\n", module.name));
    out.push_str(&format!("source_filename = \"{}\"\n", module.name));

    if !module.structs.is_empty() {
        out.push('\n');
    }
    for def in &module.structs {
        let fields: Vec<String> = def.fields.iter().map(ToString::to_string).collect();
        out.push_str(&format!("%{} = type {{ {} }}\n", def.name, fields.join(", ")));
    }

    if !module.globals.is_empty() {
        out.push('\n');
    }
    for global in &module.globals {
        out.push_str(&format!(
            "{} = global {} {}\n",
            symbol(&global.name),
            global.ty,
            constant(module, &global.ty, &global.init)
        ));
    }

    for function in &module.functions {
        out.push('\n');
        render_function(&mut out, module, function);
    }

    let allocates = module
        .functions
        .iter()
        .flat_map(FunctionDef::insts)
        .any(|inst| matches!(inst.kind, InstKind::HeapAlloc { .. }));
    if allocates {
        out.push_str("\ndeclare i8* @malloc(i64)\n");
    }
    out
}

fn render_function(out: &mut String, module: &Module, function: &FunctionDef) {
    if function.blocks.is_empty() {
        let params: Vec<String> = function.params.iter().map(ToString::to_string).collect();
        out.push_str(&format!(
            "declare {} {}({})\n",
            function.ret,
            symbol(&function.name),
            params.join(", ")
        ));
        return;
    }

    let params: Vec<String> = function
        .params
        .iter()
        .enumerate()
        .map(|(index, ty)| format!("{ty} %p{index}"))
        .collect();
    out.push_str(&format!(
        "define {} {}({}) {{\n",
        function.ret,
        symbol(&function.name),
        params.join(", ")
    ));
    for block in &function.blocks {
        out.push_str(&format!("{}:\n", block.name));
        for inst in &block.insts {
            render_inst(out, module, inst);
        }
    }
    out.push_str("}\n");
}

fn render_inst(out: &mut String, module: &Module, inst: &Inst) {
    let result = format!("%t{}", inst.id);
    match &inst.kind {
        InstKind::Alloca { ty, name: Some(name) } => {
            out.push_str(&format!("  {result} = alloca {ty} ; {name}\n"));
        }
        InstKind::Alloca { ty, name: None } => {
            out.push_str(&format!("  {result} = alloca {ty}\n"));
        }
        InstKind::HeapAlloc { ty } => {
            let ptr = &inst.ty;
            out.push_str(&format!("  {result}.end = getelementptr {ty}, {ptr} null, i32 1\n"));
            out.push_str(&format!("  {result}.size = ptrtoint {ptr} {result}.end to i64\n"));
            out.push_str(&format!("  {result}.raw = call i8* @malloc(i64 {result}.size)\n"));
            out.push_str(&format!("  {result} = bitcast i8* {result}.raw to {ptr}\n"));
        }
        InstKind::Store { value, ptr } => {
            out.push_str(&format!(
                "  store {}, {}\n",
                typed(module, value),
                typed(module, ptr)
            ));
        }
        InstKind::Load { ptr } => {
            out.push_str(&format!(
                "  {result} = load {}, {}\n",
                inst.ty,
                typed(module, ptr)
            ));
        }
        InstKind::Call { callee, args } => {
            let name = module
                .function(*callee)
                .map(|target| symbol(&target.name))
                .unwrap_or_else(|| format!("@fn{}", callee.0));
            let args: Vec<String> = args.iter().map(|arg| typed(module, arg)).collect();
            if inst.ty.is_void() {
                out.push_str(&format!("  call void {name}({})\n", args.join(", ")));
            } else {
                out.push_str(&format!(
                    "  {result} = call {} {name}({})\n",
                    inst.ty,
                    args.join(", ")
                ));
            }
        }
        InstKind::Add { lhs, rhs } | InstKind::Sub { lhs, rhs } => {
            let opcode = if matches!(inst.kind, InstKind::Add { .. }) { "add" } else { "sub" };
            out.push_str(&format!(
                "  {result} = {opcode} {} {}, {}\n",
                inst.ty,
                operand(module, lhs),
                operand(module, rhs)
            ));
        }
        InstKind::FieldAddr { ptr, index } => {
            let pointee = ptr.ty.pointee().cloned().unwrap_or(IrType::Void);
            out.push_str(&format!(
                "  {result} = getelementptr inbounds {pointee}, {}, i32 0, i32 {index}\n",
                typed(module, ptr)
            ));
        }
        InstKind::Aggregate { fields } => {
            let mut previous = "undef".to_string();
            for (index, field) in fields.iter().enumerate() {
                let name = if index + 1 == fields.len() {
                    result.clone()
                } else {
                    format!("{result}.{index}")
                };
                out.push_str(&format!(
                    "  {name} = insertvalue {} {previous}, {}, {index}\n",
                    inst.ty,
                    typed(module, field)
                ));
                previous = name;
            }
        }
        InstKind::Ret { value: None } => out.push_str("  ret void\n"),
        InstKind::Ret { value: Some(value) } => {
            out.push_str(&format!("  ret {}\n", typed(module, value)));
        }
    }
}

fn typed(module: &Module, value: &Value) -> String {
    format!("{} {}", value.ty, operand(module, value))
}

fn operand(module: &Module, value: &Value) -> String {
    match &value.kind {
        ValueKind::Param(index) => format!("%p{index}"),
        ValueKind::Inst(id) => format!("%t{id}"),
        ValueKind::Const(init) => constant(module, &value.ty, init),
        ValueKind::Global(index) => module
            .globals
            .get(*index)
            .map(|global| symbol(&global.name))
            .unwrap_or_else(|| format!("@global{index}")),
    }
}

fn constant(module: &Module, ty: &IrType, value: &Constant) -> String {
    match (ty, value) {
        (IrType::Int(1), Constant::Int(value)) => {
            if *value == 0 { "false" } else { "true" }.to_string()
        }
        (_, Constant::Int(value)) => value.to_string(),
        (IrType::Struct(name), Constant::Struct(fields)) => {
            let types = module
                .struct_def(name)
                .map(|def| def.fields.clone())
                .unwrap_or_default();
            let rendered: Vec<String> = types
                .iter()
                .zip(fields)
                .map(|(ty, field)| format!("{ty} {}", constant(module, ty, field)))
                .collect();
            format!("{{ {} }}", rendered.join(", "))
        }
        (_, Constant::Struct(_)) => "undef".to_string(),
    }
}

/// `@name`, quoted when the name is not a plain identifier (methods are
/// called `Type.method`).
fn symbol(name: &str) -> String {
    if name
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
    {
        format!("@{name}")
    } else {
        format!("@\"{name}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::ir::Builder;

    #[test]
    fn renders_functions_globals_and_types() {
        let mut builder = Builder::new("demo");
        builder.declare_struct("P", &[IrType::Int(32), IrType::Int(32)]);
        let point = IrType::Struct("P".to_string());
        let one = builder.const_int(&IrType::Int(32), 1);
        let two = builder.const_int(&IrType::Int(32), 2);
        let origin = builder.build_struct(&point, vec![one, two]);
        builder.add_global("origin", origin);

        let sum = builder.declare_function("P.sum", &[point.clone()], &IrType::Int(32));
        builder.append_entry_block(&sum);
        let this = builder.param(&sum, 0);
        let slot = builder.build_alloca(&point, Some("self"));
        builder.build_store(this, slot.clone());
        let x_addr = builder.build_struct_gep(slot, 0);
        let x = builder.build_load(x_addr);
        builder.build_ret(x);
        builder.verify().expect("verify");

        let ir = generate_llvm_ir(builder.module());
        assert!(ir.contains("; ModuleID = \"demo\""));
        assert!(ir.contains("%P = type { i32, i32 }"));
        assert!(ir.contains("@origin = global %P { i32 1, i32 2 }"));
        assert!(ir.contains("define i32 @\"P.sum\"(%P %p0) {"));
        assert!(ir.contains("%t0 = alloca %P ; self"));
        assert!(ir.contains("store %P %p0, %P* %t0"));
        assert!(ir.contains("getelementptr inbounds %P, %P* %t0, i32 0, i32 0"));
        assert!(ir.contains("ret i32 %t3"));
    }

    #[test]
    fn bodiless_functions_are_declarations() {
        let mut builder = Builder::new("demo");
        builder.declare_function("external", &[IrType::Int(64)], &IrType::Void);
        let ir = generate_llvm_ir(builder.module());
        assert!(ir.contains("declare void @external(i64)"));
    }

    #[test]
    fn heap_allocations_call_malloc() {
        let mut builder = Builder::new("demo");
        builder.declare_struct("N", &[IrType::Int(32)]);
        let node = IrType::Struct("N".to_string());
        let f = builder.declare_function("make", &[], &node.clone().pointer_to());
        builder.append_entry_block(&f);
        let address = builder.build_heap_alloc(&node);
        builder.build_ret(address);

        let ir = generate_llvm_ir(builder.module());
        assert!(ir.contains("%t0.end = getelementptr %N, %N* null, i32 1"));
        assert!(ir.contains("%t0.raw = call i8* @malloc(i64 %t0.size)"));
        assert!(ir.contains("%t0 = bitcast i8* %t0.raw to %N*"));
        assert!(ir.ends_with("declare i8* @malloc(i64)\n"));
    }

    #[test]
    fn malloc_is_declared_only_when_used() {
        let mut builder = Builder::new("demo");
        let f = builder.declare_function("noop", &[], &IrType::Void);
        builder.append_entry_block(&f);
        builder.build_ret_void();
        assert!(!generate_llvm_ir(builder.module()).contains("@malloc"));
    }

    #[test]
    fn booleans_render_as_words() {
        let mut builder = Builder::new("demo");
        let f = builder.declare_function("yes", &[], &IrType::Int(1));
        builder.append_entry_block(&f);
        let value = builder.const_int(&IrType::Int(1), 1);
        builder.build_ret(value);
        assert!(generate_llvm_ir(builder.module()).contains("ret i1 true"));
    }
}
