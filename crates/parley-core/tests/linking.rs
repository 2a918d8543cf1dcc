//! Module linking tests: multi-file units, imports, and emitted chunk shape

use std::rc::Rc;

use parley_core::ast::{BinOp, Expr, PropertyDecl, SourceFile, Stmt, StructDecl, Type};
use parley_core::bytecode::{
    disassemble_chunk, verify_stack, CompileErrorKind, Global, Module, Symbol,
};
use parley_core::compiler::{compile, CompilerOptions, ModuleCompiler};
use parley_core::testutil::{
    call, compile_files, file, func, label, run_files, run_with_output,
};
use parley_core::vm::{ExecutionResult, VirtualMachine, VmConfig};
use parley_core::Value;

fn helper_file() -> SourceFile {
    file(
        "helper.pl",
        vec![Stmt::func(func("helper", &[], vec![Stmt::ret(Expr::int(1))]))],
    )
}

fn caller_file() -> SourceFile {
    file(
        "caller.pl",
        vec![Stmt::ret(Expr::binary(
            call(Expr::var("helper"), vec![]),
            BinOp::Add,
            Expr::int(1),
        ))],
    )
}

fn all_chunks(module: &Module) -> impl Iterator<Item = &Rc<parley_core::Chunk>> {
    module
        .chunks
        .values()
        .chain(module.value_initializers.values())
        .chain(module.main.iter())
}

#[test]
fn test_cross_file_reference_in_either_order() {
    assert_eq!(
        run_files(&[caller_file(), helper_file()]),
        Ok(Value::Int(2))
    );
    assert_eq!(
        run_files(&[helper_file(), caller_file()]),
        Ok(Value::Int(2))
    );
}

#[test]
fn test_last_non_none_file_result_wins() {
    let first = file("first.pl", vec![Stmt::ret(Expr::int(1))]);
    let second = file("second.pl", vec![Stmt::ret(Expr::int(2))]);
    let silent = file("silent.pl", vec![]);
    assert_eq!(
        run_files(&[first.clone(), second, silent.clone()]),
        Ok(Value::Int(2))
    );
    assert_eq!(run_files(&[silent, first]), Ok(Value::Int(1)));
}

#[test]
fn test_module_value_initializes_lazily_once() {
    let make = func(
        "make",
        &[],
        vec![
            Stmt::expr(call(Expr::var("print"), vec![Expr::string("init")])),
            Stmt::ret(Expr::int(41)),
        ],
    );
    let reader = file(
        "reader.pl",
        vec![Stmt::ret(Expr::binary(
            Expr::var("answer"),
            BinOp::Add,
            Expr::var("answer"),
        ))],
    );
    let declarer = file(
        "declarer.pl",
        vec![
            Stmt::func(make),
            Stmt::let_binding("answer", call(Expr::var("make"), vec![])),
        ],
    );

    let (value, lines) = run_with_output(&[reader, declarer]).unwrap();
    assert_eq!(value, Value::Int(82));
    assert_eq!(lines, vec!["init"]);
}

#[test]
fn test_value_shadowed_by_later_function_is_skipped() {
    let a = file(
        "a.pl",
        vec![Stmt::let_binding("x", Expr::int(1)), Stmt::ret(Expr::int(7))],
    );
    let b = file(
        "b.pl",
        vec![Stmt::func(func("x", &[], vec![Stmt::ret(Expr::int(2))]))],
    );
    assert_eq!(run_files(&[a.clone(), b.clone()]), Ok(Value::Int(7)));

    let module = compile_files(&[a, b]).unwrap();
    assert!(module.value_initializers.is_empty());
}

#[test]
fn test_module_value_assignment() {
    let bump = func(
        "bump",
        &[],
        vec![Stmt::expr(Expr::assign(
            Expr::var("total"),
            Expr::binary(Expr::var("total"), BinOp::Add, Expr::int(5)),
        ))],
    );
    let result = run_files(&[file(
        "main.pl",
        vec![
            Stmt::var_binding("total", Expr::int(1)),
            Stmt::func(bump),
            Stmt::expr(call(Expr::var("bump"), vec![])),
            Stmt::expr(call(Expr::var("bump"), vec![])),
            Stmt::ret(Expr::var("total")),
        ],
    )]);
    assert_eq!(result, Ok(Value::Int(11)));
}

#[test]
fn test_imported_module_functions() {
    let library = compile(
        "lib",
        &[file(
            "lib.pl",
            vec![Stmt::func(func("helper", &[], vec![Stmt::ret(Expr::int(40))]))],
        )],
        Vec::new(),
    )
    .unwrap();
    assert_eq!(
        library.exports.get("helper"),
        Some(&Global::Function(Symbol::function("lib", "helper", vec![])))
    );

    let app = compile(
        "app",
        &[file(
            "app.pl",
            vec![Stmt::ret(Expr::binary(
                call(Expr::var("helper"), vec![]),
                BinOp::Add,
                Expr::int(2),
            ))],
        )],
        vec![Rc::new(library)],
    )
    .unwrap();

    let mut vm = VirtualMachine::new(app, VmConfig::default()).unwrap();
    assert_eq!(vm.run(), Ok(Value::Int(42)));
}

#[test]
fn test_importer_can_name_standard_types() {
    let library = compile(
        "lib",
        &[file(
            "lib.pl",
            vec![Stmt::func(func("helper", &[], vec![Stmt::ret(Expr::int(40))]))],
        )],
        Vec::new(),
    )
    .unwrap();

    let xs = Expr::var("xs").typed(Type::array(Type::Int));
    let app = compile(
        "app",
        &[file(
            "app.pl",
            vec![
                Stmt::let_binding("xs", call(Expr::var("Array"), vec![Expr::int(4)])),
                Stmt::ret(Expr::member(xs, "count")),
            ],
        )],
        vec![Rc::new(library)],
    )
    .unwrap();

    let mut vm = VirtualMachine::new(app, VmConfig::default()).unwrap();
    assert_eq!(vm.run(), Ok(Value::Int(1)));
}

#[test]
fn test_argument_labels_are_checked() {
    let f = func(
        "f",
        &[("a", Type::Int), ("b", Type::Int)],
        vec![Stmt::ret(Expr::var("a"))],
    );
    let compile_call = |args| {
        ModuleCompiler::default()
            .compile(&[file(
                "main.pl",
                vec![
                    Stmt::func(f.clone()),
                    Stmt::ret(Expr::call(Expr::var("f"), args)),
                ],
            )])
            .unwrap_err()
    };

    let errors = compile_call(vec![label("a", Expr::int(1)), label("a", Expr::int(2))]);
    assert_eq!(
        errors[0].kind,
        CompileErrorKind::DuplicateArgumentLabel {
            callee: "f".into(),
            label: "a".into()
        }
    );

    let errors = compile_call(vec![label("c", Expr::int(1)), label("a", Expr::int(2))]);
    assert_eq!(
        errors[0].kind,
        CompileErrorKind::UnknownArgumentLabel {
            callee: "f".into(),
            label: "c".into()
        }
    );
}

#[test]
fn test_every_chunk_is_stack_balanced() {
    let this = || Expr::self_ref("Counter");
    let counter = StructDecl::new(
        "Counter",
        vec![PropertyDecl::new("count", Type::Int).with_default(Expr::int(0))],
    )
    .with_method(func(
        "bump",
        &[("by", Type::Int)],
        vec![
            Stmt::expr(Expr::assign(
                Expr::member(this(), "count"),
                Expr::binary(Expr::member(this(), "count"), BinOp::Add, Expr::var("by")),
            )),
            Stmt::ret(Expr::member(this(), "count")),
        ],
    ));
    let program = [
        file(
            "a.pl",
            vec![
                Stmt::structure(counter),
                Stmt::let_binding("start", Expr::int(3)),
                Stmt::if_then(
                    Expr::binary(Expr::var("start"), BinOp::Gt, Expr::int(1)),
                    vec![Stmt::expr(call(Expr::var("print"), vec![Expr::var("start")]))],
                    Some(vec![Stmt::ret(Expr::none())]),
                ),
            ],
        ),
        caller_file(),
        helper_file(),
    ];

    let module = compile_files(&program).unwrap();
    let mut checked = 0;
    for chunk in all_chunks(&module) {
        if let Err(error) = verify_stack(chunk) {
            panic!("{}: {error}\n{}", chunk.name, disassemble_chunk(chunk));
        }
        checked += 1;
    }
    // 3 files, helper, initializer, bump, value initializer, main (listed twice)
    assert!(checked >= 8);
}

#[test]
fn test_struct_property_offsets() {
    let module = compile_files(&[file(
        "p.pl",
        vec![Stmt::structure(StructDecl::new(
            "P",
            vec![
                PropertyDecl::new("age", Type::Int),
                PropertyDecl::new("name", Type::String),
            ],
        ))],
    )])
    .unwrap();

    let ty = module.struct_type(&Symbol::structure("main", "P")).unwrap();
    assert_eq!(ty.property_offset("age"), Some(0));
    assert_eq!(ty.property_offset("name"), Some(1));
    assert_eq!(ty.init_params, vec!["age", "name"]);
}

#[test]
fn test_unresolved_symbol_is_a_compile_error() {
    let errors = ModuleCompiler::new(CompilerOptions::default())
        .compile(&[file(
            "main.pl",
            vec![Stmt::ret(call(Expr::var("missing").at(3), vec![]))],
        )])
        .unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].kind,
        CompileErrorKind::UnresolvedSymbol("missing".into())
    );
    assert_eq!(errors[0].path, "main.pl");
    assert_eq!(errors[0].loc.line, 3);
}

#[test]
fn test_module_with_diagnostics_is_not_executable() {
    let module = ModuleCompiler::default().link(&[file(
        "main.pl",
        vec![Stmt::ret(Expr::var("missing"))],
    )]);
    assert!(!module.is_executable());
    assert!(VirtualMachine::new(module, VmConfig::default()).is_err());
}

#[test]
fn test_enum_used_as_value_is_rejected() {
    let color = parley_core::ast::EnumDecl {
        name: "Color".into(),
        cases: vec!["red".into()],
        loc: Default::default(),
    };
    let errors = compile_files(&[file(
        "main.pl",
        vec![Stmt::enumeration(color), Stmt::ret(Expr::var("Color"))],
    )])
    .unwrap_err();
    assert!(errors.contains("names a type"));
}

#[test]
fn test_execute_reports_elapsed_time() {
    let result = parley_core::execute(
        &[caller_file(), helper_file()],
        CompilerOptions::named("app"),
        VmConfig::default(),
    );
    assert!(result.is_ok());
    assert_eq!(result.value(), Some(&Value::Int(2)));
    assert!(matches!(result, ExecutionResult::Ok { .. }));

    let failed = parley_core::execute(
        &[caller_file()],
        CompilerOptions::default(),
        VmConfig::default(),
    );
    assert!(failed.error().is_some_and(|e| e.contains("helper")));
}
