//! End-to-end tests: hand-built trees compiled and run on the VM

use parley_core::ast::{
    Argument, BinOp, EnumDecl, Expr, FuncDecl, Location, PropertyDecl, Stmt, StmtKind, StructDecl, Type,
    UnaryOp,
};
use parley_core::bytecode::Value;
use parley_core::testutil::{
    call, expect_trap, file, func, label, run_files, run_int, run_program, run_with_output,
};
use parley_core::vm::{RuntimeErrorKind, VmConfig};

fn add(left: Expr, right: Expr) -> Expr {
    Expr::binary(left, BinOp::Add, right)
}

fn sub(left: Expr, right: Expr) -> Expr {
    Expr::binary(left, BinOp::Sub, right)
}

fn less(left: Expr, right: Expr) -> Expr {
    Expr::binary(left, BinOp::Lt, right)
}

fn typed_var(name: &str, ty: Type) -> Expr {
    Expr::var(name).typed(ty)
}

#[test]
fn test_arithmetic_expression() {
    assert_eq!(run_int(vec![Stmt::ret(add(Expr::int(1), Expr::int(2)))]), Ok(3));
}

#[test]
fn test_integer_division_truncates() {
    let quotient = Expr::binary(Expr::int(-7), BinOp::Div, Expr::int(2));
    let remainder = Expr::binary(Expr::int(-7), BinOp::Mod, Expr::int(2));
    // -3 * 10 + -1
    let combined = add(Expr::binary(quotient, BinOp::Mul, Expr::int(10)), remainder);
    assert_eq!(run_int(vec![Stmt::ret(combined)]), Ok(-31));
}

#[test]
fn test_division_by_zero_traps() {
    let program = [file(
        "main.pl",
        vec![Stmt::ret(Expr::binary(Expr::int(1), BinOp::Div, Expr::int(0)).at(2))],
    )];
    let error = expect_trap(&program, VmConfig::default()).unwrap();
    assert_eq!(error.kind, RuntimeErrorKind::DivisionByZero);
    assert_eq!(error.line, 2);
}

#[test]
fn test_overflow_traps() {
    let program = [file(
        "main.pl",
        vec![Stmt::ret(add(Expr::int(i64::MAX), Expr::int(1)))],
    )];
    let error = expect_trap(&program, VmConfig::default()).unwrap();
    assert_eq!(error.kind, RuntimeErrorKind::IntegerOverflow("ADD"));
}

#[test]
fn test_string_concatenation() {
    let result = run_program(vec![Stmt::ret(add(Expr::string("par"), Expr::string("ley")))]);
    assert_eq!(result, Ok(Value::string("parley")));
}

#[test]
fn test_recursive_fib() {
    let fib = func(
        "fib",
        &[("n", Type::Int)],
        vec![
            Stmt::if_then(
                less(Expr::var("n"), Expr::int(2)),
                vec![Stmt::ret(Expr::var("n"))],
                None,
            ),
            Stmt::ret(add(
                call(Expr::var("fib"), vec![sub(Expr::var("n"), Expr::int(1))]),
                call(Expr::var("fib"), vec![sub(Expr::var("n"), Expr::int(2))]),
            )),
        ],
    );
    let result = run_int(vec![
        Stmt::func(fib),
        Stmt::ret(call(Expr::var("fib"), vec![Expr::int(10)])),
    ]);
    assert_eq!(result, Ok(55));
}

#[test]
fn test_closure_counter_shares_captured_local() {
    let inc = func(
        "inc",
        &[],
        vec![
            Stmt::expr(Expr::assign(
                Expr::var("n"),
                add(Expr::var("n"), Expr::int(1)),
            )),
            Stmt::ret(Expr::var("n")),
        ],
    );
    let make_counter = func(
        "makeCounter",
        &[],
        vec![
            Stmt::var_binding("n", Expr::int(10)),
            Stmt::func(inc),
            Stmt::ret(Expr::var("inc")),
        ],
    );

    let result = run_int(vec![
        Stmt::func(make_counter),
        Stmt::let_binding("c", call(Expr::var("makeCounter"), vec![])),
        Stmt::expr(call(Expr::var("c"), vec![])),
        Stmt::ret(call(Expr::var("c"), vec![])),
    ]);
    assert_eq!(result, Ok(12));
}

#[test]
fn test_independent_counters() {
    // Each call to makeCounter closes over its own cell
    let inc = FuncDecl::anonymous(
        vec![],
        vec![
            Stmt::expr(Expr::assign(
                Expr::var("n"),
                add(Expr::var("n"), Expr::int(1)),
            )),
            Stmt::ret(Expr::var("n")),
        ],
    );
    let make_counter = func(
        "makeCounter",
        &[],
        vec![
            Stmt::var_binding("n", Expr::int(0)),
            Stmt::ret(Expr::func(inc)),
        ],
    );
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding("a", call(Expr::var("makeCounter"), vec![])),
            Stmt::let_binding("b", call(Expr::var("makeCounter"), vec![])),
            Stmt::expr(call(Expr::var("a"), vec![])),
            Stmt::expr(call(Expr::var("a"), vec![])),
            Stmt::ret(add(
                Expr::binary(call(Expr::var("a"), vec![]), BinOp::Mul, Expr::int(10)),
                call(Expr::var("b"), vec![]),
            )),
        ],
    );
    assert_eq!(run_int(vec![Stmt::func(make_counter), Stmt::func(main)]), Ok(31));
}

#[test]
fn test_loop_body_locals_are_fresh_per_iteration() {
    let capture_j = FuncDecl::anonymous(vec![], vec![Stmt::ret(Expr::var("j"))]);
    let closures = || typed_var("fs", Type::array(Type::Any));
    let main = func(
        "main",
        &[],
        vec![
            Stmt::var_binding("fs", Expr::array(vec![])),
            Stmt::var_binding("i", Expr::int(0)),
            Stmt::while_loop(
                less(Expr::var("i"), Expr::int(3)),
                vec![
                    Stmt::let_binding("j", Expr::var("i")),
                    Stmt::expr(Expr::method_call(
                        closures(),
                        "append",
                        vec![Argument::positional(Expr::func(capture_j))],
                    )),
                    Stmt::expr(Expr::assign(
                        Expr::var("i"),
                        add(Expr::var("i"), Expr::int(1)),
                    )),
                ],
            ),
            Stmt::ret(add(
                call(Expr::subscript(closures(), Expr::int(0)), vec![]),
                call(Expr::subscript(closures(), Expr::int(2)), vec![]),
            )),
        ],
    );
    assert_eq!(run_int(vec![Stmt::func(main)]), Ok(2));
}

#[test]
fn test_recursive_local_function() {
    let fact = func(
        "fact",
        &[("n", Type::Int)],
        vec![
            Stmt::if_then(
                less(Expr::var("n"), Expr::int(2)),
                vec![Stmt::ret(Expr::int(1))],
                None,
            ),
            Stmt::ret(Expr::binary(
                Expr::var("n"),
                BinOp::Mul,
                call(Expr::var("fact"), vec![sub(Expr::var("n"), Expr::int(1))]),
            )),
        ],
    );
    let main = func(
        "main",
        &[],
        vec![
            Stmt::func(fact),
            Stmt::ret(call(Expr::var("fact"), vec![Expr::int(5)])),
        ],
    );
    assert_eq!(run_int(vec![Stmt::func(main)]), Ok(120));
}

#[test]
fn test_while_with_break_and_continue() {
    let brk = Stmt::new(StmtKind::Break, Location::default());
    let cont = Stmt::new(StmtKind::Continue, Location::default());
    let main = func(
        "main",
        &[],
        vec![
            Stmt::var_binding("i", Expr::int(0)),
            Stmt::var_binding("sum", Expr::int(0)),
            Stmt::while_loop(
                Expr::bool(true),
                vec![
                    Stmt::expr(Expr::assign(
                        Expr::var("i"),
                        add(Expr::var("i"), Expr::int(1)),
                    )),
                    Stmt::if_then(
                        Expr::binary(Expr::var("i"), BinOp::Gt, Expr::int(5)),
                        vec![brk],
                        None,
                    ),
                    Stmt::if_then(
                        Expr::binary(
                            Expr::binary(Expr::var("i"), BinOp::Mod, Expr::int(2)),
                            BinOp::Eq,
                            Expr::int(0),
                        ),
                        vec![cont],
                        None,
                    ),
                    Stmt::expr(Expr::assign(
                        Expr::var("sum"),
                        add(Expr::var("sum"), Expr::var("i")),
                    )),
                ],
            ),
            Stmt::ret(Expr::var("sum")),
        ],
    );
    // 1 + 3 + 5
    assert_eq!(run_int(vec![Stmt::func(main)]), Ok(9));
}

#[test]
fn test_short_circuit_skips_right_operand() {
    let boom = func(
        "boom",
        &[],
        vec![Stmt::ret(Expr::binary(Expr::int(1), BinOp::Div, Expr::int(0)))],
    );
    let skipped_and = Expr::binary(
        Expr::bool(false),
        BinOp::And,
        call(Expr::var("boom"), vec![]),
    );
    let skipped_or = Expr::binary(
        Expr::bool(true),
        BinOp::Or,
        call(Expr::var("boom"), vec![]),
    );
    let result = run_program(vec![
        Stmt::func(boom),
        Stmt::ret(Expr::binary(
            Expr::unary(UnaryOp::Not, skipped_and),
            BinOp::And,
            skipped_or,
        )),
    ]);
    assert_eq!(result, Ok(Value::Bool(true)));
}

#[test]
fn test_struct_construction_with_label() {
    let person = StructDecl::new("P", vec![PropertyDecl::new("age", Type::Int)]);
    let construct = Expr::call(Expr::var("P"), vec![label("age", Expr::int(9))])
        .typed(Type::structure("P"));
    let result = run_int(vec![
        Stmt::structure(person),
        Stmt::ret(Expr::member(construct, "age")),
    ]);
    assert_eq!(result, Ok(9));
}

#[test]
fn test_labelled_arguments_are_reordered() {
    let point = StructDecl::new(
        "Point",
        vec![
            PropertyDecl::new("x", Type::Int),
            PropertyDecl::new("y", Type::Int),
        ],
    );
    let p = || typed_var("p", Type::structure("Point"));
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding(
                "p",
                Expr::call(
                    Expr::var("Point"),
                    vec![label("y", Expr::int(2)), label("x", Expr::int(1))],
                ),
            ),
            Stmt::ret(add(
                Expr::binary(Expr::member(p(), "x"), BinOp::Mul, Expr::int(10)),
                Expr::member(p(), "y"),
            )),
        ],
    );
    assert_eq!(run_int(vec![Stmt::structure(point), Stmt::func(main)]), Ok(12));
}

#[test]
fn test_instances_are_shared_references() {
    let this = || Expr::self_ref("Counter");
    let counter = StructDecl::new(
        "Counter",
        vec![PropertyDecl::new("count", Type::Int).with_default(Expr::int(0))],
    )
    .with_method(func(
        "increment",
        &[],
        vec![Stmt::expr(Expr::assign(
            Expr::member(this(), "count"),
            add(Expr::member(this(), "count"), Expr::int(1)),
        ))],
    ));
    let counter_ty = Type::structure("Counter");
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding("a", call(Expr::var("Counter"), vec![])),
            Stmt::let_binding("b", Expr::var("a")),
            Stmt::expr(Expr::method_call(typed_var("b", counter_ty.clone()), "increment", vec![])),
            Stmt::expr(Expr::method_call(typed_var("b", counter_ty.clone()), "increment", vec![])),
            Stmt::ret(Expr::member(typed_var("a", counter_ty), "count")),
        ],
    );
    assert_eq!(run_int(vec![Stmt::structure(counter), Stmt::func(main)]), Ok(2));
}

#[test]
fn test_explicit_initializer_and_bound_method() {
    let this = || Expr::self_ref("Greeter");
    let init = func(
        "init",
        &[("name", Type::String)],
        vec![Stmt::expr(Expr::assign(
            Expr::member(this(), "name"),
            Expr::var("name"),
        ))],
    );
    let greet = func(
        "greet",
        &[],
        vec![Stmt::ret(add(Expr::string("hello "), Expr::member(this(), "name")))],
    );
    let greeter = StructDecl::new("Greeter", vec![PropertyDecl::new("name", Type::String)])
        .with_init(init)
        .with_method(greet);
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding(
                "g",
                call(Expr::var("Greeter"), vec![Expr::string("ada")]),
            ),
            Stmt::let_binding(
                "say",
                Expr::member(typed_var("g", Type::structure("Greeter")), "greet"),
            ),
            Stmt::ret(call(Expr::var("say"), vec![])),
        ],
    );
    let result = run_program(vec![Stmt::structure(greeter), Stmt::func(main)]);
    assert_eq!(result, Ok(Value::string("hello ada")));
}

#[test]
fn test_unset_property_traps() {
    let this = Expr::self_ref("Pair");
    let init = func(
        "init",
        &[("a", Type::Int)],
        vec![Stmt::expr(Expr::assign(Expr::member(this, "a"), Expr::var("a")))],
    );
    let pair = StructDecl::new(
        "Pair",
        vec![
            PropertyDecl::new("a", Type::Int),
            PropertyDecl::new("b", Type::Int),
        ],
    )
    .with_init(init);
    let construct = call(Expr::var("Pair"), vec![Expr::int(1)]).typed(Type::structure("Pair"));

    let program = [file(
        "main.pl",
        vec![
            Stmt::structure(pair),
            Stmt::ret(Expr::member(construct, "b")),
        ],
    )];
    let error = expect_trap(&program, VmConfig::default()).unwrap();
    assert_eq!(
        error.kind,
        RuntimeErrorKind::UninitializedProperty {
            type_name: "Pair".into(),
            property: "b".into(),
        }
    );
}

#[test]
fn test_enum_cases_compare_by_case() {
    let color = EnumDecl {
        name: "Color".into(),
        cases: vec!["red".into(), "green".into()],
        loc: Location::default(),
    };
    let case = |name: &str| Expr::member(Expr::var("Color"), name);
    let result = run_program(vec![
        Stmt::enumeration(color),
        Stmt::ret(Expr::binary(
            Expr::binary(case("red"), BinOp::Eq, case("red")),
            BinOp::And,
            Expr::binary(case("red"), BinOp::Ne, case("green")),
        )),
    ]);
    assert_eq!(result, Ok(Value::Bool(true)));
}

#[test]
fn test_standard_array() {
    let xs = || typed_var("xs", Type::array(Type::Int));
    let main = func(
        "main",
        &[],
        vec![
            Stmt::var_binding("xs", Expr::array(vec![Expr::int(1), Expr::int(2)])),
            Stmt::expr(Expr::method_call(
                xs(),
                "append",
                vec![Argument::positional(Expr::int(30))],
            )),
            Stmt::expr(Expr::assign(Expr::subscript(xs(), Expr::int(0)), Expr::int(10))),
            // count 3, xs[0] 10, xs[2] 30
            Stmt::ret(add(
                Expr::member(xs(), "count"),
                add(
                    Expr::subscript(xs(), Expr::int(0)),
                    Expr::subscript(xs(), Expr::int(2)),
                ),
            )),
        ],
    );
    assert_eq!(run_int(vec![Stmt::func(main)]), Ok(43));
}

#[test]
fn test_array_index_out_of_bounds() {
    let program = [file(
        "main.pl",
        vec![Stmt::ret(Expr::subscript(
            Expr::array(vec![Expr::int(1)]),
            Expr::int(5),
        ))],
    )];
    let error = expect_trap(&program, VmConfig::default()).unwrap();
    assert!(matches!(
        error.kind,
        RuntimeErrorKind::IndexOutOfBounds { index: 5, length: 1 }
    ));
}

#[test]
fn test_standard_dictionary() {
    let ages = || typed_var("ages", Type::dictionary(Type::String, Type::Int));
    let main = func(
        "main",
        &[],
        vec![
            Stmt::var_binding(
                "ages",
                Expr::dictionary(vec![(Expr::string("ada"), Expr::int(36))]),
            ),
            Stmt::expr(Expr::assign(
                Expr::subscript(ages(), Expr::string("alan")),
                Expr::int(41),
            )),
            Stmt::ret(add(
                Expr::member(ages(), "count"),
                Expr::subscript(ages(), Expr::string("alan")),
            )),
        ],
    );
    assert_eq!(run_int(vec![Stmt::func(main)]), Ok(43));
}

#[test]
fn test_raw_pointers() {
    let p = || Expr::var("p");
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding("p", call(Expr::var("_allocate"), vec![Expr::int(2)])),
            Stmt::expr(call(
                Expr::var("_storePtr"),
                vec![add(p(), Expr::int(1)), Expr::int(42)],
            )),
            Stmt::ret(call(Expr::var("_deref"), vec![add(p(), Expr::int(1))])),
        ],
    );
    assert_eq!(run_int(vec![Stmt::func(main)]), Ok(42));
}

#[test]
fn test_freed_block_is_dangling() {
    let p = || Expr::var("p");
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding("p", call(Expr::var("_allocate"), vec![Expr::int(1)])),
            Stmt::expr(call(Expr::var("_storePtr"), vec![p(), Expr::int(7)])),
            Stmt::expr(call(Expr::var("_free"), vec![p()])),
            Stmt::ret(call(Expr::var("_deref"), vec![p()])),
        ],
    );
    let error = expect_trap(&[file("main.pl", vec![Stmt::func(main)])], VmConfig::default()).unwrap();
    assert!(matches!(error.kind, RuntimeErrorKind::DanglingPointer(_)));
}

#[test]
fn test_oversized_allocation_traps() {
    let program = [file(
        "main.pl",
        vec![Stmt::ret(call(
            Expr::var("_allocate"),
            vec![Expr::int(i64::MAX / 2)],
        ))],
    )];
    let error = expect_trap(&program, VmConfig::default()).unwrap();
    assert!(matches!(
        error.kind,
        RuntimeErrorKind::AllocationTooLarge { .. }
    ));

    let config = VmConfig::default().with_max_block_slots(8);
    let small = [file(
        "main.pl",
        vec![Stmt::ret(call(Expr::var("_allocate"), vec![Expr::int(9)]))],
    )];
    let error = expect_trap(&small, config).unwrap();
    assert_eq!(
        error.kind,
        RuntimeErrorKind::AllocationTooLarge {
            requested: 9,
            limit: 8
        }
    );
}

#[test]
fn test_print_is_captured() {
    let program = [file(
        "main.pl",
        vec![
            Stmt::expr(call(Expr::var("print"), vec![Expr::string("hello")])),
            Stmt::expr(call(Expr::var("print"), vec![Expr::int(42)])),
        ],
    )];
    let (value, lines) = run_with_output(&program).unwrap();
    assert_eq!(value, Value::None);
    assert_eq!(lines, vec!["hello", "42"]);
}

#[test]
fn test_unbounded_recursion_overflows() {
    let forever = func(
        "forever",
        &[],
        vec![Stmt::ret(call(Expr::var("forever"), vec![]))],
    );
    let program = [file(
        "main.pl",
        vec![
            Stmt::func(forever),
            Stmt::ret(call(Expr::var("forever"), vec![])),
        ],
    )];
    let error = expect_trap(&program, VmConfig::default().with_max_frames(16)).unwrap();
    assert_eq!(error.kind, RuntimeErrorKind::StackOverflow);
    assert!(!error.stack_trace.is_empty());
}

#[test]
fn test_arity_mismatch_traps() {
    let one = func("one", &[("x", Type::Int)], vec![Stmt::ret(Expr::var("x"))]);
    // Calling through a value skips compile-time parameter matching
    let main = func(
        "main",
        &[],
        vec![
            Stmt::let_binding("f", Expr::var("one")),
            Stmt::ret(call(Expr::var("f"), vec![])),
        ],
    );
    let error = expect_trap(
        &[file("main.pl", vec![Stmt::func(one), Stmt::func(main)])],
        VmConfig::default(),
    )
    .unwrap();
    assert!(matches!(
        error.kind,
        RuntimeErrorKind::ArityMismatch { expected: 1, got: 0, .. }
    ));
}

#[test]
fn test_user_main_result_wins() {
    let main = func("main", &[], vec![Stmt::ret(Expr::int(7))]);
    let result = run_files(&[file(
        "main.pl",
        vec![Stmt::func(main), Stmt::ret(Expr::int(5))],
    )]);
    assert_eq!(result, Ok(Value::Int(7)));
}

#[test]
fn test_function_mutates_module_value() {
    let inc = func(
        "inc",
        &[],
        vec![Stmt::expr(Expr::assign(
            Expr::var("a"),
            add(Expr::var("a"), Expr::int(1)),
        ))],
    );
    let result = run_int(vec![
        Stmt::var_binding("a", Expr::int(10)),
        Stmt::func(inc),
        Stmt::expr(call(Expr::var("inc"), vec![])),
        Stmt::expr(call(Expr::var("inc"), vec![])),
        Stmt::ret(Expr::var("a")),
    ]);
    assert_eq!(result, Ok(12));
}

#[test]
fn test_module_value_struct_member() {
    let person = StructDecl::new("P", vec![PropertyDecl::new("age", Type::Int)]);
    let result = run_int(vec![
        Stmt::structure(person),
        Stmt::let_binding(
            "p",
            Expr::call(Expr::var("P"), vec![label("age", Expr::int(9))]),
        ),
        Stmt::ret(Expr::member(typed_var("p", Type::structure("P")), "age")),
    ]);
    assert_eq!(result, Ok(9));
}

#[test]
fn test_remainder() {
    let rem = |a, b| Expr::binary(Expr::int(a), BinOp::Mod, Expr::int(b));
    assert_eq!(run_int(vec![Stmt::ret(rem(5, 2))]), Ok(1));
    assert_eq!(run_int(vec![Stmt::ret(rem(4, 2))]), Ok(0));
}

#[test]
fn test_mismatched_operands_trap() {
    let program = [file(
        "main.pl",
        vec![Stmt::ret(add(Expr::int(1), Expr::string("a")))],
    )];
    let error = expect_trap(&program, VmConfig::default()).unwrap();
    assert!(matches!(error.kind, RuntimeErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_two_file_call_chain() {
    let bar = file(
        "bar.pl",
        vec![Stmt::func(func("bar", &[], vec![Stmt::ret(Expr::int(1))]))],
    );
    let foo = file(
        "foo.pl",
        vec![
            Stmt::func(func(
                "foo",
                &[],
                vec![Stmt::ret(add(call(Expr::var("bar"), vec![]), Expr::int(1)))],
            )),
            Stmt::ret(call(Expr::var("foo"), vec![])),
        ],
    );
    assert_eq!(run_files(&[bar.clone(), foo.clone()]), Ok(Value::Int(2)));
    assert_eq!(run_files(&[foo, bar]), Ok(Value::Int(2)));
}
