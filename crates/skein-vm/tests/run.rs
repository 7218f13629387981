use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use skein_ast::build::*;
use skein_ast::{AssignOp, BinaryOp, Stmt};
use skein_bytecode::Bytecode;
use skein_compiler::{compile, CompilerOptions, ModuleMap, SymbolTable};
use skein_core::{Pos, SourceFileSet};
use skein_runtime::{skein_native, CancelToken, Limits, MapValue, Object, RuntimeError};
use skein_vm::{ExecContext, Vm, VmConfig, VmState};

struct Outcome {
    symbols: SymbolTable,
    globals: Vec<Object>,
}

impl Outcome {
    fn get(&self, name: &str) -> Object {
        let idx = self.symbols.global_index(name).unwrap_or_else(|| panic!("no global {name}"));
        self.globals[idx].clone()
    }
}

fn build_with(stmts: Vec<Stmt>, options: CompilerOptions) -> (SymbolTable, Bytecode) {
    let mut symbols = SymbolTable::with_builtins();
    let bc = compile(&file("main", stmts), SourceFileSet::new(), &mut symbols, options).unwrap();
    (symbols, bc)
}

fn exec_with(stmts: Vec<Stmt>, ctx: &ExecContext) -> Result<Outcome, RuntimeError> {
    let (symbols, bc) = build_with(stmts, CompilerOptions::default());
    let mut globals = Vec::new();
    skein_vm::run(&bc, ctx, &mut globals)?;
    Ok(Outcome { symbols, globals })
}

fn exec(stmts: Vec<Stmt>) -> Outcome {
    exec_with(stmts, &ExecContext::default()).unwrap()
}

fn exec_err(stmts: Vec<Stmt>) -> RuntimeError {
    match exec_with(stmts, &ExecContext::default()) {
        Ok(_) => panic!("script succeeded"),
        Err(err) => err,
    }
}

fn ints(values: &[i64]) -> Object {
    Object::array(values.iter().copied().map(Object::Int).collect())
}

/* ───── fermetures ───── */

#[test]
fn closure_sees_reassignment_of_captured_local() {
    // f := func() { n := 1; g := func() { return n }; n = 99; return g() }
    let out = exec(vec![
        define(
            "f",
            func(
                &[],
                vec![
                    define("n", int(1)),
                    define("g", func(&[], vec![ret(Some(ident("n")))])),
                    assign("n", int(99)),
                    ret(Some(call(ident("g"), vec![]))),
                ],
            ),
        ),
        define("r", call(ident("f"), vec![])),
    ]);
    assert_eq!(out.get("r"), Object::Int(99));
}

#[test]
fn closure_writes_are_seen_by_the_enclosing_function() {
    // f := func() { n := 0; inc := func() { n += 1 }; inc(); inc(); return n }
    let out = exec(vec![
        define(
            "f",
            func(
                &[],
                vec![
                    define("n", int(0)),
                    define("bump", func(&[], vec![assign_op(ident("n"), AssignOp::Add, int(1))])),
                    expr_stmt(call(ident("bump"), vec![])),
                    expr_stmt(call(ident("bump"), vec![])),
                    ret(Some(ident("n"))),
                ],
            ),
        ),
        define("r", call(ident("f"), vec![])),
    ]);
    assert_eq!(out.get("r"), Object::Int(2));
}

#[test]
fn redeclared_loop_local_gets_a_new_cell_each_iteration() {
    // make := func() {
    //     fns := []
    //     for i := 0; i < 3; i++ { x := i; fns = append(fns, func() { return [x, i] }) }
    //     return fns
    // }
    let body = vec![
        define("x", ident("i")),
        assign(
            "fns",
            call(ident("append"), vec![ident("fns"), func(&[], vec![ret(Some(array(vec![ident("x"), ident("i")])))])]),
        ),
    ];
    let out = exec(vec![
        define(
            "make",
            func(
                &[],
                vec![
                    define("fns", array(vec![])),
                    for_(
                        Some(define("i", int(0))),
                        Some(bin(ident("i"), BinaryOp::Less, int(3))),
                        Some(inc(ident("i"))),
                        body,
                    ),
                    ret(Some(ident("fns"))),
                ],
            ),
        ),
        define("fns", call(ident("make"), vec![])),
        define("a", call(index(ident("fns"), int(0)), vec![])),
        define("c", call(index(ident("fns"), int(2)), vec![])),
    ]);
    // x est redéclaré à chaque tour, i est le même slot réaffecté
    assert_eq!(out.get("a"), ints(&[0, 3]));
    assert_eq!(out.get("c"), ints(&[2, 3]));
}

#[test]
fn nested_closures_share_through_free_pointers() {
    // outer := func() { n := 1; mid := func() { return func() { n = n * 10 } }; mid()(); return n }
    let out = exec(vec![
        define(
            "outer",
            func(
                &[],
                vec![
                    define("n", int(1)),
                    define(
                        "mid",
                        func(&[], vec![ret(Some(func(&[], vec![assign("n", bin(ident("n"), BinaryOp::Mul, int(10)))])))]),
                    ),
                    expr_stmt(call(call(ident("mid"), vec![]), vec![])),
                    ret(Some(ident("n"))),
                ],
            ),
        ),
        define("r", call(ident("outer"), vec![])),
    ]);
    assert_eq!(out.get("r"), Object::Int(10));
}

#[test]
fn local_recursive_closure() {
    // f := func() { fib := func(n) { return n < 2 ? n : fib(n-1) + fib(n-2) }; return fib(15) }
    let fib_body = vec![ret(Some(cond(
        bin(ident("n"), BinaryOp::Less, int(2)),
        ident("n"),
        bin(
            call(ident("fib"), vec![bin(ident("n"), BinaryOp::Sub, int(1))]),
            BinaryOp::Add,
            call(ident("fib"), vec![bin(ident("n"), BinaryOp::Sub, int(2))]),
        ),
    )))];
    let out = exec(vec![
        define("f", func(&[], vec![define("fib", func(&["n"], fib_body)), ret(Some(call(ident("fib"), vec![int(15)])))])),
        define("r", call(ident("f"), vec![])),
    ]);
    assert_eq!(out.get("r"), Object::Int(610));
}

/* ───── appels ───── */

#[test]
fn tail_calls_do_not_grow_the_frame_stack() {
    // sum := func(n, acc) { if n == 0 { return acc }; return sum(n - 1, acc + n) }
    let out = exec(vec![
        define(
            "sum",
            func(
                &["n", "acc"],
                vec![
                    if_(bin(ident("n"), BinaryOp::Equal, int(0)), vec![ret(Some(ident("acc")))]),
                    ret(Some(call(
                        ident("sum"),
                        vec![bin(ident("n"), BinaryOp::Sub, int(1)), bin(ident("acc"), BinaryOp::Add, ident("n"))],
                    ))),
                ],
            ),
        ),
        define("r", call(ident("sum"), vec![int(5000), int(0)])),
    ]);
    assert_eq!(out.get("r"), Object::Int(12_502_500));
}

#[test]
fn deep_recursion_overflows() {
    // f := func(n) { return 1 + f(n + 1) }
    let err = exec_err(vec![
        define(
            "f",
            func(
                &["n"],
                vec![ret(Some(bin(int(1), BinaryOp::Add, call(ident("f"), vec![bin(ident("n"), BinaryOp::Add, int(1))]))))],
            ),
        ),
        expr_stmt(call(ident("f"), vec![int(0)])),
    ]);
    assert_eq!(err.root(), &RuntimeError::StackOverflow);
}

#[test]
fn var_args_and_spread() {
    let f = func_var_args(&["a", "rest"], vec![ret(Some(array(vec![ident("a"), ident("rest")])))]);
    let out = exec(vec![
        define("f", f),
        define("r1", call(ident("f"), vec![int(1), int(2), int(3)])),
        define("r2", call_spread(ident("f"), vec![array(vec![int(1), int(2)])])),
        define("r3", call(ident("f"), vec![int(1)])),
        define("r4", call_spread(ident("len"), vec![array(vec![str("abc")])])),
    ]);
    assert_eq!(out.get("r1"), Object::array(vec![Object::Int(1), ints(&[2, 3])]));
    assert_eq!(out.get("r2"), Object::array(vec![Object::Int(1), ints(&[2])]));
    assert_eq!(out.get("r3"), Object::array(vec![Object::Int(1), ints(&[])]));
    assert_eq!(out.get("r4"), Object::Int(3));
}

#[test]
fn arity_is_checked() {
    let err = exec_err(vec![
        define("f", func(&["a", "b"], vec![ret(Some(ident("a")))])),
        expr_stmt(call(ident("f"), vec![int(1)])),
    ]);
    assert_eq!(err.root(), &RuntimeError::wrong_args("2", 1));

    let err = exec_err(vec![
        define("g", func_var_args(&["a", "rest"], vec![])),
        expr_stmt(call(ident("g"), vec![])),
    ]);
    assert_eq!(err.root(), &RuntimeError::wrong_args("at least 1", 0));
}

#[test]
fn calling_a_non_function_fails() {
    let err = exec_err(vec![define("x", int(1)), expr_stmt(call(ident("x"), vec![]))]);
    assert_eq!(err.root(), &RuntimeError::NotCallable("int".into()));
}

/* ───── erreurs positionnées ───── */

#[test]
fn runtime_errors_carry_the_call_trace() {
    let mut file_set = SourceFileSet::new();
    let main = file_set.add_file("main", None, 30);
    main.add_line(10);
    main.add_line(20);
    let stmts = vec![
        define("f", func(&[], vec![ret(Some(bin(int(1).at(Pos(25)), BinaryOp::Add, str("x"))))])),
        define("r", call(ident("f").at(Pos(13)), vec![])),
    ];
    let mut symbols = SymbolTable::with_builtins();
    let bc = compile(&file("main", stmts), file_set, &mut symbols, CompilerOptions::default()).unwrap();

    let err = skein_vm::run(&bc, &ExecContext::default(), &mut Vec::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Runtime Error: invalid operation: int + string\n\tat main:3:5\n\tat main:2:3"
    );
}

#[test]
fn index_errors_stop_the_run() {
    let err = exec_err(vec![define("a", array(vec![int(1)])), expr_stmt(index(ident("a"), int(5)))]);
    assert_eq!(err.root(), &RuntimeError::IndexOutOfBounds);
}

/* ───── annulation et limites ───── */

#[test]
fn tight_loop_is_interrupted_by_the_deadline() {
    let ctx = ExecContext::new(Limits::default(), CancelToken::with_timeout(Duration::from_millis(50)));
    let started = Instant::now();
    let err = exec_with(vec![for_(None, None, None, vec![])], &ctx).err().unwrap();
    assert!(err.is_aborted());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn host_can_abort_from_another_thread() {
    let (_, bc) = build_with(vec![define("i", int(0)), for_(None, None, None, vec![inc(ident("i"))])], CompilerOptions::default());
    let token = CancelToken::new();
    let remote = token.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        remote.cancel();
    });
    let mut vm = Vm::new(bc, Vec::new(), VmConfig::default(), ExecContext::new(Limits::default(), token));
    let err = vm.run().unwrap_err();
    handle.join().unwrap();
    assert!(err.is_aborted());
    assert_eq!(vm.state(), VmState::Aborted);
}

#[test]
fn allocation_ceiling_applies_to_scripts() {
    // a := []; for i := 0; i < 100; i++ { a = append(a, i) }
    let script = || {
        vec![
            define("a", array(vec![])),
            for_(
                Some(define("i", int(0))),
                Some(bin(ident("i"), BinaryOp::Less, int(100))),
                Some(inc(ident("i"))),
                vec![assign("a", call(ident("append"), vec![ident("a"), ident("i")]))],
            ),
        ]
    };
    let tight = ExecContext::new(Limits { max_allocs: 20, ..Limits::default() }, CancelToken::new());
    let err = exec_with(script(), &tight).err().unwrap();
    assert_eq!(err.root(), &RuntimeError::ObjectAllocLimit);

    let out = exec(script());
    let Object::Array(a) = out.get("a") else { panic!("not an array") };
    assert_eq!(a.borrow().len(), 100);
}

#[test]
fn string_limit_applies_to_concatenation() {
    let ctx = ExecContext::new(Limits { max_string_len: 4, ..Limits::default() }, CancelToken::new());
    let err = exec_with(vec![define("s", bin(str("abc"), BinaryOp::Add, str("de")))], &ctx).err().unwrap();
    assert_eq!(err.root(), &RuntimeError::StringLimit);
}

#[test]
fn array_limit_applies_to_builders() {
    let ctx = ExecContext::new(Limits { max_array_len: 4, ..Limits::default() }, CancelToken::new());
    let cases = vec![
        vec![define("a", call(ident("range"), vec![int(0), int(1_000_000)]))],
        vec![define("a", array(vec![int(1), int(2), int(3)])), assign("a", bin(ident("a"), BinaryOp::Add, ident("a")))],
        vec![
            define("a", immutable(array(vec![int(1), int(2), int(3), int(4)]))),
            expr_stmt(call(ident("append"), vec![ident("a"), int(5)])),
        ],
        vec![define("a", array(vec![int(1), int(2), int(3), int(4), int(5)]))],
    ];
    for stmts in cases {
        let err = exec_with(stmts, &ctx).err().unwrap();
        assert_eq!(err.root(), &RuntimeError::ArrayLimit);
    }
    let out = exec_with(vec![define("a", call(ident("range"), vec![int(0), int(4)]))], &ctx).unwrap();
    assert_eq!(out.get("a"), ints(&[0, 1, 2, 3]));
}

#[test]
fn format_and_bytes_respect_limits() {
    let ctx = ExecContext::new(Limits { max_string_len: 16, max_bytes_len: 4, ..Limits::default() }, CancelToken::new());
    let err = exec_with(vec![define("s", call(ident("format"), vec![str("%.2000000000f"), float(1.0)]))], &ctx)
        .err()
        .unwrap();
    assert_eq!(err.root(), &RuntimeError::StringLimit);

    let err = exec_with(
        vec![
            define("b", call(ident("bytes"), vec![str("abc")])),
            define("c", bin(ident("b"), BinaryOp::Add, ident("b"))),
        ],
        &ctx,
    )
    .err()
    .unwrap();
    assert_eq!(err.root(), &RuntimeError::BytesLimit);
}

#[test]
fn deduplication_keeps_error_positions() {
    // f et g ont le même corps, à des lignes différentes ; g échoue
    let compile_at = |remove_duplicates: bool| {
        let mut file_set = SourceFileSet::new();
        let main = file_set.add_file("main", None, 40);
        main.add_line(10);
        main.add_line(20);
        main.add_line(30);
        let body = |pos: u32| func(&[], vec![ret(Some(bin(int(1).at(Pos(pos)), BinaryOp::Add, str("x"))))]);
        let stmts = vec![define("f", body(3)), define("g", body(23)), expr_stmt(call(ident("g").at(Pos(33)), vec![]))];
        let options = CompilerOptions { remove_duplicates, ..CompilerOptions::default() };
        compile(&file("main", stmts), file_set, &mut SymbolTable::with_builtins(), options).unwrap()
    };
    let report = |bc: &Bytecode| skein_vm::run(bc, &ExecContext::default(), &mut Vec::new()).unwrap_err().to_string();

    let plain = report(&compile_at(false));
    assert_eq!(plain, "Runtime Error: invalid operation: int + string\n\tat main:3:3\n\tat main:4:3");
    assert_eq!(report(&compile_at(true)), plain);
}

/* ───── données ───── */

#[test]
fn iteration_over_maps_and_strings() {
    let out = exec(vec![
        define("m", map(vec![("a", int(1)), ("b", int(2))])),
        define("keys", str("")),
        define("total", int(0)),
        for_in(
            "k",
            Some("v"),
            ident("m"),
            vec![
                assign_op(ident("keys"), AssignOp::Add, ident("k")),
                assign_op(ident("total"), AssignOp::Add, ident("v")),
            ],
        ),
        define("chars", array(vec![])),
        for_in("c", None, str("hé"), vec![assign("chars", call(ident("append"), vec![ident("chars"), ident("c")]))]),
        define("idx", int(0)),
        for_in("i", Some("_"), array(vec![int(7), int(8), int(9)]), vec![assign("idx", ident("i"))]),
    ]);
    assert_eq!(out.get("keys"), Object::from("ab"));
    assert_eq!(out.get("total"), Object::Int(3));
    assert_eq!(out.get("chars"), Object::array(vec![Object::Char('h'), Object::Char('é')]));
    assert_eq!(out.get("idx"), Object::Int(2));
}

#[test]
fn selector_assignment_mutates_in_place() {
    // m := {a: {b: 1}}; alias := m; m.a.b = 5; arr := [1, 2]; arr[1] += 10
    let out = exec(vec![
        define("m", map(vec![("a", map(vec![("b", int(1))]))])),
        define("alias", ident("m")),
        assign_op(sel(sel(ident("m"), "a"), "b"), AssignOp::Assign, int(5)),
        define("arr", array(vec![int(1), int(2)])),
        assign_op(index(ident("arr"), int(1)), AssignOp::Add, int(10)),
        define("r", sel(sel(ident("alias"), "a"), "b")),
    ]);
    assert_eq!(out.get("r"), Object::Int(5));
    assert_eq!(out.get("arr"), ints(&[1, 12]));
}

#[test]
fn immutable_values_reject_assignment() {
    let err = exec_err(vec![
        define("a", immutable(array(vec![int(1)]))),
        assign_op(index(ident("a"), int(0)), AssignOp::Assign, int(2)),
    ]);
    assert_eq!(err.root(), &RuntimeError::NotIndexAssignable("immutable-array".into()));
}

#[test]
fn logical_operators_short_circuit() {
    // r1 := 0 && len(); r2 := "" || "x"; r3 := !0
    let out = exec(vec![
        define("r1", bin(int(0), BinaryOp::LAnd, call(ident("len"), vec![]))),
        define("r2", bin(str(""), BinaryOp::LOr, str("x"))),
        define("r3", unary(skein_ast::UnaryOp::Not, int(0))),
        define("r4", slice(str("hello"), Some(int(1)), None)),
        define("e", error(str("boom"))),
    ]);
    assert_eq!(out.get("r1"), Object::Int(0));
    assert_eq!(out.get("r2"), Object::from("x"));
    assert_eq!(out.get("r3"), Object::Bool(true));
    assert_eq!(out.get("r4"), Object::from("ello"));
    assert_eq!(out.get("e"), Object::error(Object::from("boom")));
}

/* ───── hôte ───── */

skein_native!(apply |ctx, args| {
    let Some((callee, rest)) = args.split_first() else {
        return Err(RuntimeError::wrong_args("at least 1", 0));
    };
    ctx.call(callee, rest)
});

fn host_modules() -> ModuleMap {
    let mut attrs = MapValue::new();
    attrs.insert("apply".into(), Object::builtin("apply", apply));
    let mut modules = ModuleMap::new();
    modules.add_builtin_module("host", attrs).add_source_module(
        "util",
        file("util", vec![export(map(vec![("twice", func(&["x"], vec![ret(Some(bin(ident("x"), BinaryOp::Mul, int(2))))]))]))]),
    );
    modules
}

#[test]
fn natives_can_call_back_into_the_script() {
    let stmts = vec![
        define("h", import("host")),
        define("r", call(sel(ident("h"), "apply"), vec![func(&["x"], vec![ret(Some(bin(ident("x"), BinaryOp::Mul, int(2))))]), int(21)])),
        define("l", call(sel(ident("h"), "apply"), vec![ident("len"), str("four")])),
    ];
    let (symbols, bc) = build_with(stmts, CompilerOptions::default().with_modules(host_modules()));
    let mut globals = Vec::new();
    skein_vm::run(&bc, &ExecContext::default(), &mut globals).unwrap();
    let out = Outcome { symbols, globals };
    assert_eq!(out.get("r"), Object::Int(42));
    assert_eq!(out.get("l"), Object::Int(4));
}

#[test]
fn errors_inside_callbacks_reach_the_host() {
    let stmts = vec![
        define("h", import("host")),
        expr_stmt(call(sel(ident("h"), "apply"), vec![func(&["x"], vec![ret(Some(bin(ident("x"), BinaryOp::Add, str("s"))))]), int(1)])),
    ];
    let (_, bc) = build_with(stmts, CompilerOptions::default().with_modules(host_modules()));
    let err = skein_vm::run(&bc, &ExecContext::default(), &mut Vec::new()).unwrap_err();
    assert!(matches!(err.root(), RuntimeError::UnsupportedOperands { .. }));
}

#[test]
fn source_modules_export_values() {
    let stmts = vec![define("u", import("util")), define("r", call(sel(ident("u"), "twice"), vec![int(8)]))];
    let (symbols, bc) = build_with(stmts, CompilerOptions::default().with_modules(host_modules()));
    let mut globals = Vec::new();
    skein_vm::run(&bc, &ExecContext::default(), &mut globals).unwrap();
    let out = Outcome { symbols, globals };
    assert_eq!(out.get("r"), Object::Int(16));
    assert!(matches!(out.get("u"), Object::ImmutableMap(_)));
}

#[test]
fn host_globals_are_visible_to_the_script() {
    let mut symbols = SymbolTable::with_builtins();
    let base = symbols.define_global("base");
    let stmts = vec![define("r", bin(ident("base"), BinaryOp::Mul, int(2)))];
    let bc = compile(&file("main", stmts), SourceFileSet::new(), &mut symbols, CompilerOptions::default()).unwrap();

    let mut globals = vec![Object::Undefined; base + 1];
    globals[base] = Object::Int(21);
    skein_vm::run(&bc, &ExecContext::default(), &mut globals).unwrap();
    assert_eq!(globals[symbols.global_index("r").unwrap()], Object::Int(42));
}

#[test]
fn host_calls_script_functions_after_the_run() {
    let (symbols, bc) = build_with(
        vec![
            define("scale", int(3)),
            define("times", func(&["x"], vec![ret(Some(bin(ident("x"), BinaryOp::Mul, ident("scale"))))])),
        ],
        CompilerOptions::default(),
    );
    let mut vm = Vm::new(bc, Vec::new(), VmConfig::default(), ExecContext::default());
    vm.run().unwrap();
    let times = vm.global(symbols.global_index("times").unwrap()).cloned().unwrap();
    assert_eq!(vm.run_compiled(&times, &[Object::Int(5)]), Ok(Object::Int(15)));
    assert_eq!(vm.run_compiled(&times, &[]).unwrap_err().root(), &RuntimeError::wrong_args("1", 0));
    // la VM reste utilisable après une erreur
    assert_eq!(vm.run_compiled(&times, &[Object::Int(2)]), Ok(Object::Int(6)));
}

#[test]
fn serialized_bytecode_runs_the_same() {
    let stmts = vec![
        define("add", func(&["a"], vec![ret(Some(func(&["b"], vec![ret(Some(bin(ident("a"), BinaryOp::Add, ident("b"))))])))])),
        define("r", call(call(ident("add"), vec![int(40)]), vec![int(2)])),
        define("n", call(ident("len"), vec![map(vec![("x", float(1.5)), ("y", immutable(array(vec![chr('z')])))])])),
    ];
    let (symbols, bc) = build_with(stmts, CompilerOptions::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.skbc");
    bc.write_file(&path).unwrap();
    let loaded = Bytecode::read_file(&path, &()).unwrap();

    let mut globals = Vec::new();
    skein_vm::run(&loaded, &ExecContext::default(), &mut globals).unwrap();
    let out = Outcome { symbols, globals };
    assert_eq!(out.get("r"), Object::Int(42));
    assert_eq!(out.get("n"), Object::Int(2));
}
