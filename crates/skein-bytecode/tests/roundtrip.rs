use std::collections::BTreeMap;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use skein_bytecode::{BuiltinModules, Bytecode, BytecodeError, MAGIC};
use skein_core::{make_instruction, Opcode, Pos, SourceFileSet};
use skein_runtime::{find_builtin, CompiledFunction, MapValue, NativeContext, Object, RuntimeError};

fn times(_ctx: &mut NativeContext<'_>, args: &[Object]) -> Result<Object, RuntimeError> {
    match args {
        [Object::Int(a), Object::Int(b)] => Ok(Object::Int(a * b)),
        _ => Err(RuntimeError::wrong_args("2", args.len())),
    }
}

struct HostModules(MapValue);

impl BuiltinModules for HostModules {
    fn builtin_module(&self, name: &str) -> Option<&MapValue> {
        (name == "math").then_some(&self.0)
    }
}

fn math_attrs() -> MapValue {
    let mut attrs = MapValue::new();
    attrs.insert("times".into(), Object::builtin("times", times));
    attrs.insert("pi".into(), Object::Float(std::f64::consts::PI));
    attrs
}

fn function(ins: Vec<u8>, locals: usize, params: usize) -> CompiledFunction {
    CompiledFunction {
        instructions: Rc::from(ins),
        num_locals: locals,
        num_parameters: params,
        var_args: params > 1,
        source_map: Rc::new(BTreeMap::from([(0, Pos(3)), (3, Pos(9))])),
        free: Vec::new(),
    }
}

fn program() -> Bytecode {
    let mut file_set = SourceFileSet::new();
    file_set.add_file("main.sk", None, 40).add_line(10);
    file_set.add_file("lib.sk", None, 8);

    // inner : GETF 0 ; RET 1
    // outer : GETLP 0 ; CLOSURE 0 1 ; RET 1
    let mut inner = make_instruction(Opcode::GetFree, &[0]);
    inner.extend(make_instruction(Opcode::Return, &[1]));
    let mut outer = make_instruction(Opcode::GetLocalPtr, &[0]);
    outer.extend(make_instruction(Opcode::Closure, &[0, 1]));
    outer.extend(make_instruction(Opcode::Return, &[1]));

    let mut map = MapValue::new();
    map.insert("a".into(), Object::Int(1));
    map.insert("b".into(), Object::array(vec![Object::from("x"), Object::Char('é')]));

    let when = Object::Int(1_700_000_000).to_time().map(Object::Time).unwrap();

    let mut main = make_instruction(Opcode::Constant, &[1]);
    main.extend(make_instruction(Opcode::Pop, &[]));
    main.extend(make_instruction(Opcode::Suspend, &[]));

    Bytecode {
        file_set,
        main_function: Rc::new(function(main, 0, 0)),
        constants: vec![
            Object::CompiledFunction(Rc::new(function(inner, 0, 0))),
            Object::CompiledFunction(Rc::new(function(outer, 1, 1))),
            Object::map(map.clone()),
            Object::ImmutableMap(Rc::new(map)),
            Object::ImmutableArray(Rc::new(vec![Object::Bool(true), Object::Undefined])),
            Object::bytes(vec![0, 1, 255]),
            Object::error(Object::from("boom")),
            Object::Float(-0.0),
            when,
            find_builtin("len").map(|(_, f)| f).unwrap(),
            Object::module("math", math_attrs()),
        ],
    }
}

#[test]
fn roundtrip_preserves_everything() {
    let bc = program();
    let bytes = bc.encode().unwrap();
    assert_eq!(&bytes[..MAGIC.len()], MAGIC);
    let back = Bytecode::decode(&bytes, &HostModules(math_attrs())).unwrap();
    assert_eq!(back, bc);
    assert_eq!(back.encode().unwrap(), bytes);
}

#[test]
fn module_functions_relink_against_host() {
    let bytes = program().encode().unwrap();
    let back = Bytecode::decode(&bytes, &HostModules(math_attrs())).unwrap();
    let Object::ImmutableMap(module) = &back.constants[10] else { panic!("module expected") };
    let Some(Object::BuiltinFunction(f)) = module.get("times") else { panic!("native expected") };
    let mut ctx = NativeContext::new(Default::default(), Default::default());
    assert_eq!((f.func)(&mut ctx, &[Object::Int(6), Object::Int(7)]), Ok(Object::Int(42)));

    let err = Bytecode::decode(&bytes, &()).unwrap_err();
    assert!(matches!(err, BytecodeError::UnknownBuiltin(name) if name == "math.times"));
}

#[test]
fn corrupted_payload_fails_checksum() {
    let mut bytes = program().encode().unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    assert!(matches!(Bytecode::decode(&bytes, &()), Err(BytecodeError::ChecksumMismatch { .. })));
}

#[test]
fn foreign_headers_are_rejected() {
    let bytes = program().encode().unwrap();

    let mut magic = bytes.clone();
    magic[0] = b'X';
    assert!(matches!(Bytecode::decode(&magic, &()), Err(BytecodeError::BadMagic)));

    let mut revision = bytes.clone();
    revision[MAGIC.len() + 3] ^= 0x40;
    assert!(matches!(Bytecode::decode(&revision, &()), Err(BytecodeError::OpcodeRevision { .. })));

    let mut version = bytes;
    version[MAGIC.len()] = 0x7F;
    assert!(matches!(Bytecode::decode(&version, &()), Err(BytecodeError::UnsupportedVersion(_))));
}

#[test]
fn closures_and_iterators_do_not_encode() {
    let mut bc = program();
    let closure = CompiledFunction::default().with_free(vec![Rc::default()]);
    bc.constants.push(Object::CompiledFunction(Rc::new(closure)));
    assert!(matches!(bc.encode(), Err(BytecodeError::Unencodable(_))));

    let mut bc = program();
    bc.constants.push(Object::from("abc").iterate().unwrap());
    assert!(matches!(bc.encode(), Err(BytecodeError::Unencodable(t)) if t == "string-iterator"));
}

#[test]
fn file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.skbc");
    let bc = program();
    bc.write_file(&path).unwrap();
    assert_eq!(Bytecode::read_file(&path, &HostModules(math_attrs())).unwrap(), bc);
}
