//! Format binaire SKBC.
//!
//! ```text
//! Header : "SKBC\0" + version u16 + révision d'opcodes u16
//! [Section*] section = TAG[4] + len u32 + payload
//!   FILE : table des fichiers sources
//!   MAIN : fonction principale
//!   CNST : pool de constantes
//! Trailer : "CRCC" + CRC32 de tout ce qui précède
//! ```
//!
//! Tous les entiers sont big-endian. Les fonctions natives sont écrites par
//! nom et reliées au décodage (table builtin ou modules de l'hôte).

use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use skein_core::{ByteReader, ByteWriter, CoreError, Pos, SourceFile, SourceFileSet, OPCODE_REVISION};
use skein_runtime::{find_builtin, CompiledFunction, MapValue, Object};
use tracing::{debug, trace};

use crate::{BuiltinModules, Bytecode, BytecodeError, Result};

/// Signature d'un fichier SKBC.
pub const MAGIC: &[u8; 5] = b"SKBC\0";
/// Version du conteneur.
pub const FORMAT_VERSION: u16 = 1;

const TRAILER: &[u8; 4] = b"CRCC";
const MAX_DEPTH: usize = 512;

mod tag {
    pub const UNDEFINED: u8 = 0;
    pub const INT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const CHAR: u8 = 3;
    pub const BOOL: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BYTES: u8 = 6;
    pub const ARRAY: u8 = 7;
    pub const IMMUTABLE_ARRAY: u8 = 8;
    pub const MAP: u8 = 9;
    pub const IMMUTABLE_MAP: u8 = 10;
    pub const TIME: u8 = 11;
    pub const ERROR: u8 = 12;
    pub const BUILTIN: u8 = 13;
    pub const COMPILED: u8 = 14;
    pub const MODULE: u8 = 15;
}

/* ─────────────────────────── Écriture ─────────────────────────── */

pub(crate) fn encode(bc: &Bytecode) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.write_bytes(MAGIC);
    w.write_u16(FORMAT_VERSION);
    w.write_u16(OPCODE_REVISION);

    let mut files = ByteWriter::new();
    write_file_set(&mut files, &bc.file_set);
    write_section(&mut w, b"FILE", &files);

    let mut main = ByteWriter::new();
    write_function(&mut main, &bc.main_function)?;
    write_section(&mut w, b"MAIN", &main);

    let mut constants = ByteWriter::new();
    constants.write_u32(bc.constants.len() as u32);
    for c in &bc.constants {
        write_object(&mut constants, c)?;
    }
    write_section(&mut w, b"CNST", &constants);

    let crc = crc32fast::hash(w.as_slice());
    w.write_bytes(TRAILER);
    w.write_u32(crc);
    debug!(bytes = w.len(), constants = bc.constants.len(), "bytecode encoded");
    Ok(w.into_vec())
}

fn write_section(w: &mut ByteWriter, tag: &[u8; 4], payload: &ByteWriter) {
    w.write_bytes(tag);
    w.write_blob(payload.as_slice());
}

fn write_file_set(w: &mut ByteWriter, set: &SourceFileSet) {
    w.write_u32(set.base);
    w.write_u32(set.files.len() as u32);
    for f in &set.files {
        w.write_str(&f.name);
        w.write_u32(f.base);
        w.write_u32(f.size);
        w.write_u32(f.lines.len() as u32);
        for &line in &f.lines {
            w.write_u32(line);
        }
    }
}

fn write_function(w: &mut ByteWriter, f: &CompiledFunction) -> Result<()> {
    if !f.free.is_empty() {
        return Err(BytecodeError::Unencodable("closure".to_owned()));
    }
    w.write_blob(&f.instructions);
    w.write_u32(f.num_locals as u32);
    w.write_u32(f.num_parameters as u32);
    w.write_u8(u8::from(f.var_args));
    w.write_u32(f.source_map.len() as u32);
    for (&ip, pos) in f.source_map.iter() {
        w.write_u32(ip as u32);
        w.write_u32(pos.0);
    }
    Ok(())
}

fn write_seq(w: &mut ByteWriter, items: &[Object]) -> Result<()> {
    w.write_u32(items.len() as u32);
    items.iter().try_for_each(|o| write_object(w, o))
}

fn write_entries(w: &mut ByteWriter, entries: &MapValue) -> Result<()> {
    w.write_u32(entries.len() as u32);
    for (k, v) in entries {
        w.write_str(k);
        write_object(w, v)?;
    }
    Ok(())
}

fn write_object(w: &mut ByteWriter, o: &Object) -> Result<()> {
    match o {
        Object::Undefined => w.write_u8(tag::UNDEFINED),
        Object::Int(v) => {
            w.write_u8(tag::INT);
            w.write_i64(*v);
        }
        Object::Float(v) => {
            w.write_u8(tag::FLOAT);
            w.write_f64(*v);
        }
        Object::Char(c) => {
            w.write_u8(tag::CHAR);
            w.write_u32(u32::from(*c));
        }
        Object::Bool(b) => {
            w.write_u8(tag::BOOL);
            w.write_u8(u8::from(*b));
        }
        Object::String(s) => {
            w.write_u8(tag::STRING);
            w.write_str(s);
        }
        Object::Bytes(b) => {
            w.write_u8(tag::BYTES);
            w.write_blob(&b.borrow());
        }
        Object::Array(a) => {
            w.write_u8(tag::ARRAY);
            write_seq(w, &a.borrow())?;
        }
        Object::ImmutableArray(a) => {
            w.write_u8(tag::IMMUTABLE_ARRAY);
            write_seq(w, a)?;
        }
        Object::Map(m) => {
            w.write_u8(tag::MAP);
            write_entries(w, &m.borrow())?;
        }
        Object::ImmutableMap(m) => match o.module_name() {
            Some(name) => {
                w.write_u8(tag::MODULE);
                w.write_str(&name);
                write_entries(w, m)?;
            }
            None => {
                w.write_u8(tag::IMMUTABLE_MAP);
                write_entries(w, m)?;
            }
        },
        Object::Time(t) => {
            w.write_u8(tag::TIME);
            w.write_i64(t.timestamp());
            w.write_u32(t.timestamp_subsec_nanos());
        }
        Object::Error(e) => {
            w.write_u8(tag::ERROR);
            write_object(w, e)?;
        }
        Object::BuiltinFunction(f) => {
            w.write_u8(tag::BUILTIN);
            w.write_str(&f.name);
        }
        Object::CompiledFunction(f) => {
            w.write_u8(tag::COMPILED);
            write_function(w, f)?;
        }
        other @ (Object::ArrayIterator(_) | Object::StringIterator(_) | Object::MapIterator(_)) => {
            return Err(BytecodeError::Unencodable(other.type_name().into_owned()));
        }
    }
    Ok(())
}

/* ─────────────────────────── Lecture ─────────────────────────── */

pub(crate) fn decode(data: &[u8], modules: &dyn BuiltinModules) -> Result<Bytecode> {
    let mut header = ByteReader::new(data);
    if header.read_bytes(MAGIC.len()).ok() != Some(MAGIC.as_slice()) {
        return Err(BytecodeError::BadMagic);
    }
    let version = header.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(BytecodeError::UnsupportedVersion(version));
    }
    let revision = header.read_u16()?;
    if revision != OPCODE_REVISION {
        return Err(BytecodeError::OpcodeRevision { found: revision, expected: OPCODE_REVISION });
    }

    let body_len = data
        .len()
        .checked_sub(TRAILER.len() + 4)
        .filter(|&n| n >= header.offset())
        .ok_or(CoreError::UnexpectedEof { needed: 8, at: data.len() as u64 })?;
    let (body, trailer) = data.split_at(body_len);
    let mut tr = ByteReader::new(trailer);
    if tr.read_bytes(TRAILER.len())? != TRAILER {
        return Err(CoreError::corrupted("missing CRCC trailer").into());
    }
    let stored = tr.read_u32()?;
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(BytecodeError::ChecksumMismatch { stored, computed });
    }

    let mut r = ByteReader::new(&body[header.offset()..]);
    let (mut file_set, mut main, mut constants) = (None, None, None);
    while r.remaining() > 0 {
        let tag = r.read_bytes(4)?;
        let mut p = ByteReader::new(r.read_blob()?);
        match tag {
            b"FILE" => file_set = Some(read_file_set(&mut p)?),
            b"MAIN" => main = Some(read_function(&mut p)?),
            b"CNST" => {
                let n = p.read_u32()? as usize;
                let mut pool = Vec::with_capacity(n.min(p.remaining()));
                for _ in 0..n {
                    pool.push(read_object(&mut p, modules, None, 0)?);
                }
                constants = Some(pool);
            }
            other => trace!(tag = %String::from_utf8_lossy(other), "skipping unknown section"),
        }
    }

    let bc = Bytecode {
        file_set: file_set.ok_or(BytecodeError::MissingSection("FILE"))?,
        main_function: Rc::new(main.ok_or(BytecodeError::MissingSection("MAIN"))?),
        constants: constants.ok_or(BytecodeError::MissingSection("CNST"))?,
    };
    bc.validate()?;
    debug!(constants = bc.constants.len(), "bytecode decoded");
    Ok(bc)
}

fn read_file_set(r: &mut ByteReader<'_>) -> Result<SourceFileSet> {
    let base = r.read_u32()?;
    let n = r.read_u32()? as usize;
    let mut files = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let name = r.read_string()?;
        let file_base = r.read_u32()?;
        let size = r.read_u32()?;
        let count = r.read_u32()? as usize;
        let mut lines = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            lines.push(r.read_u32()?);
        }
        files.push(SourceFile { name, base: file_base, size, lines });
    }
    Ok(SourceFileSet { base, files })
}

fn read_function(r: &mut ByteReader<'_>) -> Result<CompiledFunction> {
    let instructions: Rc<[u8]> = Rc::from(r.read_blob()?);
    let num_locals = r.read_u32()? as usize;
    let num_parameters = r.read_u32()? as usize;
    let var_args = r.read_u8()? != 0;
    let n = r.read_u32()? as usize;
    let mut source_map = BTreeMap::new();
    for _ in 0..n {
        let ip = r.read_u32()? as usize;
        source_map.insert(ip, Pos(r.read_u32()?));
    }
    Ok(CompiledFunction {
        instructions,
        num_locals,
        num_parameters,
        var_args,
        source_map: Rc::new(source_map),
        free: Vec::new(),
    })
}

fn read_seq(r: &mut ByteReader<'_>, modules: &dyn BuiltinModules, depth: usize) -> Result<Vec<Object>> {
    let n = r.read_u32()? as usize;
    let mut items = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        items.push(read_object(r, modules, None, depth + 1)?);
    }
    Ok(items)
}

fn read_entries(
    r: &mut ByteReader<'_>,
    modules: &dyn BuiltinModules,
    module: Option<&str>,
    depth: usize,
) -> Result<MapValue> {
    let n = r.read_u32()? as usize;
    let mut entries = MapValue::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let key = r.read_string()?;
        let value = read_object(r, modules, module.map(|m| (m, key.as_str())), depth + 1)?;
        entries.insert(key, value);
    }
    Ok(entries)
}

/// `owner` : `(module, attribut)` quand l'objet est un attribut direct d'un
/// module builtin.
fn read_object(
    r: &mut ByteReader<'_>,
    modules: &dyn BuiltinModules,
    owner: Option<(&str, &str)>,
    depth: usize,
) -> Result<Object> {
    if depth > MAX_DEPTH {
        return Err(CoreError::corrupted("constant nesting too deep").into());
    }
    let t = r.read_u8()?;
    Ok(match t {
        tag::UNDEFINED => Object::Undefined,
        tag::INT => Object::Int(r.read_i64()?),
        tag::FLOAT => Object::Float(r.read_f64()?),
        tag::CHAR => {
            let code = r.read_u32()?;
            Object::Char(char::from_u32(code).ok_or_else(|| CoreError::corrupted(format!("invalid char {code}")))?)
        }
        tag::BOOL => Object::Bool(r.read_u8()? != 0),
        tag::STRING => Object::from(r.read_string()?),
        tag::BYTES => Object::bytes(r.read_blob()?.to_vec()),
        tag::ARRAY => Object::array(read_seq(r, modules, depth)?),
        tag::IMMUTABLE_ARRAY => Object::ImmutableArray(Rc::new(read_seq(r, modules, depth)?)),
        tag::MAP => Object::map(read_entries(r, modules, None, depth)?),
        tag::IMMUTABLE_MAP => Object::ImmutableMap(Rc::new(read_entries(r, modules, None, depth)?)),
        tag::MODULE => {
            let name = r.read_string()?;
            Object::ImmutableMap(Rc::new(read_entries(r, modules, Some(&name), depth)?))
        }
        tag::TIME => {
            let secs = r.read_i64()?;
            let nanos = r.read_u32()?;
            Object::Time(DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| CoreError::corrupted("time out of range"))?)
        }
        tag::ERROR => Object::error(read_object(r, modules, None, depth + 1)?),
        tag::BUILTIN => relink(&r.read_string()?, modules, owner)?,
        tag::COMPILED => Object::CompiledFunction(Rc::new(read_function(r)?)),
        other => return Err(BytecodeError::UnknownObjectTag(other)),
    })
}

fn relink(name: &str, modules: &dyn BuiltinModules, owner: Option<(&str, &str)>) -> Result<Object> {
    if let Some((module, attr)) = owner {
        if let Some(f @ Object::BuiltinFunction(_)) = modules.builtin_module(module).and_then(|m| m.get(attr)) {
            return Ok(f.clone());
        }
    }
    find_builtin(name)
        .map(|(_, f)| f)
        .ok_or_else(|| BytecodeError::UnknownBuiltin(owner.map_or_else(|| name.to_owned(), |(m, a)| format!("{m}.{a}"))))
}
