//! Listing textuel des instructions (CLI `disasm`, traces de debug).

use super::opcode::{read_operands, Opcode};

/// Une ligne par instruction : `OFFS MNEMO   OP1   OP2`.
///
/// `pos_offset` est ajouté aux offsets affichés (listing d'une fonction
/// insérée dans un flux plus large). Un octet d'opcode inconnu ou une
/// instruction tronquée termine le listing par une ligne `???`.
pub fn format_instructions(ins: &[u8], pos_offset: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < ins.len() {
        let at = pos_offset + i;
        let Some(op) = Opcode::from_u8(ins[i]) else {
            out.push(format!("{at:04} ??? 0x{:02X}", ins[i]));
            break;
        };
        let Ok((operands, read)) = read_operands(op, &ins[i + 1..]) else {
            out.push(format!("{at:04} {:<7} ???", op.name()));
            break;
        };
        let line = match operands.as_slice() {
            [] => format!("{at:04} {}", op.name()),
            [a] => format!("{at:04} {:<7} {a:<5}", op.name()),
            [a, b] => format!("{at:04} {:<7} {a:<5} {b:<5}", op.name()),
            rest => format!("{at:04} {:<7} {rest:?}", op.name()),
        };
        out.push(line);
        i += 1 + read;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::make_instruction;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_offsets_and_operands() {
        let mut ins = make_instruction(Opcode::Constant, &[1]);
        ins.extend(make_instruction(Opcode::Closure, &[3, 2]));
        ins.extend(make_instruction(Opcode::Pop, &[]));
        assert_eq!(
            format_instructions(&ins, 0),
            vec![
                "0000 CONST   1    ".to_string(),
                "0003 CLOSURE 3     2    ".to_string(),
                "0007 POP".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_byte_stops_listing() {
        let lines = format_instructions(&[Opcode::True as u8, 0xEE, Opcode::Pop as u8], 10);
        assert_eq!(lines, vec!["0010 TRUE".to_string(), "0011 ??? 0xEE".to_string()]);
    }
}
