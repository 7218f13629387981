//! Jeu d'instructions du moteur.
//!
//! Une instruction = un octet d'opcode suivi de 0 à 2 opérandes big-endian
//! dont la largeur (1, 2 ou 4 octets) est fixée par l'opcode. Les sauts
//! portent une cible absolue sur 4 octets pour que le compilateur puisse les
//! réécrire en place une fois la cible connue.

mod disasm;
mod opcode;
mod operator;

pub use disasm::format_instructions;
pub use opcode::{make_instruction, read_operands, read_u16, read_u32, read_u8, Opcode, OPCODE_REVISION};
pub use operator::Operator;
