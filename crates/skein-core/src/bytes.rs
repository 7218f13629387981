//! IO mémoire big-endian (opérandes et conteneur sérialisé).

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::{CoreError, CoreResult};

/* ─────────────────────────── Byte Writer (BE) ─────────────────────────── */

/// Buffer d'écriture (croît automatiquement).
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Crée un writer vide.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
    /// Accès en lecture au contenu.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
    /// Taille courante.
    pub fn len(&self) -> usize {
        self.buf.len()
    }
    /// Vrai si rien n'a été écrit.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    /// Récupère le buffer (consomme).
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
    /// Ajoute des octets bruts.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
    /// Écrit un u8.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    /// Écrit un u16 big-endian.
    pub fn write_u16(&mut self, v: u16) {
        // l'écriture dans un Vec ne peut pas échouer
        let _ = self.buf.write_u16::<BigEndian>(v);
    }
    /// Écrit un u32 big-endian.
    pub fn write_u32(&mut self, v: u32) {
        let _ = self.buf.write_u32::<BigEndian>(v);
    }
    /// Écrit un u64 big-endian.
    pub fn write_u64(&mut self, v: u64) {
        let _ = self.buf.write_u64::<BigEndian>(v);
    }
    /// Écrit un i64 big-endian.
    pub fn write_i64(&mut self, v: i64) {
        let _ = self.buf.write_i64::<BigEndian>(v);
    }
    /// Écrit un f64 big-endian (bits IEEE, NaN compris).
    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }
    /// Écrit `[len:u32][bytes]`.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }
    /// Écrit une chaîne UTF-8 préfixée par sa longueur.
    pub fn write_str(&mut self, s: &str) {
        self.write_blob(s.as_bytes());
    }
}

/* ─────────────────────────── Byte Reader (BE) ─────────────────────────── */

/// Lecteur séquentiel sur un slice d'octets.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    /// Construit un lecteur.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, off: 0 }
    }
    /// Offset courant.
    pub fn offset(&self) -> usize {
        self.off
    }
    /// Taille restante.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.off)
    }

    /// Lit `n` octets (ou erreur si EOF).
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: self.off as u64 });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    /// Lit un u8.
    pub fn read_u8(&mut self) -> CoreResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }
    /// Lit un u16 BE.
    pub fn read_u16(&mut self) -> CoreResult<u16> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }
    /// Lit un u32 BE.
    pub fn read_u32(&mut self) -> CoreResult<u32> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }
    /// Lit un u64 BE.
    pub fn read_u64(&mut self) -> CoreResult<u64> {
        Ok(BigEndian::read_u64(self.read_bytes(8)?))
    }
    /// Lit un i64 BE.
    pub fn read_i64(&mut self) -> CoreResult<i64> {
        Ok(BigEndian::read_i64(self.read_bytes(8)?))
    }
    /// Lit un f64 BE.
    pub fn read_f64(&mut self) -> CoreResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }
    /// Lit `[len:u32][bytes]`.
    pub fn read_blob(&mut self) -> CoreResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }
    /// Lit une chaîne UTF-8 préfixée par sa longueur.
    pub fn read_string(&mut self) -> CoreResult<String> {
        let bytes = self.read_blob()?;
        core::str::from_utf8(bytes).map(str::to_owned).map_err(|_| CoreError::InvalidUtf8)
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_be() -> CoreResult<()> {
        let mut w = ByteWriter::new();
        w.write_u16(0xBEEF);
        w.write_u32(0xDEAD_BEEF);
        w.write_i64(-42);
        w.write_f64(3.5);
        w.write_str("héllo");

        assert_eq!(&w.as_slice()[..2], &[0xBE, 0xEF]);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u16()?, 0xBEEF);
        assert_eq!(r.read_u32()?, 0xDEAD_BEEF);
        assert_eq!(r.read_i64()?, -42);
        assert_eq!(r.read_f64()?, 3.5);
        assert_eq!(r.read_string()?, "héllo");
        assert_eq!(r.remaining(), 0);
        Ok(())
    }

    #[test]
    fn eof_is_reported_with_offset() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(r.read_u8(), Ok(1));
        assert_eq!(r.read_u32(), Err(CoreError::UnexpectedEof { needed: 4, at: 1 }));
    }
}
