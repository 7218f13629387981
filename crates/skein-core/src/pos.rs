//! Positions source.
//!
//! Un `Pos` est un offset global dans un `SourceFileSet` : chaque fichier
//! occupe la plage `[base, base + size]` (la position de fin de fichier est
//! valide), et les fichiers se suivent sans se chevaucher. Le parser externe
//! enregistre les débuts de ligne, ce qui permet de retrouver
//! `fichier:ligne:colonne` pour les diagnostics.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position (offset) dans un `SourceFileSet`. `NO_POS` = inconnue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

/// Position absente.
pub const NO_POS: Pos = Pos(0);

impl Pos {
    /// Vrai si la position est renseignée.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Position résolue, prête à afficher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceFilePos {
    /// Nom du fichier.
    pub filename: String,
    /// Offset depuis le début du fichier.
    pub offset: u32,
    /// Ligne (1-based, 0 = inconnue).
    pub line: u32,
    /// Colonne (1-based, 0 = inconnue).
    pub column: u32,
}

impl SourceFilePos {
    /// Vrai si la ligne est connue.
    pub const fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourceFilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = self.filename.clone();
        if self.is_valid() {
            if !s.is_empty() {
                s.push(':');
            }
            s.push_str(&self.line.to_string());
            if self.column != 0 {
                s.push(':');
                s.push_str(&self.column.to_string());
            }
        }
        if s.is_empty() {
            s.push('-');
        }
        f.write_str(&s)
    }
}

/// Un fichier source enregistré dans un `SourceFileSet`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceFile {
    /// Nom du fichier.
    pub name: String,
    /// Position globale du premier octet.
    pub base: u32,
    /// Taille en octets.
    pub size: u32,
    /// Offsets des débuts de ligne (le premier vaut toujours 0).
    pub lines: Vec<u32>,
}

impl SourceFile {
    /// Enregistre le début d'une nouvelle ligne. Les offsets doivent croître.
    pub fn add_line(&mut self, offset: u32) {
        let accept = self.lines.last().map_or(true, |&last| last < offset);
        if accept && offset < self.size {
            self.lines.push(offset);
        }
    }

    /// Nombre de lignes connues.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Position globale correspondant à un offset du fichier (borné à la fin).
    pub fn file_set_pos(&self, offset: u32) -> Pos {
        Pos(self.base + offset.min(self.size))
    }

    /// Position globale du début de `line` (1-based).
    pub fn line_start(&self, line: u32) -> Pos {
        let idx = line.saturating_sub(1) as usize;
        self.lines.get(idx).map_or(NO_POS, |&off| Pos(self.base + off))
    }

    /// Offset dans ce fichier d'une position globale.
    pub fn offset(&self, p: Pos) -> u32 {
        p.0.saturating_sub(self.base)
    }

    /// Résout une position globale appartenant à ce fichier.
    pub fn position(&self, p: Pos) -> SourceFilePos {
        let offset = self.offset(p);
        let idx = self.lines.partition_point(|&start| start <= offset);
        let (line, column) = match idx {
            0 => (0, 0),
            i => (i as u32, offset - self.lines[i - 1] + 1),
        };
        SourceFilePos { filename: self.name.clone(), offset, line, column }
    }
}

/// Ensemble de fichiers sources partageant un espace de positions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceFileSet {
    /// Prochaine base libre.
    pub base: u32,
    /// Fichiers enregistrés, par base croissante.
    pub files: Vec<SourceFile>,
}

impl Default for SourceFileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFileSet {
    /// Ensemble vide (la base 0 est réservée à `NO_POS`).
    pub const fn new() -> Self {
        Self { base: 1, files: Vec::new() }
    }

    /// Ajoute un fichier. `base = None` utilise la prochaine base libre ;
    /// une base inférieure à celle-ci est relevée.
    pub fn add_file(&mut self, name: impl Into<String>, base: Option<u32>, size: u32) -> &mut SourceFile {
        let base = base.unwrap_or(self.base).max(self.base);
        // +1 : la fin de fichier a aussi une position
        self.base = base.saturating_add(size).saturating_add(1);
        self.files.push(SourceFile { name: name.into(), base, size, lines: vec![0] });
        let last = self.files.len() - 1;
        &mut self.files[last]
    }

    /// Fichier contenant `p`.
    pub fn file(&self, p: Pos) -> Option<&SourceFile> {
        if !p.is_valid() {
            return None;
        }
        let idx = self.files.partition_point(|f| f.base <= p.0);
        let f = self.files.get(idx.checked_sub(1)?)?;
        (p.0 <= f.base + f.size).then_some(f)
    }

    /// Résout une position ; `SourceFilePos::default()` si inconnue.
    pub fn position(&self, p: Pos) -> SourceFilePos {
        self.file(p).map(|f| f.position(p)).unwrap_or_default()
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
