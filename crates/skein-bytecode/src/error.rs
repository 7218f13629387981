//! Erreurs du format binaire.

use skein_core::CoreError;
use thiserror::Error;

/// Échec d'encodage ou de décodage d'un `Bytecode`.
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Les premiers octets ne sont pas `SKBC\0`.
    #[error("invalid bytecode magic")]
    BadMagic,

    /// Version de conteneur inconnue.
    #[error("unsupported bytecode format version {0}")]
    UnsupportedVersion(u16),

    /// Jeu d'instructions d'une autre révision.
    #[error("opcode revision mismatch: file has {found}, engine expects {expected}")]
    OpcodeRevision {
        /// Révision lue.
        found: u16,
        /// Révision du moteur.
        expected: u16,
    },

    /// Somme de contrôle fausse.
    #[error("CRC32 mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Valeur du trailer.
        stored: u32,
        /// Valeur recalculée.
        computed: u32,
    },

    /// Section obligatoire absente.
    #[error("missing section {0}")]
    MissingSection(&'static str),

    /// Tag d'objet inconnu dans le pool de constantes.
    #[error("unknown object tag {0}")]
    UnknownObjectTag(u8),

    /// Native introuvable au moment de relier les fonctions.
    #[error("unknown builtin function '{0}'")]
    UnknownBuiltin(String),

    /// Instruction qui référence une constante inexistante.
    #[error("constant index {index} out of range (pool size {len})")]
    ConstantOutOfRange {
        /// Index lu.
        index: usize,
        /// Taille du pool.
        len: usize,
    },

    /// Objet qui n'a pas de forme sérialisée (itérateur, fermeture).
    #[error("cannot encode object of type {0}")]
    Unencodable(String),

    /// Erreur bas niveau (EOF, UTF-8, opcode).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Erreur de fichier.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias résultat du crate.
pub type Result<T> = core::result::Result<T, BytecodeError>;
