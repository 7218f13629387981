//! skein-runtime — modèle objet et services natifs de Skein
//!
//! Ce crate porte tout ce que la VM manipule à l'exécution, sans dépendre
//! d'elle :
//!
//! - `Object` : valeur dynamique (scalaires, conteneurs, fonctions, itérateurs)
//! - opérateurs binaires/unaires, indexation, slicing, conversions
//! - `BUILTINS` : table ordonnée des fonctions natives (`len`, `append`, …)
//! - `format` : mise en forme `printf` du builtin du même nom
//! - `Limits`, `CancelToken`, `NativeContext` : contexte passé aux natives
//! - `skein_native!` : macro pour écrire une native en deux lignes
//!
//! ⚠️ Ce crate **n'exécute pas** le bytecode (c'est le rôle de `skein-vm`).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use, missing_docs)]

pub mod builtins;
pub mod context;
pub mod error;
pub mod format;
pub mod object;
mod ops;

pub use builtins::{builtin_objects, find_builtin, BUILTINS};
pub use context::{CancelToken, Invoke, Limits, NativeContext};
pub use error::{ordinal, RuntimeError};
pub use format::format;
pub use object::{zero_time, BuiltinFunction, Cell, CompiledFunction, MapValue, NativeFn, Object, MODULE_NAME_KEY};

/// Résultat des opérations runtime.
pub type RResult<T> = Result<T, RuntimeError>;

/// Déclare une fonction native au bon type (`NativeFn`).
///
/// ```
/// use skein_runtime::{skein_native, Object};
///
/// skein_native!(pub double |_ctx, args| {
///     match args.first() {
///         Some(Object::Int(v)) => Ok(Object::Int(v * 2)),
///         _ => Ok(Object::Undefined),
///     }
/// });
///
/// let f: skein_runtime::NativeFn = double;
/// # let _ = f;
/// ```
#[macro_export]
macro_rules! skein_native {
    ($vis:vis $name:ident |$ctx:ident, $args:ident| $body:block) => {
        $vis fn $name(
            $ctx: &mut $crate::NativeContext<'_>,
            $args: &[$crate::Object],
        ) -> ::core::result::Result<$crate::Object, $crate::RuntimeError> {
            $body
        }
    };
}

/// Prelude pratique pour les hôtes qui enregistrent des natives.
pub mod prelude {
    pub use crate::{
        skein_native, CancelToken, Limits, MapValue, NativeContext, NativeFn, Object, RResult, RuntimeError,
    };
}
