//! Contexte d'exécution : annulation coopérative, limites, contexte natif.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Object, RuntimeError};

/* ─────────────────────────── Limites ─────────────────────────── */

/// Plafonds de ressources appliqués à la construction des objets.
///
/// Les tailles sont vérifiées avant d'allouer. Pour les chaînes, l'unité est
/// l'octet UTF-8 (taille stockée), pas le caractère compté par `len()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Limits {
    /// Longueur maximale (octets UTF-8) d'une chaîne produite.
    pub max_string_len: usize,
    /// Longueur maximale d'un `bytes` produit.
    pub max_bytes_len: usize,
    /// Nombre maximal d'éléments d'un tableau produit (mutable ou non).
    pub max_array_len: usize,
    /// Nombre maximal d'objets alloués par une exécution (-1 = illimité).
    pub max_allocs: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_string_len: 2_147_483_647,
            max_bytes_len: 2_147_483_647,
            max_array_len: 2_147_483_647,
            max_allocs: -1,
        }
    }
}

impl Limits {
    /// Vérifie une longueur de chaîne (en octets UTF-8).
    pub fn check_string(&self, len: usize) -> Result<(), RuntimeError> {
        if len > self.max_string_len {
            return Err(RuntimeError::StringLimit);
        }
        Ok(())
    }

    /// Vérifie une longueur de bytes.
    pub fn check_bytes(&self, len: usize) -> Result<(), RuntimeError> {
        if len > self.max_bytes_len {
            return Err(RuntimeError::BytesLimit);
        }
        Ok(())
    }

    /// Vérifie un nombre d'éléments de tableau.
    pub fn check_array(&self, len: usize) -> Result<(), RuntimeError> {
        if len > self.max_array_len {
            return Err(RuntimeError::ArrayLimit);
        }
        Ok(())
    }
}

/* ─────────────────────────── Annulation ─────────────────────────── */

/// Jeton d'annulation partagé entre l'hôte et la VM.
///
/// Clonable et `Send` : l'hôte garde une copie et appelle `cancel()` depuis
/// n'importe quel thread ; la VM le consulte périodiquement.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Jeton jamais annulé tant que `cancel()` n'est pas appelé.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jeton qui expire après `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { flag: Arc::default(), deadline: Instant::now().checked_add(timeout) }
    }

    /// Ajoute (ou remplace) une échéance.
    #[must_use]
    pub fn deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(at);
        self
    }

    /// Demande l'arrêt.
    pub fn cancel(&self) {
        debug!("annulation demandée");
        self.flag.store(true, Ordering::Release);
    }

    /// Vrai si l'arrêt a été demandé ou si l'échéance est passée.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Aborted)` si annulé.
    pub fn check(&self) -> Result<(), RuntimeError> {
        if self.is_cancelled() {
            return Err(RuntimeError::Aborted);
        }
        Ok(())
    }

    /// Temps restant avant l'échéance.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/* ─────────────────────────── Contexte natif ─────────────────────────── */

/// Rappel vers la VM : permet à une native d'appeler une fonction du script.
pub trait Invoke {
    /// Appelle `callee` (compilée ou native) avec `args`.
    fn invoke(&mut self, callee: &Object, args: &[Object]) -> Result<Object, RuntimeError>;
}

/// Contexte passé à chaque fonction native.
pub struct NativeContext<'a> {
    limits: Limits,
    cancel: CancelToken,
    invoker: Option<&'a mut dyn Invoke>,
}

/// Granularité d'attente de `NativeContext::sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

impl<'a> NativeContext<'a> {
    /// Contexte autonome (sans VM derrière).
    pub fn new(limits: Limits, cancel: CancelToken) -> Self {
        Self { limits, cancel, invoker: None }
    }

    /// Branche un rappel vers la VM.
    #[must_use]
    pub fn with_invoker(mut self, invoker: &'a mut dyn Invoke) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Limites actives.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Jeton d'annulation.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// `Err(Aborted)` si l'hôte a demandé l'arrêt.
    pub fn check(&self) -> Result<(), RuntimeError> {
        self.cancel.check()
    }

    /// Attend `dur` en surveillant l'annulation ; retourne `Aborted` dès
    /// qu'elle survient.
    pub fn sleep(&self, dur: Duration) -> Result<(), RuntimeError> {
        let end = Instant::now() + dur;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(end - now));
        }
    }

    /// Appelle une fonction du script depuis une native.
    pub fn call(&mut self, callee: &Object, args: &[Object]) -> Result<Object, RuntimeError> {
        self.check()?;
        match self.invoker.as_deref_mut() {
            Some(invoker) => invoker.invoke(callee, args),
            None => Err(RuntimeError::NotCallable(callee.type_name().into_owned())),
        }
    }
}
