use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A solution under evaluation. The engine treats the genome as opaque:
/// candidates cross the wire through their own serde implementation, and the
/// scheduling core only ever touches the fitness accessors.
pub trait Candidate: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn fitness(&self) -> f64;
    fn set_fitness(&mut self, fitness: f64);
    fn is_evaluated(&self) -> bool;
    fn set_evaluated(&mut self, evaluated: bool);
}

/// Shared handle to a candidate. Submitters keep their handles across an
/// evaluation round; results are merged into the same underlying object, never
/// into a replacement the caller has no reference to.
pub struct SharedCandidate<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedCandidate<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Candidate> SharedCandidate<C> {
    pub fn new(candidate: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(candidate)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Working copy for transmission, leaving the original in place.
    pub fn snapshot(&self) -> C {
        self.with(|c| c.clone())
    }

    pub(crate) fn replace(&self, candidate: C) {
        self.with(|slot| *slot = candidate);
    }

    pub fn fitness(&self) -> f64 {
        self.with(|c| c.fitness())
    }

    pub fn is_evaluated(&self) -> bool {
        self.with(|c| c.is_evaluated())
    }
}

/// Candidate with an arbitrary JSON genome, used by process-backed workers
/// that hand the genome to an external program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCandidate {
    pub genome: serde_json::Value,
    pub fitness: f64,
    pub evaluated: bool,
}

impl JsonCandidate {
    pub fn new(genome: serde_json::Value) -> Self {
        Self {
            genome,
            fitness: 0.0,
            evaluated: false,
        }
    }
}

impl Candidate for JsonCandidate {
    fn fitness(&self) -> f64 {
        self.fitness
    }

    fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
    }

    fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    fn set_evaluated(&mut self, evaluated: bool) {
        self.evaluated = evaluated;
    }
}
