//! Typed function registries for rule evaluation.
//!
//! Predicates, quantity functions, and action functions are registered
//! separately; a name may live in at most one registry, so a rule that uses
//! a quantity function as a condition fails at load time rather than at
//! evaluation time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::{EvalContext, EvalError, Services};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("function name `{0}` registered twice")]
    DuplicateName(String),
}

/// Side-effect-free boolean condition.
#[async_trait]
pub trait PredicateFn: Send + Sync {
    fn arity(&self) -> usize;
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError>;
}

/// Numeric function whose result becomes the acting quantity.
#[async_trait]
pub trait QuantityFn: Send + Sync {
    fn arity(&self) -> usize;
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<u64, EvalError>;
}

/// Side-effecting rule action.
#[async_trait]
pub trait ActionFn: Send + Sync {
    fn arity(&self) -> usize;
    async fn run(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<(), EvalError>;
}

/// The three per-role registries, populated once at startup.
#[derive(Default)]
pub struct Registries {
    predicates: HashMap<String, Arc<dyn PredicateFn>>,
    quantities: HashMap<String, Arc<dyn QuantityFn>>,
    actions: HashMap<String, Arc<dyn ActionFn>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(&self, name: &str) -> Result<(), RegistryError> {
        if self.predicates.contains_key(name)
            || self.quantities.contains_key(name)
            || self.actions.contains_key(name)
        {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn register_predicate(
        &mut self,
        name: &str,
        f: Arc<dyn PredicateFn>,
    ) -> Result<(), RegistryError> {
        self.check_unique(name)?;
        self.predicates.insert(name.to_string(), f);
        Ok(())
    }

    pub fn register_quantity(
        &mut self,
        name: &str,
        f: Arc<dyn QuantityFn>,
    ) -> Result<(), RegistryError> {
        self.check_unique(name)?;
        self.quantities.insert(name.to_string(), f);
        Ok(())
    }

    pub fn register_action(
        &mut self,
        name: &str,
        f: Arc<dyn ActionFn>,
    ) -> Result<(), RegistryError> {
        self.check_unique(name)?;
        self.actions.insert(name.to_string(), f);
        Ok(())
    }

    pub fn predicate(&self, name: &str) -> Option<&Arc<dyn PredicateFn>> {
        self.predicates.get(name)
    }

    pub fn quantity(&self, name: &str) -> Option<&Arc<dyn QuantityFn>> {
        self.quantities.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&Arc<dyn ActionFn>> {
        self.actions.get(name)
    }
}
