//! Declarative trading rules: loading, validation, and evaluation.
//!
//! A rule file is a JSON array of objects with `ruleID`, `invokeBy`, exactly
//! one of `quantity` or `conditions`, and `action`. Expressions are validated
//! against the typed registries at load time (unknown names and arity
//! mismatches are fatal), so a rule that reaches evaluation can only fail on
//! runtime data.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::chain::{ChainClient, ChainError};
use crate::domain::{Address, Asset, Side, TradeEvent, TriggerSource};
use crate::feeds::{FeedError, PlayerFeed};
use crate::fleet::KeyFleet;
use crate::ledger::{LedgerError, PositionLedger};
use crate::notify::Notifier;
use crate::orders::{OrderStoreError, ProposalStore, RecencyStore};

pub mod catalog;
pub mod expr;
pub mod invoker;
pub mod registry;
pub mod whitelist;

pub use catalog::builtin_registries;
pub use expr::{CallExpr, ExprError};
pub use invoker::RuleInvoker;
pub use registry::{ActionFn, PredicateFn, QuantityFn, Registries, RegistryError};
pub use whitelist::{WhitelistError, WhitelistStore};

/// Shared collaborators handed to every rule function.
pub struct Services {
    pub ledger: PositionLedger,
    pub chain: Arc<dyn ChainClient>,
    pub proposals: ProposalStore,
    pub recency: RecencyStore,
    pub whitelists: WhitelistStore,
    pub fleet: Arc<KeyFleet>,
    pub feed: Arc<dyn PlayerFeed>,
    pub notifier: Notifier,
}

/// Per-invocation evaluation context.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub trigger: TriggerSource,
    pub asset: Asset,
    /// Fleet holder this evaluation concerns, when known. Required for sell
    /// actions, which must debit a specific position.
    pub holder: Option<Address>,
    pub event_side: Option<Side>,
    pub event_quantity: Option<u64>,
    /// Set by the engine from a quantity function's result before the action
    /// runs; the rule currently being processed.
    pub quantity_result: Option<u64>,
    pub rule_id: String,
}

impl EvalContext {
    pub fn for_event(event: &TradeEvent, holder: Option<Address>) -> Self {
        Self {
            trigger: TriggerSource::ChainEvent,
            asset: event.asset.clone(),
            holder,
            event_side: Some(event.side),
            event_quantity: Some(event.quantity),
            quantity_result: None,
            rule_id: String::new(),
        }
    }

    pub fn for_sweep(holder: Address, asset: Asset) -> Self {
        Self {
            trigger: TriggerSource::FullSweep,
            asset,
            holder: Some(holder),
            event_side: None,
            event_quantity: None,
            quantity_result: None,
            rule_id: String::new(),
        }
    }

    pub fn for_new_user(asset: Asset) -> Self {
        Self {
            trigger: TriggerSource::NewUser,
            asset,
            holder: None,
            event_side: None,
            event_quantity: None,
            quantity_result: None,
            rule_id: String::new(),
        }
    }
}

/// Runtime evaluation failure. Propagates to the serialized invoker, which
/// logs it and moves on to the next queued task.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown {kind} function `{name}`")]
    UnknownFunction { kind: &'static str, name: String },
    #[error("context is missing required field `{0}`")]
    MissingContext(&'static str),
    #[error("bad argument `{arg}` to {function}: {reason}")]
    BadArgument {
        function: String,
        arg: String,
        reason: String,
    },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] OrderStoreError),
    #[error(transparent)]
    Whitelist(#[from] WhitelistError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// The gating half of a rule: either all conditions must hold, or a quantity
/// function is always invoked and its result feeds the action.
#[derive(Debug, Clone)]
pub enum Gate {
    Conditions(Vec<CallExpr>),
    Quantity(CallExpr),
}

/// A compiled, validated rule. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub triggers: Vec<TriggerSource>,
    pub gate: Gate,
    pub action: CallExpr,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSpec {
    #[serde(rename = "ruleID")]
    rule_id: String,
    #[serde(rename = "invokeBy")]
    invoke_by: Vec<String>,
    quantity: Option<String>,
    conditions: Option<Vec<String>>,
    action: String,
}

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad rule file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("rule {rule_id}: {source}")]
    Expr {
        rule_id: String,
        source: ExprError,
    },
    #[error("rule {rule_id} must specify exactly one of `quantity` and `conditions`")]
    SchemaExclusivity { rule_id: String },
    #[error("rule {rule_id} names unknown trigger source `{name}`")]
    UnknownTrigger { rule_id: String, name: String },
    #[error("rule {rule_id} references unknown {kind} function `{name}`")]
    UnknownFunction {
        rule_id: String,
        kind: &'static str,
        name: String,
    },
    #[error("rule {rule_id}: {name} takes {expected} argument(s), got {got}")]
    ArityMismatch {
        rule_id: String,
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Load and compile a rule file against the registries. Fails fast: a bad
/// rule file must never reach runtime evaluation.
pub fn load_rules(path: &Path, registries: &Registries) -> Result<Vec<Rule>, RuleLoadError> {
    let data = fs::read_to_string(path)?;
    let specs: Vec<RuleSpec> =
        serde_json::from_str(&data).map_err(|source| RuleLoadError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    specs
        .into_iter()
        .map(|spec| compile_rule(spec, registries))
        .collect()
}

fn parse_expr(rule_id: &str, input: &str) -> Result<CallExpr, RuleLoadError> {
    CallExpr::parse(input).map_err(|source| RuleLoadError::Expr {
        rule_id: rule_id.to_string(),
        source,
    })
}

fn check_arity(
    rule_id: &str,
    expr: &CallExpr,
    expected: usize,
) -> Result<(), RuleLoadError> {
    if expr.args.len() != expected {
        return Err(RuleLoadError::ArityMismatch {
            rule_id: rule_id.to_string(),
            name: expr.name.clone(),
            expected,
            got: expr.args.len(),
        });
    }
    Ok(())
}

fn compile_rule(spec: RuleSpec, registries: &Registries) -> Result<Rule, RuleLoadError> {
    let rule_id = spec.rule_id;

    let mut triggers = Vec::new();
    for name in &spec.invoke_by {
        let trigger = TriggerSource::parse(name).ok_or_else(|| RuleLoadError::UnknownTrigger {
            rule_id: rule_id.clone(),
            name: name.clone(),
        })?;
        triggers.push(trigger);
    }

    let gate = match (spec.quantity, spec.conditions) {
        (Some(quantity), None) => {
            let expr = parse_expr(&rule_id, &quantity)?;
            let f = registries.quantity(&expr.name).ok_or_else(|| {
                RuleLoadError::UnknownFunction {
                    rule_id: rule_id.clone(),
                    kind: "quantity",
                    name: expr.name.clone(),
                }
            })?;
            check_arity(&rule_id, &expr, f.arity())?;
            Gate::Quantity(expr)
        }
        (None, Some(conditions)) if !conditions.is_empty() => {
            let mut exprs = Vec::new();
            for condition in &conditions {
                let expr = parse_expr(&rule_id, condition)?;
                let f = registries.predicate(&expr.name).ok_or_else(|| {
                    RuleLoadError::UnknownFunction {
                        rule_id: rule_id.clone(),
                        kind: "predicate",
                        name: expr.name.clone(),
                    }
                })?;
                check_arity(&rule_id, &expr, f.arity())?;
                exprs.push(expr);
            }
            Gate::Conditions(exprs)
        }
        _ => return Err(RuleLoadError::SchemaExclusivity { rule_id }),
    };

    let action = parse_expr(&rule_id, &spec.action)?;
    let f = registries
        .action(&action.name)
        .ok_or_else(|| RuleLoadError::UnknownFunction {
            rule_id: rule_id.clone(),
            kind: "action",
            name: action.name.clone(),
        })?;
    check_arity(&rule_id, &action, f.arity())?;

    Ok(Rule {
        id: rule_id,
        triggers,
        gate,
        action,
    })
}

/// Evaluates compiled rule lists against a context, in file order.
pub struct RuleEngine {
    buy_rules: Vec<Rule>,
    sell_rules: Vec<Rule>,
    registries: Registries,
    services: Arc<Services>,
}

impl RuleEngine {
    pub fn new(
        buy_rules: Vec<Rule>,
        sell_rules: Vec<Rule>,
        registries: Registries,
        services: Arc<Services>,
    ) -> Self {
        Self {
            buy_rules,
            sell_rules,
            registries,
            services,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub async fn evaluate_buy(&self, ctx: EvalContext) -> Result<(), EvalError> {
        self.evaluate(&self.buy_rules, ctx).await
    }

    pub async fn evaluate_sell(&self, ctx: EvalContext) -> Result<(), EvalError> {
        self.evaluate(&self.sell_rules, ctx).await
    }

    /// Run every rule matching the context's trigger, in file order.
    ///
    /// A false condition skips the rule; a failing function propagates and
    /// halts the batch (the invoker logs it and the queue moves on).
    async fn evaluate(&self, rules: &[Rule], mut ctx: EvalContext) -> Result<(), EvalError> {
        for rule in rules {
            if !rule.triggers.contains(&ctx.trigger) {
                continue;
            }
            ctx.rule_id = rule.id.clone();
            ctx.quantity_result = None;

            match &rule.gate {
                Gate::Conditions(exprs) => {
                    let mut all_hold = true;
                    for expr in exprs {
                        let f = self.registries.predicate(&expr.name).ok_or_else(|| {
                            EvalError::UnknownFunction {
                                kind: "predicate",
                                name: expr.name.clone(),
                            }
                        })?;
                        if !f.eval(&self.services, &ctx, &expr.args).await? {
                            all_hold = false;
                            break;
                        }
                    }
                    if !all_hold {
                        continue;
                    }
                }
                Gate::Quantity(expr) => {
                    let f = self.registries.quantity(&expr.name).ok_or_else(|| {
                        EvalError::UnknownFunction {
                            kind: "quantity",
                            name: expr.name.clone(),
                        }
                    })?;
                    let quantity = f.eval(&self.services, &ctx, &expr.args).await?;
                    ctx.quantity_result = Some(quantity);
                }
            }

            debug!(rule = %rule.id, asset = %ctx.asset, "rule gate passed, running action");
            let action = self.registries.action(&rule.action.name).ok_or_else(|| {
                EvalError::UnknownFunction {
                    kind: "action",
                    name: rule.action.name.clone(),
                }
            })?;
            action.run(&self.services, &ctx, &rule.action.args).await?;
        }
        Ok(())
    }
}

/// Parse a numeric rule argument, mapping failures to a load-style error.
pub(crate) fn parse_arg<T: std::str::FromStr>(
    function: &str,
    arg: &str,
) -> Result<T, EvalError> {
    arg.parse::<T>().map_err(|_| EvalError::BadArgument {
        function: function.to_string(),
        arg: arg.to_string(),
        reason: "not a valid number".to_string(),
    })
}
