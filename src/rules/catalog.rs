//! Built-in predicate, quantity, and action functions.
//!
//! Each function is registered under the name used in rule files. Predicates
//! are side-effect-free; actions write to the proposal store or the
//! notification sink.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Address, ProposedOrder, Side, TimeMs};
use crate::ledger::LotFilter;

use super::registry::{ActionFn, PredicateFn, QuantityFn, Registries};
use super::{parse_arg, EvalContext, EvalError, Services};

/// Registries populated with every built-in function.
pub fn builtin_registries() -> Registries {
    let mut r = Registries::new();

    let predicates: [(&str, Arc<dyn PredicateFn>); 14] = [
        ("quantity_at_least", Arc::new(QuantityAtLeast)),
        ("quantity_at_most", Arc::new(QuantityAtMost)),
        ("held_quantity_below", Arc::new(HeldQuantityBelow)),
        ("buy_price_below", Arc::new(BuyPriceBelow)),
        ("sell_price_above", Arc::new(SellPriceAbove)),
        ("no_recent_trade", Arc::new(NoRecentTrade)),
        ("asset_whitelisted", Arc::new(AssetWhitelisted)),
        ("asset_blacklisted", Arc::new(AssetBlacklisted)),
        ("event_is_buy", Arc::new(EventIsBuy)),
        ("event_is_sell", Arc::new(EventIsSell)),
        ("profit_ratio_at_least", Arc::new(ProfitRatioAtLeast)),
        ("stats_win_rate_at_least", Arc::new(StatsWinRateAtLeast)),
        ("stats_games_at_least", Arc::new(StatsGamesAtLeast)),
        ("account_age_below_hours", Arc::new(AccountAgeBelowHours)),
    ];
    for (name, f) in predicates {
        r.register_predicate(name, f).expect("builtin names are unique");
    }

    let quantities: [(&str, Arc<dyn QuantityFn>); 3] = [
        ("fixed_quantity", Arc::new(FixedQuantity)),
        ("held_quantity", Arc::new(HeldQuantity)),
        ("profitable_quantity", Arc::new(ProfitableQuantity)),
    ];
    for (name, f) in quantities {
        r.register_quantity(name, f).expect("builtin names are unique");
    }

    let actions: [(&str, Arc<dyn ActionFn>); 3] = [
        ("propose_buy", Arc::new(ProposeBuy)),
        ("propose_sell", Arc::new(ProposeSell)),
        ("notify", Arc::new(Notify)),
    ];
    for (name, f) in actions {
        r.register_action(name, f).expect("builtin names are unique");
    }

    r
}

fn event_quantity(ctx: &EvalContext) -> Result<u64, EvalError> {
    ctx.event_quantity
        .ok_or(EvalError::MissingContext("event_quantity"))
}

fn holder(ctx: &EvalContext) -> Result<&Address, EvalError> {
    ctx.holder.as_ref().ok_or(EvalError::MissingContext("holder"))
}

/// Held quantity for the context holder, or across the whole fleet when no
/// holder is bound (buy-side evaluations).
async fn held_for_context(svc: &Services, ctx: &EvalContext) -> Result<u64, EvalError> {
    if let Some(holder) = &ctx.holder {
        return Ok(svc.ledger.held_quantity(holder, &ctx.asset)?);
    }
    let mut total = 0;
    for holder in svc.fleet.addresses() {
        total += svc.ledger.held_quantity(holder, &ctx.asset)?;
    }
    Ok(total)
}

/// Action quantity: the context's quantity-function result when the argument
/// is the `ctx` sentinel, otherwise the literal argument.
fn action_quantity(function: &str, ctx: &EvalContext, arg: &str) -> Result<u64, EvalError> {
    if arg == "ctx" {
        ctx.quantity_result
            .ok_or(EvalError::MissingContext("quantity_result"))
    } else {
        parse_arg(function, arg)
    }
}

struct QuantityAtLeast;

#[async_trait]
impl PredicateFn for QuantityAtLeast {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        _svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        Ok(event_quantity(ctx)? >= parse_arg("quantity_at_least", &args[0])?)
    }
}

struct QuantityAtMost;

#[async_trait]
impl PredicateFn for QuantityAtMost {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        _svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        Ok(event_quantity(ctx)? <= parse_arg("quantity_at_most", &args[0])?)
    }
}

struct HeldQuantityBelow;

#[async_trait]
impl PredicateFn for HeldQuantityBelow {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let limit: u64 = parse_arg("held_quantity_below", &args[0])?;
        Ok(held_for_context(svc, ctx).await? < limit)
    }
}

struct BuyPriceBelow;

#[async_trait]
impl PredicateFn for BuyPriceBelow {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let limit: u128 = parse_arg("buy_price_below", &args[0])?;
        Ok(svc.chain.buy_price(&ctx.asset, 1).await? < limit)
    }
}

struct SellPriceAbove;

#[async_trait]
impl PredicateFn for SellPriceAbove {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let floor: u128 = parse_arg("sell_price_above", &args[0])?;
        Ok(svc.chain.sell_price(&ctx.asset, 1).await? > floor)
    }
}

struct NoRecentTrade;

#[async_trait]
impl PredicateFn for NoRecentTrade {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let minutes: i64 = parse_arg("no_recent_trade", &args[0])?;
        match svc.recency.get(&ctx.asset)? {
            None => Ok(true),
            Some(record) => Ok(record.last_ms.age_ms() > minutes * 60_000),
        }
    }
}

struct AssetWhitelisted;

#[async_trait]
impl PredicateFn for AssetWhitelisted {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        Ok(svc.whitelists.contains(&args[0], ctx.asset.as_str())?)
    }
}

struct AssetBlacklisted;

#[async_trait]
impl PredicateFn for AssetBlacklisted {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        Ok(!svc.whitelists.contains(&args[0], ctx.asset.as_str())?)
    }
}

struct EventIsBuy;

#[async_trait]
impl PredicateFn for EventIsBuy {
    fn arity(&self) -> usize {
        0
    }
    async fn eval(
        &self,
        _svc: &Services,
        ctx: &EvalContext,
        _args: &[String],
    ) -> Result<bool, EvalError> {
        Ok(ctx.event_side == Some(Side::Buy))
    }
}

struct EventIsSell;

#[async_trait]
impl PredicateFn for EventIsSell {
    fn arity(&self) -> usize {
        0
    }
    async fn eval(
        &self,
        _svc: &Services,
        ctx: &EvalContext,
        _args: &[String],
    ) -> Result<bool, EvalError> {
        Ok(ctx.event_side == Some(Side::Sell))
    }
}

/// Would selling the whole held position now clear the given percent profit
/// over the cost basis of the remaining shares?
struct ProfitRatioAtLeast;

#[async_trait]
impl PredicateFn for ProfitRatioAtLeast {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let pct: u64 = parse_arg("profit_ratio_at_least", &args[0])?;
        let holder = holder(ctx)?;
        let lots = svc.ledger.lots_ascending(holder, &ctx.asset)?;
        let held: u64 = lots.iter().map(|l| l.remaining_quantity).sum();
        if held == 0 {
            return Ok(false);
        }
        let cost_basis: u128 = lots
            .iter()
            .map(|l| l.cost_wei - l.consumed_cost_wei())
            .sum();
        let proceeds = svc.chain.sell_price(&ctx.asset, held).await?;
        Ok(proceeds * 100 >= cost_basis * (100 + pct as u128))
    }
}

struct StatsWinRateAtLeast;

#[async_trait]
impl PredicateFn for StatsWinRateAtLeast {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let pct: f64 = parse_arg("stats_win_rate_at_least", &args[0])?;
        let wallet = Address::new(ctx.asset.as_str());
        match svc.feed.player_stats(&wallet).await? {
            None => Ok(false),
            Some(stats) => Ok(stats.win_rate * 100.0 >= pct),
        }
    }
}

struct StatsGamesAtLeast;

#[async_trait]
impl PredicateFn for StatsGamesAtLeast {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let min: u64 = parse_arg("stats_games_at_least", &args[0])?;
        let wallet = Address::new(ctx.asset.as_str());
        match svc.feed.player_stats(&wallet).await? {
            None => Ok(false),
            Some(stats) => Ok(stats.games_played >= min),
        }
    }
}

struct AccountAgeBelowHours;

#[async_trait]
impl PredicateFn for AccountAgeBelowHours {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<bool, EvalError> {
        let hours: i64 = parse_arg("account_age_below_hours", &args[0])?;
        let wallet = Address::new(ctx.asset.as_str());
        match svc.feed.player_stats(&wallet).await? {
            None => Ok(false),
            Some(stats) => Ok(stats.created_ms.age_ms() < hours * 3_600_000),
        }
    }
}

struct FixedQuantity;

#[async_trait]
impl QuantityFn for FixedQuantity {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        _svc: &Services,
        _ctx: &EvalContext,
        args: &[String],
    ) -> Result<u64, EvalError> {
        parse_arg("fixed_quantity", &args[0])
    }
}

struct HeldQuantity;

#[async_trait]
impl QuantityFn for HeldQuantity {
    fn arity(&self) -> usize {
        0
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        _args: &[String],
    ) -> Result<u64, EvalError> {
        held_for_context(svc, ctx).await
    }
}

/// Remaining quantity across lots whose per-share cost still clears the
/// given percent profit at the current unit sell price.
struct ProfitableQuantity;

#[async_trait]
impl QuantityFn for ProfitableQuantity {
    fn arity(&self) -> usize {
        1
    }
    async fn eval(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<u64, EvalError> {
        let pct: u64 = parse_arg("profitable_quantity", &args[0])?;
        let holder = holder(ctx)?;
        let unit_sell = svc.chain.sell_price(&ctx.asset, 1).await?;
        let max_unit_cost = unit_sell * 100 / (100 + pct as u128);
        let lots = svc.ledger.lots_filtered(
            holder,
            &ctx.asset,
            LotFilter {
                max_unit_cost_wei: Some(max_unit_cost),
                max_purchase_block: None,
            },
        )?;
        Ok(lots.iter().map(|l| l.remaining_quantity).sum())
    }
}

struct ProposeBuy;

#[async_trait]
impl ActionFn for ProposeBuy {
    fn arity(&self) -> usize {
        1
    }
    async fn run(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<(), EvalError> {
        let quantity = action_quantity("propose_buy", ctx, &args[0])?;
        if quantity == 0 {
            debug!(rule = %ctx.rule_id, asset = %ctx.asset, "zero buy quantity, not proposing");
            return Ok(());
        }
        svc.proposals.propose(&ProposedOrder {
            asset: ctx.asset.clone(),
            side: Side::Buy,
            quantity,
            rule_id: ctx.rule_id.clone(),
            trigger: ctx.trigger,
            holder: None,
            created_ms: TimeMs::now(),
        })?;
        Ok(())
    }
}

struct ProposeSell;

#[async_trait]
impl ActionFn for ProposeSell {
    fn arity(&self) -> usize {
        1
    }
    async fn run(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<(), EvalError> {
        let quantity = action_quantity("propose_sell", ctx, &args[0])?;
        if quantity == 0 {
            debug!(rule = %ctx.rule_id, asset = %ctx.asset, "zero sell quantity, not proposing");
            return Ok(());
        }
        let holder = holder(ctx)?.clone();
        svc.proposals.propose(&ProposedOrder {
            asset: ctx.asset.clone(),
            side: Side::Sell,
            quantity,
            rule_id: ctx.rule_id.clone(),
            trigger: ctx.trigger,
            holder: Some(holder),
            created_ms: TimeMs::now(),
        })?;
        Ok(())
    }
}

struct Notify;

#[async_trait]
impl ActionFn for Notify {
    fn arity(&self) -> usize {
        1
    }
    async fn run(
        &self,
        svc: &Services,
        ctx: &EvalContext,
        args: &[String],
    ) -> Result<(), EvalError> {
        svc.notifier
            .info(format!("rule {}: {} ({})", ctx.rule_id, args[0], ctx.asset));
        Ok(())
    }
}
