use std::time::{Duration, Instant};

use std::collections::HashMap;

use chrono::Utc;
use engine_core::{
    DeepAdvisor, Decision, DecisionAction, EngineError, LearningRule, NewsSource, PriceSource,
    Signal, Store, Tier,
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

const LEARNING_RULE_CACHE_TTL: Duration = Duration::from_secs(3600);
const TOP_LEARNING_RULES: u32 = 5;

#[derive(Debug, Clone)]
pub struct ConfidenceThresholds {
    pub min_entry: f64,
    pub min_exit: f64,
    pub min_dca: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            min_entry: 0.65,
            min_exit: 0.55,
            min_dca: 0.60,
        }
    }
}

/// TTL-memoized top-weighted learning rules, mirroring the orchestrator's
/// cycle-scoped caches (§9 design note).
#[derive(Default)]
pub struct LearningRuleCache {
    inner: Mutex<Option<(Instant, Vec<LearningRule>)>>,
}

impl LearningRuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, store: &dyn Store) -> Result<Vec<LearningRule>, EngineError> {
        let mut guard = self.inner.lock().await;
        if let Some((fetched_at, rules)) = guard.as_ref() {
            if fetched_at.elapsed() < LEARNING_RULE_CACHE_TTL {
                return Ok(rules.clone());
            }
        }

        let mut rules = store.top_learning_rules(TOP_LEARNING_RULES).await?;
        rules.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        rules.truncate(TOP_LEARNING_RULES as usize);
        *guard = Some((Instant::now(), rules.clone()));
        Ok(rules)
    }
}

fn news_item_count(tier: Tier) -> u32 {
    match tier {
        Tier::Tier1 => 3,
        Tier::Tier2 => 2,
        Tier::Tier3 | Tier::Tier4 => 1,
    }
}

fn indicator_text(signal: &Signal) -> String {
    let s = &signal.snapshot;
    format!(
        "price={} rsi={:.1} ({:?}) macd_hist={:.4} crossover={:?}\n\
         ema9={} ema21={} ({:?})\n\
         bollinger: upper={} mid={} lower={} pos={:?} width={:?}\n\
         volume_ratio={:.2} trend={:?} strength={:.2}",
        s.price,
        s.rsi_value,
        s.rsi_signal,
        s.histogram,
        s.crossover,
        s.ema9,
        s.ema21,
        s.ema_signal,
        s.bollinger.upper,
        s.bollinger.middle,
        s.bollinger.lower,
        s.bollinger.position,
        s.bollinger.width,
        s.volume_ratio,
        s.trend.direction,
        s.trend.strength,
    )
}

fn rules_text(rules: &[LearningRule]) -> String {
    if rules.is_empty() {
        return "No learned rules yet.".to_string();
    }
    rules
        .iter()
        .map(|r| {
            format!(
                "- {} (weight={:.2}, win_rate={:.0}%, n={})",
                r.rule_text,
                r.weight,
                r.win_rate * 100.0,
                r.sample_size
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the full prompt handed to the DeepAdvisor (§4.3 context bundle).
pub async fn build_prompt(
    signal: &Signal,
    tier: Tier,
    news: &dyn NewsSource,
    store: &dyn Store,
    rule_cache: &LearningRuleCache,
    total_capital: rust_decimal::Decimal,
    current_prices: &HashMap<String, Decimal>,
    max_open: usize,
) -> Result<String, EngineError> {
    let coin_name = signal.symbol.trim_end_matches("USDT");
    let news_text = news.get(&signal.symbol, coin_name, news_item_count(tier)).await;
    let portfolio = store.portfolio_snapshot(total_capital, current_prices, max_open).await?;
    let breaker = store.circuit_breaker().await?;
    let rules = rule_cache.get(store).await?;

    Ok(format!(
        "=== Signal: {} ===\n\
         type={:?} strength={:?} confidence={:.2}\n\
         triggered_by={:?}\n\
         reasons: {}\n\n\
         === Technicals ===\n{}\n\n\
         === News ===\n{}\n\n\
         === Portfolio ===\n\
         open={}/{} invested=${} available=${} unrealized_pnl=${} realized_pnl=${} win_rate={:.0}%\n\
         circuit_breaker_active={} consecutive_losses={}\n\n\
         === Learned rules ===\n{}\n",
        signal.symbol,
        signal.signal_type,
        signal.strength,
        signal.confidence,
        signal.triggered_by,
        signal.reasons.join("; "),
        indicator_text(signal),
        news_text,
        portfolio.open_count,
        portfolio.max_open,
        portfolio.invested_usd,
        portfolio.available_capital_usd,
        portfolio.unrealized_pnl_usd,
        portfolio.realized_pnl_usd,
        portfolio.win_rate * 100.0,
        breaker.is_active,
        breaker.consecutive_losses,
        rules_text(&rules),
    ))
}

pub struct DecisionMaker<'a> {
    advisor: &'a dyn DeepAdvisor,
    store: &'a dyn Store,
    news: &'a dyn NewsSource,
    price_source: &'a dyn PriceSource,
    max_open: usize,
    thresholds: ConfidenceThresholds,
    rule_cache: LearningRuleCache,
}

impl<'a> DecisionMaker<'a> {
    pub fn new(
        advisor: &'a dyn DeepAdvisor,
        store: &'a dyn Store,
        news: &'a dyn NewsSource,
        price_source: &'a dyn PriceSource,
        max_open: usize,
        thresholds: ConfidenceThresholds,
    ) -> Self {
        Self {
            advisor,
            store,
            news,
            price_source,
            max_open,
            thresholds,
            rule_cache: LearningRuleCache::new(),
        }
    }

    /// `Decide(triggered, fast_verdict) -> decision` (§4.3). Assembles context,
    /// calls the DeepAdvisor, applies confidence-threshold downgrading, and
    /// persists exactly one Decision row.
    pub async fn decide(
        &self,
        signal: &Signal,
        tier: Tier,
        total_capital: rust_decimal::Decimal,
    ) -> Result<Decision, EngineError> {
        let current_prices = self.price_source.get_all_prices().await.unwrap_or_default();
        let prompt = build_prompt(
            signal,
            tier,
            self.news,
            self.store,
            &self.rule_cache,
            total_capital,
            &current_prices,
            self.max_open,
        )
        .await?;

        let reply = self.advisor.decide(&prompt).await;

        let (action, reasoning) = self.apply_confidence_gate(reply.action, reply.confidence, &reply.reasoning);

        let decision = Decision {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            action,
            confidence: reply.confidence,
            reasoning,
            risk_assessment: reply.risk_assessment,
            alternative_considered: reply.alternative_considered,
            recommended_price: reply.recommended_price,
            recommended_size_usd: reply.recommended_size_usd,
            exit_percent: reply.exit_percent,
            prompt_snapshot: prompt,
            executed: false,
            execution_notes: None,
            outcome: Default::default(),
            created_at: Utc::now(),
        };

        self.store.insert_decision(&decision).await?;
        Ok(decision)
    }

    fn apply_confidence_gate(
        &self,
        action: DecisionAction,
        confidence: f64,
        reasoning: &str,
    ) -> (DecisionAction, String) {
        match action {
            DecisionAction::Buy if confidence < self.thresholds.min_entry => (
                DecisionAction::Pass,
                format!(
                    "{reasoning}\n[downgraded: BUY confidence {:.2} below min_entry {:.2}]",
                    confidence, self.thresholds.min_entry
                ),
            ),
            DecisionAction::Sell if confidence < self.thresholds.min_exit => (
                DecisionAction::Hold,
                format!(
                    "{reasoning}\n[downgraded: SELL confidence {:.2} below min_exit {:.2}]",
                    confidence, self.thresholds.min_exit
                ),
            ),
            DecisionAction::Dca if confidence < self.thresholds.min_dca => (
                DecisionAction::Hold,
                format!(
                    "{reasoning}\n[downgraded: DCA confidence {:.2} below min_dca {:.2}]",
                    confidence, self.thresholds.min_dca
                ),
            ),
            other => (other, reasoning.to_string()),
        }
    }
}
