use std::collections::BTreeSet;

/// Take-profit step: sell `pct`% once value reaches `multiple` × entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellLevel {
    pub multiple: f64,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitRules {
    pub stop_loss_pct: f64,            // 0 disables
    pub levels: Vec<SellLevel>,
    pub trailing_pct: f64,             // 0 disables
    pub trailing_sell_pct: f64,        // Fraction sold when the trailing stop is hit
    pub allow_trailing_with_levels: bool,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            stop_loss_pct: 10.0,
            levels: [1.1, 1.2, 1.3, 1.4, 1.5]
                .into_iter()
                .map(|multiple| SellLevel { multiple, pct: 20.0 })
                .collect(),
            trailing_pct: 10.0,
            trailing_sell_pct: 20.0,
            allow_trailing_with_levels: true,
        }
    }
}

/// Peak position value and the stop derived from it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrailingStop {
    pub peak: Option<f64>,
    pub stop: f64,
}

impl TrailingStop {
    /// Returns true when `value` set a new peak (and the stop moved).
    pub fn observe(&mut self, value: f64, trailing_pct: f64) -> bool {
        match self.peak {
            Some(peak) if value <= peak => false,
            _ => {
                self.peak = Some(value);
                self.stop = value * (1.0 - trailing_pct / 100.0);
                true
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExitState {
    pub trailing: TrailingStop,
    pub levels_taken: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitReason {
    StopLoss,
    Level { index: usize, multiple: f64 },
    TrailingStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop-loss"),
            Self::Level { multiple, .. } => write!(f, "{}x level", multiple),
            Self::TrailingStop => write!(f, "trailing stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitAction {
    pub reason: ExitReason,
    pub amount: u64, // Raw token units
}

/// Sells produced by one evaluation, aggregated into a single order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitDecision {
    pub actions: Vec<ExitAction>,
    pub total: u64,
    pub full: bool, // Consumes the whole balance
}

impl ExitDecision {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() || self.total == 0
    }

    fn from_actions(actions: Vec<ExitAction>, balance: u64) -> Self {
        let total = actions
            .iter()
            .fold(0u64, |acc, a| acc.saturating_add(a.amount))
            .min(balance);
        Self {
            full: balance > 0 && total == balance,
            actions,
            total,
        }
    }
}

fn pct_of(balance: u64, pct: f64) -> u64 {
    (balance as f64 * pct / 100.0).floor() as u64
}

impl ExitRules {
    /// Evaluates one tick. `value` and `entry` are in SOL, `balance` is the
    /// raw token balance before the tick. Levels that fire are marked taken.
    pub fn evaluate(&self, state: &mut ExitState, value: f64, entry: f64, balance: u64) -> ExitDecision {
        if balance == 0 || entry <= 0.0 || !value.is_finite() {
            return ExitDecision::default();
        }

        if self.stop_loss_pct > 0.0 && value <= entry * (1.0 - self.stop_loss_pct / 100.0) {
            let action = ExitAction {
                reason: ExitReason::StopLoss,
                amount: balance,
            };
            return ExitDecision::from_actions(vec![action], balance);
        }

        let mut actions = Vec::new();
        for (index, level) in self.levels.iter().enumerate() {
            if value >= entry * level.multiple && state.levels_taken.insert(index) {
                actions.push(ExitAction {
                    reason: ExitReason::Level {
                        index,
                        multiple: level.multiple,
                    },
                    amount: pct_of(balance, level.pct),
                });
            }
        }

        if self.trailing_pct > 0.0 {
            state.trailing.observe(value, self.trailing_pct);
            let level_fired = !actions.is_empty();
            if value <= state.trailing.stop && (self.allow_trailing_with_levels || !level_fired) {
                actions.push(ExitAction {
                    reason: ExitReason::TrailingStop,
                    amount: pct_of(balance, self.trailing_sell_pct),
                });
            }
        }

        ExitDecision::from_actions(actions, balance)
    }
}

/// Parses `"1.1:20,1.5:30"` into sell levels.
pub fn parse_sell_levels(raw: &str) -> Result<Vec<SellLevel>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (multiple, pct) = part
                .split_once(':')
                .ok_or_else(|| format!("sell level '{}' is not multiple:pct", part))?;
            let multiple: f64 = multiple
                .trim()
                .parse()
                .map_err(|e| format!("bad multiple in '{}': {}", part, e))?;
            let pct: f64 = pct
                .trim()
                .parse()
                .map_err(|e| format!("bad percentage in '{}': {}", part, e))?;
            if multiple <= 0.0 || !(0.0..=100.0).contains(&pct) {
                return Err(format!("sell level '{}' out of range", part));
            }
            Ok(SellLevel { multiple, pct })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BALANCE: u64 = 1_000_000;

    fn rules(levels: &[(f64, f64)]) -> ExitRules {
        ExitRules {
            stop_loss_pct: 10.0,
            levels: levels
                .iter()
                .map(|(multiple, pct)| SellLevel {
                    multiple: *multiple,
                    pct: *pct,
                })
                .collect(),
            trailing_pct: 0.0,
            trailing_sell_pct: 20.0,
            allow_trailing_with_levels: true,
        }
    }

    #[test]
    fn stop_loss_sells_everything_once_breached() {
        let rules = rules(&[]);
        let mut state = ExitState::default();

        let decisions: Vec<_> = [1.0, 0.95, 0.89]
            .iter()
            .map(|v| rules.evaluate(&mut state, *v, 1.0, BALANCE))
            .collect();

        assert!(decisions[0].is_empty());
        assert!(decisions[1].is_empty());
        assert_eq!(decisions[2].actions.len(), 1);
        assert_eq!(decisions[2].actions[0].reason, ExitReason::StopLoss);
        assert_eq!(decisions[2].total, BALANCE);
        assert!(decisions[2].full);
    }

    #[test]
    fn stop_loss_preempts_other_rules() {
        let mut rules = rules(&[(0.5, 50.0)]);
        rules.trailing_pct = 5.0;
        let mut state = ExitState::default();

        let decision = rules.evaluate(&mut state, 0.8, 1.0, BALANCE);
        assert_eq!(decision.actions.len(), 1);
        assert!(state.levels_taken.is_empty());
        assert_eq!(state.trailing.peak, None);
    }

    #[test]
    fn levels_fire_together_on_pre_tick_balance() {
        let rules = rules(&[(1.2, 20.0), (1.5, 20.0)]);
        let mut state = ExitState::default();

        assert!(rules.evaluate(&mut state, 1.0, 1.0, BALANCE).is_empty());
        let decision = rules.evaluate(&mut state, 1.6, 1.0, BALANCE);
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.total, 400_000);
        assert!(!decision.full);
    }

    #[test]
    fn each_level_fires_at_most_once() {
        let rules = rules(&[(1.2, 25.0)]);
        let mut state = ExitState::default();
        let mut fired = 0;
        for value in [1.0, 1.3, 1.1, 1.4, 1.0, 1.25] {
            fired += rules.evaluate(&mut state, value, 1.0, BALANCE).actions.len();
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn trailing_peak_never_decreases() {
        let mut trailing = TrailingStop::default();
        assert!(trailing.observe(1.0, 10.0));
        assert!(trailing.observe(2.0, 10.0));
        assert!(!trailing.observe(1.5, 10.0));
        assert!(!trailing.observe(2.0, 10.0));
        assert_eq!(trailing.peak, Some(2.0));
        assert!((trailing.stop - 1.8).abs() < 1e-9);
    }

    #[test]
    fn trailing_stop_sells_fallback_fraction() {
        let mut rules = rules(&[]);
        rules.stop_loss_pct = 0.0;
        rules.trailing_pct = 10.0;
        let mut state = ExitState::default();

        assert!(rules.evaluate(&mut state, 2.0, 1.0, BALANCE).is_empty());
        assert!(rules.evaluate(&mut state, 1.85, 1.0, BALANCE).is_empty());
        let decision = rules.evaluate(&mut state, 1.79, 1.0, BALANCE);
        assert_eq!(decision.actions[0].reason, ExitReason::TrailingStop);
        assert_eq!(decision.total, 200_000);
    }

    #[test]
    fn trailing_with_levels_is_configurable() {
        let mut rules = rules(&[(1.1, 20.0)]);
        rules.stop_loss_pct = 0.0;
        rules.trailing_pct = 10.0;

        // Peak at 2.0, then a fall to 1.5 crosses both the level and the stop
        let mut state = ExitState::default();
        state.trailing.observe(2.0, 10.0);
        let decision = rules.evaluate(&mut state, 1.5, 1.0, BALANCE);
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.total, 400_000);

        rules.allow_trailing_with_levels = false;
        let mut state = ExitState::default();
        state.trailing.observe(2.0, 10.0);
        let decision = rules.evaluate(&mut state, 1.5, 1.0, BALANCE);
        assert_eq!(decision.actions.len(), 1);
        assert!(matches!(decision.actions[0].reason, ExitReason::Level { .. }));
    }

    #[test]
    fn aggregate_is_capped_at_balance() {
        let rules = rules(&[(1.1, 60.0), (1.2, 60.0)]);
        let mut state = ExitState::default();
        let decision = rules.evaluate(&mut state, 1.3, 1.0, BALANCE);
        assert_eq!(decision.total, BALANCE);
        assert!(decision.full);
    }

    #[test]
    fn parses_level_list() {
        let levels = parse_sell_levels("1.1:20, 1.5:30").unwrap();
        assert_eq!(levels, vec![
            SellLevel { multiple: 1.1, pct: 20.0 },
            SellLevel { multiple: 1.5, pct: 30.0 },
        ]);
        assert!(parse_sell_levels("").unwrap().is_empty());
        assert!(parse_sell_levels("2x").is_err());
        assert!(parse_sell_levels("2:150").is_err());
    }
}
