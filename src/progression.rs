//! Back-to-back bet progression calculator
//!
//! Each round stakes the previous bet grown by a fixed percentage and pays
//! `bet * multiplier`. The table shows stake, payout and running total.

use crate::error::{BotError, BotResult};
use serde::Serialize;

pub const DEFAULT_ROUNDS: usize = 15;
pub const MAX_ROUNDS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Round {
    pub number: usize,
    pub bet: f64,
    pub result: f64,
    pub running_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progression {
    pub base_bet: f64,
    pub multiplier: f64,
    pub increase_pct: f64,
    pub rounds: Vec<Round>,
}

impl Progression {
    /// Sum of all payouts
    pub fn total(&self) -> f64 {
        self.rounds.last().map(|r| r.running_total).unwrap_or(0.0)
    }
}

/// Compute `rounds` bets starting from `base_bet`
pub fn calculate(
    base_bet: f64,
    multiplier: f64,
    increase_pct: f64,
    rounds: usize,
) -> BotResult<Progression> {
    if !(base_bet.is_finite() && multiplier.is_finite() && increase_pct.is_finite()) {
        return Err(BotError::validation("Please provide valid numeric values."));
    }
    if base_bet <= 0.0 || multiplier <= 0.0 || increase_pct < 0.0 {
        return Err(BotError::validation("Please provide valid positive values."));
    }
    if rounds == 0 || rounds > MAX_ROUNDS {
        return Err(BotError::validation(format!(
            "Rounds must be between 1 and {}.",
            MAX_ROUNDS
        )));
    }

    let growth = 1.0 + increase_pct / 100.0;
    let mut bet = base_bet;
    let mut running_total = 0.0;
    let mut out = Vec::with_capacity(rounds);

    for number in 1..=rounds {
        let result = bet * multiplier;
        running_total += result;
        out.push(Round { number, bet, result, running_total });
        bet *= growth;
    }

    Ok(Progression {
        base_bet,
        multiplier,
        increase_pct,
        rounds: out,
    })
}

/// Compact number: B/M/K suffixes, extra decimals for tiny values
pub fn format_number(n: f64) -> String {
    let abs = n.abs();
    if abs >= 1e9 {
        format!("{:.2}B", n / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", n / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2}K", n / 1e3)
    } else if abs < 0.001 {
        format!("{:.8}", n)
    } else if abs < 0.01 {
        format!("{:.6}", n)
    } else if abs < 0.1 {
        format!("{:.4}", n)
    } else {
        format!("{:.2}", n)
    }
}

/// Monospace table wrapped in `<pre>`
pub fn render_table(progression: &Progression) -> String {
    let mut out = String::from(
        "<pre>\n\
         ┌─────────┬───────────┬───────────┬───────────┐\n\
         │  Round  │ Bet Size  │  Result   │   Total   │\n\
         ├─────────┼───────────┼───────────┼───────────┤\n",
    );
    for round in &progression.rounds {
        out.push_str(&format!(
            "│ {:<8}│ {:<10}│ {:<10}│ {:<10}│\n",
            round.number,
            format_number(round.bet),
            format_number(round.result),
            format_number(round.running_total),
        ));
    }
    out.push_str("└─────────┴───────────┴───────────┴───────────┘\n</pre>");
    out
}

pub fn usage() -> &'static str {
    "🎲 <b>Betting Progression Calculator</b>\n\n\
     Usage: <code>/b2b &lt;base_bet&gt; &lt;multiplier&gt; &lt;increase_%&gt; [rounds]</code>\n\n\
     Examples:\n\
     • <code>/b2b 100 2.0 10</code> - base 100, 2x payout, +10% per round\n\
     • <code>/b2b 0,5 1.5 5 20</code> - base 0.5, 1.5x payout, +5%, 20 rounds"
}

fn parse_decimal(s: &str) -> Option<f64> {
    s.replace(',', ".").parse().ok()
}

/// Full `/b2b` reply for raw arguments
pub fn handle(args: &str) -> String {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 3 {
        return usage().to_string();
    }

    let (Some(base), Some(mult), Some(pct)) = (
        parse_decimal(parts[0]),
        parse_decimal(parts[1]),
        parse_decimal(parts[2]),
    ) else {
        return "❌ Please provide valid numeric values.".to_string();
    };

    let rounds = match parts.get(3) {
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return "❌ Rounds must be a whole number.".to_string(),
        },
        None => DEFAULT_ROUNDS,
    };

    match calculate(base, mult, pct, rounds) {
        Ok(progression) => format!(
            "🎲 <b>Betting Progression Analysis</b> 🎲\n\n{}\n\n\
             📈 <b>Initial Bet:</b> <code>{}</code>\n\
             📊 <b>Multiplier:</b> <code>{:.1}x</code>\n\
             📋 <b>Increase:</b> <code>{:.1}%</code>\n\n\
             💰 <b>Total After {} Rounds:</b> <code>{}</code>",
            render_table(&progression),
            base,
            mult,
            pct,
            progression.rounds.len(),
            format_number(progression.total()),
        ),
        Err(e) => e.user_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn test_geometric_bets() {
        let p = calculate(100.0, 2.0, 10.0, 15).unwrap();
        assert_eq!(p.rounds.len(), 15);
        for pair in p.rounds.windows(2) {
            assert!(approx(pair[1].bet, pair[0].bet * 1.1));
        }
        assert!(approx(p.rounds[0].bet, 100.0));
    }

    #[test]
    fn test_total_is_sum_of_results() {
        let p = calculate(50.0, 1.5, 5.0, 20).unwrap();
        let sum: f64 = p.rounds.iter().map(|r| r.bet * 1.5).sum();
        assert!(approx(p.total(), sum));
        for r in &p.rounds {
            assert!(approx(r.result, r.bet * 1.5));
        }
    }

    #[test]
    fn test_zero_increase_is_flat() {
        let p = calculate(10.0, 3.0, 0.0, 5).unwrap();
        assert!(p.rounds.iter().all(|r| approx(r.bet, 10.0)));
        assert!(approx(p.total(), 150.0));
    }

    #[test]
    fn test_validation() {
        assert!(calculate(0.0, 2.0, 10.0, 15).is_err());
        assert!(calculate(100.0, 0.0, 10.0, 15).is_err());
        assert!(calculate(100.0, 2.0, -1.0, 15).is_err());
        assert!(calculate(100.0, 2.0, 10.0, 0).is_err());
        assert!(calculate(100.0, 2.0, 10.0, MAX_ROUNDS + 1).is_err());
        assert!(calculate(f64::NAN, 2.0, 10.0, 15).is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1_500_000_000.0), "1.50B");
        assert_eq!(format_number(2_340_000.0), "2.34M");
        assert_eq!(format_number(1_000.0), "1.00K");
        assert_eq!(format_number(12.5), "12.50");
        assert_eq!(format_number(0.05), "0.0500");
        assert_eq!(format_number(0.005), "0.005000");
        assert_eq!(format_number(0.0005), "0.00050000");
    }

    #[test]
    fn test_handle_accepts_comma_decimals() {
        let reply = handle("0,5 2 10 3");
        assert!(reply.contains("Total After 3 Rounds"));
        assert!(reply.contains("<pre>"));
    }

    #[test]
    fn test_handle_errors() {
        assert!(handle("100 2").contains("Betting Progression Calculator"));
        assert!(handle("abc 2 10").contains("valid numeric"));
        assert!(handle("-5 2 10").contains("positive"));
    }
}
