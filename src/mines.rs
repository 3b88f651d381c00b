//! Mines game multiplier calculator
//!
//! A 5x5 board hides `m` mines; the player reveals `d` diamonds. The fair
//! payout is the inverse probability of surviving `d` picks, scaled by the
//! 99% return-to-player factor:
//!
//! ```text
//! multiplier = 0.99 * C(25, d) / C(25 - m, d)
//! ```

use serde::Serialize;

/// Tiles on the board
pub const TOTAL_TILES: u32 = 25;

/// Return-to-player factor applied to the fair multiplier
pub const HOUSE_EDGE_FACTOR: f64 = 0.99;

const CLOSE_RESULTS: usize = 4;
const SEARCH_RESULTS: usize = 5;

/// One (mines, diamonds) combination and its multiplier
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MinesOption {
    pub mines: u32,
    pub diamonds: u32,
    pub multiplier: f64,
}

/// Full result for a single combination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinesResult {
    pub mines: u32,
    pub diamonds: u32,
    pub multiplier: f64,
    /// Percent chance of revealing every diamond
    pub winning_chance: f64,
    pub close: Vec<MinesOption>,
}

/// Binomial coefficient, exact for n <= 25
fn binomial(n: u32, k: u32) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k) as u64;
    let n = n as u64;
    (0..k).fold(1u64, |acc, i| acc * (n - i) / (i + 1))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Whether a mines/diamonds pair fits on the board
pub fn is_valid(mines: u32, diamonds: u32) -> bool {
    mines > 0
        && diamonds > 0
        && mines.checked_add(diamonds).is_some_and(|sum| sum <= TOTAL_TILES)
}

/// Multiplier rounded to two places, `None` for impossible boards
pub fn multiplier(mines: u32, diamonds: u32) -> Option<f64> {
    if !is_valid(mines, diamonds) {
        return None;
    }
    let total = binomial(TOTAL_TILES, diamonds) as f64;
    let safe = binomial(TOTAL_TILES - mines, diamonds) as f64;
    Some(round_to(HOUSE_EDGE_FACTOR * total / safe, 2))
}

/// Winning chance in percent for a (rounded) multiplier
pub fn winning_chance(multiplier: f64) -> f64 {
    round_to(99.0 / multiplier, 5)
}

fn sort_by_distance(options: &mut [MinesOption], target: f64) {
    options.sort_by(|a, b| {
        let da = (a.multiplier - target).abs();
        let db = (b.multiplier - target).abs();
        da.total_cmp(&db)
    });
}

/// Neighbouring combinations (one mine / one diamond either way), closest first
pub fn close_multipliers(mines: u32, diamonds: u32) -> Vec<MinesOption> {
    let Some(target) = multiplier(mines, diamonds) else {
        return Vec::new();
    };

    let mut options = Vec::new();
    for m in mines.saturating_sub(1).max(1)..mines.saturating_add(2).min(TOTAL_TILES) {
        for d in diamonds.saturating_sub(1).max(1)..diamonds.saturating_add(2).min(TOTAL_TILES - m + 1) {
            if m == mines && d == diamonds {
                continue;
            }
            if let Some(mult) = multiplier(m, d) {
                options.push(MinesOption { mines: m, diamonds: d, multiplier: mult });
            }
        }
    }

    sort_by_distance(&mut options, target);
    options.truncate(CLOSE_RESULTS);
    options
}

/// Multiplier, winning chance and neighbours for one combination
pub fn calculate(mines: u32, diamonds: u32) -> Option<MinesResult> {
    let mult = multiplier(mines, diamonds)?;
    Some(MinesResult {
        mines,
        diamonds,
        multiplier: mult,
        winning_chance: winning_chance(mult),
        close: close_multipliers(mines, diamonds),
    })
}

/// The combinations whose multiplier lands closest to `target`
pub fn search(target: f64) -> Vec<MinesOption> {
    if !target.is_finite() {
        return Vec::new();
    }

    let mut options = Vec::new();
    for m in 1..TOTAL_TILES {
        for d in 1..=(TOTAL_TILES - m) {
            if let Some(mult) = multiplier(m, d) {
                options.push(MinesOption { mines: m, diamonds: d, multiplier: mult });
            }
        }
    }

    sort_by_distance(&mut options, target);
    options.truncate(SEARCH_RESULTS);
    options
}

/// Parsed `/mines` arguments
#[derive(Debug, Clone, PartialEq)]
pub enum MinesQuery {
    Target(f64),
    Board { mines: u32, diamonds: u32 },
}

/// Parse `/mines <target>` or `/mines <mines> <diamonds>`
pub fn parse_args(args: &str) -> Result<MinesQuery, String> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [target] => {
            let target: f64 = target
                .replace(',', ".")
                .trim_end_matches(['x', 'X'])
                .parse()
                .map_err(|_| "❌ Please provide valid numbers.".to_string())?;
            if target <= 1.0 {
                return Err("❌ Multiplier must be greater than 1.0".to_string());
            }
            Ok(MinesQuery::Target(target))
        }
        [mines, diamonds] => {
            let mines = mines.parse().map_err(|_| "❌ Please provide valid numbers.".to_string())?;
            let diamonds = diamonds.parse().map_err(|_| "❌ Please provide valid numbers.".to_string())?;
            Ok(MinesQuery::Board { mines, diamonds })
        }
        _ => Err(usage().to_string()),
    }
}

pub fn usage() -> &'static str {
    "💎 <b>Mines Game Calculator</b>\n\n\
     Usage:\n\
     • <code>/mines &lt;multiplier&gt;</code> - find mines/diamonds for a target multiplier\n\
     • <code>/mines &lt;mines&gt; &lt;diamonds&gt;</code> - multiplier and odds\n\n\
     Examples:\n\
     • <code>/mines 2.5</code>\n\
     • <code>/mines 5 3</code>\n\n\
     5×5 grid, 25 tiles. Each diamond raises the multiplier; a mine loses the round."
}

/// Reply text for a target search
pub fn format_search(target: f64, options: &[MinesOption]) -> String {
    if options.is_empty() {
        return "❌ Unable to find combinations for that multiplier.".to_string();
    }
    let mut out = format!("💎 <b>Searching for multipliers close to {}x</b>\n\n", target);
    for (i, opt) in options.iter().enumerate() {
        out.push_str(&format!(
            "🔹 <b>{}.</b> {} mines and {} diamonds: <b>{}x</b>\n",
            i + 1,
            opt.mines,
            opt.diamonds,
            opt.multiplier
        ));
    }
    out
}

/// Reply text for a single board
pub fn format_result(result: &MinesResult) -> String {
    let mut out = format!(
        "💎 <b>Multiplier for {} mines and {} diamonds: {}x</b>\n\
         🎲 <b>Winning Chance: {}%</b>\n\n\
         🔍 <b>Close multipliers:</b>\n",
        result.mines, result.diamonds, result.multiplier, result.winning_chance
    );
    for opt in &result.close {
        out.push_str(&format!(
            "🔹 {} mines and {} diamonds: <b>{}x</b>\n",
            opt.mines, opt.diamonds, opt.multiplier
        ));
    }
    out
}

pub fn invalid_board_message() -> &'static str {
    "❌ Invalid combination!\n\n\
     • Mines and diamonds total must be ≤ 25\n\
     • Both must be greater than 0"
}

/// Full `/mines` reply for raw arguments
pub fn handle(args: &str) -> String {
    if args.trim().is_empty() {
        return usage().to_string();
    }
    match parse_args(args) {
        Ok(MinesQuery::Target(target)) => format_search(target, &search(target)),
        Ok(MinesQuery::Board { mines, diamonds }) => match calculate(mines, diamonds) {
            Some(result) => format_result(&result),
            None => invalid_board_message().to_string(),
        },
        Err(msg) => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(25, 0), 1);
        assert_eq!(binomial(25, 1), 25);
        assert_eq!(binomial(25, 12), 5_200_300);
        assert_eq!(binomial(5, 6), 0);
    }

    #[test]
    fn test_single_mine_single_diamond() {
        // 0.99 * 25 / 24
        assert_eq!(multiplier(1, 1), Some(1.03));
    }

    #[test]
    fn test_known_values() {
        // 0.99 * C(25,3) / C(20,3) = 0.99 * 2300 / 1140
        assert_eq!(multiplier(5, 3), Some(2.0));
        // Full board: 24 mines, 1 diamond
        assert_eq!(multiplier(24, 1), Some(24.75));
    }

    #[test]
    fn test_board_bounds() {
        assert!(multiplier(0, 1).is_none());
        assert!(multiplier(1, 0).is_none());
        assert!(multiplier(20, 6).is_none());
        assert!(multiplier(20, 5).is_some());
    }

    #[test]
    fn test_every_valid_board_has_multiplier() {
        for m in 0..=26 {
            for d in 0..=26 {
                let expected = m >= 1 && d >= 1 && m + d <= TOTAL_TILES;
                assert_eq!(multiplier(m, d).is_some(), expected, "m={} d={}", m, d);
            }
        }
    }

    #[test]
    fn test_monotone_in_diamonds() {
        for m in 1..TOTAL_TILES {
            let mut prev = 0.0;
            for d in 1..=(TOTAL_TILES - m) {
                let mult = multiplier(m, d).unwrap();
                assert!(mult >= prev, "m={} d={} {} < {}", m, d, mult, prev);
                prev = mult;
            }
        }
    }

    #[test]
    fn test_monotone_in_mines() {
        for d in 1..TOTAL_TILES {
            let mut prev = 0.0;
            for m in 1..=(TOTAL_TILES - d) {
                let mult = multiplier(m, d).unwrap();
                assert!(mult >= prev, "m={} d={}", m, d);
                prev = mult;
            }
        }
    }

    #[test]
    fn test_winning_chance() {
        assert_eq!(winning_chance(2.0), 49.5);
        assert_eq!(winning_chance(24.75), 4.0);
    }

    #[test]
    fn test_close_multipliers_excludes_self() {
        let close = close_multipliers(5, 3);
        assert!(!close.is_empty());
        assert!(close.len() <= 4);
        assert!(close.iter().all(|o| !(o.mines == 5 && o.diamonds == 3)));
        assert!(close.iter().all(|o| is_valid(o.mines, o.diamonds)));

        let target = multiplier(5, 3).unwrap();
        let distances: Vec<f64> = close.iter().map(|o| (o.multiplier - target).abs()).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_close_multipliers_at_corner() {
        let close = close_multipliers(1, 1);
        for opt in &close {
            assert!(opt.mines >= 1 && opt.mines <= 2);
            assert!(opt.diamonds >= 1 && opt.diamonds <= 2);
        }
    }

    #[test]
    fn test_search_finds_exact_match() {
        let results = search(2.0);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].multiplier, 2.0);
        assert!(results.iter().all(|o| is_valid(o.mines, o.diamonds)));
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args("2.5"), Ok(MinesQuery::Target(2.5)));
        assert_eq!(parse_args("2,5x"), Ok(MinesQuery::Target(2.5)));
        assert_eq!(parse_args("5 3"), Ok(MinesQuery::Board { mines: 5, diamonds: 3 }));
        assert!(parse_args("1.0").is_err());
        assert!(parse_args("abc").is_err());
        assert!(parse_args("1 2 3").is_err());
    }

    #[test]
    fn test_handle_invalid_board() {
        assert!(handle("20 10").contains("Invalid combination"));
        assert!(handle("5 3").contains("2x"));
        assert!(handle("").contains("Mines Game Calculator"));
    }

    #[test]
    fn test_huge_counts_are_rejected() {
        assert!(!is_valid(u32::MAX, 1));
        assert!(!is_valid(1, u32::MAX));
        assert!(multiplier(u32::MAX, 1).is_none());
        assert!(close_multipliers(u32::MAX, u32::MAX).is_empty());
        assert!(handle("4294967295 1").contains("Invalid combination"));
        assert!(handle("1 4294967295").contains("Invalid combination"));
    }
}
