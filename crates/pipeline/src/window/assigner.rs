use kurier_core::config::{WindowConfig, WindowType};

/// Window boundary assignment. All kinds share the same update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAssigner {
    /// Fixed, non-overlapping windows of `size_ms`.
    Tumbling { size_ms: i64 },
    /// Windows of `size_ms` starting every `advance_ms`.
    Hopping { size_ms: i64, advance_ms: i64 },
    /// Activity-bounded windows closed by `gap_ms` of inactivity.
    Session { gap_ms: i64 },
}

impl WindowAssigner {
    pub fn from_config(config: &WindowConfig) -> Self {
        let size_ms = secs_to_ms(config.size_secs);
        match config.kind {
            WindowType::Tumbling => WindowAssigner::Tumbling { size_ms },
            WindowType::Hopping => WindowAssigner::Hopping {
                size_ms,
                advance_ms: secs_to_ms(config.advance_secs.unwrap_or(config.size_secs)),
            },
            WindowType::Session => WindowAssigner::Session {
                gap_ms: secs_to_ms(config.session_gap_secs),
            },
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, WindowAssigner::Session { .. })
    }

    /// `[start, end)` bounds of every fixed window containing `ts`, oldest
    /// first. Empty for session windows.
    pub fn fixed_windows(&self, ts: i64) -> Vec<(i64, i64)> {
        match *self {
            WindowAssigner::Tumbling { size_ms } => {
                let start = ts.div_euclid(size_ms) * size_ms;
                vec![(start, start + size_ms)]
            }
            WindowAssigner::Hopping { size_ms, advance_ms } => {
                let mut windows = Vec::new();
                let mut start = ts.div_euclid(advance_ms) * advance_ms;
                while start + size_ms > ts {
                    windows.push((start, start + size_ms));
                    start -= advance_ms;
                }
                windows.reverse();
                windows
            }
            WindowAssigner::Session { .. } => Vec::new(),
        }
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    (secs as i64).saturating_mul(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    #[test]
    fn tumbling_assigns_exactly_one_window() {
        let a = WindowAssigner::Tumbling { size_ms: 5 * MIN };
        assert_eq!(a.fixed_windows(0), vec![(0, 5 * MIN)]);
        assert_eq!(a.fixed_windows(5 * MIN - 1), vec![(0, 5 * MIN)]);
        assert_eq!(a.fixed_windows(5 * MIN), vec![(5 * MIN, 10 * MIN)]);
        assert_eq!(a.fixed_windows(-1), vec![(-5 * MIN, 0)]);
    }

    #[test]
    fn hopping_assigns_every_overlapping_window() {
        let a = WindowAssigner::Hopping {
            size_ms: 10 * MIN,
            advance_ms: 5 * MIN,
        };
        assert_eq!(
            a.fixed_windows(7 * MIN),
            vec![(0, 10 * MIN), (5 * MIN, 15 * MIN)]
        );
        assert_eq!(
            a.fixed_windows(10 * MIN),
            vec![(5 * MIN, 15 * MIN), (10 * MIN, 20 * MIN)]
        );
    }

    #[test]
    fn hopping_with_uneven_advance() {
        let a = WindowAssigner::Hopping {
            size_ms: 10 * MIN,
            advance_ms: 3 * MIN,
        };
        let windows = a.fixed_windows(10 * MIN);
        assert_eq!(
            windows,
            vec![(3 * MIN, 13 * MIN), (6 * MIN, 16 * MIN), (9 * MIN, 19 * MIN)]
        );
        assert!(windows.iter().all(|&(s, e)| s <= 10 * MIN && 10 * MIN < e));
    }

    #[test]
    fn from_config_maps_kinds() {
        let mut config = WindowConfig::default();
        assert_eq!(
            WindowAssigner::from_config(&config),
            WindowAssigner::Tumbling { size_ms: 300_000 }
        );

        config.kind = WindowType::Hopping;
        config.advance_secs = Some(60);
        assert_eq!(
            WindowAssigner::from_config(&config),
            WindowAssigner::Hopping {
                size_ms: 300_000,
                advance_ms: 60_000
            }
        );

        config.kind = WindowType::Session;
        assert!(WindowAssigner::from_config(&config).is_session());
    }
}
