//! Disk budget shared by all subscribed feeds.
//!
//! Every feed gets an equal share of the global budget, scaled by a space
//! factor. The factor adapts after each save: it shrinks when the store ran
//! over budget and grows while the store stays well below it, so feeds that
//! need more room can use what quiet feeds leave unused.

pub(crate) const MIN_SPACE_FACTOR: f64 = 0.25;
pub(crate) const MAX_SPACE_FACTOR: f64 = 4.0;

/// Byte budget of one feed document, `None` when unlimited.
pub(crate) fn feed_budget(max_bytes: Option<u64>, feed_count: usize, space_factor: f64) -> Option<u64> {
    let max_bytes = max_bytes?;
    let share = max_bytes as f64 / feed_count.max(1) as f64;
    Some((share * space_factor).max(0.0) as u64)
}

/// Space factor for the next save, given what the store occupies now.
pub(crate) fn adjust_factor(factor: f64, used_bytes: u64, max_bytes: Option<u64>) -> f64 {
    let Some(max_bytes) = max_bytes else {
        return factor;
    };
    let adjusted = if used_bytes > max_bytes {
        factor * 0.9
    } else if (used_bytes as f64) < max_bytes as f64 * 0.8 {
        factor * 1.1
    } else {
        factor
    };
    adjusted.clamp(MIN_SPACE_FACTOR, MAX_SPACE_FACTOR)
}

/// Which entries of a feed fit its budget.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Selection {
    /// Indices of entries to write, in their original order.
    pub written: Vec<usize>,
    /// Indices of entries to delete.
    pub dropped: Vec<usize>,
    pub space_limited: bool,
}

/// Picks entries for one save. `entries` holds `(keep, encoded size)` in
/// newest-first order.
///
/// Keep-flagged entries are always written. The others follow newest first
/// until one does not fit; from then on every remaining entry is dropped.
pub(crate) fn select_entries(entries: &[(bool, usize)], budget: Option<u64>) -> Selection {
    let Some(budget) = budget else {
        return Selection {
            written: (0..entries.len()).collect(),
            ..Selection::default()
        };
    };

    let mut used: u64 = entries
        .iter()
        .filter(|(keep, _)| *keep)
        .map(|(_, size)| *size as u64)
        .sum();
    let mut selection = Selection::default();
    for (index, (keep, size)) in entries.iter().enumerate() {
        if *keep {
            selection.written.push(index);
            continue;
        }
        if !selection.space_limited && used + *size as u64 <= budget {
            used += *size as u64;
            selection.written.push(index);
        } else {
            selection.space_limited = true;
            selection.dropped.push(index);
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unlimited_writes_everything() {
        let selection = select_entries(&[(false, 500), (false, 500)], None);
        assert_eq!(selection.written, vec![0, 1]);
        assert!(!selection.space_limited);
        assert_eq!(feed_budget(None, 3, 1.0), None);
    }

    #[test]
    fn test_keep_entries_win_over_newer_ones() {
        // budget fits the keep entry plus one more
        let entries = [(false, 40), (false, 40), (true, 50), (false, 10)];
        let selection = select_entries(&entries, Some(100));
        assert_eq!(selection.written, vec![0, 2]);
        assert_eq!(selection.dropped, vec![1, 3]);
        assert!(selection.space_limited);
    }

    #[test]
    fn test_keep_entries_written_even_over_budget() {
        let selection = select_entries(&[(true, 500), (false, 1)], Some(100));
        assert_eq!(selection.written, vec![0]);
        assert_eq!(selection.dropped, vec![1]);
    }

    #[test]
    fn test_budget_share_and_factor() {
        assert_eq!(feed_budget(Some(10_000), 4, 1.0), Some(2_500));
        assert_eq!(feed_budget(Some(10_000), 4, 2.0), Some(5_000));
        assert_eq!(feed_budget(Some(10_000), 0, 1.0), Some(10_000));
    }

    #[test]
    fn test_factor_adapts_and_stays_bounded() {
        let max = Some(1_000);
        assert!(adjust_factor(1.0, 1_200, max) < 1.0);
        assert!(adjust_factor(1.0, 100, max) > 1.0);
        assert_eq!(adjust_factor(1.0, 900, max), 1.0);
        assert_eq!(adjust_factor(1.0, 5, None), 1.0);

        let mut factor = 1.0;
        for _ in 0..100 {
            factor = adjust_factor(factor, 0, max);
        }
        assert_eq!(factor, MAX_SPACE_FACTOR);
    }
}
