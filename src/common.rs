// Shared identifiers and the replica placement rule.
//
// Every module addresses transactions, sites, and variables through the
// aliases defined here. Site and variable ids are 1-based on the wire
// (`T3`, `x14`, `site 7`) and stay 1-based internally; dense containers
// subtract one at the indexing boundary only.

/// Identifier of a transaction (`T<k>` on the wire).
pub type TransactionId = u64;

/// Identifier of a site, `1..=SITE_COUNT`.
pub type SiteId = usize;

/// Identifier of a variable, `1..=VARIABLE_COUNT`.
pub type VariableId = usize;

/// The logical clock. One increment per non-comment input line.
pub type Tick = u64;

/// Number of simulated sites.
pub const SITE_COUNT: usize = 10;

/// Number of data items.
pub const VARIABLE_COUNT: usize = 20;

/// Even-indexed variables are replicated at every site.
#[inline]
pub fn is_replicated(vid: VariableId) -> bool {
    vid % 2 == 0
}

/// The single site an odd-indexed variable lives on.
#[inline]
pub fn home_site(vid: VariableId) -> SiteId {
    1 + vid % SITE_COUNT
}

/// All sites that store `vid`, in ascending site order.
pub fn sites_holding(vid: VariableId) -> Vec<SiteId> {
    if is_replicated(vid) {
        (1..=SITE_COUNT).collect()
    } else {
        vec![home_site(vid)]
    }
}

/// Initial committed value of a variable, fixed at `10 * id`.
#[inline]
pub fn initial_value(vid: VariableId) -> i64 {
    10 * vid as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_variables_have_a_single_home() {
        assert_eq!(home_site(1), 2);
        assert_eq!(home_site(3), 4);
        assert_eq!(home_site(9), 10);
        assert_eq!(home_site(11), 2);
        assert_eq!(home_site(19), 10);
    }

    #[test]
    fn even_variables_are_replicated_everywhere() {
        assert_eq!(sites_holding(2), (1..=10).collect::<Vec<_>>());
        assert_eq!(sites_holding(20).len(), SITE_COUNT);
    }

    #[test]
    fn non_replicated_placement() {
        assert_eq!(sites_holding(1), vec![2]);
        assert_eq!(sites_holding(13), vec![4]);
    }

    #[test]
    fn initial_values() {
        assert_eq!(initial_value(1), 10);
        assert_eq!(initial_value(20), 200);
    }
}
