//! Named native constants for the termios backend.
//!
//! The symbolic baud-rate constants (`B9600`, `B115200`, ...) differ between
//! libc flavours and kernel versions, and not every symbol exists on every
//! target. They are gathered once into a [`ConstantTable`] keyed by symbol
//! name; the backend only ever looks symbols up by name.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Nominal rate of every baud symbol the backend knows about, ascending.
///
/// Only the subset present in the host [`ConstantTable`] is ever offered to
/// [`nearest_rate`].
pub const BAUD_SYMBOLS: &[(u32, &str)] = &[
    (0, "B0"),
    (50, "B50"),
    (75, "B75"),
    (110, "B110"),
    (134, "B134"),
    (150, "B150"),
    (200, "B200"),
    (300, "B300"),
    (600, "B600"),
    (1200, "B1200"),
    (1800, "B1800"),
    (2400, "B2400"),
    (4800, "B4800"),
    (7200, "B7200"),
    (9600, "B9600"),
    (14400, "B14400"),
    (19200, "B19200"),
    (28800, "B28800"),
    (38400, "B38400"),
    (57600, "B57600"),
    (76800, "B76800"),
    (115200, "B115200"),
    (230400, "B230400"),
    (460800, "B460800"),
    (500000, "B500000"),
    (576000, "B576000"),
    (921600, "B921600"),
    (1000000, "B1000000"),
    (1152000, "B1152000"),
    (1500000, "B1500000"),
    (2000000, "B2000000"),
    (2500000, "B2500000"),
    (3000000, "B3000000"),
    (3500000, "B3500000"),
    (4000000, "B4000000"),
];

/// Lookup table from native symbol name to its integer value.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    values: HashMap<&'static str, u64>,
}

macro_rules! host_symbols {
    ($table:ident; $($name:ident),* $(,)?) => {
        $( $table.insert(stringify!($name), u64::from(libc::$name)); )*
    };
}

impl ConstantTable {
    /// Build a table from explicit `(symbol, value)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (&'static str, u64)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .collect(),
        }
    }

    /// Constants of the host libc, populated on first use.
    pub fn host() -> &'static Self {
        static HOST: OnceLock<ConstantTable> = OnceLock::new();
        HOST.get_or_init(|| {
            let mut table = Self::default();
            table.load_host_symbols();
            table
        })
    }

    fn insert(&mut self, name: &'static str, value: u64) {
        self.values
            .insert(name, value);
    }

    fn load_host_symbols(&mut self) {
        let table = self;
        host_symbols!(table;
            B0, B50, B75, B110, B134, B150, B200, B300, B600, B1200, B1800,
            B2400, B4800, B9600, B19200, B38400, B57600, B115200, B230400,
        );
        #[cfg(any(target_os = "linux", target_os = "android"))]
        host_symbols!(table;
            B460800, B500000, B576000, B921600, B1000000, B1152000, B1500000,
            B2000000, B2500000, B3000000, B3500000, B4000000,
        );
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        host_symbols!(table; B7200, B14400, B28800, B76800);
    }

    /// Value of `name`, if the host defines it.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values
            .get(name)
            .copied()
    }

    /// Value of `name`, or [`Error::NotSupported`] if the host lacks it.
    pub fn require(&self, name: &str) -> Result<u64> {
        self.get(name)
            .ok_or_else(|| Error::NotSupported(format!("{name} is not defined on this host")))
    }

    /// `(rate, native value)` for every baud symbol the table defines, ascending by rate.
    pub fn baud_rates(&self) -> Vec<(u32, u64)> {
        BAUD_SYMBOLS
            .iter()
            .filter_map(|&(rate, name)| {
                self.get(name)
                    .map(|value| (rate, value))
            })
            .collect()
    }
}

/// Entry of `rates` whose rate is closest to `requested`.
///
/// `rates` must be sorted ascending by rate. On a tie the lower rate wins,
/// because a later candidate has to be strictly closer to replace the best.
pub fn nearest_rate(rates: &[(u32, u64)], requested: u32) -> Option<(u32, u64)> {
    let mut best: Option<(u32, u64)> = None;
    let mut best_diff = u32::MAX;
    for &(rate, value) in rates {
        let diff = rate.abs_diff(requested);
        if best.is_none() || diff < best_diff {
            best = Some((rate, value));
            best_diff = diff;
        }
    }
    best
}

/// Nominal rate for a native speed value, if it is one of `rates`.
pub fn rate_for_value(rates: &[(u32, u64)], value: u64) -> Option<u32> {
    rates
        .iter()
        .find(|&&(_, v)| v == value)
        .map(|&(rate, _)| rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Linux-style encoding: values are opaque codes, not rates.
    fn linux_like() -> ConstantTable {
        ConstantTable::from_pairs([
            ("B0", 0o0),
            ("B9600", 0o15),
            ("B19200", 0o16),
            ("B38400", 0o17),
            ("B57600", 0o10001),
            ("B115200", 0o10002),
            ("B230400", 0o10003),
        ])
    }

    #[test]
    fn test_nearest_rate_exact_match() {
        let rates = linux_like().baud_rates();
        assert_eq!(nearest_rate(&rates, 115200), Some((115200, 0o10002)));
    }

    #[test]
    fn test_nearest_rate_picks_minimum_difference_not_first_match() {
        let rates = linux_like().baud_rates();
        // 100000 is 15200 from 115200 and 42400 from 57600.
        assert_eq!(nearest_rate(&rates, 100000), Some((115200, 0o10002)));
        assert_eq!(nearest_rate(&rates, 200000), Some((230400, 0o10003)));
        assert_eq!(nearest_rate(&rates, 10_000_000), Some((230400, 0o10003)));
    }

    #[test]
    fn test_nearest_rate_tie_resolves_to_lower() {
        let rates = linux_like().baud_rates();
        // 14400 sits exactly between 9600 and 19200.
        assert_eq!(nearest_rate(&rates, 14400), Some((9600, 0o15)));
        // 86400 sits exactly between 57600 and 115200.
        assert_eq!(nearest_rate(&rates, 86400), Some((57600, 0o10001)));
    }

    #[test]
    fn test_nearest_rate_empty_table() {
        assert_eq!(nearest_rate(&[], 9600), None);
    }

    #[test]
    fn test_rate_for_value_reverse_lookup() {
        let rates = linux_like().baud_rates();
        assert_eq!(rate_for_value(&rates, 0o16), Some(19200));
        assert_eq!(rate_for_value(&rates, 0o7777), None);
    }

    #[test]
    fn test_require_reports_missing_symbols() {
        let table = linux_like();
        assert_eq!(table.require("B9600").ok(), Some(0o15));
        assert!(matches!(table.require("B7200"), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_host_table_has_common_rates() {
        let table = ConstantTable::host();
        for name in ["B0", "B9600", "B19200", "B38400", "B57600", "B115200"] {
            assert!(table.get(name).is_some(), "{name} missing from host table");
        }
        let rates = table.baud_rates();
        assert!(rates.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
