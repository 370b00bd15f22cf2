//! Pre-built mock daemon states for collector tests.

use super::client::{MockClient, MockJail};
use crate::collector::traits::JailStats;

#[allow(dead_code)]
impl MockClient {
    /// Two jails; sshd reports one address twice.
    ///
    /// Jails: `sshd` (1.2.3.4 listed twice), `nginx` (5.6.7.8).
    pub fn typical() -> Self {
        Self::new()
            .with_jail(
                MockJail::new("sshd")
                    .with_stats(JailStats {
                        failed_current: 2,
                        failed_total: 40,
                        banned_current: 1,
                        banned_total: 9,
                    })
                    .with_banned(&["1.2.3.4", "1.2.3.4"]),
            )
            .with_jail(
                MockJail::new("nginx")
                    .with_stats(JailStats {
                        failed_current: 0,
                        failed_total: 3,
                        banned_current: 1,
                        banned_total: 1,
                    })
                    .with_banned(&["5.6.7.8"]),
            )
    }

    /// A daemon with `n` jails named `jail0..jailN`, each banning one address.
    pub fn with_jails(n: usize) -> Self {
        (0..n).fold(Self::new(), |client, i| {
            let address = format!("10.0.0.{}", i % 250);
            client.with_jail(MockJail::new(&format!("jail{}", i)).with_banned(&[address.as_str()]))
        })
    }
}
