//! Cleanup order used when the transactional backend runs out of quota

use crate::config::RetentionLimits;
use quotevault_core::StoreName;

/// Stores to trim and how many rows each keeps, in priority order. The store
/// whose write hit the quota keeps half its usual count.
pub(crate) fn cascade(limits: RetentionLimits, trigger: StoreName) -> [(StoreName, usize); 3] {
    let keep = |store: StoreName, normal: usize| {
        if store == trigger {
            (store, normal / 2)
        } else {
            (store, normal)
        }
    };
    [
        keep(StoreName::History, limits.history),
        keep(StoreName::Quotes, limits.quotes),
        keep(StoreName::Components, limits.components),
    ]
}
