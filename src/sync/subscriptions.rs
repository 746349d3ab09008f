// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet};

use crate::podcast::normalize_feed_url;

use super::SyncMode;
use super::remote::RemoteSubscriptions;
use super::tracker::ChangeSnapshot;

/// Everything the subscription reconciliation looks at
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionInput<'a> {
    /// Feed URLs currently subscribed on this device
    pub local: &'a BTreeSet<String>,
    /// Local changes since the last successful sync
    pub tracked: &'a ChangeSnapshot,
    pub remote: &'a RemoteSubscriptions,
    pub mode: SyncMode,
    /// No sync with this provider has ever completed
    pub first_sync: bool,
}

/// Actions that converge local and remote subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// New remote list, `None` when the remote is already up to date
    pub push: Option<BTreeSet<String>>,
    /// Feeds to subscribe locally, with the remote's display name
    pub add_locally: BTreeMap<String, Option<String>>,
    /// Feeds to unsubscribe locally
    pub remove_locally: BTreeSet<String>,
}

impl SubscriptionPlan {
    pub fn is_empty(&self) -> bool {
        self.push.is_none() && self.add_locally.is_empty() && self.remove_locally.is_empty()
    }
}

fn normalized<'a>(urls: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    urls.into_iter().map(|url| normalize_feed_url(url)).collect()
}

/// Compute the subscription list both sides should converge on
///
/// The desired list is the remote list plus local additions minus local
/// removals. On the first sync every local subscription counts as an
/// addition, so linking a provider never wipes existing subscriptions. An
/// id that is both added and removed counts as added.
///
/// The remote is only rewritten when it differs from the desired list, and
/// local changes are only planned in [`SyncMode::SendReceive`], so running
/// the reconciliation again after applying a plan yields an empty plan.
pub fn reconcile_subscriptions(input: SubscriptionInput<'_>) -> SubscriptionPlan {
    let local = normalized(input.local);
    let remote_names: BTreeMap<String, Option<String>> = input
        .remote
        .iter()
        .map(|(url, name)| (normalize_feed_url(url), name.clone()))
        .collect();
    let remote: BTreeSet<String> = remote_names.keys().cloned().collect();

    let mut added = normalized(&input.tracked.added);
    if input.first_sync {
        added.extend(local.iter().cloned());
    }
    let removed: BTreeSet<String> = normalized(&input.tracked.removed)
        .difference(&added)
        .cloned()
        .collect();

    let desired: BTreeSet<String> = remote
        .union(&added)
        .filter(|url| !removed.contains(*url))
        .cloned()
        .collect();

    let mut plan = SubscriptionPlan {
        push: (desired != remote).then(|| desired.clone()),
        ..Default::default()
    };

    if input.mode.receives() {
        plan.remove_locally = local.difference(&desired).cloned().collect();
        plan.add_locally = desired
            .difference(&local)
            .map(|url| (url.clone(), remote_names.get(url).cloned().flatten()))
            .collect();
    }

    plan
}
