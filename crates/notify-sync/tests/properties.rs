//! Property tests for merge, reconciliation and subscription ref-counting

use notify_model::{Notification, RecipientRole, SourceKind};
use notify_sync::aggregator::{merge_sources, resolve_source};
use notify_sync::multiplexer::ChangeCallback;
use notify_sync::{merge_read_state, AckSet, InMemoryRemoteStore, Query, SubscriptionMultiplexer, SubscriptionState};
use notify_test_utils::{club_doc, legacy_doc, nid, read, COLLECTION};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn club_list(ids: &[u8], source: SourceKind) -> Vec<Notification> {
    let docs: Vec<_> = ids
        .iter()
        .map(|i| {
            let id = format!("n{i}");
            match source {
                SourceKind::RoleScoped => club_doc(&id, "c1", i64::from(*i)),
                SourceKind::LegacyFallback => legacy_doc(&id, "c1", i64::from(*i)),
            }
        })
        .collect();
    resolve_source(&docs, source, RecipientRole::Club, COLLECTION)
}

fn dedup(ids: Vec<u8>) -> Vec<u8> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|i| seen.insert(*i)).collect()
}

proptest! {
    #[test]
    fn read_never_regresses_under_larger_ack_sets(
        remote_read in prop::collection::vec(any::<bool>(), 1..30),
        acked in prop::collection::vec(any::<bool>(), 1..30),
        extra in prop::collection::vec(any::<bool>(), 1..30),
    ) {
        let docs: Vec<_> = remote_read
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let doc = club_doc(&format!("n{i}"), "c1", i as i64);
                if *r { read(doc) } else { doc }
            })
            .collect();
        let list = resolve_source(&docs, SourceKind::RoleScoped, RecipientRole::Club, COLLECTION);

        let base: AckSet = acked
            .iter()
            .enumerate()
            .filter(|(_, a)| **a)
            .map(|(i, _)| nid(&format!("n{i}")))
            .collect();
        let superset: AckSet = base.union(
            &extra
                .iter()
                .enumerate()
                .filter(|(_, a)| **a)
                .map(|(i, _)| nid(&format!("n{i}")))
                .collect(),
        );

        let first = merge_read_state(list.clone(), &base);
        let again = merge_read_state(first.clone(), &superset);
        for (before, after) in first.iter().zip(&again) {
            prop_assert!(!before.read || after.read, "{} regressed", before.id);
        }
        for (n, r) in first.iter().zip(&remote_read) {
            prop_assert_eq!(n.read, *r || base.contains(&n.id));
        }
    }

    #[test]
    fn merge_keeps_one_entry_per_id(
        a in prop::collection::vec(0u8..60, 0..40),
        b in prop::collection::vec(0u8..60, 0..40),
    ) {
        let (a, b) = (dedup(a), dedup(b));
        let union: HashSet<u8> = a.iter().chain(&b).copied().collect();

        let merged = merge_sources(
            club_list(&a, SourceKind::RoleScoped),
            club_list(&b, SourceKind::LegacyFallback),
            usize::MAX,
        );
        prop_assert_eq!(merged.len(), union.len());

        let ids: HashSet<_> = merged.iter().map(|n| n.id.clone()).collect();
        prop_assert_eq!(ids.len(), merged.len());

        let primary: HashSet<u8> = a.iter().copied().collect();
        for n in &merged {
            let raw: u8 = n.id.as_str()[1..].parse().unwrap();
            // role-scoped copy wins every collision
            prop_assert_eq!(n.is_legacy(), !primary.contains(&raw));
        }
        prop_assert!(merged.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn interleaved_listeners_share_one_subscription(
        k in 1usize..16,
        choices in prop::collection::vec(any::<(bool, u8)>(), 0..64),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _entered = runtime.enter();

        let remote = InMemoryRemoteStore::new();
        let mux = SubscriptionMultiplexer::new(Arc::new(remote.clone()));
        let query = Query::new(COLLECTION).where_eq("recipientId", "c1");
        let signature = query.signature();
        let callback: ChangeCallback = Arc::new(|_| {});

        let mut live = Vec::new();
        let (mut adds, mut removes) = (0, 0);
        let mut steps = choices.into_iter();
        while adds < k || removes < k - 1 {
            let (want_add, pick) = steps.next().unwrap_or((adds < k, 0));
            let can_add = adds < k;
            let can_remove = removes < k - 1 && live.len() > 1;
            if (want_add && can_add) || (can_add && !can_remove) {
                let q = query.clone();
                live.push(mux.add_listener(&signature, callback.clone(), move || q).unwrap());
                adds += 1;
            } else if can_remove {
                let id = live.swap_remove(usize::from(pick) % live.len());
                prop_assert!(mux.remove_listener(&signature, id));
                removes += 1;
            }
        }

        prop_assert_eq!(live.len(), 1);
        prop_assert_eq!(remote.subscribe_calls(), 1);
        prop_assert_eq!(remote.cancel_calls(), 0);

        prop_assert!(mux.remove_listener(&signature, live[0]));
        prop_assert_eq!(remote.cancel_calls(), 1);
        prop_assert_eq!(remote.live_subscriptions(), 0);
        prop_assert_eq!(mux.state(&signature), SubscriptionState::Idle);
    }
}
