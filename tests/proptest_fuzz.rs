//! Property-based tests for the codec and the mailbox discipline.
//!
//! Uses proptest to generate random payloads and operation sequences and
//! verify the structural invariants hold: the codec never panics, mailbox
//! ids stay strictly increasing, capacity bounds hold after every push, and
//! pulls are idempotent.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;

use mirror_cache::{Mail, Mailbox, Record};

// =============================================================================
// Strategies
// =============================================================================

fn record_strategy() -> impl Strategy<Value = Record> {
    (0i64..=i64::MAX, prop::collection::vec(any::<u8>(), 0..512))
        .prop_map(|(rev, val)| Record { rev, val })
}

fn mailbox_strategy() -> impl Strategy<Value = Mailbox> {
    (0i64..10_000, prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..20))
        .prop_map(|(base, payloads)| {
            let que: Vec<Mail> = payloads
                .into_iter()
                .enumerate()
                .map(|(i, val)| Mail { id: base + i as i64 + 1, val })
                .collect();
            let seq = que.last().map_or(base, |m| m.id);
            Mailbox { seq, que }
        })
}

// =============================================================================
// Codec
// =============================================================================

proptest! {
    /// Records round-trip through the packed form.
    #[test]
    fn prop_record_roundtrip(record in record_strategy()) {
        let packed = record.pack().unwrap();
        let unpacked = Record::unpack(&packed).unwrap();
        prop_assert_eq!(record, unpacked);
    }

    /// Unpacking arbitrary bytes never panics, only errors.
    #[test]
    fn fuzz_record_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = Record::unpack(&bytes);
        let _ = Mailbox::unpack_or_default(&bytes);
    }

    /// Corrupting a packed record fails cleanly or decodes to something;
    /// it must never panic.
    #[test]
    fn fuzz_corrupted_record(
        record in record_strategy(),
        corruption in prop::collection::vec(any::<u8>(), 1..16),
        position in 0usize..4096,
    ) {
        let mut packed = record.pack().unwrap();
        if packed.is_empty() {
            return Ok(());
        }
        let pos = position % packed.len();
        for (i, b) in corruption.iter().enumerate() {
            let idx = (pos + i) % packed.len();
            packed[idx] ^= b;
        }
        let _ = Record::unpack(&packed);
    }

    /// Mailboxes round-trip through the packed form.
    #[test]
    fn prop_mailbox_roundtrip(mailbox in mailbox_strategy()) {
        let packed = mailbox.pack().unwrap();
        let unpacked = Mailbox::unpack_or_default(&packed).unwrap();
        prop_assert_eq!(mailbox, unpacked);
    }
}

// =============================================================================
// Mailbox discipline (model-checked against the memory backend)
// =============================================================================

use std::sync::Arc;

use mirror_cache::{CacheClient, MailClient, MemoryCache, MemoryDocStore, PushOptions};

fn mail_client() -> (MailClient, CacheClient) {
    let client =
        CacheClient::new(Arc::new(MemoryCache::new()), Arc::new(MemoryDocStore::new()));
    (MailClient::new(client.clone()), client)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Ids are strictly increasing across any push sequence, and the
    /// capacity bound holds after every push.
    #[test]
    fn prop_push_ids_increase_and_capacity_holds(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..40),
        capacity in 1u32..8,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            let (mail, _) = mail_client();
            let opts = PushOptions::default().capacity(capacity).ring();
            let mut last_id = 0;
            for payload in &payloads {
                let id = mail.push("box", payload, opts).await.unwrap();
                prop_assert!(id > last_id, "id {} did not advance past {}", id, last_id);
                last_id = id;

                let len = mail.list("box").await.unwrap().len();
                prop_assert!(len <= capacity as usize, "queue length {} over capacity {}", len, capacity);
            }
            Ok(())
        })?;
    }

    /// Pulling ids removes them exactly once: the first pull reports them,
    /// a repeat pull reports nothing, and survivors keep their order.
    #[test]
    fn prop_pull_is_idempotent(
        count in 1i64..30,
        pick in prop::collection::vec(1i64..30, 0..10),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            let (mail, _) = mail_client();
            for _ in 0..count {
                mail.push("box", b"m", PushOptions::default()).await.unwrap();
            }

            let pulled = mail.pull("box", &pick).await.unwrap();

            // Everything reported pulled was a live id, each at most once
            let mut seen = std::collections::HashSet::new();
            for id in &pulled {
                prop_assert!(*id >= 1 && *id <= count);
                prop_assert!(seen.insert(*id), "id {} reported twice", id);
            }

            // A second pull of the same ids finds nothing
            let again = mail.pull("box", &pick).await.unwrap();
            prop_assert!(again.is_empty(), "second pull returned {:?}", again);

            // Survivors stay sorted and disjoint from the pulled set
            let ids: Vec<i64> = mail.list("box").await.unwrap().iter().map(|m| m.id).collect();
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(ids.iter().all(|id| !seen.contains(id)));
            prop_assert_eq!(ids.len() as i64, count - pulled.len() as i64);
            Ok(())
        })?;
    }
}
