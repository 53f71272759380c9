//! Integration tests for grouping and drill-down.

mod common;

use archive_query::{ArchiveError, Filter, GroupField, GroupSort};
use common::{seeded, sorted_ids};
use std::collections::BTreeSet;

/// **Test:** Year grouping on the fixture.
/// **Setup:** Seeded archive.
/// **Expected:** Keys 2023 and 2024 whose counts sum to 9.
#[tokio::test]
async fn test_group_by_year() {
    let fx = seeded().await;
    let groups = fx
        .archive
        .messages()
        .group_by(GroupField::Year)
        .sort_by(GroupSort::Key, false)
        .groups()
        .await
        .unwrap();

    let keys: Vec<_> = groups.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys, ["2023", "2024"]);
    assert_eq!(groups[0].count, 5);
    assert_eq!(groups[1].count, 4);
    assert_eq!(groups.iter().map(|g| g.count).sum::<i64>(), 9);
}

/// **Test:** Partition law for the dimensions that partition messages.
/// **Setup:** Default alive-only query.
/// **Expected:** Group counts sum to the query count.
#[tokio::test]
async fn test_partition_law() {
    let fx = seeded().await;
    let base = fx.archive.messages();
    let total = base.count().await.unwrap();

    for field in [
        GroupField::Sender,
        GroupField::SenderName,
        GroupField::Domain,
        GroupField::Year,
        GroupField::Month,
        GroupField::Account,
    ] {
        let groups = base.group_by(field).groups().await.unwrap();
        assert_eq!(
            groups.iter().map(|g| g.count).sum::<i64>(),
            total,
            "field {field}"
        );
    }
}

/// **Test:** Drill-down round trip on every dimension.
/// **Setup:** Default query grouped by each field.
/// **Expected:** Each drill-down yields exactly the group's count, and the
/// union of drill-downs equals the base result set.
#[tokio::test]
async fn test_drill_down_matches_counts() {
    let fx = seeded().await;
    let base = fx.archive.messages();
    let base_ids: BTreeSet<i64> = base.ids().await.unwrap().into_iter().collect();

    for field in GroupField::ALL {
        let groups = base.group_by(field).groups().await.unwrap();
        let mut union = BTreeSet::new();
        for group in &groups {
            let drilled = group.messages().unwrap();
            let rows = drilled.fetch_all().await.unwrap();
            assert_eq!(
                rows.len() as i64,
                group.count,
                "field {field}, key {:?}",
                group.key
            );
            union.extend(rows.iter().map(|m| m.id));
        }
        assert_eq!(union, base_ids, "field {field}");
    }
}

/// **Test:** Default sort and per-group totals.
/// **Setup:** Group by sender.
/// **Expected:** Count descending with ties by key; alice totals 58400 bytes.
#[tokio::test]
async fn test_sender_groups_and_totals() {
    let fx = seeded().await;
    let groups = fx
        .archive
        .messages()
        .group_by(GroupField::Sender)
        .groups()
        .await
        .unwrap();

    let summary: Vec<_> = groups.iter().map(|g| (g.key.as_str(), g.count)).collect();
    assert_eq!(
        summary,
        [
            ("alice@example.com", 4),
            ("bob@example.com", 2),
            ("admin@example.com", 1),
            ("noreply@service.com", 1),
            ("test@gmail.com", 1),
        ]
    );
    assert_eq!(groups[0].total_size, 1500 + 52000 + 2100 + 2800);
}

/// **Test:** Group sort options.
/// **Setup:** Sender groups sorted by key and by total size.
/// **Expected:** Alphabetical and largest-first orders.
#[tokio::test]
async fn test_group_sorting() {
    let fx = seeded().await;
    let grouping = fx.archive.messages().group_by(GroupField::Sender);

    let by_key = grouping.sort_by(GroupSort::Key, false).groups().await.unwrap();
    assert_eq!(by_key[0].key, "admin@example.com");
    assert_eq!(by_key[4].key, "test@gmail.com");

    let by_size = grouping.sort_by(GroupSort::TotalSize, true).groups().await.unwrap();
    assert_eq!(by_size[0].key, "alice@example.com");
    assert_eq!(by_size[4].key, "noreply@service.com");

    assert!(matches!(
        "weight".parse::<GroupSort>(),
        Err(ArchiveError::InvalidField { .. })
    ));
    assert!(matches!(
        "weekday".parse::<GroupField>(),
        Err(ArchiveError::InvalidField { .. })
    ));
}

/// **Test:** Grouping respects the base query's filters.
/// **Setup:** First account only, grouped by year.
/// **Expected:** 4 in 2023, 3 in 2024; drill-down keeps the account filter.
#[tokio::test]
async fn test_grouping_filtered_base() {
    let fx = seeded().await;
    let base = fx
        .archive
        .messages()
        .filter([Filter::Account("test@gmail.com".into())])
        .unwrap();
    let before = base.to_statement();

    let groups = base
        .group_by(GroupField::Year)
        .sort_by(GroupSort::Key, false)
        .groups()
        .await
        .unwrap();
    assert_eq!(groups[0].count, 4);
    assert_eq!(groups[1].count, 3);
    assert_eq!(sorted_ids(&groups[1].messages().unwrap()).await, vec![6, 7, 9]);
    assert_eq!(base.to_statement(), before);
}

/// **Test:** Month keys, including December.
/// **Setup:** Group by month.
/// **Expected:** 2023-12 drills down to message 5 only; 2024-06 holds two.
#[tokio::test]
async fn test_month_groups() {
    let fx = seeded().await;
    let groups = fx
        .archive
        .messages()
        .group_by(GroupField::Month)
        .groups()
        .await
        .unwrap();

    let december = groups.iter().find(|g| g.key == "2023-12").expect("2023-12");
    assert_eq!(sorted_ids(&december.messages().unwrap()).await, vec![5]);

    let june = groups.iter().find(|g| g.key == "2024-06").expect("2024-06");
    assert_eq!(june.count, 2);
    assert_eq!(june.total_size, 4500 + 2800);
}

/// **Test:** Labels and recipients may count a message in several groups.
/// **Setup:** Group by label and by recipient.
/// **Expected:** Per-key counts from the fixture.
#[tokio::test]
async fn test_label_and_recipient_groups() {
    let fx = seeded().await;
    let base = fx.archive.messages();

    let labels = base.group_by(GroupField::Label).groups().await.unwrap();
    let summary: Vec<_> = labels.iter().map(|g| (g.key.as_str(), g.count)).collect();
    assert_eq!(summary, [("INBOX", 7), ("IMPORTANT", 2), ("SENT", 2)]);

    let recipients = base.group_by(GroupField::Recipient).groups().await.unwrap();
    let summary: Vec<_> = recipients.iter().map(|g| (g.key.as_str(), g.count)).collect();
    assert_eq!(
        summary,
        [
            ("test@gmail.com", 4),
            ("alice@example.com", 3),
            ("bob@example.com", 3),
            ("admin@example.com", 1),
        ]
    );
}

/// **Test:** Display names group and drill down by pattern.
/// **Setup:** noreply has no display name and falls back to its address.
/// **Expected:** Five groups; each drill-down matches.
#[tokio::test]
async fn test_sender_name_groups() {
    let fx = seeded().await;
    let groups = fx
        .archive
        .messages()
        .group_by(GroupField::SenderName)
        .sort_by(GroupSort::Key, false)
        .groups()
        .await
        .unwrap();

    let keys: Vec<_> = groups.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(
        keys,
        ["Admin", "Alice Smith", "Bob Jones", "Test User", "noreply@service.com"]
    );
    let alice = &groups[1];
    assert_eq!(sorted_ids(&alice.messages().unwrap()).await, vec![1, 4, 6, 9]);
}

/// **Test:** Messages without the dimension land in the empty-key group.
/// **Setup:** Add a message with no sender, account, date or labels.
/// **Expected:** One "" group per field whose drill-down finds it.
#[tokio::test]
async fn test_missing_values_form_empty_group() {
    let fx = seeded().await;
    fx.execute(
        "INSERT INTO messages (id, subject, size_estimate) VALUES (11, 'Orphan', 100)",
    )
    .await;
    let base = fx.archive.messages();
    assert_eq!(base.count().await.unwrap(), 10);

    for field in GroupField::ALL {
        let groups = base.group_by(field).groups().await.unwrap();
        let empty = groups
            .iter()
            .find(|g| g.key.is_empty())
            .unwrap_or_else(|| panic!("no empty group for {field}"));
        assert_eq!(empty.count, 1, "field {field}");
        assert_eq!(empty.total_size, 100);
        assert_eq!(sorted_ids(&empty.messages().unwrap()).await, vec![11]);
    }
}

/// **Test:** Grouping with deleted messages included.
/// **Setup:** is_deleted = None.
/// **Expected:** 2024 holds five messages.
#[tokio::test]
async fn test_grouping_including_deleted() {
    let fx = seeded().await;
    let groups = fx
        .archive
        .messages()
        .filter([Filter::IsDeleted(None)])
        .unwrap()
        .group_by(GroupField::Year)
        .groups()
        .await
        .unwrap();

    let y2024 = groups.iter().find(|g| g.key == "2024").unwrap();
    assert_eq!(y2024.count, 5);
    assert_eq!(sorted_ids(&y2024.messages().unwrap()).await, vec![6, 7, 8, 9, 10]);
}

/// **Test:** Display names differing only in case stay apart on drill-down.
/// **Setup:** Add sender "ALICE SMITH" with one message next to "Alice Smith".
/// **Expected:** Two groups; each drill-down returns only its own messages.
#[tokio::test]
async fn test_sender_name_drill_down_is_case_sensitive() {
    let fx = seeded().await;
    fx.execute(
        "INSERT INTO participants (id, email_address, display_name, domain) \
         VALUES (6, 'asmith@example.org', 'ALICE SMITH', 'example.org'); \
         INSERT INTO messages (id, source_id, sent_at, subject, sender_id, size_estimate) \
         VALUES (11, 1, '2024-07-01T12:00:00Z', 'Shouting', 6, 400)",
    )
    .await;

    let groups = fx
        .archive
        .messages()
        .group_by(GroupField::SenderName)
        .groups()
        .await
        .unwrap();

    let upper = groups.iter().find(|g| g.key == "ALICE SMITH").expect("upper-case group");
    let mixed = groups.iter().find(|g| g.key == "Alice Smith").expect("mixed-case group");
    assert_eq!(upper.count, 1);
    assert_eq!(mixed.count, 4);
    assert_eq!(sorted_ids(&upper.messages().unwrap()).await, vec![11]);
    assert_eq!(sorted_ids(&mixed.messages().unwrap()).await, vec![1, 4, 6, 9]);
}

/// **Test:** GLOB metacharacters in a display name match literally.
/// **Setup:** Sender named "Ops [bot]*" with one message.
/// **Expected:** Its drill-down finds exactly that message.
#[tokio::test]
async fn test_sender_name_with_pattern_characters() {
    let fx = seeded().await;
    fx.execute(
        "INSERT INTO participants (id, email_address, display_name, domain) \
         VALUES (6, 'ops@example.org', 'Ops [bot]*', 'example.org'); \
         INSERT INTO messages (id, source_id, sent_at, subject, sender_id, size_estimate) \
         VALUES (11, 1, '2024-07-01T12:00:00Z', 'Alert', 6, 400)",
    )
    .await;

    let groups = fx
        .archive
        .messages()
        .group_by(GroupField::SenderName)
        .groups()
        .await
        .unwrap();
    let ops = groups.iter().find(|g| g.key == "Ops [bot]*").expect("ops group");
    assert_eq!(sorted_ids(&ops.messages().unwrap()).await, vec![11]);
}
