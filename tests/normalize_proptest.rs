//! Property-based tests for the normalizer
//!
//! The normalizer sits in front of untrusted payloads: whatever JSON shape
//! arrives, it must produce a well-formed entity without panicking

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

use tidepool::clock::{Clock, ManualClock};
use tidepool::normalize;

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

/// Arbitrary shallow JSON values, including every scalar type in every slot
fn arb_value() -> impl Strategy<Value = Value> {
    let scalar = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
    ];
    prop_oneof![
        scalar.clone(),
        proptest::collection::vec(scalar.clone(), 0..4).prop_map(Value::from),
        proptest::collection::btree_map("[a-z_]{1,10}", scalar, 0..6)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

proptest! {
    #[test]
    fn test_user_normalizer_is_total(value in arb_value()) {
        let user = normalize::user(&value, clock().as_ref());
        // whatever came in, timestamps are concrete and strings owned
        prop_assert!(user.created_at <= user.updated_at || user.created_at > user.updated_at);
    }

    #[test]
    fn test_post_normalizer_is_total(value in arb_value()) {
        let post = normalize::post(&value, clock().as_ref());
        prop_assert!(post.reposted_by.is_empty() || !post.reposted_by.is_empty());
    }

    #[test]
    fn test_message_normalizer_marks_sender_read(from in "[a-z0-9]{1,6}") {
        let value = json!({ "id": "m1", "from_id": from.clone(), "to_id": "peer", "text": "hi" });
        let message = normalize::message(&value, clock().as_ref());
        prop_assert!(message.read_by.contains(&tidepool::EntityId::new(from)));
    }

    #[test]
    fn test_numeric_ids_stringify(id in any::<u32>()) {
        let value = json!({ "id": id, "username": "n" });
        let user = normalize::user(&value, clock().as_ref());
        prop_assert_eq!(user.id.as_str(), id.to_string());
    }

    #[test]
    fn test_follow_rejects_self_edges(id in "[a-z0-9]{1,6}") {
        let edge = json!({ "follower_id": id.clone(), "following_id": id });
        prop_assert!(normalize::follow(&edge).is_none());
    }

    #[test]
    fn test_casing_equivalence(id in "[a-z0-9]{1,6}", name in "[a-zA-Z]{0,10}") {
        let snake = json!({ "id": id.clone(), "display_name": name.clone() });
        let camel = json!({ "id": id, "displayName": name });
        let a = normalize::user(&snake, clock().as_ref());
        let b = normalize::user(&camel, clock().as_ref());
        prop_assert_eq!(a, b);
    }
}
