//! Property-based tests for the wire layer.
//!
//! Uses proptest to verify:
//! 1. Credential decoding never panics and recovers the subject of any dev token.
//! 2. Canonical room names are symmetric in their participants and distinct
//!    for distinct pairs, including ids that contain `_` or `%`.
//! 3. Frame parsing never panics on arbitrary text and preserves message bodies.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use recipechat_proto::credential::{Credential, dev_token};
use recipechat_proto::message::{InboundFrame, OutboundFrame};
use recipechat_proto::room::RoomId;
use recipechat_proto::user::UserId;

/// Strategy for identifiers shaped like backend user ids.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-zA-Z0-9_%-]{1,24}".prop_map(UserId::new)
}

proptest! {
    #[test]
    fn arbitrary_tokens_never_panic(token in ".{0,256}") {
        let _ = Credential::new(token).subject();
    }

    #[test]
    fn dev_token_subject_round_trips(id in arb_user_id()) {
        let cred = dev_token(id.as_str());
        prop_assert_eq!(cred.subject().unwrap(), id);
    }

    #[test]
    fn room_names_are_symmetric(a in arb_user_id(), b in arb_user_id()) {
        prop_assert_eq!(RoomId::for_pair(&a, &b), RoomId::for_pair(&b, &a));
    }

    #[test]
    fn distinct_pairs_get_distinct_rooms(
        a in arb_user_id(),
        b in arb_user_id(),
        c in arb_user_id(),
        d in arb_user_id(),
    ) {
        let same_pair = (a == c && b == d) || (a == d && b == c);
        prop_assume!(!same_pair);
        prop_assert_ne!(RoomId::for_pair(&a, &b), RoomId::for_pair(&c, &d));
    }

    #[test]
    fn underscore_splits_never_collide(
        left in "[a-z]{1,6}",
        middle in "[a-z]{1,6}",
        right in "[a-z]{1,6}",
    ) {
        let joined_first = RoomId::for_pair(
            &UserId::new(format!("{left}_{middle}")),
            &UserId::new(right.clone()),
        );
        let joined_last = RoomId::for_pair(
            &UserId::new(left),
            &UserId::new(format!("{middle}_{right}")),
        );
        prop_assert_ne!(joined_first, joined_last);
    }

    #[test]
    fn arbitrary_frames_never_panic(text in ".{0,512}") {
        if let Ok(frame) = InboundFrame::parse(&text) {
            let _ = frame.into_message(Utc::now());
        }
    }

    #[test]
    fn stamped_frames_preserve_body(body in "\\PC{0,200}", sender in arb_user_id()) {
        let json = serde_json::json!({
            "message": body,
            "sender": sender.as_str(),
            "timestamp": "2024-05-01T12:00:00Z",
        })
        .to_string();
        let msg = InboundFrame::parse(&json).unwrap().into_message(Utc::now()).unwrap();
        prop_assert_eq!(msg.message, body);
        prop_assert_eq!(msg.sender, sender);
        prop_assert_eq!(msg.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn outbound_frames_parse_back_as_bodies(body in "\\PC{0,200}") {
        let json = OutboundFrame::new(body.clone()).to_json().unwrap();
        let back: OutboundFrame = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.message, body);
    }
}
