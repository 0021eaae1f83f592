//! Routing Path Property Tests
//!
//! Properties that must hold for any hop list: cursor movement is bounded
//! and monotonic, reverting is an involution on the hop order, and error
//! state survives encoding into a vehicle reply.

use cell_types::{CacheError, CellAddress, CellPath, VehicleState};
use proptest::prelude::*;

fn cell_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,12}"
}

fn address() -> impl Strategy<Value = CellAddress> {
    (cell_name(), prop::option::of(cell_name())).prop_map(|(cell, domain)| match domain {
        Some(domain) => CellAddress::new(cell, domain),
        None => CellAddress::local(cell),
    })
}

fn path() -> impl Strategy<Value = CellPath> {
    prop::collection::vec(address(), 1..8).prop_map(CellPath::from_hops)
}

proptest! {
    /// Property: the cursor moves exactly len - 1 times, then sticks
    #[test]
    fn advance_is_bounded(mut p in path()) {
        let len = p.len();
        let mut moves = 0;
        while p.advance() {
            moves += 1;
            prop_assert!(moves < len);
        }
        prop_assert_eq!(moves, len - 1);
        prop_assert!(p.is_final_destination());

        let before = p.clone();
        prop_assert!(!p.advance());
        prop_assert_eq!(p, before);
    }

    /// Property: each successful advance lands on the next hop
    #[test]
    fn advance_is_monotonic(mut p in path()) {
        let hops = p.hops().to_vec();
        let mut expected = 0;
        loop {
            prop_assert_eq!(p.position(), expected);
            prop_assert_eq!(p.current(), hops.get(expected));
            if !p.advance() {
                break;
            }
            expected += 1;
        }
    }

    /// Property: reverting twice restores the hop order
    #[test]
    fn revert_twice_restores_hops(p in path()) {
        let twice = p.revert().revert();
        prop_assert_eq!(twice.hops(), p.hops());
        prop_assert_eq!(twice.position(), 0);
    }

    /// Property: a parsed path prints back to the same hops
    #[test]
    fn parse_accepts_display_of_hops(p in path()) {
        let text = p
            .hops()
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(":");
        let parsed = CellPath::parse(&text).unwrap();
        prop_assert_eq!(parsed.hops(), p.hops());
    }

    /// Property: a domain error written into a vehicle reads back unchanged
    #[test]
    fn error_state_survives_reply_encoding(code in 1i32..20000, message in ".{0,40}") {
        let original = CacheError::new(code, message);
        let mut state = VehicleState::requiring_reply();
        state.set_failed(original.code(), original.message());

        let wire = serde_json::to_string(&state).unwrap();
        let decoded: VehicleState = serde_json::from_str(&wire).unwrap();

        prop_assert!(decoded.is_reply());
        prop_assert_eq!(decoded.error(), Some(original));
    }
}
