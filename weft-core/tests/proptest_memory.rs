//! Property-based tests for weft core invariants.
//!
//! Uses `proptest` to check the memory window and guardrail contracts
//! against arbitrary input.

use std::sync::Arc;

use proptest::prelude::*;

use weft_core::guardrail::{Guardrail, Stage, evaluate};
use weft_core::types::{ChainInput, GuardrailResult, Role};
use weft_core::{BufferMemory, ContentFilterGuardrail, InputLengthGuardrail, Memory};

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(f)
}

// ---------------------------------------------------------------------------
// Property: BufferMemory keeps the most recent k pairs, in order
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn buffer_keeps_most_recent_pairs(
        max_entries in 1usize..8,
        turns in prop::collection::vec(("[a-z]{1,6}", "[a-z]{1,6}"), 0..30),
    ) {
        let memory = BufferMemory::new(max_entries);
        for (user, assistant) in &turns {
            memory.push_turn(user.clone(), assistant.clone());
        }

        let entries = memory.entries();
        prop_assert!(entries.len() <= 2 * max_entries);
        prop_assert_eq!(entries.len(), 2 * turns.len().min(max_entries));

        let expected = &turns[turns.len().saturating_sub(max_entries)..];
        for (pair, (user, assistant)) in entries.chunks(2).zip(expected) {
            prop_assert_eq!(pair[0].role, Role::User);
            prop_assert_eq!(&pair[0].content, user);
            prop_assert_eq!(pair[1].role, Role::Assistant);
            prop_assert_eq!(&pair[1].content, assistant);
        }
    }

    #[test]
    fn buffer_load_is_idempotent(
        turns in prop::collection::vec(("[a-z]{1,6}", "[a-z]{1,6}"), 0..10),
    ) {
        let memory = BufferMemory::new(4);
        for (user, assistant) in &turns {
            memory.push_turn(user.clone(), assistant.clone());
        }
        let input = ChainInput::default();
        let (first, second) = block_on(async {
            let first = memory.load(&input).await.expect("load");
            let second = memory.load(&input).await.expect("load");
            (first, second)
        });
        prop_assert_eq!(first, second);
    }
}

// ---------------------------------------------------------------------------
// Property: InputLengthGuardrail never lets more than max characters through
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn truncation_is_exact_prefix(text in "\\PC{0,40}", max in 1usize..20) {
        let guardrail = InputLengthGuardrail::new(max, true);
        match guardrail.check_input(&text) {
            GuardrailResult::Passed => prop_assert!(text.chars().count() <= max),
            GuardrailResult::Modified(short) => {
                prop_assert_eq!(short.chars().count(), max);
                prop_assert!(text.starts_with(&short));
            }
            GuardrailResult::Blocked(_) => prop_assert!(false, "truncating guardrail blocked"),
        }
    }

    #[test]
    fn refusing_length_guardrail_blocks_only_long_text(text in "\\PC{0,40}", max in 1usize..20) {
        let guardrail = InputLengthGuardrail::new(max, false);
        let blocked = guardrail.check_input(&text).is_blocked();
        prop_assert_eq!(blocked, text.chars().count() > max);
    }
}

// ---------------------------------------------------------------------------
// Property: ContentFilterGuardrail matches case-insensitively
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn filter_blocks_any_casing(prefix in "[a-z ]{0,10}", suffix in "[a-z ]{0,10}", upper in any::<bool>()) {
        let pattern = if upper { "PASSWORD" } else { "password" };
        let text = format!("{prefix}{pattern}{suffix}");
        let guardrail = ContentFilterGuardrail::new(["PassWord"]);
        prop_assert!(guardrail.check_input(&text).is_blocked());
    }

    #[test]
    fn pipeline_blocks_iff_some_guardrail_blocks(text in "[a-z ]{0,30}") {
        let guardrails: Vec<Arc<dyn Guardrail>> = vec![
            Arc::new(InputLengthGuardrail::new(10, true)),
            Arc::new(ContentFilterGuardrail::new(["xyz"])),
        ];
        let truncated: String = text.chars().take(10).collect();
        let outcome = evaluate(&guardrails, &text, Stage::Input);
        prop_assert_eq!(
            matches!(outcome, weft_core::GuardrailOutcome::Blocked { .. }),
            truncated.contains("xyz")
        );
    }
}
