// Property tests for consensus outcomes and snapshot rollback
use consim_core::demo::{register_demo_contracts, COUNTER, DISAGREE, PRICE_FEED};
use consim_core::*;
use proptest::prelude::*;
use serde_json::json;

const FEED_URL: &str = "https://feed.example.com/latest";

fn vm_with(validators: usize, max_rotations: u32, policy: RotationPolicy) -> Vm {
    let mut vm = Vm::new(SimConfig {
        validators,
        max_rotations,
        rotation_policy: policy,
        ..SimConfig::default()
    })
    .unwrap();
    register_demo_contracts(&mut vm);
    vm.set_sender(Address::from_seed("alice"));
    vm
}

fn policy() -> impl Strategy<Value = RotationPolicy> {
    prop_oneof![
        Just(RotationPolicy::ReExecute),
        Just(RotationPolicy::RoundRobin),
        Just(RotationPolicy::Seeded),
    ]
}

#[derive(Debug, Clone)]
enum Action {
    Add(i64),
    MockLlm(String),
    Prank(u8),
    Warp(u32),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (-5i64..50).prop_map(Action::Add),
        "[a-z]{1,8}".prop_map(Action::MockLlm),
        any::<u8>().prop_map(Action::Prank),
        (0u32..100_000).prop_map(Action::Warp),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn deterministic_mocks_finalize_in_first_round(
        validators in 1usize..=7,
        max_rotations in 0u32..4,
        policy in policy(),
        price in 0i64..1_000_000,
    ) {
        let mut vm = vm_with(validators, max_rotations, policy);
        vm.mock_web_exact(FEED_URL, WebResponse::json(&json!({ "price": price })));
        let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();

        let receipt = vm
            .submit(TransactionRequest::call(vm.sender(), feed, "update_price", vec![]))
            .unwrap();

        prop_assert_eq!(receipt.status, TxStatus::Finalized);
        prop_assert_eq!(receipt.consensus_data.rotations, 0);
        prop_assert_eq!(receipt.consensus_data.rounds.len(), 1);
        prop_assert_eq!(receipt.consensus_data.agree_count, receipt.consensus_data.votes.len());
        prop_assert_eq!(receipt.result, Some(json!(price)));
        prop_assert_eq!(vm.storage_get(&feed, "price").unwrap(), Some(json!(price)));
    }

    #[test]
    fn persistent_disagreement_exhausts_rotations(
        validators in 2usize..=6,
        max_rotations in 0u32..5,
        policy in policy(),
    ) {
        let mut vm = vm_with(validators, max_rotations, policy);
        let contract = vm.deploy(DISAGREE, &[]).unwrap();
        let root = vm.state_root();

        let receipt = vm
            .submit(TransactionRequest::call(vm.sender(), contract, "always_disagree", vec![]))
            .unwrap();

        prop_assert_eq!(receipt.status, TxStatus::Undetermined);
        prop_assert_eq!(receipt.consensus_data.rotations, max_rotations);
        prop_assert_eq!(receipt.consensus_data.rounds.len(), max_rotations as usize + 1);
        prop_assert_eq!(receipt.consensus_data.agree_count, 0);
        prop_assert_eq!(vm.state_root(), root);
        prop_assert!(receipt.triggered.is_empty());
    }

    #[test]
    fn revert_restores_exact_image(actions in prop::collection::vec(action(), 0..12)) {
        let mut vm = vm_with(3, 1, RotationPolicy::ReExecute);
        let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
        vm.mock_llm_contains("baseline", json!("ok"));

        let image = vm.state_image();
        let root = vm.state_root();
        let id = vm.snapshot();

        for action in &actions {
            match action {
                Action::Add(n) => {
                    // Negative amounts roll back; either outcome is fine here.
                    let _ = vm.call(counter, "add", &[json!(n)]);
                }
                Action::MockLlm(needle) => vm.mock_llm_contains(needle, json!(needle)),
                Action::Prank(seed) => vm.start_prank(Address::from_seed(&format!("user-{}", seed))),
                Action::Warp(secs) => {
                    let at = chrono::DateTime::from_timestamp(i64::from(*secs), 0).unwrap();
                    vm.ctx_mut().warp_to(at);
                }
            }
        }

        vm.revert(id).unwrap();
        prop_assert_eq!(vm.state_root(), root);
        prop_assert!(vm.state_image() == image);
        prop_assert_eq!(vm.sender(), Address::from_seed("alice"));
        prop_assert_eq!(vm.mock_count(), 1);
    }

    #[test]
    fn mock_resolution_is_idempotent(
        needles in prop::collection::vec("[a-z]{1,6}", 1..6),
        prompt in "[a-z ]{0,40}",
        node in 0usize..5,
    ) {
        let mut registry = MockRegistry::new();
        for (i, needle) in needles.iter().enumerate() {
            registry.register_llm(Pattern::contains(needle.clone()), json!(i), MockScope::All);
        }

        let expected = needles.iter().position(|n| prompt.contains(n.as_str())).map(|i| json!(i));
        for role in [NodeRole::Leader(node), NodeRole::Validator(node)] {
            prop_assert_eq!(registry.resolve_llm(&prompt, role), expected.clone());
            prop_assert_eq!(registry.resolve_llm(&prompt, role), expected.clone());
        }
    }
}
