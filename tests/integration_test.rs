use std::sync::Arc;

use consim_core::demo::{register_demo_contracts, COUNTER, DISAGREE, FACTORY, ORACLE, PRICE_FEED, RECURSIVE, STORAGE};
use consim_core::demo::Oracle;
use consim_core::*;
use serde_json::{json, Value};

const FEED_URL: &str = "https://api.example.com/price";
const FEED_PATTERN: &str = "api\\.example\\.com/price";

fn alice() -> Address {
    Address::from_seed("alice")
}

fn bob() -> Address {
    Address::from_seed("bob")
}

fn setup(config: SimConfig) -> Vm {
    let mut vm = Vm::new(config).unwrap();
    register_demo_contracts(&mut vm);
    vm.set_sender(alice());
    vm
}

fn with_validators(validators: usize) -> SimConfig {
    SimConfig {
        validators,
        ..SimConfig::default()
    }
}

#[test]
fn test_counter_increment_finalizes_first_round() {
    let mut vm = setup(with_validators(3));
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();

    let receipt = vm
        .submit(TransactionRequest::call(alice(), counter, "increment", vec![]))
        .unwrap();

    assert_eq!(receipt.status, TxStatus::Finalized);
    assert_eq!(receipt.consensus_data.rotations, 0);
    assert_eq!(receipt.consensus_data.votes.len(), 3);
    assert_eq!(receipt.consensus_data.agree_count, 3);
    assert_eq!(receipt.result, Some(json!(1)));
    assert_eq!(vm.storage_get(&counter, "count").unwrap(), Some(json!(1)));

    println!("OK: Counter increment finalized in round 1");
}

#[test]
fn test_price_feed_finalizes_and_validator_detects_changed_price() {
    let mut vm = setup(with_validators(5));
    vm.mock_web(FEED_PATTERN, WebResponse::json(&json!({"price": 100}))).unwrap();
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();

    let receipt = vm
        .submit(TransactionRequest::call(alice(), feed, "update_price", vec![]))
        .unwrap();
    assert!(receipt.is_finalized());
    assert_eq!(receipt.consensus_data.agree_count, 5);
    assert_eq!(vm.storage_get(&feed, "price").unwrap(), Some(json!(100)));

    // Replaying against the same data agrees.
    assert!(vm.run_validator(None, None, None).unwrap());

    vm.clear_mocks();
    vm.mock_web(FEED_PATTERN, WebResponse::json(&json!({"price": 200}))).unwrap();
    assert!(!vm.run_validator(None, None, None).unwrap());
    assert!(vm.run_validator(None, Some(json!(200)), None).unwrap());

    println!("OK: Price feed finalized; changed data rejected by validator");
}

#[test]
fn test_mismatched_mocks_exhaust_rotations_without_writes() {
    let mut vm = setup(with_validators(3));
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    vm.register_web_mock(
        Pattern::regex(FEED_PATTERN).unwrap(),
        "GET",
        WebResponse::json(&json!({"price": 100})),
        MockScope::Leader,
    );
    vm.register_web_mock(
        Pattern::regex(FEED_PATTERN).unwrap(),
        "GET",
        WebResponse::json(&json!({"price": 200})),
        MockScope::Validators,
    );
    let root_before = vm.state_root();

    let receipt = vm
        .submit(TransactionRequest::call(alice(), feed, "update_price", vec![]).with_max_rotations(2))
        .unwrap();

    assert_eq!(receipt.status, TxStatus::Undetermined);
    assert_eq!(receipt.consensus_data.rotations, 2);
    assert_eq!(receipt.consensus_data.rounds.len(), 3);
    assert_eq!(vm.storage_get(&feed, "price").unwrap(), Some(serde_json::Value::Null));
    assert_eq!(vm.state_root(), root_before);

    let vote = &receipt.consensus_data.votes[1];
    assert_eq!(vote.vote, Vote::Disagree);
    let detail = vote.disagreement.as_ref().unwrap();
    assert_eq!(detail.record_index, 0);
    assert_eq!(detail.label, "fetch_price");
    assert_eq!(detail.reason, DisagreementReason::Rejected);

    println!("OK: Disagreement exhausted exactly 2 rotations");
}

#[test]
fn test_disagree_contract_leaves_storage_unchanged() {
    let mut vm = setup(with_validators(5));
    let contract = vm.deploy(DISAGREE, &[]).unwrap();

    let receipt = vm
        .submit(TransactionRequest::call(alice(), contract, "always_disagree", vec![]).with_max_rotations(1))
        .unwrap();

    assert_eq!(receipt.status, TxStatus::Undetermined);
    assert_eq!(receipt.consensus_data.rotations, 1);
    assert_eq!(receipt.consensus_data.agree_count, 0);
    assert_eq!(vm.storage_get(&contract, "value").unwrap(), Some(json!(0)));
    assert!(receipt.triggered.is_empty());
}

#[test]
fn test_factory_parent_and_child_storage_are_independent() {
    let mut vm = setup(with_validators(3));
    let factory = vm.deploy(FACTORY, &[json!(5)]).unwrap();

    let child: Address = vm
        .view(factory, "child", &[])
        .unwrap()
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_ne!(child, factory);
    assert_eq!(vm.contract(&child).unwrap().creator, factory);
    assert_eq!(vm.storage_get(&factory, "child_seen_at_deploy").unwrap(), Some(json!(5)));
    assert_eq!(vm.storage_get(&child, "count").unwrap(), Some(json!(5)));
    assert_eq!(vm.storage_get(&child, "own").unwrap(), None);
    assert_eq!(vm.storage_get(&factory, "count").unwrap(), None);

    vm.call(factory, "set_own", &[json!(9)]).unwrap();
    assert_eq!(vm.storage_get(&child, "count").unwrap(), Some(json!(5)));

    vm.call(factory, "bump_child", &[]).unwrap();
    assert_eq!(vm.storage_get(&child, "count").unwrap(), Some(json!(6)));
    assert_eq!(vm.storage_get(&factory, "own").unwrap(), Some(json!(9)));
    assert_eq!(
        vm.storage_get(&child, "last_caller").unwrap(),
        Some(json!(factory.to_hex()))
    );

    println!("OK: Factory and child storage are isolated");
}

#[test]
fn test_factory_deploy_through_consensus_reports_triggered_deploy() {
    let mut vm = setup(with_validators(3));
    let receipt = vm
        .submit(TransactionRequest::deploy(alice(), FACTORY, vec![json!(1)]))
        .unwrap();
    assert!(receipt.is_finalized());

    let factory: Address = receipt.result.as_ref().unwrap().as_str().unwrap().parse().unwrap();
    assert_eq!(vm.contract(&factory).unwrap().code_path, FACTORY);
    assert!(matches!(
        receipt.triggered.as_slice(),
        [TriggeredOp::Deploy { deployer, code_path, .. }] if *deployer == factory && code_path == COUNTER
    ));
}

#[test]
fn test_prank_restores_sender_on_error() {
    let mut vm = setup(SimConfig::default());
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    let before = vm.sender();

    let result = vm.prank(bob(), |vm| {
        assert_eq!(vm.sender(), bob());
        vm.call(counter, "add", &[json!(-1)])
    });
    assert!(result.is_err());
    assert_eq!(vm.sender(), before);
    assert_eq!(vm.ctx().prank_depth(), 0);

    vm.prank(bob(), |vm| vm.call(counter, "increment", &[])).unwrap();
    assert_eq!(vm.storage_get(&counter, "last_caller").unwrap(), Some(json!(bob().to_hex())));
    assert_eq!(vm.sender(), before);
}

#[test]
fn test_stop_prank_without_prank_is_error() {
    let mut vm = setup(SimConfig::default());
    assert!(matches!(vm.stop_prank(), Err(SimError::Context(_))));
    vm.start_prank(bob());
    assert_eq!(vm.stop_prank().unwrap(), bob());
}

#[test]
fn test_snapshot_revert_restores_everything() {
    let mut vm = setup(SimConfig::default());
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    vm.set_value(7);
    let id = vm.snapshot();
    let image = vm.state_image();

    vm.call(counter, "increment", &[]).unwrap();
    vm.deploy(COUNTER, &[json!(3)]).unwrap();
    vm.mock_llm_contains("anything", json!("x"));
    vm.start_prank(bob());
    vm.set_value(99);
    vm.warp("2031-05-06T07:08:09Z").unwrap();
    vm.deal(bob(), 1_000);
    let later = vm.snapshot();

    vm.revert(id).unwrap();
    assert_eq!(vm.state_image(), image);
    assert_eq!(vm.sender(), alice());
    assert_eq!(vm.ctx().value(), 7);
    assert_eq!(vm.balance(&bob()), 0);
    assert_eq!(vm.mock_count(), 0);

    assert_eq!(vm.revert(later), Err(SimError::SnapshotNotFound(later)));
    vm.call(counter, "increment", &[]).unwrap();
    vm.revert(id).unwrap();
    assert_eq!(vm.state_image(), image);
}

#[test]
fn test_failed_call_leaves_no_writes() {
    let mut vm = setup(SimConfig::default());
    let factory = vm.deploy(FACTORY, &[json!(0)]).unwrap();
    let root = vm.state_root();
    let err = vm.call(factory, "set_own", &[json!("not a number")]).unwrap_err();
    assert!(matches!(err, SimError::ContractLogic(_)));
    assert_eq!(vm.state_root(), root);
}

#[test]
fn test_view_discards_writes() {
    let mut vm = setup(SimConfig::default());
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    assert_eq!(vm.view(counter, "increment", &[]).unwrap(), json!(1));
    assert_eq!(vm.storage_get(&counter, "count").unwrap(), Some(json!(0)));
}

#[test]
fn test_post_is_fire_and_forget() {
    let mut vm = setup(SimConfig::default());
    let factory = vm.deploy(FACTORY, &[json!(0)]).unwrap();
    let child: Address = vm.view(factory, "child", &[]).unwrap().as_str().unwrap().parse().unwrap();

    assert_eq!(vm.call(factory, "notify_child", &[]).unwrap(), serde_json::Value::Null);
    assert_eq!(vm.storage_get(&child, "count").unwrap(), Some(json!(1)));
    assert_eq!(vm.triggered_ops().len(), 1);

    // Missing targets are ignored and failing posts are swallowed; later posts still run.
    vm.clear_traces();
    vm.call(factory, "notify_missing", &[]).unwrap();
    assert_eq!(vm.storage_get(&child, "count").unwrap(), Some(json!(2)));
    assert!(vm.traces().iter().any(|t| t.contains("missing contract")));
    assert!(vm.traces().iter().any(|t| t.contains("failed")));
}

#[test]
fn test_recursion_limit() {
    let mut vm = setup(SimConfig {
        max_call_depth: 8,
        ..SimConfig::default()
    });
    let contract = vm.deploy(RECURSIVE, &[]).unwrap();

    assert_eq!(vm.call(contract, "recurse", &[json!(3)]).unwrap(), json!(3));

    let root = vm.state_root();
    let err = vm.call(contract, "recurse", &[json!(20)]).unwrap_err();
    assert_eq!(err, SimError::RecursionLimit { depth: 9, limit: 8 });
    assert_eq!(vm.state_root(), root);

    let err = vm
        .submit(TransactionRequest::call(alice(), contract, "recurse", vec![json!(20)]))
        .unwrap_err();
    assert!(matches!(err, SimError::RecursionLimit { .. }));
}

const RELAY: &str = "contracts/relay.rs";

/// Contract that ignores the errors of its own nested calls.
struct Relay;

impl Contract for Relay {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Relay".to_string(),
            ctor_params: vec![],
            methods: vec![
                MethodSchema::write("swallow", &[]),
                MethodSchema::write("post_then_fail", &["target"]),
                MethodSchema::write("call_ignoring", &["target"]),
            ],
        }
    }

    fn construct(&self, _rt: &mut Runtime<'_>, _args: &[Value]) -> Result<()> {
        Ok(())
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value> {
        let me = rt.address();
        match method {
            "swallow" => {
                let _ = rt.call_contract(me, "swallow", &[]);
                rt.set("reached", json!(true))?;
                Ok(Value::Null)
            }
            "post_then_fail" => {
                let target: Address = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| SimError::rollback("missing target"))?
                    .parse()?;
                rt.post_message(target, "increment", vec![]);
                Err(SimError::rollback("callee gave up"))
            }
            "call_ignoring" => {
                let _ = rt.call_contract(me, "post_then_fail", args);
                rt.set("recovered", json!(true))?;
                Ok(Value::Null)
            }
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

fn setup_relay(config: SimConfig) -> (Vm, Address) {
    let mut vm = setup(config);
    vm.register_code(RELAY, Arc::new(Relay));
    let relay = vm.deploy(RELAY, &[]).unwrap();
    (vm, relay)
}

#[test]
fn test_discarded_recursion_limit_still_fails_transaction() {
    let (mut vm, relay) = setup_relay(SimConfig {
        max_call_depth: 4,
        ..SimConfig::default()
    });
    let root = vm.state_root();

    let err = vm.call(relay, "swallow", &[]).unwrap_err();
    assert_eq!(err, SimError::RecursionLimit { depth: 5, limit: 4 });
    assert_eq!(vm.state_root(), root);
    assert_eq!(vm.storage_get(&relay, "reached").unwrap(), None);

    let err = vm
        .submit(TransactionRequest::call(alice(), relay, "swallow", vec![]))
        .unwrap_err();
    assert!(matches!(err, SimError::RecursionLimit { .. }));
    assert_eq!(vm.state_root(), root);
    assert!(vm.transaction_hashes().is_empty());

    // The next call starts clean.
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    assert_eq!(vm.call(counter, "increment", &[]).unwrap(), json!(1));

    println!("OK: Swallowed recursion limit aborts the transaction");
}

#[test]
fn test_failed_callee_posts_are_discarded() {
    let (mut vm, relay) = setup_relay(SimConfig::default());
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();

    vm.call(relay, "call_ignoring", &[json!(counter.to_hex())]).unwrap();
    assert_eq!(vm.storage_get(&relay, "recovered").unwrap(), Some(json!(true)));
    assert_eq!(vm.storage_get(&counter, "count").unwrap(), Some(json!(0)));
    assert!(vm.triggered_ops().is_empty());

    let receipt = vm
        .submit(TransactionRequest::call(alice(), relay, "call_ignoring", vec![json!(counter.to_hex())]))
        .unwrap();
    assert!(receipt.is_finalized());
    assert!(receipt.triggered.is_empty());
    assert_eq!(vm.storage_get(&counter, "count").unwrap(), Some(json!(0)));

    println!("OK: Posts queued by a failed callee are never delivered");
}

#[test]
fn test_view_keeps_captured_records_for_run_validator() {
    let mut vm = setup(with_validators(3));
    vm.mock_web(FEED_PATTERN, WebResponse::json(&json!({"price": 100}))).unwrap();
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();

    vm.submit(TransactionRequest::call(alice(), feed, "update_price", vec![]))
        .unwrap();
    assert_eq!(vm.records().len(), 1);

    assert_eq!(vm.view(feed, "get_price", &[]).unwrap(), json!(100));
    assert_eq!(vm.records().len(), 1);
    assert!(vm.run_validator(None, None, None).unwrap());

    println!("OK: run_validator works after a view");
}

#[test]
fn test_missing_mock_lists_registered_patterns() {
    let mut vm = setup(SimConfig::default());
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    vm.mock_web("other\\.com", WebResponse::ok("{}")).unwrap();

    let err = vm.call(feed, "update_price", &[]).unwrap_err();
    let text = err.to_string();
    assert!(text.contains(FEED_URL));
    assert!(text.contains("GET regex:other\\.com"));
}

#[test]
fn test_falsy_mock_response_is_valid() {
    let mut vm = setup(SimConfig::default());
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    vm.mock_web_exact(FEED_URL, WebResponse::json(&json!({"price": 0})));
    assert_eq!(vm.call(feed, "update_price", &[]).unwrap(), json!(0));
}

#[test]
fn test_exact_and_regex_precedence_is_registration_order() {
    let mut vm = setup(SimConfig::default());
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    vm.mock_web(FEED_PATTERN, WebResponse::json(&json!({"price": 1}))).unwrap();
    vm.mock_web_exact(FEED_URL, WebResponse::json(&json!({"price": 2})));
    assert_eq!(vm.call(feed, "update_price", &[]).unwrap(), json!(1));
}

#[test]
fn test_strict_mocks_report_unused() {
    let mut vm = setup(SimConfig {
        strict_mocks: true,
        validators: 3,
        ..SimConfig::default()
    });
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    vm.mock_web(FEED_PATTERN, WebResponse::json(&json!({"price": 100}))).unwrap();
    vm.mock_llm_contains("never asked", json!("unused"));

    let receipt = vm
        .submit(TransactionRequest::call(alice(), feed, "update_price", vec![]))
        .unwrap();
    assert!(receipt.is_finalized());
    assert_eq!(receipt.warnings.len(), 1);
    assert!(receipt.warnings[0].contains("contains:never asked"));

    assert_eq!(vm.unused_mocks(), vec!["llm contains:never asked".to_string()]);
    assert_eq!(vm.clear_mocks(), vec!["llm contains:never asked".to_string()]);
    assert_eq!(vm.mock_count(), 0);
}

#[test]
fn test_round_robin_rotates_past_faulty_node() {
    let mut vm = setup(SimConfig {
        validators: 3,
        max_rotations: 2,
        rotation_policy: RotationPolicy::RoundRobin,
        ..SimConfig::default()
    });
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    vm.register_web_mock(
        Pattern::regex(FEED_PATTERN).unwrap(),
        "GET",
        WebResponse::json(&json!({"price": 999})),
        MockScope::Node(0),
    );
    vm.mock_web(FEED_PATTERN, WebResponse::json(&json!({"price": 100}))).unwrap();

    let receipt = vm
        .submit(TransactionRequest::call(alice(), feed, "update_price", vec![]))
        .unwrap();

    assert!(receipt.is_finalized());
    assert_eq!(receipt.consensus_data.rotations, 1);
    assert_eq!(receipt.consensus_data.rounds[0].leader, "validator-0");
    assert_eq!(receipt.consensus_data.rounds[0].agree, 1);
    assert_eq!(receipt.consensus_data.rounds[1].leader, "validator-1");
    assert_eq!(receipt.consensus_data.agree_count, 2);
    assert_eq!(vm.storage_get(&feed, "price").unwrap(), Some(json!(100)));
}

#[test]
fn test_transaction_mock_config_is_scoped_to_transaction() {
    let mut vm = setup(with_validators(3));
    let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)]).unwrap();
    let mocks: MockConfig = serde_json::from_value(json!({
        "web": [{"pattern": FEED_URL, "exact": true, "response": {"body": "{\"price\": 42}"}}]
    }))
    .unwrap();

    let receipt = vm
        .submit(TransactionRequest::call(alice(), feed, "update_price", vec![]).with_mocks(mocks))
        .unwrap();
    assert!(receipt.is_finalized());
    assert_eq!(receipt.result, Some(json!(42)));
    assert_eq!(vm.mock_count(), 0);
}

#[test]
fn test_oracle_non_comparative_validation() {
    let mut vm = setup(with_validators(3));
    let oracle = vm.deploy(ORACLE, &[]).unwrap();

    vm.mock_llm_contains("capital of France", json!({"answer": "Paris"}));
    let receipt = vm
        .submit(TransactionRequest::call(alice(), oracle, "ask", vec![json!("capital of France")]))
        .unwrap();
    assert!(receipt.is_finalized());
    assert_eq!(vm.storage_get(&oracle, "answer").unwrap(), Some(json!({"answer": "Paris"})));

    vm.clear_mocks();
    vm.mock_llm_contains("capital of Spain", json!({"answer": 3}));
    let receipt = vm
        .submit(
            TransactionRequest::call(alice(), oracle, "ask", vec![json!("capital of Spain")]).with_max_rotations(0),
        )
        .unwrap();
    assert_eq!(receipt.status, TxStatus::Undetermined);
    assert_eq!(receipt.consensus_data.rotations, 0);
}

#[test]
fn test_contract_reads_bundled_files() {
    let mut vm = setup(SimConfig::default());
    let files = MemoryFs::new().with_file("templates/ask.txt", "Q: {question}\n");
    vm.register_code_with_fs(ORACLE, Arc::new(Oracle), Arc::new(files));
    let oracle = vm.deploy(ORACLE, &[]).unwrap();

    vm.call(oracle, "load_template", &[]).unwrap();
    assert_eq!(vm.storage_get(&oracle, "template").unwrap(), Some(json!("Q: {question}")));

    vm.mock_llm("^Q: capital", json!("{\"answer\": \"Rome\"}")).unwrap();
    assert_eq!(vm.call(oracle, "ask", &[json!("capital of Italy")]).unwrap(), json!({"answer": "Rome"}));
}

#[test]
fn test_message_view_follows_context() {
    let mut vm = setup(SimConfig::default());
    let storage = vm.deploy(STORAGE, &[json!("init")]).unwrap();
    vm.warp("2030-01-01T00:00:00Z").unwrap();
    vm.set_value(5);

    let stamp = vm.call(storage, "stamp", &[]).unwrap();
    assert_eq!(stamp["sender"], json!(alice().to_hex()));
    assert_eq!(stamp["origin"], json!(alice().to_hex()));
    assert_eq!(stamp["value"], json!("5"));
    assert_eq!(stamp["chain_id"], json!(61999));
    assert_eq!(stamp["datetime"], json!("2030-01-01T00:00:00Z"));

    let stamp = vm.prank(bob(), |vm| vm.call(storage, "stamp", &[])).unwrap();
    assert_eq!(stamp["sender"], json!(bob().to_hex()));
}

#[test]
fn test_expect_revert() {
    let mut vm = setup(SimConfig::default());
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();

    let err = vm
        .expect_revert(Some("non-negative"), |vm| vm.call(counter, "add", &[json!(-1)]))
        .unwrap();
    assert!(matches!(err, SimError::ContractLogic(_)));

    let err = vm.expect_revert(None, |vm| vm.call(counter, "increment", &[])).unwrap_err();
    assert_eq!(err, SimError::ExpectedRevert(None));

    assert!(vm
        .expect_revert(Some("something else"), |vm| vm.call(counter, "add", &[json!(-1)]))
        .is_err());
}

#[test]
fn test_unknown_method_is_leader_error() {
    let mut vm = setup(with_validators(3));
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    assert_eq!(
        vm.call(counter, "nope", &[]).unwrap_err(),
        SimError::MethodNotFound("nope".to_string())
    );

    let receipt = vm
        .submit(TransactionRequest::call(alice(), counter, "nope", vec![]))
        .unwrap();
    assert!(receipt.is_finalized());
    assert!(receipt.result.is_none());
    assert!(receipt.error.unwrap().contains("nope"));
}

#[test]
fn test_transaction_log_and_block_numbers() {
    let mut vm = setup(with_validators(1));
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    let first = vm
        .submit(TransactionRequest::call(alice(), counter, "increment", vec![]))
        .unwrap();
    let second = vm
        .submit(TransactionRequest::call(alice(), counter, "increment", vec![]))
        .unwrap();

    assert_ne!(first.hash, second.hash);
    assert_eq!(first.block_number, 1);
    assert_eq!(second.block_number, 2);
    assert_eq!(vm.block_number(), 2);
    assert_eq!(vm.transaction(&first.hash), Some(&first));
    assert_eq!(vm.transaction_hashes(), &[first.hash.clone(), second.hash.clone()]);
    assert!(!second.consensus_data.rounds[0].validated);
}

#[test]
fn test_export_import_round_trip() {
    let mut vm = setup(SimConfig::default());
    let counter = vm.deploy(COUNTER, &[json!(0)]).unwrap();
    vm.call(counter, "increment", &[]).unwrap();
    vm.deal(bob(), 500);
    let exported = vm.export_state().unwrap();

    let mut restored = setup(SimConfig::default());
    restored.import_state(&exported).unwrap();
    assert_eq!(restored.state_root(), vm.state_root());
    assert_eq!(restored.balance(&bob()), 500);
    assert_eq!(restored.call(counter, "increment", &[]).unwrap(), json!(2));

    let mut bare = Vm::new(SimConfig::default()).unwrap();
    assert_eq!(
        bare.import_state(&exported),
        Err(SimError::CodeNotFound(COUNTER.to_string()))
    );
}

#[test]
fn test_evicted_code_cannot_be_deployed() {
    let mut vm = setup(SimConfig::default());
    assert!(vm.evict_code("./contracts/counter.rs"));
    assert_eq!(
        vm.deploy(COUNTER, &[]).unwrap_err(),
        SimError::CodeNotFound(COUNTER.to_string())
    );
}
