use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use consim_core::demo::{register_demo_contracts, COUNTER, DISAGREE, FACTORY, PRICE_FEED};
use consim_core::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "consim-cli")]
#[command(about = "Consensus simulator CLI - runs sample transactions through leader/validator consensus")]
#[command(version)]
struct Cli {
    /// JSON config file (fields not given fall back to defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in scenario and print the transaction receipt
    Scenario {
        #[arg(value_enum)]
        name: ScenarioName,

        /// Number of validators (overrides config)
        #[arg(short, long)]
        validators: Option<usize>,

        /// Maximum leader rotations (overrides config)
        #[arg(short = 'r', long)]
        max_rotations: Option<u32>,

        /// Leader rotation policy (overrides config)
        #[arg(short, long, value_enum)]
        policy: Option<PolicyArg>,

        /// Price served by the mocked feed (price-feed scenario)
        #[arg(long, default_value = "100")]
        price: i64,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScenarioName {
    Counter,
    PriceFeed,
    Disagree,
    Factory,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    ReExecute,
    RoundRobin,
    Seeded,
}

impl From<PolicyArg> for RotationPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::ReExecute => RotationPolicy::ReExecute,
            PolicyArg::RoundRobin => RotationPolicy::RoundRobin,
            PolicyArg::Seeded => RotationPolicy::Seeded,
        }
    }
}

const FEED_URL: &str = "https://api.example.com/price";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_ref()).and_then(|config| match cli.command {
        Commands::Scenario {
            name,
            validators,
            max_rotations,
            policy,
            price,
        } => handle_scenario(config, name, validators, max_rotations, policy, price),
        Commands::Config => handle_config(config),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimConfig> {
    match path {
        Some(path) => SimConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(SimConfig::default()),
    }
}

fn handle_config(config: SimConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn handle_scenario(
    mut config: SimConfig,
    name: ScenarioName,
    validators: Option<usize>,
    max_rotations: Option<u32>,
    policy: Option<PolicyArg>,
    price: i64,
) -> anyhow::Result<()> {
    if let Some(validators) = validators {
        config.validators = validators;
    }
    if let Some(max_rotations) = max_rotations {
        config.max_rotations = max_rotations;
    }
    if let Some(policy) = policy {
        config.rotation_policy = policy.into();
    }

    let mut vm = Vm::new(config)?;
    register_demo_contracts(&mut vm);
    let alice = Address::from_seed("alice");
    vm.set_sender(alice);

    let request = match name {
        ScenarioName::Counter => {
            let counter = vm.deploy(COUNTER, &[json!(0)])?;
            TransactionRequest::call(alice, counter, "increment", vec![])
        }
        ScenarioName::PriceFeed => {
            vm.mock_web(&regex::escape(FEED_URL), WebResponse::json(&json!({ "price": price })))?;
            let feed = vm.deploy(PRICE_FEED, &[json!(FEED_URL)])?;
            TransactionRequest::call(alice, feed, "update_price", vec![])
        }
        ScenarioName::Disagree => {
            let contract = vm.deploy(DISAGREE, &[])?;
            TransactionRequest::call(alice, contract, "always_disagree", vec![])
        }
        ScenarioName::Factory => TransactionRequest::deploy(alice, FACTORY, vec![json!(5)]),
    };

    let receipt = vm.submit(request)?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    for line in vm.traces() {
        eprintln!("trace: {}", line);
    }
    Ok(())
}
