// src/main.rs
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::prelude::*;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use gasless_sponsor::bindings::{encode_execution, encode_token_transfer};
use gasless_sponsor::error::CodecError;
use gasless_sponsor::quantity::parse_quantity_str;
use gasless_sponsor::types::GasEstimate;
use gasless_sponsor::{
    fee_from_receipt, BundlerClient, BundlerConfig, EstimateMode, EthersChain, PaymasterKind,
    SponsorConfig, SponsorshipOrchestrator, SubmitRequest,
};

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;
type Orchestrator = SponsorshipOrchestrator<EthersChain<Client>, EthersChain<Client>, LocalWallet>;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, env = "ETH_RPC_URL")]
    eth_rpc_url: String,

    #[clap(short, long, env = "BUNDLER_URL")]
    bundler_url: String,

    /// Sponsor key; also signs user operations for the smart account.
    #[clap(short, long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    #[clap(long, env = "PAYMASTER_ADDRESS")]
    paymaster: Address,

    #[clap(long, env = "GAS_TOKEN_ADDRESS")]
    gas_token: Address,

    /// Use the multi-tenant paymaster layout on behalf of this operator.
    #[clap(long, env = "OPERATOR_ADDRESS")]
    operator: Option<Address>,

    #[clap(
        long,
        env = "ENTRY_POINT_ADDRESS",
        default_value = "0x0000000071727De22E5E9d8BAf0edAc6f37da032"
    )]
    entry_point: Address,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a sponsor can pay for gasless operations.
    Readiness {
        /// Defaults to the key's address.
        #[clap(long)]
        sponsor: Option<Address>,
    },
    /// Send the transactions that make the key's address ready.
    Prepare,
    /// Sponsor `execute(target, value, data)` on a smart account.
    Send {
        #[clap(long)]
        sender: Address,
        #[clap(long)]
        target: Address,
        #[clap(long, value_parser = parse_amount, default_value = "0")]
        value: U256,
        #[clap(long, value_parser = parse_hex, default_value = "0x")]
        data: Bytes,
        #[clap(flatten)]
        gas: GasArgs,
        #[clap(long)]
        wait: bool,
    },
    /// Sponsor an ERC-20 transfer out of a smart account.
    Transfer {
        #[clap(long)]
        sender: Address,
        #[clap(long)]
        token: Address,
        #[clap(long)]
        to: Address,
        #[clap(long, value_parser = parse_amount)]
        amount: U256,
        #[clap(flatten)]
        gas: GasArgs,
        #[clap(long)]
        wait: bool,
    },
    /// Look up a user operation receipt.
    Receipt {
        hash: H256,
        #[clap(long)]
        wait: bool,
    },
}

/// Tuned limits; giving any of them skips bundler estimation.
#[derive(clap::Args, Debug)]
struct GasArgs {
    #[clap(long, value_parser = parse_amount)]
    verification_gas: Option<U256>,
    #[clap(long, value_parser = parse_amount)]
    call_gas: Option<U256>,
    #[clap(long, value_parser = parse_amount)]
    pre_verification_gas: Option<U256>,
    #[clap(long, value_parser = parse_amount)]
    paymaster_verification_gas: Option<U256>,
    #[clap(long, value_parser = parse_amount)]
    paymaster_post_op_gas: Option<U256>,
}

impl GasArgs {
    fn mode(&self) -> EstimateMode {
        let limits = GasEstimate {
            pre_verification_gas: self.pre_verification_gas,
            verification_gas_limit: self.verification_gas,
            call_gas_limit: self.call_gas,
            paymaster_verification_gas_limit: self.paymaster_verification_gas,
            paymaster_post_op_gas_limit: self.paymaster_post_op_gas,
        };
        if limits == GasEstimate::default() {
            EstimateMode::Auto
        } else {
            EstimateMode::Manual(limits)
        }
    }
}

fn parse_amount(s: &str) -> Result<U256, CodecError> {
    parse_quantity_str(s)
}

fn parse_hex(s: &str) -> Result<Bytes, hex::FromHexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map(Bytes::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let provider = Provider::<Http>::try_from(args.eth_rpc_url.as_str())?;
    let chain_id = provider.get_chainid().await?;
    let chain_id = u64::try_from(chain_id).map_err(anyhow::Error::msg)?;
    let wallet = args
        .private_key
        .parse::<LocalWallet>()?
        .with_chain_id(chain_id);
    let sponsor = wallet.address();
    info!("Using sponsor {:?} on chain {}", sponsor, chain_id);

    let client = Arc::new(SignerMiddleware::new(provider, wallet.clone()));
    let chain = Arc::new(EthersChain::new(client, sponsor));

    let kind = match args.operator {
        Some(operator) => PaymasterKind::multi_tenant(operator),
        None => PaymasterKind::token_priced(),
    };
    let config = SponsorConfig::new(args.paymaster, args.gas_token, kind)
        .with_entry_point(args.entry_point);
    let bundler = BundlerClient::new(&BundlerConfig::new(args.bundler_url), args.entry_point)?;

    let orchestrator = SponsorshipOrchestrator::new(
        chain.clone(),
        chain,
        Arc::new(wallet),
        Arc::new(bundler),
        config,
    );

    if let Err(e) = run(&orchestrator, sponsor, args.command).await {
        if let Some(sponsor_error) = e.downcast_ref::<gasless_sponsor::SponsorError>() {
            error!("[{}] {}", sponsor_error.kind(), sponsor_error);
        }
        return Err(e);
    }
    Ok(())
}

async fn run(orchestrator: &Orchestrator, sponsor: Address, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Readiness { sponsor: who } => {
            let report = orchestrator
                .check_gasless_readiness(who.unwrap_or(sponsor))
                .await?;
            if report.is_ready {
                info!("Ready for gasless operations");
            }
            for message in report.messages() {
                warn!("{}", message);
            }
            info!("{:#?}", report.details);
        }
        Command::Prepare => {
            let steps = orchestrator.prepare_gasless_environment().await?;
            for step in &steps {
                info!("{} confirmed: {:?}", step.step, step.hash);
            }
            let report = orchestrator.check_gasless_readiness(sponsor).await?;
            for message in report.messages() {
                warn!("Still outstanding: {}", message);
            }
        }
        Command::Send {
            sender,
            target,
            value,
            data,
            gas,
            wait,
        } => {
            let request = SubmitRequest {
                gas: gas.mode(),
                ..SubmitRequest::new(sender, encode_execution(target, value, data))
            };
            submit(orchestrator, request, wait).await?;
        }
        Command::Transfer {
            sender,
            token,
            to,
            amount,
            gas,
            wait,
        } => {
            let transfer = encode_token_transfer(to, amount);
            let request = SubmitRequest {
                gas: gas.mode(),
                ..SubmitRequest::new(sender, encode_execution(token, U256::zero(), transfer))
            };
            submit(orchestrator, request, wait).await?;
        }
        Command::Receipt { hash, wait } => {
            let receipt = if wait {
                orchestrator.wait_for_user_operation(hash).await?
            } else {
                orchestrator.bundler().get_user_operation_receipt(hash).await?
            };
            match receipt {
                Some(receipt) => report_receipt(orchestrator, &receipt),
                None => warn!("No receipt for {:?}", hash),
            }
        }
    }
    Ok(())
}

async fn submit(orchestrator: &Orchestrator, request: SubmitRequest, wait: bool) -> anyhow::Result<()> {
    orchestrator.bundler().ensure_entry_point_supported().await?;
    let hash = orchestrator.submit(&request).await?;
    info!("User operation hash: {:?}", hash);
    if wait {
        match orchestrator.wait_for_user_operation(hash).await? {
            Some(receipt) => report_receipt(orchestrator, &receipt),
            None => warn!("User operation {:?} not included yet", hash),
        }
    }
    Ok(())
}

fn report_receipt(orchestrator: &Orchestrator, receipt: &gasless_sponsor::rpc::UserOperationReceipt) {
    info!(
        "success={} gas_used={} gas_cost={} tx={:?}",
        receipt.success,
        receipt.actual_gas_used,
        receipt.actual_gas_cost,
        receipt.transaction_hash()
    );
    if let Some(reason) = &receipt.reason {
        warn!("Revert reason: {}", reason);
    }
    if let Some(fee) = fee_from_receipt(receipt, orchestrator.config().paymaster) {
        info!(
            "Paymaster charged {} tokens for {} wei of gas",
            fee.token_cost, fee.actual_gas_cost_wei
        );
    }
}
