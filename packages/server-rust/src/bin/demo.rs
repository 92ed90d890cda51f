//! Order pipeline demo on the in-memory broker.
//!
//! `on_orders` consumes orders and publishes a receipt for each through the
//! `to_receipts` producer; `on_receipts` logs the receipts it sees.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use topicflow_core::{payload, ConsumeLoop, KafkaConfig, ProducerFactory, SpecExporter};
use topicflow_server::{
    host, AppConfig, Collaborators, ConsumeSpec, ManifestExporter, MemoryBroker,
    MemoryConsumeLoop, MemoryProducerFactory, Orchestrator, ProduceSpec, Registrar,
};

#[derive(Parser, Debug)]
#[command(name = "topicflow-demo", version, about)]
struct Args {
    /// Broker endpoint recorded in the client config.
    #[arg(long, env = "TOPICFLOW_BOOTSTRAP_SERVERS", default_value = "localhost:9092")]
    bootstrap_servers: String,

    /// Root directory for generated artifacts.
    #[arg(long, value_name = "PATH", default_value = ".")]
    root_path: PathBuf,

    /// Emit JSON logs.
    #[arg(long, env = "TOPICFLOW_JSON_LOGS")]
    json_logs: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(long, value_name = "SECS")]
    run_for_secs: Option<u64>,

    /// Number of orders to seed.
    #[arg(long, default_value_t = 5)]
    orders: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: u64,
    quantity: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Receipt {
    order_id: u64,
    total_cents: u64,
}

fn to_receipts(order: Order) -> Receipt {
    Receipt {
        order_id: order.id,
        total_cents: u64::from(order.quantity) * 250,
    }
}

async fn on_receipts(receipt: Receipt) -> anyhow::Result<()> {
    info!(order_id = receipt.order_id, total_cents = receipt.total_cents, "receipt issued");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    host::init_tracing(args.json_logs)?;

    let mut registrar = Registrar::new();
    let produce_receipt = registrar.register_producer_fn(ProduceSpec::new(), to_receipts)?;
    let _on_orders = registrar.register_consumer(
        "on_orders",
        ConsumeSpec::new().option("group_id", "billing"),
        move |order: Order| {
            let produce_receipt = produce_receipt.clone();
            async move {
                produce_receipt.call(order).await?;
                anyhow::Ok(())
            }
        },
    )?;
    let _on_receipts = registrar.register_consumer_fn(ConsumeSpec::new(), on_receipts)?;

    let broker = Arc::new(MemoryBroker::new());
    for id in 1..=args.orders {
        let quantity = u32::try_from(id % 7 + 1)?;
        broker.append("orders", payload::encode(&Order { id, quantity })?)?;
    }

    let config = AppConfig {
        kafka: KafkaConfig::default().with("bootstrap_servers", args.bootstrap_servers),
        root_path: args.root_path,
        ..AppConfig::default()
    };
    let orchestrator = Orchestrator::new(
        registrar.finish(),
        config,
        Collaborators {
            consume_loop: Arc::new(MemoryConsumeLoop::new(Arc::clone(&broker)))
                as Arc<dyn ConsumeLoop>,
            producer_factory: Arc::new(MemoryProducerFactory::new(Arc::clone(&broker)))
                as Arc<dyn ProducerFactory>,
            exporter: Arc::new(ManifestExporter) as Arc<dyn SpecExporter>,
        },
    );

    match args.run_for_secs {
        Some(secs) => {
            host::serve(&orchestrator, tokio::time::sleep(Duration::from_secs(secs))).await?;
        }
        None => host::serve(&orchestrator, host::shutdown_signal()).await?,
    }

    info!(
        receipts = broker.records("receipts").len(),
        "demo finished"
    );
    Ok(())
}
