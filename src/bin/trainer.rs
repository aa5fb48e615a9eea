use anyhow::Result;
use cdlrec::algorithms::RandomBatchSampler;
use cdlrec::{init_tracing, Config, Dataset, TrainingService};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON dataset with `content`, `users` and optional `test_users`
    #[arg(short, long)]
    data: Option<String>,

    #[arg(long, default_value_t = 200)]
    synthetic_users: usize,

    #[arg(long, default_value_t = 500)]
    synthetic_items: usize,

    /// Continue from saved weights and user factors; item factors and Theta
    /// are always re-encoded from the content when training starts
    #[arg(long)]
    resume: bool,

    /// Report recall@M on the held-out interactions after training
    #[arg(long)]
    evaluate: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting CDL trainer");

    let config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    config.validate()?;
    info!("Training configuration loaded: {:?}", config.training);

    let dataset = match &args.data {
        Some(path) => Dataset::from_json_file(path)?,
        None => {
            info!(
                "No dataset given, generating {} users x {} items",
                args.synthetic_users, args.synthetic_items
            );
            let mut dataset = Dataset::synthetic(
                args.synthetic_users,
                args.synthetic_items,
                config.model.input_dim,
                10,
                config.training.seed,
            );
            dataset.hold_out(0.2, config.training.seed);
            dataset
        }
    };

    let content = dataset.content_matrix()?;
    let index = dataset.interaction_index()?;
    info!(
        "Dataset ready: {} users, {} items, {} interactions",
        index.num_users(),
        index.num_items(),
        index.num_interactions()
    );
    let config = Arc::new(config);
    let mut service = TrainingService::new(config.clone(), dataset.num_users(), dataset.num_items())?;

    let weight_path = config.storage.weight_path.as_str();
    let pmf_path = config.storage.pmf_path.as_deref();
    if args.resume {
        service.load_model(weight_path, pmf_path)?;
        info!("Resuming from saved weights and user factors; item factors will be re-encoded");
    }

    let mut sampler = RandomBatchSampler::new(config.training.seed);
    let report = service.run(&content, &index, &mut sampler)?;
    if let Some(loss) = report.final_loss() {
        info!("Training finished after {} epochs, loss={:.5}", report.epochs.len(), loss);
    }

    service.save_model(weight_path, pmf_path)?;

    if args.evaluate {
        let recall = service.evaluate(&index, &dataset.test_users);
        info!(
            "recall@{}={:.5} over {} users",
            recall.m, recall.recall_at_m, recall.evaluated_users
        );
    }

    Ok(())
}
