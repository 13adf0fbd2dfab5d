//! `mmlda-eval`: sweep perturbation budgets against a trained classifier and
//! print the accuracy under attack for each one.
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{debug, info, LevelFilter};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use mmlda_rs::artifact::ModelWeights;
use mmlda_rs::dataset::{prepare, RawTestSplit};
use mmlda_rs::targets::sample_target_labels;
use mmlda_rs::{
    AttackStrategy, ClassMeans, Classifier, EvalConfig, EvaluationContext, Head, MarginLayer,
    ThreatModel,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "mmlda-eval", about)]
struct Cli {
    /// JSON configuration file; replaces the per-option flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// log4rs YAML configuration.
    #[arg(long)]
    log_config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    flags: EvalConfig,
}

fn init_logging(log_config: Option<&Path>, verbose: u8) -> Result<()> {
    if let Some(path) = log_config {
        return log4rs::init_file(path, Default::default())
            .with_context(|| format!("reading log configuration {}", path.display()));
    }
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {l} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn run(config: &EvalConfig) -> Result<()> {
    debug!("{:?}", config);
    let num_classes = config.dataset.num_classes();

    let raw = RawTestSplit::load(&config.dataset.test_file(&config.data_dir))?;
    let (test_set, clip) = prepare(config.dataset, raw, config.subtract_pixel_mean)?;

    info!("{}", if config.use_bn { "Using BN" } else { "Not using BN" });
    let weights_path = config.weights_path();
    let ModelWeights {
        backbone,
        softmax_head,
    } = ModelWeights::load(&weights_path)?;

    let head = if config.use_mmlda {
        info!("Using MMLDA");
        let means = ClassMeans::load(
            &config.kernel_dir,
            config.version.feature_dim(),
            num_classes,
            config.mean_var,
        )?;
        Head::Margin(MarginLayer::new(means, config.score_policy()))
    } else {
        info!("Using softmax loss");
        Head::Softmax(softmax_head.with_context(|| {
            format!("{} has no softmax head", weights_path.display())
        })?)
    };
    let classifier = Classifier::new(backbone, head)?;
    classifier.check_num_classes(num_classes)?;

    let threat = if config.target {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let targets = sample_target_labels(&test_set.labels().view(), num_classes, &mut rng)?;
        ThreatModel::Targeted { targets }
    } else {
        ThreatModel::Untargeted
    };

    let mut context = EvaluationContext::new(
        classifier,
        test_set,
        clip,
        threat,
        AttackStrategy::from_kind(config.attack_method, config.decay_factor),
        config.schedule(),
        config.batch_size,
        config.seed,
    )?;
    for pixel_step in config.sweep()?.pixel_steps() {
        let report = context.evaluate_budget(pixel_step)?;
        println!("{}", report);
    }
    context.release();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_config.as_deref(), cli.verbose)?;
    let config = match cli.config {
        Some(ref path) => EvalConfig::from_json_file(path)?,
        None => {
            cli.flags.validate()?;
            cli.flags
        }
    };
    run(&config)
}
