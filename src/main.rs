use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;

use redeem_nestcv::config::{load_engine_config, EngineConfig};
use redeem_nestcv::engine::{EngineOutcome, LearnerSet, UnbiasedAccuracyEngine};
use redeem_nestcv::io::{read_dataset, DatasetReaderConfig};
use redeem_nestcv::models::factory::build_learner;
use redeem_nestcv::persist::{JsonResultPersister, ResultPersister};
use redeem_nestcv::report::render_html;
use redeem_nestcv::stats::StatReport;

fn main() -> Result<()> {
    let matches = Command::new("redeem-nestcv")
        .version(clap::crate_version!())
        .author("Justin Sing <justincsing@gmail.com>")
        .about("Unbiased accuracy estimation by nested cross-validation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log debug messages of the engine")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Estimate the unbiased accuracy of the configured learners")
                .arg(
                    Arg::new("config")
                        .help("Path to the engine JSON configuration file")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .help("Path to the dataset (*.csv or *.tsv)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("response")
                        .short('r')
                        .long("response")
                        .help("Name of the response column")
                        .required(true)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("structure_column")
                        .long("structure-column")
                        .help("Column holding structural identifiers such as SMILES")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("meta_column")
                        .long("meta-column")
                        .help("Non-feature string column to keep, e.g. a fold control column")
                        .action(ArgAction::Append)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("classification")
                        .long("classification")
                        .help("Treat the response as categorical even when it is numeric")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("output_file")
                        .short('o')
                        .long("output")
                        .help("Path to write the results (JSON). Overrides results_file of the config.")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("report_file")
                        .long("report")
                        .help("Path to write an HTML report")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let mut logger = env_logger::Builder::default();
    logger
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("REDEEM_LOG", "error,redeem_nestcv=info"));
    if matches.get_flag("verbose") {
        logger.filter_module("redeem_nestcv", LevelFilter::Debug);
    }
    logger.init();

    match matches.subcommand() {
        Some(("run", run_matches)) => match handle_run(run_matches) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("Run failed: {:#}", e);
                std::process::exit(1)
            }
        },
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn reader_config(config: &EngineConfig, matches: &ArgMatches) -> Result<DatasetReaderConfig> {
    let response = matches
        .get_one::<String>("response")
        .ok_or_else(|| anyhow!("--response is required"))?;
    let mut meta_columns: Vec<String> = matches
        .get_many::<String>("meta_column")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    if let Some(control) = &config.fold_control {
        let attribute = control.attribute().to_string();
        if !meta_columns.contains(&attribute) {
            meta_columns.push(attribute);
        }
    }
    Ok(DatasetReaderConfig {
        response_column: response.clone(),
        structure_column: matches.get_one::<String>("structure_column").cloned(),
        meta_columns,
        classification: matches.get_flag("classification").then_some(true),
        ..DatasetReaderConfig::default()
    })
}

fn learner_set(config: &EngineConfig) -> Result<LearnerSet> {
    if config.learners.is_empty() {
        return Err(anyhow!("The configuration does not list any learner"));
    }
    let learners: Vec<_> = config
        .learners
        .iter()
        .map(|entry| (entry.name.clone(), build_learner(entry)))
        .collect();
    match (learners.len(), &config.param_list) {
        (1, Some(_)) => Ok(LearnerSet::Single(learners[0].1.clone())),
        _ => Ok(LearnerSet::Multi(learners)),
    }
}

fn handle_run(matches: &ArgMatches) -> Result<()> {
    let config_path = matches
        .get_one::<PathBuf>("config")
        .ok_or_else(|| anyhow!("A configuration file is required"))?;
    let data_path = matches
        .get_one::<PathBuf>("data")
        .ok_or_else(|| anyhow!("--data is required"))?;
    log::info!("[ReDeeM::NestCV] Running with config: {:?}", config_path);

    let mut config = load_engine_config(config_path)?;
    if let Some(output) = matches.get_one::<PathBuf>("output_file") {
        config.results_file = Some(output.clone());
    }

    let data = read_dataset(data_path, &reader_config(&config, matches)?)?;
    let learners = learner_set(&config)?;
    let names: Vec<String> = config.learners.iter().map(|e| e.name.clone()).collect();
    let results_file = config.results_file.clone();

    let engine = UnbiasedAccuracyEngine::new(config, data, learners);
    let outcome = engine
        .run()
        .context("Nested cross-validation failed")?
        .ok_or_else(|| anyhow!("The run was cancelled"))?;

    let results: BTreeMap<String, StatReport> = match outcome {
        EngineOutcome::Single(report) => {
            let name = names.first().cloned().unwrap_or_else(|| "Learner".to_string());
            BTreeMap::from([(name, report)])
        }
        EngineOutcome::Multi(map) => map,
    };

    print_summary(&results);

    if results_file.is_some() {
        JsonResultPersister::new(results_file).save(&results)?;
    }
    if let Some(report_path) = matches.get_one::<PathBuf>("report_file") {
        std::fs::write(report_path, render_html(&results))
            .with_context(|| format!("Failed to write report: {}", report_path.display()))?;
        log::info!("Report written to {}", report_path.display());
    }
    Ok(())
}

fn print_summary(results: &BTreeMap<String, StatReport>) {
    let fmt = |v: Option<f64>| v.map_or_else(|| "NA".to_string(), |v| format!("{:.4}", v));
    println!(
        "{:<20} {:>8} {:>8} {:>8} {:>8} {:>10} {:>7}",
        "learner", "CA", "MCC", "Q2", "RMSE", "stability", "stable"
    );
    for (name, report) in results {
        println!(
            "{:<20} {:>8} {:>8} {:>8} {:>8} {:>10} {:>7}",
            name,
            fmt(report.ca),
            fmt(report.mcc),
            fmt(report.q2),
            fmt(report.rmse),
            fmt(report.stability_value),
            report.stable
        );
    }
}
