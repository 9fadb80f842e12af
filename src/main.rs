use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use testcase_ingest::cli::{Args, Command};
use testcase_ingest::report::{self, FailureReport, IngestReport, QuestionReport};
use testcase_ingest::{check_upload_name, IngestError, IngestService, JsonFileStore, NewQuestion, QuestionId};

fn main() {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Invalid arguments: {}", e);
        std::process::exit(2);
    }

    init_logging(args.verbose);

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print one JSON report on stdout (and to `--report`); false if the operation failed
fn run(args: &Args) -> Result<bool> {
    let (json, succeeded) = render(args)?;
    println!("{json}");
    if let Some(path) = &args.report {
        report::write_report_file(path, &json)
            .with_context(|| format!("writing report {}", path.display()))?;
    }
    Ok(succeeded)
}

/// Run the requested operation and render its report
fn render(args: &Args) -> Result<(String, bool)> {
    let store = JsonFileStore::open(&args.metadata, args.metadata_backup)
        .with_context(|| format!("opening metadata store {}", args.metadata.display()))?;
    let service = IngestService::new(args.to_config(), store).context("building ingest service")?;

    let rendered = match &args.command {
        Command::Add { name, time, archive } => {
            let source = match open_archive(archive) {
                Ok(source) => source,
                Err(err) => return error_report(&err),
            };
            match service.add_question(NewQuestion::new(name.clone(), *time), source) {
                Ok(outcome) => {
                    let question = service.show_question(&outcome.question_id).ok();
                    report::to_json(&IngestReport::new(outcome, question))
                }
                Err(failure) => return failure_report(report::to_json(&FailureReport::from(&failure))),
            }
        }
        Command::EditTestcases { id, archive } => {
            let prepared = parse_id(id).and_then(|id| open_archive(archive).map(|source| (id, source)));
            let (id, source) = match prepared {
                Ok(prepared) => prepared,
                Err(err) => return error_report(&err),
            };
            match service.edit_testcases(&id, source) {
                Ok(outcome) => {
                    let question = service.show_question(&id).ok();
                    report::to_json(&IngestReport::new(outcome, question))
                }
                Err(failure) => return failure_report(report::to_json(&FailureReport::from(&failure))),
            }
        }
        Command::Edit { id, name, time } => question_report(
            parse_id(id).and_then(|id| service.edit_question(&id, name, *time)),
        ),
        Command::Delete { id } => match parse_id(id).and_then(|id| service.delete_question(&id)) {
            Ok(()) => report::to_json(&QuestionReport::new(None)),
            Err(err) => return error_report(&err),
        },
        Command::Show { id } => question_report(parse_id(id).and_then(|id| service.show_question(&id))),
        Command::Reconcile { id } => {
            question_report(parse_id(id).and_then(|id| service.reconcile(&id)))
        }
    };

    match rendered {
        Ok(json) => Ok((json, true)),
        Err(err) => error_report(&err),
    }
}

fn parse_id(raw: &str) -> testcase_ingest::Result<QuestionId> {
    QuestionId::parse(raw)
}

fn open_archive(path: &Path) -> testcase_ingest::Result<BufReader<File>> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    check_upload_name(&file_name)?;
    Ok(BufReader::new(File::open(path)?))
}

fn question_report(
    result: testcase_ingest::Result<testcase_ingest::Question>,
) -> testcase_ingest::Result<String> {
    result.and_then(|question| report::to_json(&QuestionReport::new(Some(question))))
}

fn error_report(err: &IngestError) -> Result<(String, bool)> {
    failure_report(report::to_json(&FailureReport::from(err)))
}

fn failure_report(json: testcase_ingest::Result<String>) -> Result<(String, bool)> {
    Ok((json.context("serializing failure report")?, false))
}
