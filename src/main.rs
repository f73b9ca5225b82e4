use anyhow::Context;
use clap::Parser;
use foncier_extract::{
    logging, Cli, ExtractError, FoncierExtract, OutputFormatter, OutputMode, UserFriendlyError,
};
use std::process;

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    logging::init(logging::level_for_verbosity(cli.verbose, cli.quiet));

    if cli.generate_config {
        return handle_generate_config(&cli);
    }

    let app = match FoncierExtract::from_cli(&cli) {
        Ok(app) => app,
        Err(e) => {
            print_startup_error(&e);
            return exit_code(&e);
        }
    };

    if cli.dry_run {
        return handle_dry_run(&cli, &app);
    }

    match app.run_extraction(cli.task_args()).await {
        Ok(result) => {
            app.output_formatter().print_archive_result(&result);
            if result.archive_path.is_some() {
                0
            } else {
                // Lenient archival: the job completed without an archive
                2
            }
        }
        Err(e) => {
            app.handle_error(&e);
            exit_code(&e)
        }
    }
}

fn exit_code(error: &ExtractError) -> i32 {
    match error {
        ExtractError::Cancelled => 130, // Interrupted (SIGINT)
        ExtractError::InvalidFormat { .. } => 3,
        ExtractError::Config { .. } => 4,
        ExtractError::Database(_) => 5,
        ExtractError::Converter(_) => 6,
        ExtractError::Workspace { .. } => 7,
        ExtractError::Archive { .. } => 8,
        ExtractError::Task { .. } => 9,
        _ => 1,
    }
}

fn handle_generate_config(cli: &Cli) -> i32 {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| "foncier-extract.toml".into());

    let written = FoncierExtract::generate_sample_config(&config_path).with_context(|| {
        format!(
            "Failed to generate configuration file {}",
            config_path.display()
        )
    });

    match written {
        Ok(()) => {
            println!(
                "Generated sample configuration file: {}",
                config_path.display()
            );
            println!("\nTo use this configuration:");
            println!(
                "  foncier-extract --config {} --year <YEAR> --format <FORMAT> --proj <EPSG> --email <EMAIL>",
                config_path.display()
            );
            0
        }
        Err(e) => {
            eprintln!("{:#}", e);
            1
        }
    }
}

fn handle_dry_run(cli: &Cli, app: &FoncierExtract) -> i32 {
    let formatter = app.output_formatter();

    formatter.info("DRY RUN MODE - nothing will be extracted");
    formatter.print_separator();

    let request = match cli.to_request() {
        Ok(request) => request,
        Err(e) => {
            app.handle_error(&e);
            return exit_code(&e);
        }
    };
    formatter.success(&format!(
        "Request is valid: {} {} in EPSG:{}",
        request.schema(),
        request.format,
        request.projection
    ));

    let plan = match app.plan(&request) {
        Ok(plan) => plan,
        Err(e) => {
            app.handle_error(&e);
            return exit_code(&e);
        }
    };

    match formatter.mode() {
        OutputMode::Json => {
            let json = serde_json::json!({
                "type": "plan",
                "schema": plan.schema,
                "workspace": plan.workspace_dir,
                "archive_extension": plan.archive_extension,
                "command": plan.command,
                "database_configured": plan.database_configured,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_else(|_| "{}".to_string())
            );
        }
        _ => {
            println!("  Schema:    {}", plan.schema);
            println!("  Workspace: {}", plan.workspace_dir);
            println!("  Archive:   {}{}", plan.workspace_dir, plan.archive_extension);
            println!("  Command:   {}", plan.command.join(" "));
            println!("  Cities:    {}", request.cities.join(", "));
        }
    }

    if !plan.database_configured {
        formatter.warning("No database URL configured; set PG_CONNECT_STRING before running");
    }

    formatter.print_separator();
    formatter.success("Dry run completed successfully");
    0
}

fn print_startup_error(error: &ExtractError) {
    let formatter = OutputFormatter::new(OutputMode::Human, 0, false);
    formatter.print_user_friendly_error(error);
}
