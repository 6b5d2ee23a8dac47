use clap::Parser;
use slack_backup::{Cli, Commands, commands};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Backup {
            out,
            types,
            conversation_id,
            oldest,
            latest,
            concurrency,
        } => {
            commands::run_backup(&out, types, conversation_id, oldest, latest, concurrency).await
        }
        Commands::AddFileTokens {
            path,
            token,
            dry_run,
            recursive,
        } => commands::run_add_file_tokens(&path, token, dry_run, recursive),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
