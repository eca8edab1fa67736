use std::process::ExitCode;

use caravan::cli::{self, Args};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_args();
    cli::init_logging(args.verbose, args.no_color);

    match cli::execute(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
